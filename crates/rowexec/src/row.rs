use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::meta::{GroupMeta, WindowKey, WindowMeta};
use crate::util::StableHasher;
use crate::value::ScalarValue;

/// Pseudo-alias holding the proposed record during conflict resolution
/// (`EXCLUDED.col`, MySQL `VALUES(col)`).
pub const EXCLUDED_ALIAS: &str = "excluded";

/// A flat column-name to value map. This is what the store holds, and what
/// query results are made of.
pub type Record = IndexMap<String, ScalarValue>;

/// Build a record from `(column, value)` pairs.
pub fn record<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Record
where
    K: Into<String>,
    V: Into<ScalarValue>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

/// A row flowing through the FROM/JOIN chain: relation alias to that
/// relation's record.
///
/// Aliases are only ever added as the row moves left to right through the
/// join chain.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompositeRow {
    relations: IndexMap<String, Record>,
}

impl CompositeRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(alias: impl Into<String>, record: Record) -> Self {
        let mut row = CompositeRow::new();
        row.insert(alias, record);
        row
    }

    pub fn insert(&mut self, alias: impl Into<String>, record: Record) {
        self.relations.insert(alias.into(), record);
    }

    pub fn get(&self, alias: &str) -> Option<&Record> {
        self.relations.get(alias)
    }

    pub fn get_mut(&mut self, alias: &str) -> Option<&mut Record> {
        self.relations.get_mut(alias)
    }

    pub fn contains_alias(&self, alias: &str) -> bool {
        self.relations.contains_key(alias)
    }

    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.relations.keys().map(|s| s.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Record)> {
        self.relations.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut Record)> {
        self.relations.iter_mut().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.relations.is_empty()
    }

    /// Find an unqualified column, first alias containing it wins.
    pub fn find_column(&self, name: &str) -> Option<&ScalarValue> {
        self.relations.values().find_map(|rec| rec.get(name))
    }

    /// Concatenate two composite rows. Aliases of `right` are appended after
    /// those of `self`.
    pub fn join(&self, right: &CompositeRow) -> CompositeRow {
        let mut out = self.clone();
        for (alias, rec) in &right.relations {
            out.relations.insert(alias.clone(), rec.clone());
        }
        out
    }

    /// Structural hash over aliases, column names and values.
    pub fn structural_hash(&self) -> u64 {
        let mut hasher = StableHasher::new();
        for (alias, rec) in &self.relations {
            hasher.write(alias);
            for (col, val) in rec {
                hasher.write(col);
                hasher.write(val);
            }
        }
        hasher.finish()
    }
}

/// Window metadata for a row, keyed by the hash of the effective window
/// spec.
pub type WindowMetas = HashMap<WindowKey, WindowMeta>;

/// A pipeline element: the composite row plus side-channel metadata used by
/// aggregate and window evaluation.
#[derive(Debug, Clone, Default)]
pub struct Row {
    pub data: Arc<CompositeRow>,
    /// Set for group representatives after GROUP BY (or implicit
    /// aggregation).
    pub group: Option<Arc<GroupMeta>>,
    /// Set after the WINDOW stage.
    pub windows: Option<Arc<WindowMetas>>,
}

impl Row {
    pub fn new(data: CompositeRow) -> Self {
        Row {
            data: Arc::new(data),
            group: None,
            windows: None,
        }
    }

    /// A row with no relations, used for FROM-less SELECTs and for
    /// evaluating constant expressions.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn window(&self, key: WindowKey) -> Option<&WindowMeta> {
        self.windows.as_ref().and_then(|w| w.get(&key))
    }
}

impl From<CompositeRow> for Row {
    fn from(value: CompositeRow) -> Self {
        Row::new(value)
    }
}
