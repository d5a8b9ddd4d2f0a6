use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use regex::Regex;
use uuid::Uuid;

use crate::ast::{NamedWindow, Query};
use crate::config::{Dialect, ExecutionConfig, QueryOptions};
use crate::errors::{Result, evaluation, structural};
use crate::row::{Record, Row};
use crate::util::stable_hash;
use crate::value::ScalarValue;

/// Materialized output of a query: column names plus records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOutput {
    pub columns: Vec<String>,
    pub rows: Vec<Record>,
}

impl QueryOutput {
    pub fn new(columns: Vec<String>, rows: Vec<Record>) -> Self {
        QueryOutput { columns, rows }
    }
}

/// A materialized CTE.
#[derive(Debug)]
pub struct CteEntry {
    pub columns: Vec<String>,
    pub rows: Arc<[Record]>,
}

/// An enclosing row visible to correlated subqueries and LATERAL items.
#[derive(Debug)]
pub struct OuterScope {
    pub row: Row,
    pub parent: Option<Arc<OuterScope>>,
}

/// Caches shared by every scope of one top-level call.
#[derive(Debug, Default)]
struct CallCaches {
    /// Output of non-correlated subqueries, keyed by CTE scope and the
    /// structural hash of the query.
    subqueries: Mutex<HashMap<(u64, u64), Arc<QueryOutput>>>,
    /// Correlation check results, keyed by CTE scope and structural hash.
    correlated: Mutex<HashMap<(u64, u64), bool>>,
    /// Compiled LIKE patterns.
    like_patterns: Mutex<HashMap<String, Regex>>,
    /// Source of CTE scope ids.
    next_scope: AtomicU64,
}

/// Per-call evaluation state.
///
/// Cloning is cheap. Nested scopes (subqueries, derived tables, CTE bodies)
/// get a derived context that inherits the CTE registry and caches.
#[derive(Debug, Clone)]
pub struct QueryContext {
    pub dialect: Dialect,
    pub tx_id: Uuid,
    /// Drain base table cursors before handing rows downstream.
    pub buffered: bool,
    params: Arc<[ScalarValue]>,
    ctes: Arc<HashMap<String, Arc<CteEntry>>>,
    /// Identifies the CTE bindings above. The same query text can read
    /// different CTEs in different scopes.
    cte_scope: u64,
    outer: Option<Arc<OuterScope>>,
    /// Named windows of the SELECT currently being evaluated.
    windows: Arc<[NamedWindow]>,
    depth: usize,
    max_depth: usize,
    max_recursive_iterations: usize,
    /// Set while iterating a recursive CTE, where the CTE's contents change
    /// between evaluations of the same query node.
    no_cache: bool,
    caches: Arc<CallCaches>,
}

impl QueryContext {
    pub fn new(config: &ExecutionConfig, opts: &QueryOptions, tx_id: Uuid) -> Self {
        QueryContext {
            dialect: opts.dialect.unwrap_or(config.dialect),
            tx_id,
            buffered: opts.buffered.unwrap_or(config.buffer_scans),
            params: opts.params.clone().into(),
            ctes: Arc::new(HashMap::new()),
            cte_scope: 0,
            outer: None,
            windows: Arc::from(Vec::new()),
            depth: 0,
            max_depth: config.max_subquery_depth as usize,
            max_recursive_iterations: config.max_recursive_iterations as usize,
            no_cache: false,
            caches: Arc::new(CallCaches::default()),
        }
    }

    /// Context with default configuration, for evaluating expressions
    /// outside of a statement.
    pub fn with_dialect(dialect: Dialect) -> Self {
        let opts = QueryOptions::default().with_dialect(dialect);
        Self::new(&ExecutionConfig::default(), &opts, Uuid::nil())
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn max_recursive_iterations(&self) -> usize {
        self.max_recursive_iterations
    }

    /// Value of a 1-based positional parameter.
    pub fn param(&self, idx: usize) -> Result<&ScalarValue> {
        idx.checked_sub(1)
            .and_then(|idx| self.params.get(idx))
            .ok_or_else(|| {
                evaluation!(
                    "there is no parameter ${idx}, {} parameters were bound",
                    self.params.len()
                )
            })
    }

    /// Context for a nested query scope.
    pub fn nested(&self) -> Result<QueryContext> {
        let depth = self.depth + 1;
        if depth > self.max_depth {
            return Err(evaluation!(
                "query nesting exceeds max_subquery_depth ({})",
                self.max_depth
            ));
        }
        let mut ctx = self.clone();
        ctx.depth = depth;
        ctx.windows = Arc::from(Vec::new());
        Ok(ctx)
    }

    /// Context where `row` is the innermost enclosing row.
    pub fn with_outer_row(&self, row: &Row) -> QueryContext {
        let mut ctx = self.clone();
        ctx.outer = Some(Arc::new(OuterScope {
            row: row.clone(),
            parent: self.outer.clone(),
        }));
        ctx
    }

    /// Iterate enclosing rows from innermost outward.
    pub fn outer_rows(&self) -> impl Iterator<Item = &Row> {
        std::iter::successors(self.outer.as_deref(), |scope| scope.parent.as_deref())
            .map(|scope| &scope.row)
    }

    pub fn with_windows(&self, windows: &[NamedWindow]) -> QueryContext {
        let mut ctx = self.clone();
        ctx.windows = windows.to_vec().into();
        ctx
    }

    pub fn named_window(&self, name: &str) -> Option<&NamedWindow> {
        self.windows.iter().find(|w| w.name == name)
    }

    pub fn cte(&self, name: &str) -> Option<&Arc<CteEntry>> {
        self.ctes.get(name)
    }

    /// Context with `entries` registered as CTEs on top of the inherited
    /// ones. Names must be unique among `entries`, and shadow inherited
    /// names.
    pub fn with_ctes(&self, entries: Vec<(String, Arc<CteEntry>)>) -> Result<QueryContext> {
        let mut ctes = (*self.ctes).clone();
        let mut seen = Vec::with_capacity(entries.len());
        for (name, entry) in entries {
            if seen.contains(&name) {
                return Err(structural!(
                    "WITH query name \"{name}\" specified more than once"
                ));
            }
            seen.push(name.clone());
            ctes.insert(name, entry);
        }
        let mut ctx = self.clone();
        ctx.ctes = Arc::new(ctes);
        ctx.cte_scope = self.caches.next_scope.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(ctx)
    }

    pub fn without_cache(&self) -> QueryContext {
        let mut ctx = self.clone();
        ctx.no_cache = true;
        ctx
    }

    pub fn cached_subquery(&self, query: &Query) -> Option<Arc<QueryOutput>> {
        if self.no_cache {
            return None;
        }
        self.caches
            .subqueries
            .lock()
            .get(&(self.cte_scope, stable_hash(query)))
            .cloned()
    }

    pub fn cache_subquery(&self, query: &Query, output: Arc<QueryOutput>) {
        if self.no_cache {
            return;
        }
        self.caches
            .subqueries
            .lock()
            .insert((self.cte_scope, stable_hash(query)), output);
    }

    /// Memoized correlation check for a query node.
    pub fn is_correlated(&self, query: &Query, check: impl FnOnce(&Query) -> bool) -> bool {
        let key = (self.cte_scope, stable_hash(query));
        if let Some(v) = self.caches.correlated.lock().get(&key) {
            return *v;
        }
        let correlated = check(query);
        self.caches.correlated.lock().insert(key, correlated);
        correlated
    }

    /// Compiled regex for a LIKE pattern. `%` matches any run of
    /// characters, `_` a single character, and matching is anchored and
    /// case-insensitive.
    pub fn like_regex(&self, pattern: &str) -> Result<Regex> {
        if let Some(re) = self.caches.like_patterns.lock().get(pattern) {
            return Ok(re.clone());
        }

        let mut source = String::with_capacity(pattern.len() + 8);
        source.push_str("(?is)^");
        let mut chars = pattern.chars();
        while let Some(c) = chars.next() {
            match c {
                '%' => source.push_str(".*"),
                '_' => source.push('.'),
                '\\' => match chars.next() {
                    Some(escaped) => source.push_str(&regex::escape(&escaped.to_string())),
                    None => source.push_str(&regex::escape("\\")),
                },
                c => source.push_str(&regex::escape(&c.to_string())),
            }
        }
        source.push('$');

        let re = Regex::new(&source)
            .map_err(|e| evaluation!("invalid LIKE pattern '{pattern}': {e}"))?;
        self.caches
            .like_patterns
            .lock()
            .insert(pattern.to_string(), re.clone());
        Ok(re)
    }
}
