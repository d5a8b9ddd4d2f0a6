use std::cmp::Ordering;
use std::hash::{BuildHasher, Hash, Hasher};

use ahash::{AHasher, RandomState};

use crate::ast::OrderByExpr;
use crate::config::Dialect;
use crate::value::ScalarValue;

/// Hasher with fixed seeds. Hashes are stable for the lifetime of the
/// process, which is all window keys and row hashes need.
#[derive(Debug, Clone)]
pub struct StableHasher {
    inner: AHasher,
}

impl StableHasher {
    pub fn new() -> Self {
        let state = RandomState::with_seeds(
            0x243f_6a88_85a3_08d3,
            0x1319_8a2e_0370_7344,
            0xa409_3822_299f_31d0,
            0x082e_fa98_ec4e_6c89,
        );
        StableHasher {
            inner: state.build_hasher(),
        }
    }

    pub fn write<T: Hash + ?Sized>(&mut self, value: &T) {
        value.hash(&mut self.inner);
    }

    pub fn finish(&self) -> u64 {
        self.inner.finish()
    }
}

impl Default for StableHasher {
    fn default() -> Self {
        Self::new()
    }
}

pub fn stable_hash<T: Hash + ?Sized>(value: &T) -> u64 {
    let mut hasher = StableHasher::new();
    hasher.write(value);
    hasher.finish()
}

/// Direction and null placement of one sort key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortOrder {
    pub asc: bool,
    pub nulls_first: bool,
}

impl SortOrder {
    pub fn new(asc: bool, nulls_first: Option<bool>, dialect: Dialect) -> Self {
        SortOrder {
            asc,
            nulls_first: nulls_first.unwrap_or_else(|| dialect.default_nulls_first(asc)),
        }
    }

    pub fn from_order_by(order_by: &OrderByExpr, dialect: Dialect) -> Self {
        Self::new(order_by.is_asc(), order_by.nulls_first, dialect)
    }

    pub fn compare(&self, a: &ScalarValue, b: &ScalarValue) -> Ordering {
        match (a.is_null(), b.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) if self.nulls_first => Ordering::Less,
            (true, false) => Ordering::Greater,
            (false, true) if self.nulls_first => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => {
                let ord = a.total_cmp(b);
                if self.asc { ord } else { ord.reverse() }
            }
        }
    }
}

/// Compare two evaluated multi-column sort keys.
pub fn compare_sort_keys(a: &[ScalarValue], b: &[ScalarValue], orders: &[SortOrder]) -> Ordering {
    a.iter()
        .zip(b.iter())
        .zip(orders.iter())
        .map(|((a, b), order)| order.compare(a, b))
        .find(|ord| *ord != Ordering::Equal)
        .unwrap_or(Ordering::Equal)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_placement_follows_dialect() {
        let pg = SortOrder::new(true, None, Dialect::Postgres);
        let my = SortOrder::new(true, None, Dialect::MySql);
        let null = ScalarValue::Null;
        let one = ScalarValue::Int64(1);

        assert_eq!(Ordering::Greater, pg.compare(&null, &one));
        assert_eq!(Ordering::Less, my.compare(&null, &one));

        let pg_desc = SortOrder::new(false, None, Dialect::Postgres);
        assert_eq!(Ordering::Less, pg_desc.compare(&null, &one));
    }

    #[test]
    fn multi_key_compare() {
        let orders = [
            SortOrder::new(true, None, Dialect::Postgres),
            SortOrder::new(false, None, Dialect::Postgres),
        ];
        let a = [ScalarValue::Int64(1), ScalarValue::Int64(5)];
        let b = [ScalarValue::Int64(1), ScalarValue::Int64(7)];
        assert_eq!(Ordering::Greater, compare_sort_keys(&a, &b, &orders));
    }

    #[test]
    fn stable_hash_is_deterministic() {
        assert_eq!(stable_hash("abc"), stable_hash("abc"));
        assert_ne!(stable_hash("abc"), stable_hash("abd"));
    }
}
