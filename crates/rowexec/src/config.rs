use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use crate::errors::{ExecError, Result, structural};
use crate::value::ScalarValue;

/// SQL dialect. Drives null ordering defaults, division semantics, default
/// column naming and a handful of dialect-only functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Dialect {
    #[default]
    Postgres,
    MySql,
}

impl Dialect {
    /// Default for `NULLS FIRST` when an ORDER BY key doesn't specify one.
    ///
    /// Postgres sorts NULLs as larger than any value, MySQL as smaller.
    pub const fn default_nulls_first(&self, asc: bool) -> bool {
        match self {
            Dialect::Postgres => !asc,
            Dialect::MySql => asc,
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::Postgres => write!(f, "postgres"),
            Dialect::MySql => write!(f, "mysql"),
        }
    }
}

impl FromStr for Dialect {
    type Err = ExecError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(Dialect::Postgres),
            "mysql" => Ok(Dialect::MySql),
            other => Err(structural!("Unknown dialect '{other}'")),
        }
    }
}

/// Per-call options for [`crate::Engine::query`].
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Positional parameter values. `$1` is `params[0]`.
    pub params: Vec<ScalarValue>,
    /// Overrides the configured dialect.
    pub dialect: Option<Dialect>,
    /// Overrides the configured `buffer_scans`.
    pub buffered: Option<bool>,
}

impl QueryOptions {
    pub fn with_params(mut self, params: impl IntoIterator<Item = ScalarValue>) -> Self {
        self.params = params.into_iter().collect();
        self
    }

    pub fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = Some(dialect);
        self
    }

    pub fn with_buffered(mut self, buffered: bool) -> Self {
        self.buffered = Some(buffered);
        self
    }
}

pub const DEFAULT_MAX_SUBQUERY_DEPTH: u64 = 64;
pub const DEFAULT_MAX_RECURSIVE_ITERATIONS: u64 = 10_000;
pub const DEFAULT_CHANGEFEED_CAPACITY: u64 = 1024;

/// Engine-wide execution defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionConfig {
    pub dialect: Dialect,
    pub max_subquery_depth: u64,
    pub max_recursive_iterations: u64,
    pub buffer_scans: bool,
    pub changefeed_capacity: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        ExecutionConfig {
            dialect: Dialect::Postgres,
            max_subquery_depth: DEFAULT_MAX_SUBQUERY_DEPTH,
            max_recursive_iterations: DEFAULT_MAX_RECURSIVE_ITERATIONS,
            buffer_scans: false,
            changefeed_capacity: DEFAULT_CHANGEFEED_CAPACITY,
        }
    }
}

impl ExecutionConfig {
    pub fn set_from_scalar(&mut self, name: &str, value: ScalarValue) -> Result<()> {
        let func = GET_SET_FUNCTIONS
            .get(name)
            .ok_or_else(|| structural!("Missing setting for '{name}'"))?;

        (func.set)(value, self)
    }

    pub fn get_as_scalar(&self, name: &str) -> Result<ScalarValue> {
        let func = GET_SET_FUNCTIONS
            .get(name)
            .ok_or_else(|| structural!("Missing setting for '{name}'"))?;

        Ok((func.get)(self))
    }

    pub fn reset(&mut self, name: &str) -> Result<()> {
        let def_conf = Self::default();

        let func = GET_SET_FUNCTIONS
            .get(name)
            .ok_or_else(|| structural!("Missing setting for '{name}'"))?;

        let scalar = (func.get)(&def_conf);
        (func.set)(scalar, self)
    }

    pub fn reset_all(&mut self) {
        *self = Self::default();
    }

    /// Names and descriptions of every setting, sorted by name.
    pub fn settings() -> Vec<(&'static str, &'static str)> {
        let mut settings: Vec<_> = GET_SET_FUNCTIONS
            .iter()
            .map(|(name, funcs)| (*name, funcs.description))
            .collect();
        settings.sort_unstable();
        settings
    }
}

struct SettingFunctions {
    description: &'static str,
    set: fn(scalar: ScalarValue, conf: &mut ExecutionConfig) -> Result<()>,
    get: fn(conf: &ExecutionConfig) -> ScalarValue,
}

impl SettingFunctions {
    const fn new<S: ExecutionSetting>() -> Self {
        SettingFunctions {
            description: S::DESCRIPTION,
            set: S::set_from_scalar as _,
            get: S::get_as_scalar as _,
        }
    }
}

fn insert_setting<S: ExecutionSetting>(map: &mut HashMap<&'static str, SettingFunctions>) {
    if map.insert(S::NAME, SettingFunctions::new::<S>()).is_some() {
        panic!("Duplicate settings names: {}", S::NAME);
    }
}

static GET_SET_FUNCTIONS: LazyLock<HashMap<&'static str, SettingFunctions>> = LazyLock::new(|| {
    let mut map = HashMap::new();

    insert_setting::<DialectSetting>(&mut map);
    insert_setting::<MaxSubqueryDepth>(&mut map);
    insert_setting::<MaxRecursiveIterations>(&mut map);
    insert_setting::<BufferScans>(&mut map);
    insert_setting::<ChangefeedCapacity>(&mut map);

    map
});

pub trait ExecutionSetting: Sync + Send + 'static {
    const NAME: &'static str;
    const DESCRIPTION: &'static str;

    fn set_from_scalar(scalar: ScalarValue, conf: &mut ExecutionConfig) -> Result<()>;
    fn get_as_scalar(conf: &ExecutionConfig) -> ScalarValue;
}

fn scalar_as_u64(name: &str, scalar: &ScalarValue) -> Result<u64> {
    let val = scalar.try_as_i64()?;
    u64::try_from(val).map_err(|_| structural!("Setting '{name}' cannot be negative, got {val}"))
}

fn scalar_as_bool(name: &str, scalar: &ScalarValue) -> Result<bool> {
    match scalar {
        ScalarValue::Boolean(b) => Ok(*b),
        ScalarValue::Int64(v) => Ok(*v != 0),
        ScalarValue::Utf8(s) => crate::value::parse_bool(s)
            .ok_or_else(|| structural!("Setting '{name}' expects a boolean, got '{s}'")),
        other => Err(structural!(
            "Setting '{name}' expects a boolean, got {}",
            other.kind()
        )),
    }
}

pub struct DialectSetting;

impl ExecutionSetting for DialectSetting {
    const NAME: &'static str = "dialect";
    const DESCRIPTION: &'static str = "SQL dialect used when a call doesn't specify one";

    fn set_from_scalar(scalar: ScalarValue, conf: &mut ExecutionConfig) -> Result<()> {
        let text = scalar
            .to_text()
            .ok_or_else(|| structural!("Setting '{}' cannot be NULL", Self::NAME))?;
        conf.dialect = text.parse()?;
        Ok(())
    }

    fn get_as_scalar(conf: &ExecutionConfig) -> ScalarValue {
        conf.dialect.to_string().into()
    }
}

pub struct MaxSubqueryDepth;

impl ExecutionSetting for MaxSubqueryDepth {
    const NAME: &'static str = "max_subquery_depth";
    const DESCRIPTION: &'static str = "Maximum nesting of subqueries, derived tables and CTEs";

    fn set_from_scalar(scalar: ScalarValue, conf: &mut ExecutionConfig) -> Result<()> {
        let val = scalar_as_u64(Self::NAME, &scalar)?;
        if val == 0 {
            return Err(structural!("Setting '{}' must be at least 1", Self::NAME));
        }
        conf.max_subquery_depth = val;
        Ok(())
    }

    fn get_as_scalar(conf: &ExecutionConfig) -> ScalarValue {
        (conf.max_subquery_depth as i64).into()
    }
}

pub struct MaxRecursiveIterations;

impl ExecutionSetting for MaxRecursiveIterations {
    const NAME: &'static str = "max_recursive_iterations";
    const DESCRIPTION: &'static str = "Maximum number of iterations for a recursive CTE";

    fn set_from_scalar(scalar: ScalarValue, conf: &mut ExecutionConfig) -> Result<()> {
        conf.max_recursive_iterations = scalar_as_u64(Self::NAME, &scalar)?;
        Ok(())
    }

    fn get_as_scalar(conf: &ExecutionConfig) -> ScalarValue {
        (conf.max_recursive_iterations as i64).into()
    }
}

pub struct BufferScans;

impl ExecutionSetting for BufferScans {
    const NAME: &'static str = "buffer_scans";
    const DESCRIPTION: &'static str =
        "Drain base table cursors into memory before downstream stages read them";

    fn set_from_scalar(scalar: ScalarValue, conf: &mut ExecutionConfig) -> Result<()> {
        conf.buffer_scans = scalar_as_bool(Self::NAME, &scalar)?;
        Ok(())
    }

    fn get_as_scalar(conf: &ExecutionConfig) -> ScalarValue {
        conf.buffer_scans.into()
    }
}

pub struct ChangefeedCapacity;

impl ExecutionSetting for ChangefeedCapacity {
    const NAME: &'static str = "changefeed_capacity";
    const DESCRIPTION: &'static str = "Buffer size of the change batch broadcast channel";

    fn set_from_scalar(scalar: ScalarValue, conf: &mut ExecutionConfig) -> Result<()> {
        let val = scalar_as_u64(Self::NAME, &scalar)?;
        if val == 0 {
            return Err(structural!("Setting '{}' must be at least 1", Self::NAME));
        }
        conf.changefeed_capacity = val;
        Ok(())
    }

    fn get_as_scalar(conf: &ExecutionConfig) -> ScalarValue {
        (conf.changefeed_capacity as i64).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_reset() {
        let mut conf = ExecutionConfig::default();
        conf.set_from_scalar("dialect", "mysql".into()).unwrap();
        conf.set_from_scalar("buffer_scans", "on".into()).unwrap();
        assert_eq!(Dialect::MySql, conf.dialect);
        assert!(conf.buffer_scans);

        conf.reset("dialect").unwrap();
        assert_eq!(Dialect::Postgres, conf.dialect);
        assert_eq!(
            ScalarValue::Boolean(true),
            conf.get_as_scalar("buffer_scans").unwrap()
        );

        conf.reset_all();
        assert_eq!(ExecutionConfig::default(), conf);
    }

    #[test]
    fn unknown_setting() {
        let mut conf = ExecutionConfig::default();
        assert!(conf.set_from_scalar("nope", 1.into()).is_err());
        assert!(conf.get_as_scalar("nope").is_err());
    }

    #[test]
    fn rejects_zero_depth() {
        let mut conf = ExecutionConfig::default();
        assert!(conf.set_from_scalar("max_subquery_depth", 0.into()).is_err());
        assert!(
            conf.set_from_scalar("max_recursive_iterations", (-1).into())
                .is_err()
        );
    }

    #[test]
    fn null_ordering_defaults() {
        assert!(!Dialect::Postgres.default_nulls_first(true));
        assert!(Dialect::Postgres.default_nulls_first(false));
        assert!(Dialect::MySql.default_nulls_first(true));
        assert!(!Dialect::MySql.default_nulls_first(false));
    }
}
