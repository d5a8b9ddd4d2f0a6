//! In-process relational query execution over a pluggable row store.
pub mod ast;
pub mod config;
pub mod context;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod expr;
pub mod meta;
pub mod row;
pub mod store;
pub mod util;
pub mod value;

pub use config::{Dialect, ExecutionConfig, QueryOptions};
pub use engine::Engine;
pub use errors::{ExecError, Result};
pub use exec::{QueryResult, StatementEvaluator};
pub use row::{Record, record};
pub use store::{ChangeBatch, ChangeEvent, ChangeSink, MemoryStore, MutationOptions, RowStore};
pub use value::ScalarValue;
