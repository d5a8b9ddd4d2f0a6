use crate::row::Record;

#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    /// Schema or shape mismatches: bad column counts, missing FROM targets,
    /// duplicate CTE names.
    #[error("structural error: {0}")]
    Structural(String),

    /// Duplicate key on insert. Carries the record already stored under the
    /// key.
    #[error("duplicate key in relation '{table}'")]
    Conflict { table: String, existing: Record },

    /// Unsupported node, function or operator, and runtime type violations.
    #[error("evaluation error: {0}")]
    Evaluation(String),

    /// Recognized but deliberately unsupported surface.
    #[error("not implemented: {0}")]
    NotImplemented(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl ExecError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, ExecError::Conflict { .. })
    }
}

pub type Result<T, E = ExecError> = std::result::Result<T, E>;

#[allow(unused_macros)]
macro_rules! structural {
    ($($arg:tt)*) => {
        crate::errors::ExecError::Structural(std::format!($($arg)*))
    };
}
pub(crate) use structural;

#[allow(unused_macros)]
macro_rules! evaluation {
    ($($arg:tt)*) => {
        crate::errors::ExecError::Evaluation(std::format!($($arg)*))
    };
}
pub(crate) use evaluation;

#[allow(unused_macros)]
macro_rules! not_implemented {
    ($($arg:tt)*) => {
        crate::errors::ExecError::NotImplemented(std::format!($($arg)*))
    };
}
pub(crate) use not_implemented;

#[allow(unused_macros)]
macro_rules! internal {
    ($($arg:tt)*) => {
        crate::errors::ExecError::Internal(std::format!($($arg)*))
    };
}
pub(crate) use internal;
