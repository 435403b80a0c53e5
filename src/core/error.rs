//! Error taxonomy shared by the orchestrator and the per-task materializer.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CalcError>;

/// Exit code a `calc` run uses to report that there was nothing to do.
pub const EXIT_SKIPPED: i32 = 66;
/// Exit code for failures that would fail the same way on every attempt.
pub const EXIT_PERMANENT: i32 = 65;
/// Exit code for failures worth retrying.
pub const EXIT_FAILED: i32 = 1;

#[derive(Debug, Error)]
pub enum CalcError {
    /// Malformed catalog, unresolvable sentinel or missing required setting.
    #[error("config error: {0}")]
    Config(String),

    /// The store could not be reached.
    #[error("connectivity error: {0}")]
    Connectivity(String),

    /// A result column cannot be mapped to a destination type.
    #[error("schema error: {0}")]
    Schema(String),

    /// Query, write, constraint or coercion failure.
    #[error("data error: {0}")]
    Data(String),
}

impl CalcError {
    pub fn config(msg: impl Into<String>) -> Self {
        CalcError::Config(msg.into())
    }

    pub fn schema(msg: impl Into<String>) -> Self {
        CalcError::Schema(msg.into())
    }

    pub fn data(msg: impl Into<String>) -> Self {
        CalcError::Data(msg.into())
    }

    /// Only data failures can succeed on a fresh attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CalcError::Data(_))
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_retryable() {
            EXIT_FAILED
        } else {
            EXIT_PERMANENT
        }
    }
}

impl From<rusqlite::Error> for CalcError {
    fn from(err: rusqlite::Error) -> Self {
        CalcError::Data(err.to_string())
    }
}

impl From<std::io::Error> for CalcError {
    fn from(err: std::io::Error) -> Self {
        CalcError::Data(err.to_string())
    }
}
