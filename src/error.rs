// NETBENCH ERRORS
// CONFIGURATION ERRORS ARE RAISED BEFORE ANY PROCESS IS SPAWNED.
// SHUTDOWN TIMEOUTS ARE FATAL TO THE SCENARIO. CLIENT EXIT CODES ARE NOT ERRORS.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid expression '{expr}': {reason}")]
    InvalidExpression { expr: String, reason: String },

    #[error("unknown field '{0}'")]
    UnknownField(String),

    #[error("field '{field}' is {expected}, not {found}")]
    TypeMismatch {
        field: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("invalid value '{value}' for '{field}': {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("unknown implementation '{0}'")]
    UnknownImplementation(String),

    #[error("missing binaries: {}", .0.iter().map(|p| p.display().to_string()).collect::<Vec<_>>().join(", "))]
    MissingBinary(Vec<PathBuf>),

    #[error("scenario '{name}': {reason}")]
    InvalidScenario { name: String, reason: String },

    #[error("{role} (pid {pid}) did not exit within {timeout:?} and was killed")]
    ShutdownTimeout {
        role: String,
        pid: u32,
        timeout: Duration,
    },

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("interrupted")]
    Interrupted,

    #[error("histogram: {0}")]
    Histogram(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Toml(#[from] toml::de::Error),
}

impl Error {
    pub(crate) fn expr(expr: &str, reason: impl Into<String>) -> Self {
        Self::InvalidExpression {
            expr: expr.to_string(),
            reason: reason.into(),
        }
    }

    // TRUE FOR ERRORS THAT MUST STOP THE WHOLE INVOCATION MID-MATRIX
    pub fn is_fatal_run_error(&self) -> bool {
        matches!(self, Self::ShutdownTimeout { .. } | Self::Interrupted)
    }
}
