//! Error taxonomy for the orchestration core

use crate::job::JobId;
use serde::{Deserialize, Serialize};

/// Result type used throughout the core
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the orchestration core.
///
/// Kinds map one-to-one onto how the service reacts: caller-facing
/// rejections (`InvalidOptions`, `Capacity`, `NotFound`), per-job terminal
/// outcomes (`TimedOut`, `Cancelled`, `Pipeline`, `WorkerCrashed`), and
/// invariant violations (`Internal`) that are logged without killing the
/// dispatch loop.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
pub enum Error {
    #[error("invalid job options: {0}")]
    InvalidOptions(String),

    #[error("backlog limit of {0} jobs reached")]
    Capacity(usize),

    #[error("job not found: {0}")]
    NotFound(JobId),

    #[error("job timed out after {0}ms")]
    TimedOut(u64),

    #[error("job cancelled")]
    Cancelled,

    #[error("pipeline error ({kind}): {message}")]
    Pipeline {
        kind: String,
        recoverable: bool,
        message: String,
    },

    #[error("worker crashed: {0}")]
    WorkerCrashed(String),

    #[error("internal invariant violation: {0}")]
    Internal(String),
}

impl Error {
    /// Check whether a retry could clear this error
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::Pipeline { recoverable: true, .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_error_display() {
        let err = Error::Capacity(10_000);
        assert!(err.to_string().contains("10000"));

        let err = Error::NotFound(Uuid::nil());
        assert!(err.to_string().contains("not found"));

        let err = Error::Pipeline {
            kind: "asset_translation".to_string(),
            recoverable: true,
            message: "texture atlas overflow".to_string(),
        };
        assert!(err.to_string().contains("asset_translation"));
    }

    #[test]
    fn test_recoverability() {
        assert!(Error::Pipeline {
            kind: "io".into(),
            recoverable: true,
            message: "transient".into(),
        }
        .is_recoverable());

        assert!(!Error::Pipeline {
            kind: "parse".into(),
            recoverable: false,
            message: "bad manifest".into(),
        }
        .is_recoverable());

        assert!(!Error::Cancelled.is_recoverable());
        assert!(!Error::TimedOut(1_000).is_recoverable());
    }
}
