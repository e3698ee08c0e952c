//! # Error Taxonomy
//!
//! Every failure the measurement can hit is fatal. There are no retries:
//! repeating a timing-sensitive step would corrupt the measurement itself.
//! The variants mirror the stage at which the failure is detected:
//!
//! - **Config**: bad parameters, rejected before anything is spawned
//! - **Capability**: the platform lacks an invariant-rate counter or its
//!   frequency cannot be determined, checked before spawning
//! - **Resource**: thread, pinning, scheduling policy or buffer allocation
//!   failures; the whole run aborts because the aggregate needs every CPU
//! - **SchedRecord**: the per-thread scheduling record could not be read
//!   after the run, which means a worker exited before it was supposed to
//! - **Interrupted**: the orchestrator's pacing sleep was interrupted

use std::path::PathBuf;
use thiserror::Error;

/// Errors produced by the jitter measurement engine
#[derive(Debug, Error)]
pub enum JitterError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("missing platform capability: {0}")]
    Capability(String),

    #[error("resource failure on CPU {cpu}: {reason}")]
    Resource { cpu: usize, reason: String },

    #[error("failed to read scheduling record {path:?}: {reason}")]
    SchedRecord { path: PathBuf, reason: String },

    #[error("pacing sleep of the control thread was interrupted: {0}")]
    Interrupted(std::io::Error),

    #[error("measurement on CPU {0} was aborted before it started")]
    Aborted(usize),

    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl JitterError {
    /// Shorthand for configuration errors
    pub fn config(msg: impl Into<String>) -> Self {
        JitterError::Config(msg.into())
    }

    /// Shorthand for per-CPU resource errors
    pub fn resource(cpu: usize, reason: impl Into<String>) -> Self {
        JitterError::Resource {
            cpu,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, JitterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_carries_context() {
        let e = JitterError::resource(3, "sched_setaffinity failed");
        assert_eq!(
            e.to_string(),
            "resource failure on CPU 3: sched_setaffinity failed"
        );

        let e = JitterError::config("threshold must be positive");
        assert!(e.to_string().starts_with("invalid configuration"));
    }
}
