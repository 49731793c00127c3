//! Start and stop error taxonomy for capture backends

use crate::capture::ProcessRole;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failure to bring a capture up. Always fatal to the run.
#[derive(Debug, Error)]
pub enum StartError {
    #[error("output directory for {path} is not usable: {source}")]
    OutputUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("virtual display {display} unavailable: {reason}")]
    DisplayUnavailable { display: String, reason: String },

    #[error("failed to spawn encoder: {0}")]
    EncoderSpawnFailed(#[source] io::Error),

    #[error("screencast service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl StartError {
    /// Which stage of the start sequence failed, for user-facing messages.
    pub fn stage(&self) -> &'static str {
        match self {
            StartError::OutputUnavailable { .. } => "output directory",
            StartError::DisplayUnavailable { .. } => "display start",
            StartError::EncoderSpawnFailed(_) => "encoder start",
            StartError::ServiceUnavailable(_) => "screencast request",
        }
    }
}

/// A stop that did not end cleanly. Cleanup has still been attempted on
/// every resource by the time one of these is returned.
#[derive(Debug, Error)]
pub enum StopError {
    #[error("{0} ignored the graceful stop request and had to be terminated")]
    GracefulTimeout(ProcessRole),

    #[error("{role} had to be force-killed (exit confirmed: {confirmed})")]
    ForceKillRequired { role: ProcessRole, confirmed: bool },

    #[error("screencast stop call failed: {0}")]
    ServiceCallFailed(String),
}

impl StopError {
    /// Whether resource release could still be confirmed as clean.
    pub fn is_clean_release(&self) -> bool {
        matches!(self, StopError::GracefulTimeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_names_identify_failure_point() {
        let err = StartError::DisplayUnavailable {
            display: ":99".into(),
            reason: "probe failed".into(),
        };
        assert_eq!(err.stage(), "display start");
        assert!(err.to_string().contains(":99"));

        let err = StartError::EncoderSpawnFailed(io::Error::from(io::ErrorKind::NotFound));
        assert_eq!(err.stage(), "encoder start");
    }

    #[test]
    fn test_only_terminate_path_counts_as_clean() {
        assert!(StopError::GracefulTimeout(ProcessRole::Encoder).is_clean_release());
        assert!(
            !StopError::ForceKillRequired {
                role: ProcessRole::Encoder,
                confirmed: true
            }
            .is_clean_release()
        );
        assert!(!StopError::ServiceCallFailed("no reply".into()).is_clean_release());
    }
}
