use std::process::ExitStatus;

use mill_core::MillError;
use mill_nix::NixError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("{unit}: `{command}` exited with {status}")]
    ExecFailed {
        unit: String,
        command: String,
        status: ExitStatus,
    },

    #[error("{unit}: failed to start `{command}`: {source}")]
    Spawn {
        unit: String,
        command: String,
        source: std::io::Error,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("process task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Nix(#[from] NixError),

    #[error(transparent)]
    Core(#[from] MillError),
}
