use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MillError {
    #[error("invalid config: {0}")]
    ConfigInvalid(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("env file not found: {}", .0.display())]
    EnvFileNotFound(PathBuf),

    #[error("config file not found: {}", .0.display())]
    ConfigNotFound(PathBuf),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

impl MillError {
    /// True for every flavour of "the thing you asked for does not exist".
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            MillError::NotFound(_) | MillError::EnvFileNotFound(_) | MillError::ConfigNotFound(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, MillError>;
