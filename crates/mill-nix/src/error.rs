use mill_core::MillError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NixError {
    #[error("nix is not available: {0}")]
    ResolverUnavailable(String),

    #[error("nix-env query failed: {0}")]
    QueryFailed(String),

    #[error("failed to install package '{name}': {stderr}")]
    InstallFailed { name: String, stderr: String },

    #[error("{} package(s) failed to install: {}", .0.len(), summarize(.0))]
    InstallsFailed(Vec<NixError>),

    #[error("still missing after install: {}", .0.join(", "))]
    Unsatisfied(Vec<String>),

    #[error("failed to parse nix-env output: {0}")]
    Parse(#[from] serde_json::Error),

    #[error(transparent)]
    Core(#[from] MillError),
}

impl NixError {
    /// Package names behind an install failure, flattened.
    pub fn failed_packages(&self) -> Vec<&str> {
        match self {
            NixError::InstallFailed { name, .. } => vec![name.as_str()],
            NixError::InstallsFailed(errors) => {
                errors.iter().flat_map(NixError::failed_packages).collect()
            }
            NixError::Unsatisfied(names) => names.iter().map(String::as_str).collect(),
            _ => Vec::new(),
        }
    }
}

fn summarize(errors: &[NixError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
