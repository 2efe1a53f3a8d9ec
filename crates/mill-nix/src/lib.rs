//! `mill-nix`: resolves the packages a `mill.yml` requires.
//!
//! ```text
//! Procfile requirements
//!     │
//!     ▼
//! Resolver        ← one Dependency per unique package name
//!     │              query_all / install_missing run concurrently
//!     ▼
//! PackageIndex    ← async boundary; NixEnv drives `nix-env`
//! ```
//!
//! Pinning asks the index for attribute paths in one batched call and writes
//! them back into the config through [`mill_core::Procfile::pin`].

pub mod error;
pub mod nixenv;
pub mod package;
pub mod resolver;

pub use error::NixError;
pub use nixenv::{ensure_available, NixEnv};
pub use package::{PackageIndex, PackageInfo, PackageMeta};
pub use resolver::{Dependency, DependencyState, Resolver};

/// Convenience `Result` alias for this crate.
pub type Result<T> = std::result::Result<T, NixError>;
