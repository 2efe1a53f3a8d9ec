//! `mill-runner`: supervises the child processes behind services, tasks and
//! shells.
//!
//! A [`Runner`] owns the loaded config, the dependency resolver and a
//! registry of live children. Each selected service becomes a [`Process`]
//! running its before / cmds / after phases; captured processes get their own
//! process group so shutdown can signal whole trees.

pub mod error;
pub mod output;
pub mod process;
pub mod registry;
pub mod runner;
pub mod shell;
pub mod signals;

pub use error::RunnerError;
pub use nix::sys::signal::Signal;
pub use output::{Sink, Sinks};
pub use process::{CommandState, Process, Scope};
pub use registry::{ProcessRegistry, Registration};
pub use runner::{Runner, RunnerOptions, DEFAULT_GRACE_PERIOD};
pub use shell::{DirectShell, Invocation, NixShell, ShellWrapper};
pub use signals::SignalMode;

/// Convenience `Result` alias for this crate.
pub type Result<T> = std::result::Result<T, RunnerError>;
