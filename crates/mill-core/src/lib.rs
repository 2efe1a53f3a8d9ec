pub mod envfile;
pub mod error;
pub mod expand;
pub mod io;
pub mod paths;
pub mod procfile;

pub use envfile::Env;
pub use error::{MillError, Result};
pub use procfile::{Command, Procfile, Requirement, Service, UnitKind};
