pub mod deps;
pub mod env;
pub mod exec;
pub mod init;
pub mod run;
pub mod shell;
pub mod task;
pub mod tasks;

use anyhow::Context as _;
use mill_core::{Env, Procfile};
use mill_nix::{ensure_available, NixEnv, Resolver};
use mill_runner::{DirectShell, NixShell, Runner, RunnerOptions, ShellWrapper};
use std::future::Future;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;

/// Global flags shared by every subcommand.
pub struct Context {
    pub root: PathBuf,
    pub file: String,
    pub env_files: Vec<PathBuf>,
    pub no_nix: bool,
}

impl Context {
    pub fn load(&self) -> anyhow::Result<Procfile> {
        let flag_env = Env::load(&self.env_files).context("failed to load --env files")?;
        Procfile::load(&self.root, &self.file, flag_env)
            .with_context(|| format!("failed to load {}", self.root.join(&self.file).display()))
    }

    pub fn resolver(&self, procfile: &Procfile) -> Resolver {
        Resolver::new(Arc::new(NixEnv::new()), procfile)
    }

    /// Load the config, make sure every package is installed and pinned
    /// (unless `--no-nix`), and build a runner over the result.
    pub async fn runner(&self) -> anyhow::Result<Arc<Runner>> {
        let mut procfile = self.load()?;
        let mut resolver = self.resolver(&procfile);

        let wrapper: Box<dyn ShellWrapper> = if self.no_nix {
            Box::new(DirectShell)
        } else {
            ensure_available()?;
            resolver
                .query_all()
                .await
                .context("failed to query packages")?;
            resolver
                .install_missing()
                .await
                .context("failed to install packages")?;
            resolver.ensure_satisfied()?;
            if !resolver.all_pinned() {
                resolver
                    .pin(&mut procfile)
                    .await
                    .context("failed to pin package versions")?;
            }
            Box::new(NixShell::new())
        };

        let options = RunnerOptions {
            color: std::io::stdout().is_terminal() && std::env::var_os("NO_COLOR").is_none(),
            ..RunnerOptions::default()
        };
        Ok(Runner::new(Arc::new(procfile), resolver, wrapper, options))
    }
}

/// Drive an async command to completion on a fresh runtime.
pub fn block_on<F: Future>(fut: F) -> anyhow::Result<F::Output> {
    let runtime = tokio::runtime::Runtime::new().context("failed to start async runtime")?;
    Ok(runtime.block_on(fut))
}
