use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mill_core::Procfile;
use mill_nix::Resolver;
use nix::sys::signal::Signal;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::output::{palette_color, prefix, Sinks};
use crate::process::{Process, Scope};
use crate::registry::ProcessRegistry;
use crate::shell::ShellWrapper;
use crate::signals::{listen, SignalMode};
use crate::{Result, RunnerError};

pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct RunnerOptions {
    /// Colorize prefixes and banners.
    pub color: bool,
    /// How long signaled children get before SIGKILL.
    pub grace_period: Duration,
    pub sinks: Sinks,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            color: true,
            grace_period: DEFAULT_GRACE_PERIOD,
            sinks: Sinks::default(),
        }
    }
}

/// Launches, sequences and tears down the processes for one `mill`
/// invocation.
pub struct Runner {
    procfile: Arc<Procfile>,
    resolver: Resolver,
    wrapper: Box<dyn ShellWrapper>,
    registry: ProcessRegistry,
    cancel: CancellationToken,
    shutting_down: AtomicBool,
    /// Raw number of the last termination signal the listener received.
    received: AtomicI32,
    palette: AtomicUsize,
    title_width: usize,
    options: RunnerOptions,
}

impl Runner {
    pub fn new(
        procfile: Arc<Procfile>,
        resolver: Resolver,
        wrapper: Box<dyn ShellWrapper>,
        options: RunnerOptions,
    ) -> Arc<Self> {
        let title_width = procfile
            .services()
            .map(|s| s.name().len())
            .max()
            .unwrap_or(0);
        Arc::new(Self {
            procfile,
            resolver,
            wrapper,
            registry: ProcessRegistry::new(),
            cancel: CancellationToken::new(),
            shutting_down: AtomicBool::new(false),
            received: AtomicI32::new(0),
            palette: AtomicUsize::new(0),
            title_width,
            options,
        })
    }

    pub fn procfile(&self) -> &Procfile {
        &self.procfile
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    pub fn wrapper(&self) -> &dyn ShellWrapper {
        self.wrapper.as_ref()
    }

    pub fn registry(&self) -> &ProcessRegistry {
        &self.registry
    }

    pub fn sinks(&self) -> &Sinks {
        &self.options.sinks
    }

    pub fn color(&self) -> bool {
        self.options.color
    }

    pub(crate) fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub(crate) fn note_signal(&self, signal: Signal) {
        self.received.store(signal as i32, Ordering::SeqCst);
    }

    /// The termination signal that started shutdown, if one did.
    pub fn received_signal(&self) -> Option<Signal> {
        Signal::try_from(self.received.load(Ordering::SeqCst)).ok()
    }

    pub(crate) fn prefix_for(&self, label: &str) -> String {
        let color = self
            .options
            .color
            .then(|| palette_color(self.palette.fetch_add(1, Ordering::Relaxed)));
        prefix(label, self.title_width, color)
    }

    /// Signal every live child with `signal`, cancel pending work, and arm a
    /// watchdog that SIGKILLs whatever is left after the grace period.
    /// Later calls do nothing.
    pub fn shutdown(&self, signal: Signal) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let live = self.registry.labels();
        let count = self.registry.close_and_signal(signal);
        info!(%signal, processes = count, ?live, "shutting down");
        self.cancel.cancel();

        let registry = self.registry.clone();
        let grace = self.options.grace_period;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    tokio::time::sleep(grace).await;
                    let killed = registry.kill_all();
                    if killed > 0 {
                        warn!(killed, ?grace, "grace period expired");
                    }
                });
            }
            Err(_) => debug!("no runtime, shutdown watchdog not armed"),
        }
    }

    /// Run the selected services concurrently until all finish, one fails,
    /// or a termination signal arrives. `only` takes precedence over `except`.
    pub async fn run_services(self: &Arc<Self>, only: &[String], except: &[String]) -> Result<()> {
        for name in only.iter().chain(except) {
            if self.procfile.service(name).is_none() {
                return Err(RunnerError::NotFound(format!("unknown service '{name}'")));
            }
        }
        let selected: Vec<String> = self
            .procfile
            .services()
            .map(|s| s.name().to_string())
            .filter(|name| {
                if only.is_empty() {
                    !except.contains(name)
                } else {
                    only.contains(name)
                }
            })
            .collect();
        info!(services = ?selected, "starting");

        let listener = listen(Arc::clone(self), SignalMode::Forward)?;
        let mut set = JoinSet::new();
        for name in selected {
            let mut process = Process::new(self, Scope::Named(name), true, Vec::new()).fail_fast();
            set.spawn(async move {
                let result = process.run().await;
                (process.label().to_string(), result)
            });
        }

        let mut first_error = None;
        while let Some(joined) = set.join_next().await {
            let (label, result) = match joined {
                Ok(done) => done,
                Err(e) => ("<task>".to_string(), Err(RunnerError::Join(e))),
            };
            match result {
                Ok(()) => debug!(service = %label, "finished"),
                Err(e) if first_error.is_none() => {
                    error!(service = %label, error = %e, "failed, stopping the rest");
                    self.shutdown(Signal::SIGTERM);
                    first_error = Some(e);
                }
                Err(e) => debug!(service = %label, error = %e, "also failed"),
            }
        }
        listener.abort();

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Run one task in the foreground.
    pub async fn run_task(self: &Arc<Self>, name: &str, args: Vec<String>) -> Result<()> {
        if self.procfile.task(name).is_none() {
            return Err(RunnerError::NotFound(format!("unknown task '{name}'")));
        }
        let listener = listen(Arc::clone(self), SignalMode::Forward)?;
        let mut process = Process::new(self, Scope::Task(name.to_string()), false, args);
        let result = process.run().await;
        listener.abort();
        result
    }

    /// Start an interactive shell in the environment of `name`, or of the
    /// project when `None`.
    pub async fn run_shell(self: &Arc<Self>, name: Option<&str>) -> Result<()> {
        let scope = self.scope(name)?;
        let listener = listen(Arc::clone(self), SignalMode::Interactive)?;
        let mut process = Process::new(self, scope, false, Vec::new());
        let result = process.shell(None).await;
        listener.abort();
        result
    }

    /// Run a single command line in the environment of `name`, or of the
    /// project when `None`.
    pub async fn run_command(self: &Arc<Self>, name: Option<&str>, command: &str) -> Result<()> {
        let scope = self.scope(name)?;
        let listener = listen(Arc::clone(self), SignalMode::Forward)?;
        let mut process = Process::new(self, scope, false, Vec::new());
        let result = process.shell(Some(command)).await;
        listener.abort();
        result
    }

    fn scope(&self, name: Option<&str>) -> Result<Scope> {
        match name {
            Some(name) => {
                self.procfile.lookup(name)?;
                Ok(Scope::Named(name.to_string()))
            }
            None => Ok(Scope::Root),
        }
    }
}
