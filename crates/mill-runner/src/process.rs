use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use colored::Colorize;
use futures::future::BoxFuture;
use mill_core::expand::{expand, host_var};
use mill_core::{Command, Env, Service};
use nix::sys::signal::Signal;
use tracing::debug;

use crate::output::{pump, write_line};
use crate::registry::Registration;
use crate::runner::Runner;
use crate::shell::Invocation;
use crate::{Result, RunnerError};

/// How long to keep draining pipes after a child exits; background
/// grandchildren can hold them open indefinitely.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// How long a foreground child killed by a termination signal waits for the
/// listener to report that same signal.
const SIGNAL_SETTLE: Duration = Duration::from_millis(500);

/// What a [`Process`] runs for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// The project itself: every required package, project-level environment.
    Root,
    /// A named service, or a task when no service has that name.
    Named(String),
    /// A task, even when a service shares its name.
    Task(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandState {
    Idle,
    Starting,
    Running,
    Succeeded,
    Failed,
    Killed,
}

/// One supervised unit of work: a service or task run through its
/// before / cmds / after phases, or a shell in the project environment.
pub struct Process {
    runner: Arc<Runner>,
    scope: Scope,
    label: String,
    prefix: String,
    captured: bool,
    fail_fast: bool,
    args: Vec<String>,
    state: CommandState,
}

impl Process {
    /// `captured` processes run in their own process group with prefixed
    /// output; otherwise the child shares the terminal.
    pub fn new(runner: &Arc<Runner>, scope: Scope, captured: bool, args: Vec<String>) -> Self {
        let label = match &scope {
            Scope::Root => "mill".to_string(),
            Scope::Named(name) | Scope::Task(name) => name.clone(),
        };
        let prefix = runner.prefix_for(&label);
        Self {
            runner: Arc::clone(runner),
            scope,
            label,
            prefix,
            captured,
            fail_fast: false,
            args,
            state: CommandState::Idle,
        }
    }

    /// Shut the whole runner down as soon as a main command fails, before
    /// this process's after-hooks.
    pub fn fail_fast(mut self) -> Self {
        self.fail_fast = true;
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// State of the most recent command.
    pub fn state(&self) -> CommandState {
        self.state
    }

    /// Run every phase of the unit in order.
    pub async fn run(&mut self) -> Result<()> {
        let unit = self.unit()?.ok_or_else(|| {
            RunnerError::NotFound("the project root has no commands to run".into())
        })?;
        let args = self.args.clone();
        self.run_unit(&unit, &args).await
    }

    /// Run `command` (or an interactive shell when `None`) in this scope's
    /// environment.
    pub async fn shell(&mut self, command: Option<&str>) -> Result<()> {
        let unit = self.unit()?;
        let args = self.args.clone();
        self.exec(unit.as_ref(), command, &args).await
    }

    fn unit(&self) -> Result<Option<Service>> {
        match &self.scope {
            Scope::Root => Ok(None),
            Scope::Named(name) => Ok(Some(self.runner.procfile().lookup(name)?.clone())),
            Scope::Task(name) => self
                .runner
                .procfile()
                .task(name)
                .cloned()
                .map(Some)
                .ok_or_else(|| RunnerError::NotFound(format!("unknown task '{name}'"))),
        }
    }

    // Boxed so task delegation can recurse.
    fn run_unit<'a>(&'a mut self, unit: &'a Service, args: &'a [String]) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.run_list(unit, unit.before(), args).await?;
            let main = self.run_list(unit, unit.cmds(), args).await;
            if let Err(e) = &main {
                if self.fail_fast && !self.runner.is_cancelled() {
                    debug!(unit = unit.name(), error = %e, "failing fast");
                    self.runner.shutdown(Signal::SIGTERM);
                }
            }
            if self.runner.is_cancelled() {
                return main;
            }
            let after = self.run_list(unit, unit.after(), args).await;
            main.and(after)
        })
    }

    async fn run_list(&mut self, unit: &Service, cmds: &[Command], args: &[String]) -> Result<()> {
        for cmd in cmds {
            match cmd {
                Command::Shell(text) => self.exec(Some(unit), Some(text), args).await?,
                Command::Task(name) => {
                    let task = self
                        .runner
                        .procfile()
                        .task(name)
                        .cloned()
                        .ok_or_else(|| RunnerError::NotFound(format!("unknown task '{name}'")))?;
                    debug!(from = unit.name(), task = %name, "delegating");
                    self.run_unit(&task, args).await?;
                }
            }
        }
        Ok(())
    }

    async fn exec(
        &mut self,
        unit: Option<&Service>,
        command: Option<&str>,
        args: &[String],
    ) -> Result<()> {
        if self.runner.is_cancelled() {
            debug!(unit = %self.label, "cancelled, not starting");
            return Ok(());
        }

        let runner = Arc::clone(&self.runner);
        let procfile = runner.procfile();
        let invocation = match unit {
            Some(u) => {
                let env = procfile.environ(u.name())?;
                Invocation {
                    command: command.map(|c| expand_command(c, args, &env)),
                    dir: u.dir().to_path_buf(),
                    packages: runner.resolver().shell_packages(u.requires()),
                    isolated: procfile.isolated() || u.isolated(),
                    keep: procfile.env_keys(u.name())?,
                    env,
                }
            }
            None => {
                let env = procfile.base_environ();
                Invocation {
                    command: command.map(|c| expand_command(c, args, &env)),
                    dir: procfile.dir().to_path_buf(),
                    packages: runner.resolver().shell_packages(&procfile.packages()),
                    isolated: procfile.isolated(),
                    keep: procfile.base_env_keys(),
                    env,
                }
            }
        };
        let unit_name = unit.map_or(self.label.as_str(), Service::name).to_string();
        let shown = invocation
            .command
            .clone()
            .unwrap_or_else(|| "interactive shell".to_string());

        let mut cmd = runner.wrapper().command(&invocation);
        if self.captured {
            cmd.process_group(0)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped());
            self.banner(&format!("=> {shown}"), None);
        } else {
            cmd.stdin(Stdio::inherit())
                .stdout(Stdio::inherit())
                .stderr(Stdio::inherit());
        }

        self.state = CommandState::Starting;
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(source) => {
                self.state = CommandState::Failed;
                return Err(RunnerError::Spawn {
                    unit: unit_name,
                    command: shown,
                    source,
                });
            }
        };
        let registration: Option<Registration> = child
            .id()
            .map(|pid| runner.registry().register(pid, &self.label, self.captured));
        self.state = CommandState::Running;
        debug!(
            unit = %unit_name,
            pid = ?registration.as_ref().map(Registration::pid),
            command = %shown,
            "spawned"
        );
        let started = Instant::now();

        let mut pumps = Vec::new();
        if self.captured {
            let sinks = runner.sinks();
            if let Some(stdout) = child.stdout.take() {
                pumps.push(tokio::spawn(pump(stdout, sinks.out.clone(), self.prefix.clone())));
            }
            if let Some(stderr) = child.stderr.take() {
                pumps.push(tokio::spawn(pump(stderr, sinks.err.clone(), self.prefix.clone())));
            }
        }

        let status = child.wait().await;
        if !pumps.is_empty() {
            let drained = tokio::time::timeout(DRAIN_TIMEOUT, futures::future::join_all(pumps)).await;
            if drained.is_err() {
                debug!(unit = %unit_name, "output still open after exit, detaching");
            }
        }
        let signaled = registration.as_ref().is_some_and(Registration::was_signaled);
        drop(registration);
        let status = status?;
        let signaled = signaled || (!self.captured && self.stopped_with_runner(&status).await);
        let elapsed = started.elapsed();
        debug!(unit = %unit_name, %status, ?elapsed, signaled, "exited");

        if status.success() {
            self.state = CommandState::Succeeded;
            self.banner(&format!("completed in {elapsed:.2?}"), Some(colored::Color::Green));
            Ok(())
        } else if signaled {
            self.state = CommandState::Killed;
            self.banner(&format!("stopped after {elapsed:.2?}"), Some(colored::Color::Cyan));
            Ok(())
        } else {
            self.state = CommandState::Failed;
            self.banner(&format!("exited with error: {status}"), Some(colored::Color::Red));
            Err(RunnerError::ExecFailed {
                unit: unit_name,
                command: shown,
                status,
            })
        }
    }

    /// A foreground child shares the terminal's process group, so it can die
    /// of the user's signal before the listener has shut the runner down.
    async fn stopped_with_runner(&self, status: &ExitStatus) -> bool {
        let Some(raw) = status.signal() else {
            return false;
        };
        let termination = matches!(
            Signal::try_from(raw),
            Ok(Signal::SIGINT | Signal::SIGTERM | Signal::SIGHUP | Signal::SIGQUIT)
        );
        if !termination {
            return false;
        }
        let _ = tokio::time::timeout(SIGNAL_SETTLE, self.runner.cancellation().cancelled()).await;
        self.runner
            .received_signal()
            .is_some_and(|signal| signal as i32 == raw)
    }

    fn banner(&self, message: &str, color: Option<colored::Color>) {
        if !self.captured {
            return;
        }
        let message = match color {
            Some(c) if self.runner.color() => message.color(c).to_string(),
            _ => message.to_string(),
        };
        write_line(&self.runner.sinks().out, &self.prefix, &message);
    }
}

/// Substitute `$1..$n` from `args`, then names from `env`, then the host.
pub fn expand_command(command: &str, args: &[String], env: &Env) -> String {
    expand(command, |name| {
        if let Ok(index) = name.parse::<usize>() {
            if index >= 1 {
                return Some(args.get(index - 1).cloned().unwrap_or_default());
            }
        }
        env.get(name).map(str::to_string).or_else(|| host_var(name))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positional_args_then_env_then_host() {
        let mut env = Env::new();
        env.set("PORT", "8080");
        let args = vec!["one".to_string(), "two".to_string()];
        assert_eq!(
            expand_command("run $1 ${2} $3 --port $PORT", &args, &env),
            "run one two  --port 8080"
        );
        assert_eq!(
            expand_command("$MILL_TEST_NOT_DEFINED_ANYWHERE!", &args, &env),
            "!"
        );
    }

    #[test]
    fn shell_syntax_survives() {
        let env = Env::new();
        assert_eq!(
            expand_command("echo $(pwd) $$", &[], &env),
            "echo $(pwd) $$"
        );
    }
}
