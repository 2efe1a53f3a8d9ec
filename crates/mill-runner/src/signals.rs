use std::sync::Arc;

use nix::sys::signal::Signal;
use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::runner::Runner;
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalMode {
    /// Every termination signal starts a shutdown.
    Forward,
    /// SIGINT and SIGQUIT belong to the foreground shell and are ignored here.
    Interactive,
}

/// Listen for SIGINT, SIGTERM, SIGHUP and SIGQUIT. The first one shuts the
/// runner down with that signal; any later one force-kills what is left.
/// Abort the returned handle once the run is over.
pub fn listen(runner: Arc<Runner>, mode: SignalMode) -> Result<JoinHandle<()>> {
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut hangup = signal(SignalKind::hangup())?;
    let mut quit = signal(SignalKind::quit())?;

    Ok(tokio::spawn(async move {
        loop {
            let received = tokio::select! {
                _ = interrupt.recv() => Signal::SIGINT,
                _ = terminate.recv() => Signal::SIGTERM,
                _ = hangup.recv() => Signal::SIGHUP,
                _ = quit.recv() => Signal::SIGQUIT,
            };
            if mode == SignalMode::Interactive
                && matches!(received, Signal::SIGINT | Signal::SIGQUIT)
            {
                debug!(signal = %received, "left to the interactive shell");
                continue;
            }
            runner.note_signal(received);
            if runner.is_cancelled() {
                warn!(signal = %received, "received again, killing remaining processes");
                runner.registry().kill_all();
            } else {
                runner.shutdown(received);
            }
        }
    }))
}
