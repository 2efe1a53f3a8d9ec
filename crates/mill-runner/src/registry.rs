use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::Pid;
use tracing::{debug, warn};

#[derive(Debug)]
struct Entry {
    label: String,
    /// Spawned as leader of its own process group.
    grouped: bool,
    /// Signaled by the supervisor; its exit is a clean stop.
    signaled: bool,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<u32, Entry>,
    /// Set once shutdown begins; later registrations are signaled at once.
    closed: Option<Signal>,
}

/// Live child processes, keyed by pid.
#[derive(Debug, Clone, Default)]
pub struct ProcessRegistry {
    inner: Arc<Mutex<Inner>>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Track `pid` until the returned guard is dropped.
    pub fn register(&self, pid: u32, label: &str, grouped: bool) -> Registration {
        let mut inner = self.lock();
        let mut entry = Entry {
            label: label.to_string(),
            grouped,
            signaled: false,
        };
        if let Some(signal) = inner.closed {
            debug!(pid, label, "registered during shutdown");
            signal_entry(pid, &mut entry, signal);
        }
        inner.entries.insert(pid, entry);
        Registration {
            registry: self.clone(),
            pid,
        }
    }

    /// Stop accepting children and send `signal` to every live one.
    /// Returns how many were signaled.
    pub fn close_and_signal(&self, signal: Signal) -> usize {
        let mut inner = self.lock();
        inner.closed = Some(signal);
        for (pid, entry) in inner.entries.iter_mut() {
            signal_entry(*pid, entry, signal);
        }
        inner.entries.len()
    }

    /// SIGKILL everything still registered.
    pub fn kill_all(&self) -> usize {
        let mut inner = self.lock();
        for (pid, entry) in inner.entries.iter_mut() {
            warn!(pid, label = %entry.label, "force killing");
            signal_entry(*pid, entry, Signal::SIGKILL);
        }
        inner.entries.len()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Labels of the live processes, sorted.
    pub fn labels(&self) -> Vec<String> {
        let mut labels: Vec<String> = self
            .lock()
            .entries
            .values()
            .map(|e| e.label.clone())
            .collect();
        labels.sort();
        labels
    }

    fn was_signaled(&self, pid: u32) -> bool {
        self.lock()
            .entries
            .get(&pid)
            .is_some_and(|entry| entry.signaled)
    }

    fn unregister(&self, pid: u32) {
        self.lock().entries.remove(&pid);
    }
}

/// Keeps a child in the registry; dropping it unregisters the pid.
#[derive(Debug)]
pub struct Registration {
    registry: ProcessRegistry,
    pid: u32,
}

impl Registration {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Whether the supervisor sent this child a signal.
    pub fn was_signaled(&self) -> bool {
        self.registry.was_signaled(self.pid)
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.unregister(self.pid);
    }
}

fn deliver(pid: u32, grouped: bool, signal: Signal) -> nix::Result<()> {
    let target = Pid::from_raw(pid as i32);
    if grouped {
        killpg(target, signal)
    } else {
        kill(target, signal)
    }
}

fn signal_entry(pid: u32, entry: &mut Entry, signal: Signal) {
    entry.signaled = true;
    match deliver(pid, entry.grouped, signal) {
        Ok(()) => debug!(pid, label = %entry.label, %signal, "signaled"),
        Err(e) if signal != Signal::SIGKILL => {
            warn!(pid, label = %entry.label, error = %e, "signal failed, escalating to SIGKILL");
            let _ = deliver(pid, entry.grouped, Signal::SIGKILL);
        }
        Err(e) => debug!(pid, label = %entry.label, error = %e, "SIGKILL failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Stdio;
    use tokio::process::Command;

    fn sleeper(grouped: bool) -> tokio::process::Child {
        let mut cmd = Command::new("/bin/sh");
        cmd.args(["-c", "sleep 30"]).stdin(Stdio::null());
        if grouped {
            cmd.process_group(0);
        }
        cmd.spawn().unwrap()
    }

    #[test]
    fn guard_drop_unregisters() {
        let registry = ProcessRegistry::new();
        let guard = registry.register(999_999, "ghost", false);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.labels(), vec!["ghost"]);
        assert!(!guard.was_signaled());
        drop(guard);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn close_signals_every_group_and_marks_entries() {
        let registry = ProcessRegistry::new();
        let mut a = sleeper(true);
        let mut b = sleeper(false);
        let guard_a = registry.register(a.id().unwrap(), "a", true);
        let guard_b = registry.register(b.id().unwrap(), "b", false);

        assert_eq!(registry.close_and_signal(Signal::SIGTERM), 2);
        assert!(guard_a.was_signaled());
        assert!(guard_b.was_signaled());

        assert!(!a.wait().await.unwrap().success());
        assert!(!b.wait().await.unwrap().success());
        drop(guard_a);
        drop(guard_b);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn late_registration_is_signaled_immediately() {
        let registry = ProcessRegistry::new();
        registry.close_and_signal(Signal::SIGTERM);

        let mut child = sleeper(true);
        let guard = registry.register(child.id().unwrap(), "late", true);
        assert!(guard.was_signaled());
        let status = tokio::time::timeout(std::time::Duration::from_secs(5), child.wait())
            .await
            .expect("late child should have been stopped")
            .unwrap();
        assert!(!status.success());
    }
}
