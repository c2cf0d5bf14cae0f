use chrono::Utc;
use std::io;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use super::LifecycleError;
use crate::types::ExitRecord;

/// One spawned agent process and the task watching it.
///
/// The monitor owns the OS child. It resolves either because the child
/// exited on its own (reported through the crash callback) or because
/// [`ChildHandle::stop`] asked it to terminate the child. Dropping the
/// handle terminates the child without a grace period.
pub struct ChildHandle {
    pid: u32,
    generation: u64,
    stop: Option<oneshot::Sender<Duration>>,
    exit: watch::Receiver<Option<ExitRecord>>,
    monitor: JoinHandle<Result<ExitRecord, LifecycleError>>,
}

impl ChildHandle {
    pub fn spawn<F>(
        program: &Path,
        args: &[String],
        generation: u64,
        on_crash: F,
    ) -> Result<Self, LifecycleError>
    where
        F: FnOnce(ExitRecord) + Send + 'static,
    {
        let mut command = Command::new(program);
        command.args(args).stdin(Stdio::null()).kill_on_drop(true);

        let child = command
            .spawn()
            .map_err(|e| LifecycleError::Spawn(format!("{}: {}", program.display(), e)))?;
        let pid = child
            .id()
            .ok_or_else(|| LifecycleError::Spawn("child exited before its pid was read".to_string()))?;

        log::info!(
            "Spawned {} (pid {}, generation {})",
            program.display(),
            pid,
            generation
        );

        let (stop_tx, stop_rx) = oneshot::channel();
        let (exit_tx, exit_rx) = watch::channel(None);
        let monitor = tokio::spawn(monitor(child, pid, stop_rx, exit_tx, on_crash));

        Ok(Self {
            pid,
            generation,
            stop: Some(stop_tx),
            exit: exit_rx,
            monitor,
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// How the child ended, once it has.
    pub fn exit(&self) -> Option<ExitRecord> {
        self.exit.borrow().clone()
    }

    pub fn has_exited(&self) -> bool {
        self.exit.borrow().is_some()
    }

    /// SIGTERM, then a forced kill once `grace` runs out. Returns at once
    /// with the recorded exit if the child is already gone.
    pub async fn stop(self, grace: Duration) -> Result<ExitRecord, LifecycleError> {
        let Self {
            pid, stop, monitor, ..
        } = self;

        if let Some(stop) = stop {
            let _ = stop.send(grace);
        }

        match monitor.await {
            Ok(result) => result,
            Err(e) => Err(LifecycleError::ForcedKill {
                pid,
                reason: format!("monitor task failed: {}", e),
            }),
        }
    }
}

async fn monitor<F>(
    mut child: Child,
    pid: u32,
    stop: oneshot::Receiver<Duration>,
    exit_tx: watch::Sender<Option<ExitRecord>>,
    on_crash: F,
) -> Result<ExitRecord, LifecycleError>
where
    F: FnOnce(ExitRecord) + Send + 'static,
{
    tokio::select! {
        status = child.wait() => {
            let record = exit_record(pid, status);
            log::warn!("Agent process {} exited unexpectedly: {}", pid, record.description);
            exit_tx.send_replace(Some(record.clone()));
            on_crash(record.clone());
            Ok(record)
        }
        requested = stop => {
            // A dropped handle gets no grace period.
            let grace = requested.unwrap_or(Duration::ZERO);
            let result = terminate(&mut child, pid, grace).await;
            if let Ok(record) = &result {
                exit_tx.send_replace(Some(record.clone()));
            }
            result
        }
    }
}

async fn terminate(child: &mut Child, pid: u32, grace: Duration) -> Result<ExitRecord, LifecycleError> {
    if !grace.is_zero() && send_sigterm(pid) {
        if let Ok(status) = timeout(grace, child.wait()).await {
            let record = exit_record(pid, status);
            log::info!("Agent process {} stopped: {}", pid, record.description);
            return Ok(record);
        }
        log::warn!("Agent process {} ignored SIGTERM for {:?}, killing", pid, grace);
    }

    child.kill().await.map_err(|e| LifecycleError::ForcedKill {
        pid,
        reason: e.to_string(),
    })?;
    let record = exit_record(pid, child.wait().await);
    log::info!("Agent process {} killed: {}", pid, record.description);
    Ok(record)
}

#[cfg(unix)]
fn send_sigterm(pid: u32) -> bool {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        Ok(()) => true,
        Err(e) => {
            log::warn!("Failed to send SIGTERM to {}: {}", pid, e);
            false
        }
    }
}

#[cfg(not(unix))]
fn send_sigterm(_pid: u32) -> bool {
    false
}

fn exit_record(pid: u32, status: io::Result<ExitStatus>) -> ExitRecord {
    let (code, description) = match status {
        Ok(status) => (status.code(), status.to_string()),
        Err(e) => (None, format!("wait failed: {}", e)),
    };
    ExitRecord {
        pid,
        code,
        description,
        at: Utc::now(),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};

    fn sh(script: &str) -> (PathBuf, Vec<String>) {
        (PathBuf::from("/bin/sh"), vec!["-c".to_string(), script.to_string()])
    }

    #[tokio::test]
    async fn test_stop_uses_sigterm() {
        let (program, args) = sh("sleep 30");
        let crashed = Arc::new(Mutex::new(false));
        let flag = crashed.clone();
        let child = ChildHandle::spawn(&program, &args, 1, move |_| *flag.lock().unwrap() = true).unwrap();

        let record = child.stop(Duration::from_secs(5)).await.unwrap();
        assert!(record.code.is_none());
        assert!(!*crashed.lock().unwrap());
    }

    #[tokio::test]
    async fn test_kill_after_grace() {
        let (program, args) = sh("trap '' TERM; sleep 30");
        let child = ChildHandle::spawn(&program, &args, 1, |_| {}).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let started = std::time::Instant::now();
        let record = child.stop(Duration::from_millis(200)).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(record.description.contains("signal"));
    }

    #[tokio::test]
    async fn test_unexpected_exit_reported() {
        let (program, args) = sh("exit 3");
        let (tx, rx) = oneshot::channel();
        let child = ChildHandle::spawn(&program, &args, 7, move |record| {
            let _ = tx.send(record);
        })
        .unwrap();

        let record = rx.await.unwrap();
        assert_eq!(record.code, Some(3));
        assert!(child.has_exited());
        assert_eq!(child.generation(), 7);
        assert_eq!(child.stop(Duration::from_secs(1)).await.unwrap().code, Some(3));
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let result = ChildHandle::spawn(Path::new("/nonexistent/agent"), &[], 1, |_| {});
        assert!(matches!(result, Err(LifecycleError::Spawn(_))));
    }
}
