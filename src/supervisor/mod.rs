//! Owns the OS-level lifecycle of one agent process bound to a fixed
//! address: start, readiness, reset, crash detection, shutdown.

pub mod child;
pub mod control;
pub mod notify;
pub mod probe;

pub use child::ChildHandle;
pub use control::create_router;
pub use notify::ReadyNotifier;
pub use probe::{wait_ready, ProbeSettings};

use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

use crate::config::Config;
use crate::reporting::RetryPolicy;
use crate::types::{AgentAddress, ExitRecord, ProcessState, ProcessStatus};

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("Failed to spawn agent process: {0}")]
    Spawn(String),

    #[error("Agent at {address} not ready after {attempts} probe(s)")]
    ReadinessExhausted { address: AgentAddress, attempts: u32 },

    #[error("Failed to kill agent process {pid}: {reason}")]
    ForcedKill { pid: u32, reason: String },

    #[error("No agent process is running")]
    NotRunning,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub address: AgentAddress,
    pub program: PathBuf,
    /// Placeholders already substituted.
    pub args: Vec<String>,
    pub grace_period: Duration,
    pub probe: ProbeSettings,
    pub auto_restart_on_crash: bool,
}

impl SupervisorConfig {
    pub fn new(address: AgentAddress, program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        let args = substitute(&args, &address);
        Self {
            address,
            program: program.into(),
            args,
            grace_period: Duration::from_secs(5),
            probe: ProbeSettings::default(),
            auto_restart_on_crash: false,
        }
    }

    /// The supervised program defaults to the running binary.
    pub fn from_settings(config: &Config) -> Result<Self, LifecycleError> {
        let launcher = &config.launcher;
        let program = match &launcher.command {
            Some(command) => PathBuf::from(command),
            None => std::env::current_exe()?,
        };

        let mut supervisor = Self::new(config.agent.address(), program, launcher.args.clone());
        supervisor.grace_period = Duration::from_millis(launcher.grace_period_ms);
        supervisor.probe = ProbeSettings::from_config(launcher);
        supervisor.auto_restart_on_crash = launcher.auto_restart_on_crash;
        Ok(supervisor)
    }

    pub fn with_extra_args(mut self, args: impl IntoIterator<Item = String>) -> Self {
        self.args.extend(args);
        self
    }
}

fn substitute(args: &[String], address: &AgentAddress) -> Vec<String> {
    let port = address.port.to_string();
    args.iter()
        .map(|arg| arg.replace("{host}", &address.host).replace("{port}", &port))
        .collect()
}

struct Inner {
    config: SupervisorConfig,
    /// Held across teardown and spawn; serializes start, reset and shutdown.
    child: Mutex<Option<ChildHandle>>,
    /// Separate from `child` so `status()` never waits on a reset.
    status: RwLock<ProcessStatus>,
    notifier: Option<ReadyNotifier>,
}

/// Cheap to clone; clones share the same agent process.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

impl Supervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        Self::build(config, None)
    }

    /// Every successful reset is announced through `notifier`.
    pub fn with_notifier(config: SupervisorConfig, notifier: ReadyNotifier) -> Self {
        Self::build(config, Some(notifier))
    }

    fn build(config: SupervisorConfig, notifier: Option<ReadyNotifier>) -> Self {
        let status = ProcessStatus::stopped(config.address.clone());
        Self {
            inner: Arc::new(Inner {
                config,
                child: Mutex::new(None),
                status: RwLock::new(status),
                notifier,
            }),
        }
    }

    pub fn address(&self) -> &AgentAddress {
        &self.inner.config.address
    }

    pub fn notifier(&self) -> Option<&ReadyNotifier> {
        self.inner.notifier.as_ref()
    }

    pub async fn status(&self) -> ProcessStatus {
        self.inner.status.read().await.clone()
    }

    /// Launches the agent and waits for readiness. A no-op while Running;
    /// from Crashed or Stopped it spawns a fresh child.
    pub async fn start(&self) -> Result<ProcessStatus, LifecycleError> {
        let mut slot = self.inner.child.lock().await;
        {
            let status = self.inner.status.read().await;
            if status.is_running() {
                return Ok(status.clone());
            }
        }

        if let Some(stale) = slot.take() {
            self.retire(stale).await?;
        }
        self.launch(&mut slot, ProcessState::Starting).await
    }

    /// Replaces the running child with a fresh one on the same address.
    /// Resets that queue up behind one already in flight are satisfied by
    /// its result instead of restarting again.
    pub async fn reset(&self) -> Result<ProcessStatus, LifecycleError> {
        self.reset_and_notify(None, None).await
    }

    /// [`reset`](Self::reset), then announce readiness to `notify_url`, or to
    /// the configured notifier when none is given. Notification failures are
    /// logged; the reset itself has already succeeded.
    pub async fn reset_and_notify(
        &self,
        notify_url: Option<&str>,
        agent_id: Option<&str>,
    ) -> Result<ProcessStatus, LifecycleError> {
        let status = self.restart().await?;

        let notifier = match (notify_url, &self.inner.notifier) {
            (Some(url), Some(configured)) => Some(configured.redirected(url)),
            (Some(url), None) => Some(ReadyNotifier::new(
                url,
                RetryPolicy::default(),
                Duration::from_secs(10),
            )),
            (None, configured) => configured.clone(),
        };
        if let Some(notifier) = notifier {
            if let Err(e) = notifier.notify(&status, agent_id).await {
                log::error!("Ready notification to {} failed: {}", notifier.url(), e);
            }
        }
        Ok(status)
    }

    async fn restart(&self) -> Result<ProcessStatus, LifecycleError> {
        let observed = self.inner.status.read().await.generation;
        let mut slot = self.inner.child.lock().await;

        {
            let status = self.inner.status.read().await;
            if status.generation != observed && status.is_running() {
                log::info!(
                    "Reset coalesced into generation {} on {}",
                    status.generation,
                    status.address
                );
                return Ok(status.clone());
            }
        }

        log::info!("Resetting agent on {}", self.inner.config.address);
        self.set_state(ProcessState::Restarting).await;

        if let Some(current) = slot.take() {
            self.retire(current).await?;
        }
        self.inner.status.write().await.restarts += 1;

        self.launch(&mut slot, ProcessState::Restarting).await
    }

    /// Stops the child, if any. The address is released on return.
    pub async fn shutdown(&self) -> Result<ProcessStatus, LifecycleError> {
        let mut slot = self.inner.child.lock().await;
        let result = match slot.take() {
            Some(current) => self.retire(current).await,
            None => Ok(()),
        };
        let status = {
            let mut status = self.inner.status.write().await;
            status.state = ProcessState::Stopped;
            status.pid = None;
            status.clone()
        };
        result.map(|_| status)
    }

    async fn set_state(&self, state: ProcessState) {
        self.inner.status.write().await.state = state;
    }

    /// Stops `child` and records how it ended.
    async fn retire(&self, child: ChildHandle) -> Result<(), LifecycleError> {
        match child.stop(self.inner.config.grace_period).await {
            Ok(record) => {
                let mut status = self.inner.status.write().await;
                status.pid = None;
                status.last_exit = Some(record);
                Ok(())
            }
            Err(e) => {
                // The old process may still hold the address.
                self.set_state(ProcessState::Crashed).await;
                Err(e)
            }
        }
    }

    async fn launch(
        &self,
        slot: &mut Option<ChildHandle>,
        transitional: ProcessState,
    ) -> Result<ProcessStatus, LifecycleError> {
        let config = &self.inner.config;
        let generation = {
            let mut status = self.inner.status.write().await;
            status.state = transitional;
            status.pid = None;
            status.generation += 1;
            status.generation
        };

        let weak = Arc::downgrade(&self.inner);
        let child = match ChildHandle::spawn(&config.program, &config.args, generation, move |record| {
            on_crash(weak, generation, record)
        }) {
            Ok(child) => child,
            Err(e) => {
                self.set_state(ProcessState::Stopped).await;
                return Err(e);
            }
        };
        self.inner.status.write().await.pid = Some(child.pid());

        let ready = wait_ready(&config.address, &config.probe, || {
            child.exit().map(|record| record.description)
        })
        .await;

        if let Err(e) = ready {
            log::error!("Agent generation {} failed to start: {}", generation, e);
            let exit = child.stop(config.grace_period).await.ok();
            let mut status = self.inner.status.write().await;
            status.state = ProcessState::Stopped;
            status.pid = None;
            if exit.is_some() {
                status.last_exit = exit;
            }
            return Err(e);
        }

        {
            let mut status = self.inner.status.write().await;
            if let Some(record) = child.exit() {
                status.state = ProcessState::Crashed;
                status.pid = None;
                status.last_exit = Some(record.clone());
                return Err(LifecycleError::Spawn(format!(
                    "child exited right after becoming ready: {}",
                    record.description
                )));
            }
            status.state = ProcessState::Running;
        }
        let status = self.status().await;
        log::info!(
            "Agent running on {} (pid {}, generation {})",
            config.address,
            child.pid(),
            generation
        );
        *slot = Some(child);
        Ok(status)
    }

    async fn restart_after_crash(&self, generation: u64) {
        let mut slot = self.inner.child.lock().await;
        {
            let status = self.inner.status.read().await;
            if status.generation != generation || status.state != ProcessState::Crashed {
                return;
            }
        }

        if let Some(dead) = slot.take() {
            let _ = dead.stop(Duration::ZERO).await;
        }
        self.inner.status.write().await.restarts += 1;

        match self.launch(&mut slot, ProcessState::Restarting).await {
            Ok(status) => log::info!("Restarted crashed agent as generation {}", status.generation),
            Err(e) => log::error!("Automatic restart failed: {}", e),
        }
    }
}

/// Runs on the monitor task of the child that exited.
fn on_crash(inner: Weak<Inner>, generation: u64, record: ExitRecord) {
    tokio::spawn(async move {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        let supervisor = Supervisor { inner };

        let crashed = {
            let mut status = supervisor.inner.status.write().await;
            if status.generation != generation || status.state != ProcessState::Running {
                false
            } else {
                status.state = ProcessState::Crashed;
                status.pid = None;
                status.last_exit = Some(record);
                true
            }
        };
        if !crashed {
            return;
        }

        log::error!(
            "Agent generation {} on {} crashed",
            generation,
            supervisor.inner.config.address
        );
        if supervisor.inner.config.auto_restart_on_crash {
            supervisor.restart_after_crash(generation).await;
        }
    });
}
