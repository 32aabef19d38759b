//! Supervision of the chat-bot worker process.
//!
//! One logical worker slot, driven by `start`/`stop`/`restart` from the
//! control surface and by the watchdog. Lifecycle operations are serialized
//! by an async mutex; status reads use a separate snapshot and never wait on
//! that mutex.

pub mod process;
pub mod readiness;

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, watch};

use crate::config::{Config, WorkerConfig};

pub use readiness::{ProbeFailure, ReadinessProbe};

const WORKER_COMPONENT: &str = "worker";

/// How long to wait for the kernel to reap a SIGKILLed worker.
const KILL_CONFIRM_TIMEOUT: Duration = Duration::from_secs(2);

// ── Typed supervisor errors ────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("worker program is not configured (set [worker].program)")]
    NotConfigured,
    /// `start` found another lifecycle operation holding the lock.
    #[error("a worker start is already in progress")]
    Busy,
    #[error("failed to spawn worker `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("worker exited during startup ({status}); check logs at {}", .log.display())]
    ExitedDuringStartup {
        status: std::process::ExitStatus,
        log: PathBuf,
    },
    #[error("worker did not become ready: {0}")]
    NotReady(String),
    /// Process is still alive after SIGKILL; the pidfile is preserved.
    #[error("worker PID {0} survived SIGKILL")]
    SurvivedKill(u32),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

// ── State ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Stopped,
    Starting,
    Running,
    StopRequested,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerHandle {
    pub pid: u32,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerStatus {
    pub state: WorkerState,
    pub pid: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
    pub alive: bool,
    pub uptime_secs: Option<u64>,
}

#[derive(Debug, Clone, Copy)]
struct View {
    state: WorkerState,
    handle: Option<WorkerHandle>,
}

/// Filesystem locations the supervisor owns.
#[derive(Debug, Clone)]
pub struct WorkerPaths {
    /// Stamped into the worker env so a later panel can recognise it.
    pub home: PathBuf,
    pub pid_file: PathBuf,
    pub log_dir: PathBuf,
}

impl WorkerPaths {
    pub fn from_config(config: &Config) -> Self {
        Self {
            home: config.home_dir.clone(),
            pid_file: config.pid_path(),
            log_dir: config.worker_log_dir(),
        }
    }
}

// ── Supervisor ──────────────────────────────────────────────────

pub struct ProcessSupervisor {
    config: WorkerConfig,
    paths: WorkerPaths,
    probe: ReadinessProbe,
    slot: Mutex<Option<Child>>,
    view: RwLock<View>,
}

impl ProcessSupervisor {
    pub fn new(config: WorkerConfig, paths: WorkerPaths) -> Self {
        let probe = ReadinessProbe::from_config(&config);
        Self {
            config,
            paths,
            probe,
            slot: Mutex::new(None),
            view: RwLock::new(View {
                state: WorkerState::Stopped,
                handle: None,
            }),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.worker.clone(), WorkerPaths::from_config(config))
    }

    pub fn with_probe(mut self, probe: ReadinessProbe) -> Self {
        self.probe = probe;
        self
    }

    pub fn is_configured(&self) -> bool {
        self.program().is_ok()
    }

    pub fn autostart(&self) -> bool {
        self.config.autostart
    }

    pub fn paths(&self) -> &WorkerPaths {
        &self.paths
    }

    pub fn state(&self) -> WorkerState {
        self.view.read().state
    }

    fn set_view(&self, state: WorkerState, handle: Option<WorkerHandle>) {
        *self.view.write() = View { state, handle };
    }

    fn program(&self) -> Result<&str, SupervisorError> {
        self.config
            .program
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .ok_or(SupervisorError::NotConfigured)
    }

    /// Current view. `alive` is a process-alive check, not an application
    /// health check.
    pub fn status(&self) -> WorkerStatus {
        let view = *self.view.read();
        let alive = match self.slot.try_lock() {
            Ok(mut slot) => matches!(slot.as_mut().map(Child::try_wait), Some(Ok(None))),
            // A lifecycle operation is running; fall back to the pid.
            Err(_) => view.handle.is_some_and(|h| process::is_pid_alive(h.pid)),
        };
        let uptime_secs = view
            .handle
            .filter(|_| alive)
            .map(|h| u64::try_from((Utc::now() - h.started_at).num_seconds()).unwrap_or(0));

        WorkerStatus {
            state: view.state,
            pid: view.handle.map(|h| h.pid),
            started_at: view.handle.map(|h| h.started_at),
            alive,
            uptime_secs,
        }
    }

    pub fn check_liveness(&self) -> bool {
        self.status().alive
    }

    /// Start the worker. A live worker is terminated first, so this doubles
    /// as restart. A concurrent start gets [`SupervisorError::Busy`] rather
    /// than a second process.
    pub async fn start(&self) -> Result<WorkerStatus, SupervisorError> {
        let mut slot = self.slot.try_lock().map_err(|_| SupervisorError::Busy)?;
        self.start_locked(&mut slot).await?;
        drop(slot);
        Ok(self.status())
    }

    /// Terminate and respawn the worker. Unlike [`start`](Self::start) this
    /// waits for an in-flight lifecycle operation instead of reporting
    /// `Busy`: a restart requested mid-start must still pick up the new
    /// configuration.
    pub async fn restart(&self) -> Result<WorkerStatus, SupervisorError> {
        let mut slot = self.slot.lock().await;
        tracing::info!("Restarting worker");
        self.start_locked(&mut slot).await?;
        drop(slot);
        Ok(self.status())
    }

    /// Stop the worker: SIGTERM, bounded wait, SIGKILL. Stopping a stopped
    /// worker is a successful no-op.
    pub async fn stop(&self) -> Result<(), SupervisorError> {
        let mut slot = self.slot.lock().await;
        if slot.is_none() {
            self.clear_orphan().await;
            self.set_view(WorkerState::Stopped, None);
            return Ok(());
        }

        let previous = self.view.read().handle;
        self.set_view(WorkerState::StopRequested, previous);
        self.terminate(&mut slot).await?;

        if let Err(e) = process::remove_pid(&self.paths.pid_file) {
            tracing::warn!("Failed to remove worker pidfile (non-fatal): {e:#}");
        }
        self.set_view(WorkerState::Stopped, None);
        crate::health::mark_component_idle(WORKER_COMPONENT);
        if let Some(h) = previous {
            tracing::info!("Stopped worker (was PID {})", h.pid);
        }
        Ok(())
    }

    async fn start_locked(&self, slot: &mut Option<Child>) -> Result<(), SupervisorError> {
        let program = self.program()?.to_string();
        let result = self.replace_locked(slot, &program).await;
        if let Err(e) = &result {
            self.record_start_failure(slot, e);
        }
        result
    }

    async fn replace_locked(
        &self,
        slot: &mut Option<Child>,
        program: &str,
    ) -> Result<(), SupervisorError> {
        if slot.is_some() {
            let previous = self.view.read().handle;
            self.set_view(WorkerState::StopRequested, previous);
            self.terminate(slot).await?;
            self.set_view(WorkerState::Stopped, None);
        }
        self.clear_orphan().await;
        self.spawn_locked(slot, program).await
    }

    /// A failed start leaves the supervisor `Stopped`. A process that could
    /// not be terminated stays in the slot and keeps its pid in the view.
    fn record_start_failure(&self, slot: &Option<Child>, error: &SupervisorError) {
        let lingering = slot.as_ref().and(self.view.read().handle);
        self.set_view(WorkerState::Stopped, lingering);
        crate::health::mark_component_error(WORKER_COMPONENT, error);
    }

    async fn spawn_locked(
        &self,
        slot: &mut Option<Child>,
        program: &str,
    ) -> Result<(), SupervisorError> {
        let (out, err) = process::open_worker_log(&self.paths.log_dir)?;

        let mut cmd = Command::new(program);
        cmd.args(&self.config.args)
            .envs(&self.config.env)
            .env(process::OWNER_ENV, &self.paths.home)
            .stdin(Stdio::null())
            .stdout(out)
            .stderr(err)
            .process_group(0)
            .kill_on_drop(true);
        if let Some(dir) = &self.config.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|source| SupervisorError::Spawn {
            program: program.to_string(),
            source,
        })?;
        let pid = child.id().context("Spawned worker has no PID")?;
        let handle = WorkerHandle {
            pid,
            started_at: Utc::now(),
        };
        self.set_view(WorkerState::Starting, Some(handle));
        tracing::info!(pid, program, "Worker spawned, waiting for readiness");

        if let Err(failure) = self.probe.wait(&mut child).await {
            kill_now(pid, &mut child).await;
            return Err(match failure {
                ProbeFailure::Exited(status) => SupervisorError::ExitedDuringStartup {
                    status,
                    log: process::log_path(&self.paths.log_dir),
                },
                ProbeFailure::TimedOut(msg) => SupervisorError::NotReady(msg),
                ProbeFailure::Wait(e) => SupervisorError::Internal(
                    anyhow::Error::new(e).context("Failed to check worker status after spawn"),
                ),
            });
        }

        // A running worker must always be recorded in the pidfile.
        if let Err(e) = process::write_pid(&self.paths.pid_file, pid) {
            kill_now(pid, &mut child).await;
            return Err(e.context("Failed to write PID file; killed spawned worker").into());
        }

        *slot = Some(child);
        self.set_view(WorkerState::Running, Some(handle));
        crate::health::mark_component_ok(WORKER_COMPONENT);
        tracing::info!(pid, "Worker running");
        Ok(())
    }

    /// Terminate the child in `slot`. On success the slot is emptied; if the
    /// process survives SIGKILL it is left in place.
    async fn terminate(&self, slot: &mut Option<Child>) -> Result<(), SupervisorError> {
        let Some(child) = slot.as_mut() else {
            return Ok(());
        };
        if let Ok(Some(status)) = child.try_wait() {
            tracing::info!("Worker had already exited ({status})");
            *slot = None;
            return Ok(());
        }
        let Some(pid) = child.id() else {
            *slot = None;
            return Ok(());
        };

        process::signal_group(pid, libc::SIGTERM)
            .with_context(|| format!("Failed to send SIGTERM to PID {pid}"))?;

        let timeout = self.config.stop_timeout();
        match tokio::time::timeout(timeout, child.wait()).await {
            Ok(result) => {
                let status = result.context("Failed to wait for worker exit")?;
                tracing::info!(pid, %status, "Worker exited");
            }
            Err(_) => {
                tracing::warn!(
                    "PID {pid} did not exit within {}s, sending SIGKILL",
                    timeout.as_secs()
                );
                if !kill_now(pid, child).await {
                    return Err(SupervisorError::SurvivedKill(pid));
                }
            }
        }
        *slot = None;
        Ok(())
    }

    /// Terminate a worker recorded in the pidfile by a previous panel run.
    async fn clear_orphan(&self) {
        let pid_file = &self.paths.pid_file;
        match process::read_pid(pid_file) {
            Ok(None) => return,
            Ok(Some(pid))
                if process::is_pid_alive(pid) && process::is_owned_worker(pid, &self.paths.home) =>
            {
                tracing::warn!("Found worker PID {pid} from a previous run, terminating it");
                if let Err(e) = process::terminate_pid(pid, self.config.stop_timeout()).await {
                    tracing::warn!("Failed to terminate orphaned worker: {e:#}");
                    return;
                }
            }
            Ok(Some(pid)) => tracing::info!("Clearing stale worker PID {pid}"),
            Err(e) => tracing::warn!("Ignoring unreadable worker pidfile: {e:#}"),
        }
        if let Err(e) = process::remove_pid(pid_file) {
            tracing::warn!("Failed to remove stale pidfile: {e:#}");
        }
    }

    /// One watchdog pass: notice a worker that died while `Running`, record
    /// it, and restart it when `restart_on_crash` is set. Skips while another
    /// lifecycle operation holds the lock.
    pub async fn watchdog_tick(&self) {
        let Ok(mut slot) = self.slot.try_lock() else {
            tracing::debug!("Watchdog: lifecycle operation in progress, skipping");
            return;
        };
        let Some(child) = slot.as_mut() else {
            return;
        };
        let status = match child.try_wait() {
            Ok(Some(status)) => status,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!("Watchdog: failed to poll worker: {e}");
                return;
            }
        };

        let pid = self.view.read().handle.map(|h| h.pid);
        tracing::warn!(?pid, %status, "Worker exited unexpectedly");
        *slot = None;
        self.set_view(WorkerState::Stopped, None);
        if let Err(e) = process::remove_pid(&self.paths.pid_file) {
            tracing::warn!("Failed to remove worker pidfile: {e:#}");
        }
        crate::health::mark_component_error(WORKER_COMPONENT, format!("worker exited: {status}"));

        if !self.config.restart_on_crash {
            return;
        }
        crate::health::bump_component_restart(WORKER_COMPONENT);
        if let Err(e) = self.start_locked(&mut slot).await {
            tracing::error!("Watchdog: worker restart failed: {e}");
        }
    }

    /// Periodic watchdog. Exits when `shutdown` flips.
    pub async fn run_watchdog(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let period = Duration::from_secs(self.config.watchdog_interval_secs.max(1));
        let mut interval = tokio::time::interval(period);
        // First tick fires immediately; the worker was just started.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => self.watchdog_tick().await,
                _ = shutdown.changed() => {
                    tracing::info!("Worker watchdog shutting down");
                    return;
                }
            }
        }
    }
}

/// SIGKILL the group and wait for the reap. `false` if the process is still
/// there after [`KILL_CONFIRM_TIMEOUT`].
async fn kill_now(pid: u32, child: &mut Child) -> bool {
    if let Err(e) = process::signal_group(pid, libc::SIGKILL) {
        tracing::warn!("Failed to SIGKILL worker group {pid}: {e}");
    }
    let _ = child.start_kill();
    tokio::time::timeout(KILL_CONFIRM_TIMEOUT, child.wait())
        .await
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn supervisor(tmp: &TempDir, program: Option<&str>) -> ProcessSupervisor {
        let mut config = Config::default();
        config.home_dir = tmp.path().to_path_buf();
        config.worker.program = program.map(Into::into);
        ProcessSupervisor::from_config(&config)
    }

    #[test]
    fn new_supervisor_is_stopped() {
        let tmp = TempDir::new().unwrap();
        let sup = supervisor(&tmp, Some("sleep"));
        let status = sup.status();
        assert_eq!(status.state, WorkerState::Stopped);
        assert!(!status.alive);
        assert!(status.pid.is_none());
        assert!(sup.is_configured());
        assert_eq!(sup.paths().pid_file, tmp.path().join("worker.pid"));
    }

    #[tokio::test]
    async fn start_without_program_is_a_configuration_error() {
        let tmp = TempDir::new().unwrap();
        let sup = supervisor(&tmp, Some("   "));
        assert!(!sup.is_configured());
        assert!(matches!(sup.start().await, Err(SupervisorError::NotConfigured)));
        assert_eq!(sup.state(), WorkerState::Stopped);
    }

    #[tokio::test]
    async fn stop_when_stopped_is_noop() {
        let tmp = TempDir::new().unwrap();
        let sup = supervisor(&tmp, None);
        sup.stop().await.unwrap();
        sup.stop().await.unwrap();
        assert_eq!(sup.state(), WorkerState::Stopped);
    }

    #[tokio::test]
    async fn stop_clears_stale_pidfile() {
        let tmp = TempDir::new().unwrap();
        let sup = supervisor(&tmp, None);
        process::write_pid(&sup.paths().pid_file, 4_294_967).unwrap();
        sup.stop().await.unwrap();
        assert!(!sup.paths().pid_file.exists());
    }

    #[test]
    fn failed_termination_during_start_leaves_supervisor_stopped() {
        let tmp = TempDir::new().unwrap();
        let sup = supervisor(&tmp, Some("sleep"));
        let handle = WorkerHandle {
            pid: 4_294_967,
            started_at: Utc::now(),
        };
        sup.set_view(WorkerState::StopRequested, Some(handle));

        sup.record_start_failure(&None, &SupervisorError::SurvivedKill(handle.pid));

        let status = sup.status();
        assert_eq!(status.state, WorkerState::Stopped);
        assert!(status.pid.is_none());
        assert!(!status.alive);
    }

    #[tokio::test]
    async fn unkillable_worker_keeps_its_pid_after_failed_start() {
        let tmp = TempDir::new().unwrap();
        let sup = supervisor(&tmp, Some("sleep"));
        let child = Command::new("sleep")
            .arg("30")
            .process_group(0)
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        let handle = WorkerHandle {
            pid: child.id().unwrap(),
            started_at: Utc::now(),
        };
        {
            let mut slot = sup.slot.lock().await;
            *slot = Some(child);
            sup.set_view(WorkerState::StopRequested, Some(handle));
            sup.record_start_failure(&slot, &SupervisorError::SurvivedKill(handle.pid));
        }

        let status = sup.status();
        assert_eq!(status.state, WorkerState::Stopped);
        assert_eq!(status.pid, Some(handle.pid));
        assert!(status.alive, "the lingering process is still reported");

        sup.stop().await.unwrap();
        assert!(sup.status().pid.is_none());
    }

    #[test]
    fn status_serializes_camel_case() {
        let status = WorkerStatus {
            state: WorkerState::StopRequested,
            pid: Some(42),
            started_at: None,
            alive: true,
            uptime_secs: Some(3),
        };
        let json = serde_json::to_value(status).unwrap();
        assert_eq!(json["state"], "stop_requested");
        assert_eq!(json["uptimeSecs"], 3);
    }
}
