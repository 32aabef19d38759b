use crate::config::Config;
use crate::control::{self, ControlSignal};
use crate::gateway::{self, AppState};
use crate::lifecycle::ProcessSupervisor;
use crate::sync::ContactSyncEngine;
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::{Notify, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Duration;

/// Grace period for the control surface to drain on shutdown.
const GATEWAY_DRAIN_SECS: u64 = 5;

/// Run the panel: worker supervision, contact refresh schedule, and the
/// control surface, until a shutdown signal arrives.
pub async fn run(config: Config, host: String, port: u16) -> Result<()> {
    crate::health::mark_component_ok("daemon");

    let sync = Arc::new(ContactSyncEngine::from_config(&config)?);
    let supervisor = Arc::new(ProcessSupervisor::from_config(&config));
    let (control, control_rx) = control::channel();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let panel_restart = Arc::new(Notify::new());

    let signals = control::spawn_signal_listener(control.clone())?;

    if !supervisor.is_configured() {
        tracing::warn!("No worker program configured; supervision disabled until [worker].program is set");
    } else if supervisor.autostart() {
        match supervisor.start().await {
            Ok(status) => tracing::info!(pid = ?status.pid, "Worker autostarted"),
            Err(e) => tracing::error!("Worker autostart failed: {e}"),
        }
    }

    let mut handles: Vec<JoinHandle<()>> = vec![
        signals,
        tokio::spawn(Arc::clone(&supervisor).run_watchdog(shutdown_rx.clone())),
    ];

    if sync.is_configured() && config.sync.startup_check {
        handles.push(spawn_startup_check(
            Arc::clone(&sync),
            Duration::from_secs(config.sync.startup_delay_secs),
            Duration::from_secs(config.sync.inter_pass_delay_secs),
            shutdown_rx.clone(),
        ));
    }

    if sync.is_configured() && config.sync.refresh_interval_mins > 0 {
        handles.push(spawn_periodic_refresh(
            Arc::clone(&sync),
            Duration::from_secs(config.sync.refresh_interval_mins.saturating_mul(60)),
            Duration::from_secs(config.sync.inter_pass_delay_secs),
            shutdown_rx.clone(),
        ));
    }

    let state = AppState {
        sync: Arc::clone(&sync),
        supervisor: Arc::clone(&supervisor),
        control: control.clone(),
    };
    let restart_delay = Duration::from_secs(config.gateway.panel_restart_delay_secs);
    let control_url = format!("http://{host}:{port}");
    let mut gateway_task = {
        let panel_restart = Arc::clone(&panel_restart);
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            gateway::run_gateway(&host, port, state, panel_restart, shutdown, restart_delay).await
        })
    };

    println!("🤖 botpanel started");
    println!("   Control:  {control_url}");
    println!("   Worker:   {}", config.worker.program.as_deref().unwrap_or("(not configured)"));
    println!("   Sync:     {}", if sync.is_configured() { "enabled" } else { "disabled" });
    println!("   SIGUSR1 restarts the worker, SIGHUP the panel, Ctrl+C stops");

    let gateway_result = tokio::select! {
        () = run_control_loop(control_rx, Arc::clone(&supervisor), Arc::clone(&panel_restart)) => None,
        result = &mut gateway_task => Some(result),
    };

    tracing::info!("Shutting down");
    crate::health::mark_component_error("daemon", "shutdown requested");
    let _ = shutdown_tx.send(true);

    let gateway_result = match gateway_result {
        Some(result) => result,
        None => match tokio::time::timeout(Duration::from_secs(GATEWAY_DRAIN_SECS), &mut gateway_task).await {
            Ok(result) => result,
            Err(_) => {
                gateway_task.abort();
                Ok(Ok(()))
            }
        },
    };

    for handle in &handles {
        handle.abort();
    }
    for handle in handles {
        let _ = handle.await;
    }

    if let Err(e) = supervisor.stop().await {
        tracing::error!("Failed to stop worker cleanly: {e}");
    }

    match gateway_result {
        Ok(result) => result,
        Err(e) => Err(anyhow::anyhow!("Control surface task failed: {e}")),
    }
}

/// Dispatch control signals until `Shutdown` arrives or every sender is
/// gone. Worker restarts run on their own task so a slow start never delays
/// a panel restart or shutdown.
async fn run_control_loop(
    mut control_rx: mpsc::Receiver<ControlSignal>,
    supervisor: Arc<ProcessSupervisor>,
    panel_restart: Arc<Notify>,
) {
    while let Some(signal) = control_rx.recv().await {
        match signal {
            ControlSignal::RestartWorker => {
                let supervisor = Arc::clone(&supervisor);
                tokio::spawn(async move {
                    if let Err(e) = supervisor.restart().await {
                        tracing::error!("Worker restart failed: {e}");
                    }
                });
            }
            ControlSignal::RestartPanel => panel_restart.notify_one(),
            ControlSignal::Shutdown => return,
        }
    }
}

async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

/// After `delay`, refresh whichever snapshots are missing or empty:
/// groups first, then friends.
fn spawn_startup_check(
    sync: Arc<ContactSyncEngine>,
    delay: Duration,
    inter_pass_delay: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!("Contact snapshot check scheduled in {}s", delay.as_secs());
        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            () = wait_for_shutdown(&mut shutdown) => return,
        }
        sync.refresh_sequence(true, inter_pass_delay).await;
    })
}

fn spawn_periodic_refresh(
    sync: Arc<ContactSyncEngine>,
    period: Duration,
    inter_pass_delay: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        // First tick fires immediately; the startup check covers boot.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    tracing::info!("Periodic contact refresh");
                    sync.refresh_sequence(false, inter_pass_delay).await;
                }
                () = wait_for_shutdown(&mut shutdown) => return,
            }
        }
    })
}
