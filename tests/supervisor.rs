//! Worker supervision with real child processes.
//!
//! Uses `sleep` and `sh` as stand-in workers, with a short settle probe so
//! each start completes in a fraction of a second.
#![cfg(unix)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use botpanel::config::WorkerConfig;
use botpanel::lifecycle::process::{is_pid_alive, read_pid};
use botpanel::lifecycle::{
    ProcessSupervisor, ReadinessProbe, SupervisorError, WorkerPaths, WorkerState,
};
use tempfile::TempDir;

const SETTLE: Duration = Duration::from_millis(200);

fn paths(tmp: &TempDir) -> WorkerPaths {
    WorkerPaths {
        home: tmp.path().to_path_buf(),
        pid_file: tmp.path().join("worker.pid"),
        log_dir: tmp.path().join("logs"),
    }
}

fn supervisor(tmp: &TempDir, program: &str, args: &[&str]) -> ProcessSupervisor {
    supervisor_with(tmp, program, args, |_| {})
}

fn supervisor_with(
    tmp: &TempDir,
    program: &str,
    args: &[&str],
    tweak: impl FnOnce(&mut WorkerConfig),
) -> ProcessSupervisor {
    let mut config = WorkerConfig {
        program: Some(program.into()),
        args: args.iter().map(|a| (*a).to_string()).collect(),
        stop_timeout_secs: 1,
        ..WorkerConfig::default()
    };
    tweak(&mut config);
    ProcessSupervisor::new(config, paths(tmp)).with_probe(ReadinessProbe::Settle(SETTLE))
}

async fn wait_for_exit(pid: u32) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while is_pid_alive(pid) {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("PID {pid} still alive"));
}

#[tokio::test]
async fn start_records_pid_and_stop_removes_it() {
    let tmp = TempDir::new().unwrap();
    let sup = supervisor(&tmp, "sleep", &["30"]);

    let status = sup.start().await.unwrap();
    assert_eq!(status.state, WorkerState::Running);
    assert!(status.alive);
    let pid = status.pid.unwrap();
    assert_eq!(read_pid(&sup.paths().pid_file).unwrap(), Some(pid));
    assert!(sup.check_liveness());

    sup.stop().await.unwrap();
    assert_eq!(sup.state(), WorkerState::Stopped);
    assert!(!sup.paths().pid_file.exists());
    wait_for_exit(pid).await;
}

#[tokio::test]
async fn restart_replaces_the_worker() {
    let tmp = TempDir::new().unwrap();
    let sup = supervisor(&tmp, "sleep", &["30"]);

    let first = sup.start().await.unwrap().pid.unwrap();
    let second = sup.restart().await.unwrap().pid.unwrap();
    assert_ne!(first, second);
    assert_eq!(sup.state(), WorkerState::Running);
    assert_eq!(read_pid(&sup.paths().pid_file).unwrap(), Some(second));
    wait_for_exit(first).await;

    sup.stop().await.unwrap();
}

#[tokio::test]
async fn stop_is_idempotent() {
    let tmp = TempDir::new().unwrap();
    let sup = supervisor(&tmp, "sleep", &["30"]);
    sup.start().await.unwrap();

    sup.stop().await.unwrap();
    sup.stop().await.unwrap();
    assert_eq!(sup.status().state, WorkerState::Stopped);
    assert!(sup.status().pid.is_none());
}

#[tokio::test]
async fn worker_ignoring_sigterm_is_killed() {
    let tmp = TempDir::new().unwrap();
    let sup = supervisor(
        &tmp,
        "sh",
        &["-c", "trap '' TERM; while true; do sleep 1; done"],
    );
    let pid = sup.start().await.unwrap().pid.unwrap();

    let started = Instant::now();
    sup.stop().await.unwrap();
    assert!(
        started.elapsed() >= Duration::from_secs(1),
        "stop should wait out the grace period before SIGKILL"
    );
    assert_eq!(sup.state(), WorkerState::Stopped);
    wait_for_exit(pid).await;
}

#[tokio::test]
async fn early_exit_is_reported_with_log_location() {
    let tmp = TempDir::new().unwrap();
    let sup = supervisor(&tmp, "sh", &["-c", "echo boom >&2; exit 3"]);

    let err = sup.start().await.unwrap_err();
    match &err {
        SupervisorError::ExitedDuringStartup { status, log } => {
            assert_eq!(status.code(), Some(3));
            assert!(log.starts_with(tmp.path().join("logs")));
        }
        other => panic!("expected ExitedDuringStartup, got {other}"),
    }
    assert_eq!(sup.state(), WorkerState::Stopped);
    assert!(!sup.paths().pid_file.exists());

    let log = std::fs::read_to_string(tmp.path().join("logs").join("worker.log")).unwrap();
    assert!(log.contains("boom"));
}

#[tokio::test]
async fn missing_program_fails_to_spawn() {
    let tmp = TempDir::new().unwrap();
    let sup = supervisor(&tmp, "/nonexistent/botpanel-worker", &[]);
    assert!(matches!(
        sup.start().await,
        Err(SupervisorError::Spawn { .. })
    ));
    assert_eq!(sup.state(), WorkerState::Stopped);
}

#[tokio::test]
async fn concurrent_start_yields_one_busy() {
    let tmp = TempDir::new().unwrap();
    let sup = supervisor(&tmp, "sleep", &["30"]);

    let (a, b) = tokio::join!(sup.start(), sup.start());
    let busy = [&a, &b]
        .iter()
        .filter(|r| matches!(r, Err(SupervisorError::Busy)))
        .count();
    let started = [&a, &b].iter().filter(|r| r.is_ok()).count();
    assert_eq!((started, busy), (1, 1));

    sup.stop().await.unwrap();
}

#[tokio::test]
async fn restart_during_inflight_start_respawns_worker() {
    let tmp = TempDir::new().unwrap();
    let sup = supervisor(&tmp, "sleep", &["30"]).with_probe(ReadinessProbe::Settle(
        Duration::from_millis(500),
    ));

    let (started, restarted) = tokio::join!(sup.start(), async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        sup.restart().await
    });
    let first = started.unwrap().pid.unwrap();
    let second = restarted.unwrap().pid.unwrap();
    assert_ne!(first, second);
    assert_eq!(sup.state(), WorkerState::Running);
    assert_eq!(read_pid(&sup.paths().pid_file).unwrap(), Some(second));

    sup.stop().await.unwrap();
    wait_for_exit(second).await;
}

#[tokio::test]
async fn watchdog_restarts_crashed_worker() {
    let tmp = TempDir::new().unwrap();
    let marker = tmp.path().join("crashed-once");
    let script = r#"if [ -e "$1" ]; then exec sleep 30; fi; touch "$1"; sleep 0.5; exit 1"#;
    let sup = supervisor(
        &tmp,
        "sh",
        &["-c", script, "worker", marker.to_str().unwrap()],
    );

    let first = sup.start().await.unwrap().pid.unwrap();
    // Unreaped until the watchdog polls it, so the pid still looks alive.
    tokio::time::sleep(Duration::from_millis(900)).await;

    sup.watchdog_tick().await;
    let status = sup.status();
    assert_eq!(status.state, WorkerState::Running);
    assert!(status.alive);
    assert_ne!(status.pid, Some(first));

    sup.stop().await.unwrap();
}

#[tokio::test]
async fn watchdog_leaves_crashed_worker_down_when_restart_disabled() {
    let tmp = TempDir::new().unwrap();
    let sup = supervisor_with(&tmp, "sh", &["-c", "sleep 0.5"], |c| {
        c.restart_on_crash = false;
    });

    sup.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(900)).await;

    sup.watchdog_tick().await;
    assert_eq!(sup.state(), WorkerState::Stopped);
    assert!(!sup.status().alive);
    assert!(!sup.paths().pid_file.exists());
}

#[tokio::test]
async fn watchdog_task_exits_on_shutdown() {
    let tmp = TempDir::new().unwrap();
    let sup = Arc::new(supervisor(&tmp, "sleep", &["30"]));
    let (tx, rx) = tokio::sync::watch::channel(false);

    let task = tokio::spawn(Arc::clone(&sup).run_watchdog(rx));
    tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .expect("watchdog ignored shutdown")
        .unwrap();
}
