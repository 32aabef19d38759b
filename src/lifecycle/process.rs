//! OS-level helpers for the worker process: pidfile, signals, log rotation.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Log file name within the worker log directory.
const LOG_FILE: &str = "worker.log";

/// Rotated log file name.
const LOG_FILE_ROTATED: &str = "worker.log.1";

/// Env var stamped on the worker so a later panel can recognise it.
pub const OWNER_ENV: &str = "BOTPANEL_HOME";

// ── PID file management ────────────────────────────────────────

/// Read the worker PID. `None` if the pidfile doesn't exist.
pub fn read_pid(pid_path: &Path) -> Result<Option<u32>> {
    match fs::read_to_string(pid_path) {
        Ok(content) => {
            let pid: u32 = content
                .trim()
                .parse()
                .with_context(|| format!("Invalid PID in {}", pid_path.display()))?;
            Ok(Some(pid))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("Failed to read {}", pid_path.display())),
    }
}

pub fn write_pid(pid_path: &Path, pid: u32) -> Result<()> {
    crate::util::atomic_write(pid_path, pid.to_string().as_bytes())
        .with_context(|| format!("Failed to write PID file: {}", pid_path.display()))
}

/// Remove the pidfile. No error if already absent.
pub fn remove_pid(pid_path: &Path) -> Result<()> {
    match fs::remove_file(pid_path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("Failed to remove {}", pid_path.display())),
    }
}

// ── Process checks ─────────────────────────────────────────────

/// Check if a process with the given PID exists.
///
/// Uses `kill(pid, 0)`. EPERM means the process exists but belongs to
/// someone else, which still counts as alive.
pub fn is_pid_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    let ret = unsafe { libc::kill(pid, 0) };
    if ret == 0 {
        return true;
    }
    let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
    errno == libc::EPERM
}

/// Whether `pid` carries `BOTPANEL_HOME=<home>` in its environment.
///
/// Only trusts `/proc/<pid>/environ`. Unreadable environ means "not ours":
/// we never signal a process we can't positively identify.
pub fn is_owned_worker(pid: u32, home: &Path) -> bool {
    let Ok(data) = fs::read(format!("/proc/{pid}/environ")) else {
        return false;
    };
    let expected = format!("{OWNER_ENV}={}", home.to_string_lossy());
    data.split(|&b| b == 0)
        .any(|entry| entry == expected.as_bytes())
}

/// Send `signal` to the worker's whole process group. The worker is spawned
/// as a group leader, so this also reaches anything it forked.
pub fn signal_group(pid: u32, signal: libc::c_int) -> std::io::Result<()> {
    let pgid = libc::pid_t::try_from(pid)
        .map_err(|_| std::io::Error::from(std::io::ErrorKind::InvalidInput))?;
    let ret = unsafe { libc::kill(-pgid, signal) };
    if ret == 0 {
        return Ok(());
    }
    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        // Already gone.
        return Ok(());
    }
    Err(err)
}

/// SIGTERM, poll until `timeout`, then SIGKILL. For processes we hold no
/// `Child` handle for (a worker left behind by a previous panel).
pub async fn terminate_pid(pid: u32, timeout: Duration) -> Result<()> {
    signal_group(pid, libc::SIGTERM)
        .with_context(|| format!("Failed to send SIGTERM to PID {pid}"))?;

    let deadline = tokio::time::Instant::now() + timeout;
    while is_pid_alive(pid) {
        if tokio::time::Instant::now() >= deadline {
            tracing::warn!(
                "PID {pid} did not exit within {}s, sending SIGKILL",
                timeout.as_secs()
            );
            signal_group(pid, libc::SIGKILL)
                .with_context(|| format!("Failed to send SIGKILL to PID {pid}"))?;
            tokio::time::sleep(Duration::from_millis(500)).await;
            anyhow::ensure!(
                !is_pid_alive(pid),
                "PID {pid} survived SIGKILL (uninterruptible state?)"
            );
            break;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    Ok(())
}

/// `("running" | "dead" | "stopped", pid)` from the pidfile alone.
pub fn pidfile_status(pid_path: &Path) -> Result<(&'static str, Option<u32>)> {
    Ok(match read_pid(pid_path)? {
        Some(pid) if is_pid_alive(pid) => ("running", Some(pid)),
        Some(pid) => ("dead", Some(pid)),
        None => ("stopped", None),
    })
}

// ── Log management ─────────────────────────────────────────────

pub fn log_path(log_dir: &Path) -> PathBuf {
    log_dir.join(LOG_FILE)
}

fn rotated_log_path(log_dir: &Path) -> PathBuf {
    log_dir.join(LOG_FILE_ROTATED)
}

/// Move the current log to `.log.1` before a new spawn.
pub fn rotate_log(log_dir: &Path) -> Result<()> {
    let log = log_path(log_dir);
    if log.exists() {
        let rotated = rotated_log_path(log_dir);
        fs::rename(&log, &rotated)
            .with_context(|| format!("Failed to rotate log: {}", log.display()))?;
    }
    Ok(())
}

/// Create the log directory, rotate, and open a fresh log for stdout and
/// stderr.
pub fn open_worker_log(log_dir: &Path) -> Result<(fs::File, fs::File)> {
    fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;
    rotate_log(log_dir)?;
    let out = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path(log_dir))
        .context("Failed to open worker log file")?;
    let err = out.try_clone().context("Failed to clone log file handle")?;
    Ok((out, err))
}
