//! Out-of-band control channel.
//!
//! Anything that wants the worker or the panel restarted (an HTTP handler,
//! a config-change hook, an operator's `kill -USR1`) sends a
//! [`ControlSignal`]; the daemon owns the receiving end. OS signals are
//! translated at the process boundary by [`spawn_signal_listener`].

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    /// Terminate and respawn the worker; the panel keeps running.
    RestartWorker,
    /// Rebind the control-surface listener; the worker is untouched.
    RestartPanel,
    Shutdown,
}

/// Cloneable sending side.
#[derive(Debug, Clone)]
pub struct ControlHandle {
    tx: mpsc::Sender<ControlSignal>,
}

pub fn channel() -> (ControlHandle, mpsc::Receiver<ControlSignal>) {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    (ControlHandle { tx }, rx)
}

impl ControlHandle {
    /// Queue a signal without waiting. Returns `false` when the receiver is
    /// gone or the queue is full.
    pub fn send(&self, signal: ControlSignal) -> bool {
        match self.tx.try_send(signal) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(?signal, "Control channel full, dropping signal");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(?signal, "Control channel closed");
                false
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Map process signals onto the control channel:
/// `SIGUSR1` restarts the worker, `SIGHUP` restarts the panel listener,
/// `SIGTERM` and Ctrl-C shut down.
#[cfg(unix)]
pub fn spawn_signal_listener(handle: ControlHandle) -> std::io::Result<JoinHandle<()>> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut usr1 = signal(SignalKind::user_defined1())?;
    let mut hup = signal(SignalKind::hangup())?;
    let mut term = signal(SignalKind::terminate())?;

    Ok(tokio::spawn(async move {
        loop {
            let signal = tokio::select! {
                Some(()) = usr1.recv() => ControlSignal::RestartWorker,
                Some(()) = hup.recv() => ControlSignal::RestartPanel,
                Some(()) = term.recv() => ControlSignal::Shutdown,
                Ok(()) = tokio::signal::ctrl_c() => ControlSignal::Shutdown,
                else => break,
            };
            tracing::info!(?signal, "Received process signal");
            if !handle.send(signal) && handle.is_closed() {
                break;
            }
        }
    }))
}

#[cfg(not(unix))]
pub fn spawn_signal_listener(handle: ControlHandle) -> std::io::Result<JoinHandle<()>> {
    Ok(tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            handle.send(ControlSignal::Shutdown);
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn signals_arrive_in_order() {
        let (handle, mut rx) = channel();
        assert!(handle.send(ControlSignal::RestartWorker));
        assert!(handle.clone().send(ControlSignal::RestartPanel));

        assert_eq!(rx.recv().await, Some(ControlSignal::RestartWorker));
        assert_eq!(rx.recv().await, Some(ControlSignal::RestartPanel));
    }

    #[tokio::test]
    async fn send_after_receiver_dropped_reports_failure() {
        let (handle, rx) = channel();
        drop(rx);
        assert!(handle.is_closed());
        assert!(!handle.send(ControlSignal::Shutdown));
    }

    #[tokio::test]
    async fn full_queue_drops_instead_of_blocking() {
        let (handle, _rx) = channel();
        for _ in 0..CHANNEL_CAPACITY {
            assert!(handle.send(ControlSignal::RestartWorker));
        }
        assert!(!handle.send(ControlSignal::RestartWorker));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn sigusr1_requests_worker_restart() {
        let (handle, mut rx) = channel();
        let listener = spawn_signal_listener(handle).unwrap();

        unsafe {
            libc::kill(libc::getpid(), libc::SIGUSR1);
        }
        let received = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("signal not delivered");
        assert_eq!(received, Some(ControlSignal::RestartWorker));
        listener.abort();
    }
}
