use std::process::ExitStatus;
use std::time::Duration;

use tokio::process::Child;

use crate::config::WorkerConfig;

const HTTP_POLL_INTERVAL: Duration = Duration::from_millis(250);
const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// How a freshly spawned worker is judged ready.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadinessProbe {
    /// Wait a fixed interval, then require the process to still be alive.
    /// Cannot tell a stuck worker from a healthy one.
    Settle(Duration),
    /// Poll the worker's own health URL until it answers 2xx.
    Http { url: String, timeout: Duration },
}

#[derive(Debug)]
pub enum ProbeFailure {
    Exited(ExitStatus),
    TimedOut(String),
    Wait(std::io::Error),
}

impl ReadinessProbe {
    pub fn from_config(config: &WorkerConfig) -> Self {
        match config.ready_url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => Self::Http {
                url: url.to_string(),
                timeout: Duration::from_secs(config.ready_timeout_secs.max(1)),
            },
            _ => Self::Settle(Duration::from_secs(config.settle_secs)),
        }
    }

    pub async fn wait(&self, child: &mut Child) -> Result<(), ProbeFailure> {
        match self {
            Self::Settle(settle) => {
                tokio::time::sleep(*settle).await;
                still_running(child)
            }
            Self::Http { url, timeout } => wait_http(child, url, *timeout).await,
        }
    }
}

fn still_running(child: &mut Child) -> Result<(), ProbeFailure> {
    match child.try_wait() {
        Ok(Some(status)) => Err(ProbeFailure::Exited(status)),
        Ok(None) => Ok(()),
        Err(e) => Err(ProbeFailure::Wait(e)),
    }
}

async fn wait_http(child: &mut Child, url: &str, timeout: Duration) -> Result<(), ProbeFailure> {
    let client = reqwest::Client::builder()
        .timeout(HTTP_REQUEST_TIMEOUT)
        .build()
        .map_err(|e| ProbeFailure::TimedOut(format!("cannot build probe client: {e}")))?;

    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        still_running(child)?;
        let last_error = match client.get(url).send().await {
            Ok(resp) if resp.status().is_success() => return Ok(()),
            Ok(resp) => format!("HTTP {}", resp.status()),
            Err(e) => e.to_string(),
        };
        if tokio::time::Instant::now() >= deadline {
            return Err(ProbeFailure::TimedOut(format!(
                "{url} not ready after {}s: {last_error}",
                timeout.as_secs()
            )));
        }
        tokio::time::sleep(HTTP_POLL_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settle_is_default_probe() {
        let config = WorkerConfig::default();
        assert_eq!(
            ReadinessProbe::from_config(&config),
            ReadinessProbe::Settle(Duration::from_secs(5))
        );
    }

    #[test]
    fn ready_url_selects_http_probe() {
        let config = WorkerConfig {
            ready_url: Some("http://127.0.0.1:9919/health".into()),
            ready_timeout_secs: 12,
            ..WorkerConfig::default()
        };
        assert_eq!(
            ReadinessProbe::from_config(&config),
            ReadinessProbe::Http {
                url: "http://127.0.0.1:9919/health".into(),
                timeout: Duration::from_secs(12),
            }
        );

        let blank = WorkerConfig {
            ready_url: Some("  ".into()),
            ..WorkerConfig::default()
        };
        assert!(matches!(
            ReadinessProbe::from_config(&blank),
            ReadinessProbe::Settle(_)
        ));
    }

    #[tokio::test]
    async fn settle_probe_detects_early_exit() {
        let mut child = tokio::process::Command::new("sh")
            .args(["-c", "exit 3"])
            .spawn()
            .unwrap();
        let probe = ReadinessProbe::Settle(Duration::from_millis(300));
        match probe.wait(&mut child).await {
            Err(ProbeFailure::Exited(status)) => assert_eq!(status.code(), Some(3)),
            other => panic!("expected early exit, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn http_probe_waits_for_success() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let mut child = tokio::process::Command::new("sleep")
            .arg("5")
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        let probe = ReadinessProbe::Http {
            url: format!("{}/health", server.uri()),
            timeout: Duration::from_secs(5),
        };
        assert!(probe.wait(&mut child).await.is_ok());
    }

    #[tokio::test]
    async fn http_readiness_times_out_with_last_status() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let mut child = tokio::process::Command::new("sleep")
            .arg("5")
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        let probe = ReadinessProbe::Http {
            url: format!("{}/health", server.uri()),
            timeout: Duration::from_secs(1),
        };
        match probe.wait(&mut child).await {
            Err(ProbeFailure::TimedOut(msg)) => {
                assert!(msg.contains("HTTP 503"), "unexpected message: {msg}");
                assert!(msg.contains("not ready after 1s"));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }
}
