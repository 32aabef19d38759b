use anyhow::{Context, Result};
use directories::UserDirs;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Resolve the panel home directory.
/// Priority: `BOTPANEL_HOME` env var, then `~/.botpanel`.
pub fn botpanel_home() -> Result<PathBuf> {
    if let Ok(home) = std::env::var("BOTPANEL_HOME") {
        if !home.is_empty() {
            return Ok(PathBuf::from(home));
        }
    }
    let home = UserDirs::new()
        .map(|u| u.home_dir().to_path_buf())
        .context("Could not find home directory")?;
    Ok(home.join(".botpanel"))
}

// ── Top-level config ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Path to config.toml - computed from home, not serialized
    #[serde(skip)]
    pub config_path: PathBuf,
    /// Panel home directory (pidfile, worker logs, default snapshot dir)
    #[serde(skip)]
    pub home_dir: PathBuf,

    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub directory: DirectoryConfig,

    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub worker: WorkerConfig,
}

// ── Gateway ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Control surface port (default: 7860)
    #[serde(default = "default_gateway_port")]
    pub port: u16,
    /// Control surface host (default: 127.0.0.1)
    #[serde(default = "default_gateway_host")]
    pub host: String,
    /// Pause between closing and rebinding the listener on a panel restart.
    #[serde(default = "default_panel_restart_delay_secs")]
    pub panel_restart_delay_secs: u64,
}

fn default_gateway_port() -> u16 {
    7860
}

fn default_gateway_host() -> String {
    "127.0.0.1".into()
}

fn default_panel_restart_delay_secs() -> u64 {
    2
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            host: default_gateway_host(),
            panel_restart_delay_secs: default_panel_restart_delay_secs(),
        }
    }
}

// ── Remote directory ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryConfig {
    /// Master switch for contact/group sync against the chat-platform API.
    #[serde(default)]
    pub enabled: bool,
    /// API base, e.g. `http://127.0.0.1:2531/v2/api`
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    /// Account the worker is logged in as on the platform side.
    #[serde(default)]
    pub app_id: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Where snapshot files live. Defaults to `<home>/tmp`.
    #[serde(default)]
    pub snapshot_dir: Option<PathBuf>,
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: None,
            token: None,
            app_id: None,
            request_timeout_secs: default_request_timeout_secs(),
            snapshot_dir: None,
        }
    }
}

impl DirectoryConfig {
    /// Enabled with both a base URL and an app id present.
    pub fn is_configured(&self) -> bool {
        let present = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
        self.enabled && present(&self.base_url) && present(&self.app_id)
    }
}

// ── Sync pipelines ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// IDs per detail-fetch call. The remote API rejects more than 20.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    /// Fixed pause between attempts.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    /// Group pass logs progress every N groups.
    #[serde(default = "default_progress_log_every")]
    pub progress_log_every: usize,
    /// Refresh missing snapshots after boot.
    #[serde(default = "default_true")]
    pub startup_check: bool,
    #[serde(default = "default_startup_delay_secs")]
    pub startup_delay_secs: u64,
    /// Gap between the groups pass and the friends pass of one sequence.
    #[serde(default = "default_inter_pass_delay_secs")]
    pub inter_pass_delay_secs: u64,
    /// Periodic full refresh. 0 disables.
    #[serde(default)]
    pub refresh_interval_mins: u64,
}

fn default_batch_size() -> usize {
    20
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    1000
}

fn default_cache_ttl_secs() -> u64 {
    300
}

fn default_progress_log_every() -> usize {
    10
}

fn default_startup_delay_secs() -> u64 {
    300
}

fn default_inter_pass_delay_secs() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            retry_attempts: default_retry_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            cache_ttl_secs: default_cache_ttl_secs(),
            progress_log_every: default_progress_log_every(),
            startup_check: true,
            startup_delay_secs: default_startup_delay_secs(),
            inter_pass_delay_secs: default_inter_pass_delay_secs(),
            refresh_interval_mins: 0,
        }
    }
}

// ── Worker process ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Executable for the chat-bot worker. Start fails while unset.
    #[serde(default)]
    pub program: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// Start the worker when `serve` boots.
    #[serde(default = "default_true")]
    pub autostart: bool,
    /// Settle interval before the post-spawn liveness probe.
    #[serde(default = "default_settle_secs")]
    pub settle_secs: u64,
    /// Grace period between SIGTERM and SIGKILL.
    #[serde(default = "default_stop_timeout_secs")]
    pub stop_timeout_secs: u64,
    /// Worker health endpoint. When set, readiness is a 2xx from this URL
    /// instead of the fixed settle interval.
    #[serde(default)]
    pub ready_url: Option<String>,
    #[serde(default = "default_ready_timeout_secs")]
    pub ready_timeout_secs: u64,
    #[serde(default = "default_watchdog_interval_secs")]
    pub watchdog_interval_secs: u64,
    #[serde(default = "default_true")]
    pub restart_on_crash: bool,
}

fn default_settle_secs() -> u64 {
    5
}

fn default_stop_timeout_secs() -> u64 {
    10
}

fn default_ready_timeout_secs() -> u64 {
    30
}

fn default_watchdog_interval_secs() -> u64 {
    15
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            program: None,
            args: Vec::new(),
            env: BTreeMap::new(),
            working_dir: None,
            autostart: true,
            settle_secs: default_settle_secs(),
            stop_timeout_secs: default_stop_timeout_secs(),
            ready_url: None,
            ready_timeout_secs: default_ready_timeout_secs(),
            watchdog_interval_secs: default_watchdog_interval_secs(),
            restart_on_crash: true,
        }
    }
}

impl WorkerConfig {
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }
}

// ── Loading / saving ──────────────────────────────────────────────

impl Config {
    pub fn load_or_init() -> Result<Self> {
        let home = botpanel_home()?;
        Self::load_or_init_at(&home)
    }

    /// Load `<home>/config.toml`, writing defaults first when it is absent.
    pub fn load_or_init_at(home: &Path) -> Result<Self> {
        let config_path = home.join("config.toml");

        if !home.exists() {
            fs::create_dir_all(home)
                .with_context(|| format!("Failed to create {}", home.display()))?;
        }

        let mut config = if config_path.exists() {
            let contents =
                fs::read_to_string(&config_path).context("Failed to read config file")?;
            let mut config: Config =
                toml::from_str(&contents).context("Failed to parse config file")?;
            // Set computed paths that are skipped during serialization
            config.config_path = config_path;
            config.home_dir = home.to_path_buf();
            config
        } else {
            let mut config = Config::default();
            config.config_path = config_path;
            config.home_dir = home.to_path_buf();
            config.save()?;
            config
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to config
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let first = |keys: &[&str]| {
            keys.iter()
                .find_map(|k| lookup(k))
                .filter(|v| !v.is_empty())
        };

        // Gateway port: BOTPANEL_GATEWAY_PORT or PORT
        if let Some(port) = first(&["BOTPANEL_GATEWAY_PORT", "PORT"]) {
            if let Ok(port) = port.parse::<u16>() {
                self.gateway.port = port;
            }
        }

        // Gateway host: BOTPANEL_GATEWAY_HOST or HOST
        if let Some(host) = first(&["BOTPANEL_GATEWAY_HOST", "HOST"]) {
            self.gateway.host = host;
        }

        if let Some(url) = first(&["BOTPANEL_DIRECTORY_BASE_URL"]) {
            self.directory.base_url = Some(url);
        }
        if let Some(token) = first(&["BOTPANEL_DIRECTORY_TOKEN"]) {
            self.directory.token = Some(token);
        }
        if let Some(app_id) = first(&["BOTPANEL_APP_ID"]) {
            self.directory.app_id = Some(app_id);
        }
    }

    pub fn save(&self) -> Result<()> {
        let toml_str = toml::to_string_pretty(self).context("Failed to serialize config")?;
        crate::util::atomic_write(&self.config_path, toml_str.as_bytes())
            .context("Failed to save config file")
    }

    pub fn snapshot_dir(&self) -> PathBuf {
        self.directory
            .snapshot_dir
            .clone()
            .unwrap_or_else(|| self.home_dir.join("tmp"))
    }

    pub fn pid_path(&self) -> PathBuf {
        self.home_dir.join("worker.pid")
    }

    pub fn worker_log_dir(&self) -> PathBuf {
        self.home_dir.join("logs")
    }
}
