//! Process-wide component health, surfaced by `GET /api/health`.
//!
//! Components report themselves (`gateway`, `worker`, `friends-sync`,
//! `groups-sync`); the registry keeps only the latest state per name.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Starting,
    Ok,
    Error,
    /// Deliberately not running, e.g. the worker after a requested stop.
    Idle,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    pub updated_at: DateTime<Utc>,
    pub last_ok: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub restart_count: u64,
}

impl ComponentHealth {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            status: ComponentStatus::Starting,
            updated_at: now,
            last_ok: None,
            last_error: None,
            restart_count: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    pub uptime_seconds: u64,
    pub components: BTreeMap<String, ComponentHealth>,
}

struct Registry {
    started_at: DateTime<Utc>,
    components: Mutex<BTreeMap<String, ComponentHealth>>,
}

impl Registry {
    fn global() -> &'static Self {
        static REGISTRY: OnceLock<Registry> = OnceLock::new();
        REGISTRY.get_or_init(|| Self {
            started_at: Utc::now(),
            components: Mutex::new(BTreeMap::new()),
        })
    }

    fn record(&self, component: &str, apply: impl FnOnce(&mut ComponentHealth, DateTime<Utc>)) {
        let now = Utc::now();
        let mut components = self.components.lock();
        let entry = components
            .entry(component.to_owned())
            .or_insert_with(|| ComponentHealth::new(now));
        apply(entry, now);
        entry.updated_at = now;
    }
}

pub fn mark_component_ok(component: &str) {
    Registry::global().record(component, |entry, now| {
        entry.status = ComponentStatus::Ok;
        entry.last_ok = Some(now);
        entry.last_error = None;
    });
}

pub fn mark_component_error(component: &str, error: impl ToString) {
    let message = error.to_string();
    Registry::global().record(component, move |entry, _| {
        entry.status = ComponentStatus::Error;
        entry.last_error = Some(message);
    });
}

pub fn mark_component_idle(component: &str) {
    Registry::global().record(component, |entry, _| {
        entry.status = ComponentStatus::Idle;
    });
}

pub fn bump_component_restart(component: &str) {
    Registry::global().record(component, |entry, _| {
        entry.restart_count = entry.restart_count.saturating_add(1);
    });
}

pub fn snapshot() -> HealthSnapshot {
    let registry = Registry::global();
    let uptime = Utc::now() - registry.started_at;
    HealthSnapshot {
        pid: std::process::id(),
        started_at: registry.started_at,
        uptime_seconds: u64::try_from(uptime.num_seconds()).unwrap_or(0),
        components: registry.components.lock().clone(),
    }
}

pub fn snapshot_json() -> serde_json::Value {
    serde_json::to_value(snapshot())
        .unwrap_or_else(|e| serde_json::json!({ "error": format!("health snapshot: {e}") }))
}
