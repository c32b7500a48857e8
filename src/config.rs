//! Configuration module for campus-status.
//!
//! Loads configuration from environment variables with sensible defaults.
//! Every integration (chat alerts, web push) is optional; an absent credential
//! disables the feature instead of failing startup.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::notify::Locale;

/// Configuration error types.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read targets file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid targets file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid target {0}: {1}")]
    Target(String, String),
}

/// HTTP method used to probe a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProbeMethod {
    Get,
    Head,
}

/// A statically configured monitoring target.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetConfig {
    pub id: String,
    pub name: String,
    /// Name used in chat alerts, falls back to `name`.
    #[serde(default)]
    pub alert_name: Option<String>,
    pub url: String,
    #[serde(default = "default_method")]
    pub method: ProbeMethod,
    pub accepted_statuses: Vec<u16>,
    /// Probe interval in seconds.
    #[serde(default = "default_interval")]
    pub interval: u64,
    #[serde(default = "default_degraded_threshold_ms")]
    pub degraded_threshold_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Whether this target counts toward the aggregate reachability flag.
    #[serde(default)]
    pub critical: bool,
}

fn default_method() -> ProbeMethod {
    ProbeMethod::Get
}

fn default_interval() -> u64 {
    60
}

fn default_degraded_threshold_ms() -> u64 {
    3000
}

fn default_timeout_ms() -> u64 {
    10_000
}

impl TargetConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn alert_name(&self) -> &str {
        self.alert_name.as_deref().unwrap_or(&self.name)
    }
}

/// The built-in university targets.
pub fn default_targets() -> Vec<TargetConfig> {
    let target = |id: &str, name: &str, alert_name: &str, url: &str, method, accepted: &[u16], critical| {
        TargetConfig {
            id: id.to_string(),
            name: name.to_string(),
            alert_name: Some(alert_name.to_string()),
            url: url.to_string(),
            method,
            accepted_statuses: accepted.to_vec(),
            interval: default_interval(),
            degraded_threshold_ms: default_degraded_threshold_ms(),
            timeout_ms: default_timeout_ms(),
            critical,
        }
    };

    vec![
        target(
            "lms",
            "Blackboard LMS",
            "البلاك بورد",
            "https://lms.seu.edu.sa/learn/api/public/v1/system/version",
            ProbeMethod::Get,
            &[200],
            true,
        ),
        target(
            "sso",
            "SSO Login",
            "تسجيل الدخول SSO",
            "https://sso.seu.edu.sa/samlsso",
            ProbeMethod::Head,
            &[200, 301, 302, 400, 401, 403],
            true,
        ),
        target(
            "eservice",
            "E-Services",
            "الخدمات الإلكترونية",
            "https://eservice.seu.edu.sa/",
            ProbeMethod::Get,
            &[200],
            false,
        ),
        target(
            "email",
            "Email (M365)",
            "البريد الإلكتروني",
            "https://outlook.office365.com/owa/seu.edu.sa",
            ProbeMethod::Head,
            &[401],
            false,
        ),
    ]
}

/// Load and validate targets from a JSON file.
pub fn load_targets<P: AsRef<Path>>(path: P) -> Result<Vec<TargetConfig>, ConfigError> {
    let raw = std::fs::read_to_string(path)?;
    let targets: Vec<TargetConfig> = serde_json::from_str(&raw)?;

    for t in &targets {
        if t.id.is_empty() {
            return Err(ConfigError::Target(t.name.clone(), "empty id".to_string()));
        }
        if t.accepted_statuses.is_empty() {
            return Err(ConfigError::Target(t.id.clone(), "no accepted statuses".to_string()));
        }
        if t.interval == 0 || t.timeout_ms == 0 {
            return Err(ConfigError::Target(t.id.clone(), "interval and timeout must be positive".to_string()));
        }
    }

    Ok(targets)
}

/// Which status store backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Sqlite,
    Memory,
}

/// Telegram bot credentials for chat alerts.
#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
    pub api_base: String,
}

/// VAPID key material for web push delivery (base64url encoded).
#[derive(Debug, Clone)]
pub struct VapidConfig {
    pub public_key: Option<String>,
    pub private_key: String,
    pub subject: String,
}

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP port for the web server (default: 8080)
    pub http_port: u16,
    /// Path to the SQLite database file (default: "campus-status.db")
    pub db_path: String,
    pub store: StoreBackend,
    pub targets: Vec<TargetConfig>,
    /// Explicit tick period; the smallest target interval is used otherwise.
    pub tick_secs: Option<u64>,
    pub history_retention_days: i64,
    pub incident_retention_days: i64,
    pub telegram: Option<TelegramConfig>,
    pub vapid: Option<VapidConfig>,
    pub locale: Locale,
    /// Offset applied to timestamps shown in chat alerts.
    pub alert_utc_offset_minutes: i32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            db_path: "campus-status.db".to_string(),
            store: StoreBackend::Sqlite,
            targets: default_targets(),
            tick_secs: None,
            history_retention_days: 30,
            incident_retention_days: 90,
            telegram: None,
            vapid: None,
            locale: Locale::Ar,
            alert_utc_offset_minutes: 180,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `CAMPUS_STATUS_HTTP_PORT`: HTTP port (default: 8080)
    /// - `CAMPUS_STATUS_DB_PATH`: Database file path (default: "campus-status.db")
    /// - `CAMPUS_STATUS_STORE`: `sqlite` or `memory` (default: sqlite)
    /// - `CAMPUS_STATUS_TARGETS_FILE`: JSON array of targets (default: built-in list)
    /// - `CAMPUS_STATUS_TICK_SECS`: tick period override
    /// - `CAMPUS_STATUS_HISTORY_RETENTION_DAYS` / `CAMPUS_STATUS_INCIDENT_RETENTION_DAYS`
    /// - `CAMPUS_STATUS_LOCALE`: `ar` or `en` (default: ar)
    /// - `CAMPUS_STATUS_ALERT_UTC_OFFSET_MINUTES`: offset for alert times (default: 180)
    /// - `TELEGRAM_BOT_TOKEN`, `TELEGRAM_CHAT_ID`, `TELEGRAM_API_BASE`
    /// - `VAPID_PUBLIC_KEY`, `VAPID_PRIVATE_KEY`, `VAPID_SUBJECT`
    pub fn load() -> Result<Self, ConfigError> {
        let mut cfg = Self::default();

        if let Some(port) = parse_var("CAMPUS_STATUS_HTTP_PORT") {
            cfg.http_port = port;
        }

        if let Some(db_path) = non_empty_var("CAMPUS_STATUS_DB_PATH") {
            cfg.db_path = db_path;
        }

        if let Some(store) = non_empty_var("CAMPUS_STATUS_STORE") {
            match store.as_str() {
                "memory" => cfg.store = StoreBackend::Memory,
                "sqlite" => cfg.store = StoreBackend::Sqlite,
                other => tracing::warn!("Unknown store backend {:?}, using sqlite", other),
            }
        }

        if let Some(path) = non_empty_var("CAMPUS_STATUS_TARGETS_FILE") {
            cfg.targets = load_targets(&path)?;
        }

        cfg.tick_secs = parse_var::<u64>("CAMPUS_STATUS_TICK_SECS").filter(|s| *s > 0);

        cfg.history_retention_days =
            retention_days_var("CAMPUS_STATUS_HISTORY_RETENTION_DAYS", cfg.history_retention_days);
        cfg.incident_retention_days =
            retention_days_var("CAMPUS_STATUS_INCIDENT_RETENTION_DAYS", cfg.incident_retention_days);

        if let Some(locale) = non_empty_var("CAMPUS_STATUS_LOCALE") {
            match locale.parse() {
                Ok(l) => cfg.locale = l,
                Err(e) => tracing::warn!("{}, keeping locale {}", e, cfg.locale),
            }
        }

        if let Some(offset) = parse_var("CAMPUS_STATUS_ALERT_UTC_OFFSET_MINUTES") {
            cfg.alert_utc_offset_minutes = offset;
        }

        if let (Some(bot_token), Some(chat_id)) =
            (non_empty_var("TELEGRAM_BOT_TOKEN"), non_empty_var("TELEGRAM_CHAT_ID"))
        {
            cfg.telegram = Some(TelegramConfig {
                bot_token,
                chat_id,
                api_base: non_empty_var("TELEGRAM_API_BASE")
                    .unwrap_or_else(|| "https://api.telegram.org".to_string()),
            });
        }

        if let Some(private_key) = non_empty_var("VAPID_PRIVATE_KEY") {
            cfg.vapid = Some(VapidConfig {
                public_key: non_empty_var("VAPID_PUBLIC_KEY"),
                private_key,
                subject: non_empty_var("VAPID_SUBJECT")
                    .unwrap_or_else(|| "mailto:admin@example.com".to_string()),
            });
        }

        Ok(cfg)
    }

    /// Period between ticks.
    pub fn tick_interval(&self) -> Duration {
        let secs = self
            .tick_secs
            .or_else(|| self.targets.iter().map(|t| t.interval).min())
            .unwrap_or(60);
        Duration::from_secs(secs.max(1))
    }
}

/// Upper bound for the retention settings.
pub const MAX_RETENTION_DAYS: i64 = 3650;

/// Retention period from `key`, keeping `default` unless it is within 1..=MAX_RETENTION_DAYS.
fn retention_days_var(key: &str, default: i64) -> i64 {
    match parse_var::<i64>(key) {
        Some(days) if (1..=MAX_RETENTION_DAYS).contains(&days) => days,
        Some(days) => {
            tracing::warn!(
                "Ignoring {}={}: must be between 1 and {} days",
                key,
                days,
                MAX_RETENTION_DAYS
            );
            default
        }
        None => default,
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = non_empty_var(key)?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("Ignoring invalid value for {}: {:?}", key, raw);
            None
        }
    }
}
