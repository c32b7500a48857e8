//! Age-based eviction of history points and resolved incidents.

use crate::config::ServerConfig;
use crate::db::{DbError, StatusStore};

use chrono::{DateTime, Duration as ChronoDuration, Utc};

/// How long each kind of record is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub history_days: i64,
    pub incident_days: i64,
}

impl RetentionPolicy {
    pub fn from_config(cfg: &ServerConfig) -> Self {
        Self {
            history_days: cfg.history_retention_days,
            incident_days: cfg.incident_retention_days,
        }
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            history_days: 30,
            incident_days: 90,
        }
    }
}

/// Records removed by one retention pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RetentionReport {
    pub history_points: usize,
    pub incidents: usize,
}

/// Oldest instant kept for a positive `days`; `None` when it cannot be represented.
fn cutoff(now: DateTime<Utc>, days: i64) -> Option<DateTime<Utc>> {
    if days <= 0 {
        return None;
    }
    ChronoDuration::try_days(days).and_then(|d| now.checked_sub_signed(d))
}

/// Delete everything past its retention period. Ongoing incidents are never
/// evicted, however old.
pub fn apply_retention(
    store: &dyn StatusStore,
    now: DateTime<Utc>,
    policy: &RetentionPolicy,
) -> Result<RetentionReport, DbError> {
    let history_points = match cutoff(now, policy.history_days) {
        Some(c) => store.delete_history_before(c)?,
        None => {
            tracing::warn!("History retention of {} days is out of range, skipping", policy.history_days);
            0
        }
    };
    let incidents = match cutoff(now, policy.incident_days) {
        Some(c) => store.delete_resolved_incidents_before(c)?,
        None => {
            tracing::warn!("Incident retention of {} days is out of range, skipping", policy.incident_days);
            0
        }
    };

    if history_points > 0 || incidents > 0 {
        tracing::debug!(
            "Retention: removed {} history points, {} resolved incidents",
            history_points,
            incidents
        );
    }

    Ok(RetentionReport {
        history_points,
        incidents,
    })
}
