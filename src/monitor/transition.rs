//! Health change detection between consecutive ticks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Health;

/// A change in health for one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transition {
    pub service_id: String,
    pub service_name: String,
    pub from: Health,
    pub to: Health,
    pub timestamp: DateTime<Utc>,
}

/// Compare against the previous tick's health.
///
/// Returns `None` on first observation so a cold start never alerts.
pub fn detect_transition(
    service_id: &str,
    service_name: &str,
    previous: Option<Health>,
    current: Health,
    now: DateTime<Utc>,
) -> Option<Transition> {
    let from = previous.filter(|p| *p != current)?;

    Some(Transition {
        service_id: service_id.to_string(),
        service_name: service_name.to_string(),
        from,
        to: current,
        timestamp: now,
    })
}
