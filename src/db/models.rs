//! Database model types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::monitor::Health;

/// Latest evaluated state of one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    pub id: String,
    pub name: String,
    pub status: Health,
    pub http_code: Option<u16>,
    pub response_time: Option<u64>,
    pub last_checked: DateTime<Utc>,
}

/// The committed result of the most recent tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    /// False when any critical target is down.
    pub can_access_platform: bool,
    pub last_checked: DateTime<Utc>,
    pub services: Vec<ServiceStatus>,
    pub incidents: Vec<Incident>,
}

impl StatusSnapshot {
    /// Health recorded for a target, if it was part of this snapshot.
    pub fn health_of(&self, id: &str) -> Option<Health> {
        self.services.iter().find(|s| s.id == id).map(|s| s.status)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncidentState {
    Ongoing,
    Resolved,
}

impl IncidentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentState::Ongoing => "ongoing",
            IncidentState::Resolved => "resolved",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ongoing" => Some(IncidentState::Ongoing),
            "resolved" => Some(IncidentState::Resolved),
            _ => None,
        }
    }
}

/// One continuous down/degraded episode for one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Incident {
    /// Assigned by the store on open.
    pub id: i64,
    pub service: String,
    pub title: String,
    pub status: IncidentState,
    pub started_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub duration: String,
}

/// All service states at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPoint {
    pub timestamp: DateTime<Utc>,
    pub services: Vec<ServiceStatus>,
}

/// Client key material from the browser's `PushSubscription.toJSON()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushKeys {
    pub p256dh: String,
    pub auth: String,
}

/// A registered browser push endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushSubscription {
    pub endpoint: String,
    pub keys: PushKeys,
}

impl PushSubscription {
    /// Storage key for this subscription.
    pub fn key(&self) -> String {
        endpoint_hash(&self.endpoint)
    }
}

/// Short stable key for an endpoint URL: first 16 hex chars of its SHA-256.
pub fn endpoint_hash(endpoint: &str) -> String {
    let digest = Sha256::digest(endpoint.as_bytes());
    let mut hex = hex::encode(digest);
    hex.truncate(16);
    hex
}
