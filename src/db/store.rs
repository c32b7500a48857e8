//! Repository contract shared by every storage backend.

use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;

use super::models::*;

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(#[from] refinery::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Corrupt value: {0}")]
    Corrupt(String),
    #[error("Store lock poisoned")]
    LockPoisoned,
}

/// Persistence for the monitoring pipeline and the HTTP surface.
///
/// A tick reads [`current_snapshot`](StatusStore::current_snapshot) once at the
/// start and writes [`commit_snapshot`](StatusStore::commit_snapshot) once at
/// the end; nothing else writes the snapshot.
pub trait StatusStore: Send + Sync {
    // --- Snapshot ---

    /// The snapshot committed by the previous tick, if any.
    fn current_snapshot(&self) -> Result<Option<StatusSnapshot>, DbError>;

    /// Replace the current snapshot. Targets absent from it are dropped.
    fn commit_snapshot(&self, snapshot: &StatusSnapshot) -> Result<(), DbError>;

    // --- History ---

    fn append_history(&self, point: &HistoryPoint) -> Result<(), DbError>;

    /// Points whose UTC date is `date`, oldest first.
    fn history_for(&self, date: NaiveDate) -> Result<Vec<HistoryPoint>, DbError>;

    /// Evict points older than `cutoff`, returning how many were removed.
    fn delete_history_before(&self, cutoff: DateTime<Utc>) -> Result<usize, DbError>;

    // --- Incidents ---

    /// Insert a new ongoing incident and return it with its assigned id.
    ///
    /// Fails with [`DbError::Conflict`] if the service already has one.
    fn open_incident(&self, incident: &Incident) -> Result<Incident, DbError>;

    /// Overwrite the mutable fields (state, resolvedAt, duration) of an incident.
    fn update_incident(&self, incident: &Incident) -> Result<(), DbError>;

    /// Resolve the ongoing incident for `service`, freezing `duration`.
    fn resolve_incident(
        &self,
        service: &str,
        resolved_at: DateTime<Utc>,
        duration: &str,
    ) -> Result<Option<Incident>, DbError>;

    /// All ongoing incidents, oldest first.
    fn active_incidents(&self) -> Result<Vec<Incident>, DbError>;

    /// Resolved incidents, most recently resolved first.
    fn resolved_incidents(&self, limit: usize) -> Result<Vec<Incident>, DbError>;

    fn delete_resolved_incidents_before(&self, cutoff: DateTime<Utc>) -> Result<usize, DbError>;

    // --- Push subscriptions ---

    /// Insert or replace the subscription for its endpoint.
    fn save_subscription(&self, sub: &PushSubscription) -> Result<(), DbError>;

    /// Remove the subscription for `endpoint`. Returns false if none existed.
    fn delete_subscription(&self, endpoint: &str) -> Result<bool, DbError>;

    fn subscriptions(&self) -> Result<Vec<PushSubscription>, DbError>;
}

/// Timestamp format used for stored times; sorts lexicographically.
pub(crate) const DB_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.9f";

pub(crate) fn format_db_time(dt: &DateTime<Utc>) -> String {
    dt.format(DB_TIME_FORMAT).to_string()
}

/// Parse a datetime string from the database.
pub(crate) fn parse_db_time(s: &str) -> Result<DateTime<Utc>, DbError> {
    let formats = [DB_TIME_FORMAT, "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"];

    for fmt in &formats {
        if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    Err(DbError::Corrupt(format!("unparseable time {:?}", s)))
}
