//! In-memory key-value store.
//!
//! Mirrors a key-value backend: the snapshot is one serialized value, history
//! is bucketed by date key, and subscriptions are keyed by endpoint hash.

use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::models::*;
use super::store::{DbError, StatusStore};

#[derive(Default)]
struct Inner {
    snapshot: Option<String>,
    history: BTreeMap<NaiveDate, Vec<HistoryPoint>>,
    incidents: Vec<Incident>,
    next_incident_id: i64,
    subscriptions: HashMap<String, (DateTime<Utc>, PushSubscription)>,
}

/// Thread-safe in-memory store.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>, DbError> {
        self.inner.read().map_err(|_| DbError::LockPoisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>, DbError> {
        self.inner.write().map_err(|_| DbError::LockPoisoned)
    }
}

impl StatusStore for MemoryStore {
    fn current_snapshot(&self) -> Result<Option<StatusSnapshot>, DbError> {
        let inner = self.read()?;
        let mut snapshot: StatusSnapshot = match &inner.snapshot {
            Some(raw) => serde_json::from_str(raw)?,
            None => return Ok(None),
        };
        snapshot.incidents = inner
            .incidents
            .iter()
            .filter(|i| i.status == IncidentState::Ongoing)
            .cloned()
            .collect();
        Ok(Some(snapshot))
    }

    fn commit_snapshot(&self, snapshot: &StatusSnapshot) -> Result<(), DbError> {
        let raw = serde_json::to_string(snapshot)?;
        self.write()?.snapshot = Some(raw);
        Ok(())
    }

    fn append_history(&self, point: &HistoryPoint) -> Result<(), DbError> {
        let mut inner = self.write()?;
        let bucket = inner.history.entry(point.timestamp.date_naive()).or_default();
        bucket.push(point.clone());
        bucket.sort_by_key(|p| p.timestamp);
        Ok(())
    }

    fn history_for(&self, date: NaiveDate) -> Result<Vec<HistoryPoint>, DbError> {
        Ok(self.read()?.history.get(&date).cloned().unwrap_or_default())
    }

    fn delete_history_before(&self, cutoff: DateTime<Utc>) -> Result<usize, DbError> {
        let mut inner = self.write()?;
        let mut removed = 0;
        for bucket in inner.history.values_mut() {
            let before = bucket.len();
            bucket.retain(|p| p.timestamp >= cutoff);
            removed += before - bucket.len();
        }
        inner.history.retain(|_, bucket| !bucket.is_empty());
        Ok(removed)
    }

    fn open_incident(&self, incident: &Incident) -> Result<Incident, DbError> {
        let mut inner = self.write()?;
        if inner
            .incidents
            .iter()
            .any(|i| i.service == incident.service && i.status == IncidentState::Ongoing)
        {
            return Err(DbError::Conflict(format!(
                "{} already has an ongoing incident",
                incident.service
            )));
        }

        inner.next_incident_id += 1;
        let stored = Incident {
            id: inner.next_incident_id,
            ..incident.clone()
        };
        inner.incidents.push(stored.clone());
        Ok(stored)
    }

    fn update_incident(&self, incident: &Incident) -> Result<(), DbError> {
        let mut inner = self.write()?;
        if let Some(existing) = inner.incidents.iter_mut().find(|i| i.id == incident.id) {
            existing.status = incident.status;
            existing.resolved_at = incident.resolved_at;
            existing.duration = incident.duration.clone();
        }
        Ok(())
    }

    fn resolve_incident(
        &self,
        service: &str,
        resolved_at: DateTime<Utc>,
        duration: &str,
    ) -> Result<Option<Incident>, DbError> {
        let mut inner = self.write()?;
        let found = inner
            .incidents
            .iter_mut()
            .find(|i| i.service == service && i.status == IncidentState::Ongoing);

        Ok(found.map(|incident| {
            incident.status = IncidentState::Resolved;
            incident.resolved_at = Some(resolved_at);
            incident.duration = duration.to_string();
            incident.clone()
        }))
    }

    fn active_incidents(&self) -> Result<Vec<Incident>, DbError> {
        let mut active: Vec<Incident> = self
            .read()?
            .incidents
            .iter()
            .filter(|i| i.status == IncidentState::Ongoing)
            .cloned()
            .collect();
        active.sort_by_key(|i| (i.started_at, i.id));
        Ok(active)
    }

    fn resolved_incidents(&self, limit: usize) -> Result<Vec<Incident>, DbError> {
        let mut resolved: Vec<Incident> = self
            .read()?
            .incidents
            .iter()
            .filter(|i| i.status == IncidentState::Resolved)
            .cloned()
            .collect();
        resolved.sort_by(|a, b| (b.resolved_at, b.id).cmp(&(a.resolved_at, a.id)));
        resolved.truncate(limit);
        Ok(resolved)
    }

    fn delete_resolved_incidents_before(&self, cutoff: DateTime<Utc>) -> Result<usize, DbError> {
        let mut inner = self.write()?;
        let before = inner.incidents.len();
        inner.incidents.retain(|i| {
            !(i.status == IncidentState::Resolved && i.resolved_at.is_some_and(|at| at < cutoff))
        });
        Ok(before - inner.incidents.len())
    }

    fn save_subscription(&self, sub: &PushSubscription) -> Result<(), DbError> {
        let mut inner = self.write()?;
        let created = inner
            .subscriptions
            .get(&sub.key())
            .map(|(at, _)| *at)
            .unwrap_or_else(Utc::now);
        inner.subscriptions.insert(sub.key(), (created, sub.clone()));
        Ok(())
    }

    fn delete_subscription(&self, endpoint: &str) -> Result<bool, DbError> {
        Ok(self.write()?.subscriptions.remove(&endpoint_hash(endpoint)).is_some())
    }

    fn subscriptions(&self) -> Result<Vec<PushSubscription>, DbError> {
        let inner = self.read()?;
        let mut subs: Vec<_> = inner.subscriptions.values().cloned().collect();
        subs.sort_by_key(|(at, _)| *at);
        Ok(subs.into_iter().map(|(_, sub)| sub).collect())
    }
}
