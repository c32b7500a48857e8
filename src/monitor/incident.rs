//! Incident lifecycle per target: none → ongoing → resolved.

use chrono::{DateTime, Utc};

use super::{Health, Transition};
use crate::db::{DbError, Incident, IncidentState, StatusStore};

/// What applying a transition did to the incident set.
#[derive(Debug, Clone, PartialEq)]
pub enum IncidentChange {
    Opened(Incident),
    Resolved(Incident),
    Unchanged,
}

pub fn incident_title(service_name: &str, health: Health) -> String {
    match health {
        Health::Down => format!("{} is down", service_name),
        Health::Degraded => format!("{} is degraded", service_name),
        Health::Up => format!("{} is up", service_name),
    }
}

/// Open or resolve the incident for the transition's target.
///
/// Opening is idempotent: a target with an ongoing incident keeps it, even
/// when it moves between degraded and down.
pub fn apply_transition(
    store: &dyn StatusStore,
    transition: &Transition,
    now: DateTime<Utc>,
) -> Result<IncidentChange, DbError> {
    let ongoing = store
        .active_incidents()?
        .into_iter()
        .find(|i| i.service == transition.service_id);

    match (transition.to, ongoing) {
        (Health::Down | Health::Degraded, Some(_)) => Ok(IncidentChange::Unchanged),
        (Health::Down | Health::Degraded, None) => {
            let incident = Incident {
                id: 0,
                service: transition.service_id.clone(),
                title: incident_title(&transition.service_name, transition.to),
                status: IncidentState::Ongoing,
                started_at: now,
                resolved_at: None,
                duration: format_duration(now, now),
            };
            match store.open_incident(&incident) {
                Ok(opened) => {
                    tracing::info!("Opened incident {} for {}", opened.id, opened.service);
                    Ok(IncidentChange::Opened(opened))
                }
                Err(DbError::Conflict(_)) => Ok(IncidentChange::Unchanged),
                Err(e) => Err(e),
            }
        }
        (Health::Up, Some(open)) => {
            let duration = format_duration(open.started_at, now);
            match store.resolve_incident(&open.service, now, &duration)? {
                Some(resolved) => {
                    tracing::info!(
                        "Resolved incident {} for {} after {}",
                        resolved.id,
                        resolved.service,
                        resolved.duration
                    );
                    Ok(IncidentChange::Resolved(resolved))
                }
                None => Ok(IncidentChange::Unchanged),
            }
        }
        (Health::Up, None) => Ok(IncidentChange::Unchanged),
    }
}

/// Recompute the elapsed time of every ongoing incident and persist it.
pub fn refresh_durations(store: &dyn StatusStore, now: DateTime<Utc>) -> Result<Vec<Incident>, DbError> {
    let mut incidents = store.active_incidents()?;

    for incident in incidents.iter_mut() {
        let duration = format_duration(incident.started_at, now);
        if duration != incident.duration {
            incident.duration = duration;
            store.update_incident(incident)?;
        }
    }

    Ok(incidents)
}

/// Recompute durations without persisting, for read paths.
pub fn with_fresh_durations(mut incidents: Vec<Incident>, now: DateTime<Utc>) -> Vec<Incident> {
    for incident in incidents.iter_mut().filter(|i| i.status == IncidentState::Ongoing) {
        incident.duration = format_duration(incident.started_at, now);
    }
    incidents
}

fn plural(n: i64, unit: &str) -> String {
    if n == 1 {
        format!("{} {}", n, unit)
    } else {
        format!("{} {}s", n, unit)
    }
}

/// Human-readable elapsed time between two instants.
pub fn format_duration(start: DateTime<Utc>, end: DateTime<Utc>) -> String {
    let minutes = (end - start).num_minutes();

    if minutes < 1 {
        return "just now".to_string();
    }
    if minutes < 60 {
        return plural(minutes, "minute");
    }

    let hours = minutes / 60;
    let remain_minutes = minutes % 60;

    if hours < 24 {
        if remain_minutes == 0 {
            return plural(hours, "hour");
        }
        return format!("{}h {}m", hours, remain_minutes);
    }

    format!("{} {}h", plural(hours / 24, "day"), hours % 24)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use chrono::{Duration as ChronoDuration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()
    }

    fn after(secs: i64) -> String {
        format_duration(t0(), t0() + ChronoDuration::seconds(secs))
    }

    fn transition(from: Health, to: Health, at: DateTime<Utc>) -> Transition {
        Transition {
            service_id: "sso".to_string(),
            service_name: "SSO Login".to_string(),
            from,
            to,
            timestamp: at,
        }
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(after(30), "just now");
        assert_eq!(after(-30), "just now");
        assert_eq!(after(90), "1 minute");
        assert_eq!(after(150), "2 minutes");
        assert_eq!(after(3600), "1 hour");
        assert_eq!(after(7200), "2 hours");
        assert_eq!(after(3661), "1h 1m");
        assert_eq!(after(90000), "1 day 1h");
        assert_eq!(after(2 * 86400), "2 days 0h");
    }

    #[test]
    fn test_open_is_idempotent() {
        let store = MemoryStore::new();

        let first = apply_transition(&store, &transition(Health::Up, Health::Down, t0()), t0()).unwrap();
        let opened = match first {
            IncidentChange::Opened(i) => i,
            other => panic!("expected an opened incident, got {:?}", other),
        };
        assert_eq!(opened.title, "SSO Login is down");
        assert_eq!(opened.duration, "just now");

        let later = t0() + ChronoDuration::minutes(1);
        let second = apply_transition(&store, &transition(Health::Degraded, Health::Down, later), later).unwrap();
        assert_eq!(second, IncidentChange::Unchanged);

        let active = store.active_incidents().unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, opened.id);
    }

    #[test]
    fn test_recovery_resolves_and_next_outage_opens_new() {
        let store = MemoryStore::new();
        apply_transition(&store, &transition(Health::Up, Health::Degraded, t0()), t0()).unwrap();

        let recovered = t0() + ChronoDuration::seconds(3661);
        let change = apply_transition(&store, &transition(Health::Degraded, Health::Up, recovered), recovered).unwrap();
        let resolved = match change {
            IncidentChange::Resolved(i) => i,
            other => panic!("expected a resolved incident, got {:?}", other),
        };
        assert_eq!(resolved.title, "SSO Login is degraded");
        assert_eq!(resolved.resolved_at, Some(recovered));
        assert_eq!(resolved.duration, "1h 1m");
        assert!(store.active_incidents().unwrap().is_empty());

        // Frozen: refreshing later leaves the resolved duration alone.
        refresh_durations(&store, recovered + ChronoDuration::days(2)).unwrap();
        assert_eq!(store.resolved_incidents(1).unwrap()[0].duration, "1h 1m");

        let again = recovered + ChronoDuration::minutes(5);
        let change = apply_transition(&store, &transition(Health::Up, Health::Down, again), again).unwrap();
        let reopened = match change {
            IncidentChange::Opened(i) => i,
            other => panic!("expected a new incident, got {:?}", other),
        };
        assert_ne!(reopened.id, resolved.id);
        assert_eq!(reopened.started_at, again);
    }

    #[test]
    fn test_recovery_without_incident_is_noop() {
        let store = MemoryStore::new();
        let change = apply_transition(&store, &transition(Health::Down, Health::Up, t0()), t0()).unwrap();
        assert_eq!(change, IncidentChange::Unchanged);
    }

    #[test]
    fn test_refresh_durations_updates_ongoing() {
        let store = MemoryStore::new();
        apply_transition(&store, &transition(Health::Up, Health::Down, t0()), t0()).unwrap();

        let refreshed = refresh_durations(&store, t0() + ChronoDuration::minutes(125)).unwrap();
        assert_eq!(refreshed.len(), 1);
        assert_eq!(refreshed[0].duration, "2h 5m");
        assert_eq!(store.active_incidents().unwrap()[0].duration, "2h 5m");
    }

    #[test]
    fn test_with_fresh_durations_skips_resolved() {
        let resolved = Incident {
            id: 1,
            service: "lms".to_string(),
            title: "LMS is down".to_string(),
            status: IncidentState::Resolved,
            started_at: t0(),
            resolved_at: Some(t0() + ChronoDuration::minutes(3)),
            duration: "3 minutes".to_string(),
        };
        let mut ongoing = resolved.clone();
        ongoing.status = IncidentState::Ongoing;
        ongoing.resolved_at = None;

        let out = with_fresh_durations(vec![resolved.clone(), ongoing], t0() + ChronoDuration::hours(1));
        assert_eq!(out[0].duration, "3 minutes");
        assert_eq!(out[1].duration, "1 hour");
    }
}
