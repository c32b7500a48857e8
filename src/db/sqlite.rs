//! SQLite database store implementation.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use super::models::*;
use super::store::{format_db_time, parse_db_time, DbError, StatusStore};
use crate::monitor::Health;

mod embedded {
    refinery::embed_migrations!("migrations");
}

const INCIDENT_COLUMNS: &str = "id, service_id, title, status, started_at, resolved_at, duration";

/// Thread-safe SQLite store.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and apply migrations.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    fn init(&self) -> Result<(), DbError> {
        let mut conn = self.conn()?;
        let report = embedded::migrations::runner().run(&mut *conn)?;
        for m in report.applied_migrations() {
            tracing::info!("Applied migration {}", m);
        }
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, DbError> {
        self.conn.lock().map_err(|_| DbError::LockPoisoned)
    }
}

/// Incident row as stored, before time parsing.
type IncidentRow = (i64, String, String, String, String, Option<String>, String);

fn read_incident_row(row: &rusqlite::Row<'_>) -> SqlResult<IncidentRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn incident_from_row(row: IncidentRow) -> Result<Incident, DbError> {
    let (id, service, title, status, started_at, resolved_at, duration) = row;
    Ok(Incident {
        id,
        service,
        title,
        status: IncidentState::parse(&status)
            .ok_or_else(|| DbError::Corrupt(format!("incident state {:?}", status)))?,
        started_at: parse_db_time(&started_at)?,
        resolved_at: resolved_at.as_deref().map(parse_db_time).transpose()?,
        duration,
    })
}

fn query_incidents(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<Incident>, DbError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, read_incident_row)?
        .collect::<SqlResult<Vec<_>>>()?;
    rows.into_iter().map(incident_from_row).collect()
}

fn ongoing_incidents(conn: &Connection) -> Result<Vec<Incident>, DbError> {
    query_incidents(
        conn,
        &format!(
            "SELECT {} FROM incidents WHERE status = 'ongoing' ORDER BY started_at ASC, id ASC",
            INCIDENT_COLUMNS
        ),
        [],
    )
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(e, rusqlite::Error::SqliteFailure(err, _) if err.code == rusqlite::ErrorCode::ConstraintViolation)
}

impl StatusStore for SqliteStore {
    // --- Snapshot ---

    fn current_snapshot(&self) -> Result<Option<StatusSnapshot>, DbError> {
        let conn = self.conn()?;

        let meta: Option<(bool, String)> = conn
            .query_row(
                "SELECT can_access_platform, last_checked FROM snapshot_meta WHERE id = 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let (can_access_platform, last_checked) = match meta {
            Some(m) => m,
            None => return Ok(None),
        };

        let mut stmt = conn.prepare(
            "SELECT service_id, name, status, http_code, response_time, last_checked
             FROM current_status ORDER BY position ASC",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<i64>>(3)?,
                    row.get::<_, Option<i64>>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })?
            .collect::<SqlResult<Vec<_>>>()?;

        let services = rows
            .into_iter()
            .map(|(id, name, status, http_code, response_time, checked)| -> Result<ServiceStatus, DbError> {
                Ok(ServiceStatus {
                    status: Health::parse(&status)
                        .ok_or_else(|| DbError::Corrupt(format!("health {:?} for {}", status, id)))?,
                    id,
                    name,
                    http_code: http_code.map(|c| c as u16),
                    response_time: response_time.map(|t| t as u64),
                    last_checked: parse_db_time(&checked)?,
                })
            })
            .collect::<Result<Vec<_>, DbError>>()?;

        Ok(Some(StatusSnapshot {
            can_access_platform,
            last_checked: parse_db_time(&last_checked)?,
            services,
            incidents: ongoing_incidents(&conn)?,
        }))
    }

    fn commit_snapshot(&self, snapshot: &StatusSnapshot) -> Result<(), DbError> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;

        tx.execute(
            "INSERT INTO snapshot_meta (id, can_access_platform, last_checked) VALUES (1, ?1, ?2)
             ON CONFLICT(id) DO UPDATE SET
             can_access_platform=excluded.can_access_platform, last_checked=excluded.last_checked",
            params![snapshot.can_access_platform, format_db_time(&snapshot.last_checked)],
        )?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO current_status (service_id, name, status, http_code, response_time, last_checked, position)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(service_id) DO UPDATE SET
                 name=excluded.name, status=excluded.status, http_code=excluded.http_code,
                 response_time=excluded.response_time, last_checked=excluded.last_checked,
                 position=excluded.position",
            )?;

            for (position, s) in snapshot.services.iter().enumerate() {
                stmt.execute(params![
                    s.id,
                    s.name,
                    s.status.as_str(),
                    s.http_code.map(i64::from),
                    s.response_time.map(|t| t as i64),
                    format_db_time(&s.last_checked),
                    position as i64,
                ])?;
            }

            let keep: HashSet<&str> = snapshot.services.iter().map(|s| s.id.as_str()).collect();
            let mut ids = tx.prepare("SELECT service_id FROM current_status")?;
            let existing = ids
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<SqlResult<Vec<_>>>()?;
            for id in existing.iter().filter(|id| !keep.contains(id.as_str())) {
                tx.execute("DELETE FROM current_status WHERE service_id = ?1", params![id])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    // --- History ---

    fn append_history(&self, point: &HistoryPoint) -> Result<(), DbError> {
        let services = serde_json::to_string(&point.services)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO history (time, date, services) VALUES (?1, ?2, ?3)",
            params![
                format_db_time(&point.timestamp),
                point.timestamp.date_naive().format("%Y-%m-%d").to_string(),
                services,
            ],
        )?;
        Ok(())
    }

    fn history_for(&self, date: NaiveDate) -> Result<Vec<HistoryPoint>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT time, services FROM history WHERE date = ?1 ORDER BY time ASC")?;
        let rows = stmt
            .query_map(params![date.format("%Y-%m-%d").to_string()], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<SqlResult<Vec<_>>>()?;

        rows.into_iter()
            .map(|(time, services)| -> Result<HistoryPoint, DbError> {
                Ok(HistoryPoint {
                    timestamp: parse_db_time(&time)?,
                    services: serde_json::from_str(&services)?,
                })
            })
            .collect()
    }

    fn delete_history_before(&self, cutoff: DateTime<Utc>) -> Result<usize, DbError> {
        let conn = self.conn()?;
        Ok(conn.execute("DELETE FROM history WHERE time < ?1", params![format_db_time(&cutoff)])?)
    }

    // --- Incidents ---

    fn open_incident(&self, incident: &Incident) -> Result<Incident, DbError> {
        let conn = self.conn()?;
        let inserted = conn.execute(
            "INSERT INTO incidents (service_id, title, status, started_at, resolved_at, duration)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                incident.service,
                incident.title,
                incident.status.as_str(),
                format_db_time(&incident.started_at),
                incident.resolved_at.as_ref().map(format_db_time),
                incident.duration,
            ],
        );

        match inserted {
            Ok(_) => {}
            Err(e) if is_constraint_violation(&e) => {
                return Err(DbError::Conflict(format!(
                    "{} already has an ongoing incident",
                    incident.service
                )))
            }
            Err(e) => return Err(e.into()),
        }

        Ok(Incident {
            id: conn.last_insert_rowid(),
            ..incident.clone()
        })
    }

    fn update_incident(&self, incident: &Incident) -> Result<(), DbError> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE incidents SET status=?1, resolved_at=?2, duration=?3 WHERE id=?4",
            params![
                incident.status.as_str(),
                incident.resolved_at.as_ref().map(format_db_time),
                incident.duration,
                incident.id,
            ],
        )?;
        Ok(())
    }

    fn resolve_incident(
        &self,
        service: &str,
        resolved_at: DateTime<Utc>,
        duration: &str,
    ) -> Result<Option<Incident>, DbError> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;

        let row = tx
            .query_row(
                &format!(
                    "SELECT {} FROM incidents WHERE service_id = ?1 AND status = 'ongoing'",
                    INCIDENT_COLUMNS
                ),
                params![service],
                read_incident_row,
            )
            .optional()?;

        let mut incident = match row {
            Some(r) => incident_from_row(r)?,
            None => return Ok(None),
        };

        incident.status = IncidentState::Resolved;
        incident.resolved_at = Some(resolved_at);
        incident.duration = duration.to_string();

        tx.execute(
            "UPDATE incidents SET status='resolved', resolved_at=?1, duration=?2 WHERE id=?3",
            params![format_db_time(&resolved_at), duration, incident.id],
        )?;
        tx.commit()?;

        Ok(Some(incident))
    }

    fn active_incidents(&self) -> Result<Vec<Incident>, DbError> {
        let conn = self.conn()?;
        ongoing_incidents(&conn)
    }

    fn resolved_incidents(&self, limit: usize) -> Result<Vec<Incident>, DbError> {
        let conn = self.conn()?;
        query_incidents(
            &conn,
            &format!(
                "SELECT {} FROM incidents WHERE status = 'resolved'
                 ORDER BY resolved_at DESC, id DESC LIMIT ?1",
                INCIDENT_COLUMNS
            ),
            params![limit as i64],
        )
    }

    fn delete_resolved_incidents_before(&self, cutoff: DateTime<Utc>) -> Result<usize, DbError> {
        let conn = self.conn()?;
        Ok(conn.execute(
            "DELETE FROM incidents WHERE status = 'resolved' AND resolved_at < ?1",
            params![format_db_time(&cutoff)],
        )?)
    }

    // --- Push subscriptions ---

    fn save_subscription(&self, sub: &PushSubscription) -> Result<(), DbError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO push_subscriptions (endpoint_hash, endpoint, p256dh, auth, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(endpoint_hash) DO UPDATE SET
             endpoint=excluded.endpoint, p256dh=excluded.p256dh, auth=excluded.auth",
            params![
                sub.key(),
                sub.endpoint,
                sub.keys.p256dh,
                sub.keys.auth,
                format_db_time(&Utc::now()),
            ],
        )?;
        Ok(())
    }

    fn delete_subscription(&self, endpoint: &str) -> Result<bool, DbError> {
        let conn = self.conn()?;
        let deleted = conn.execute(
            "DELETE FROM push_subscriptions WHERE endpoint_hash = ?1",
            params![endpoint_hash(endpoint)],
        )?;
        Ok(deleted > 0)
    }

    fn subscriptions(&self) -> Result<Vec<PushSubscription>, DbError> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT endpoint, p256dh, auth FROM push_subscriptions ORDER BY created_at ASC")?;
        let subs = stmt
            .query_map([], |row| {
                Ok(PushSubscription {
                    endpoint: row.get(0)?,
                    keys: PushKeys {
                        p256dh: row.get(1)?,
                        auth: row.get(2)?,
                    },
                })
            })?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(subs)
    }
}
