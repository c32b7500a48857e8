//! Scheduler module for running the periodic monitoring tick.
//!
//! One tick probes every target, classifies the results, updates incidents,
//! records the history point, commits the new snapshot, and applies retention.
//! Alerts are dispatched afterwards on a separate task so a slow chat or push
//! service never holds up the next tick.

mod retention;

pub use retention::*;

use crate::config::{ServerConfig, TargetConfig};
use crate::db::{DbError, HistoryPoint, Incident, ServiceStatus, StatusSnapshot, StatusStore};
use crate::monitor::{apply_transition, detect_transition, evaluate, refresh_durations, EvaluationPolicy, Health, Transition};
use crate::notify::Notifier;
use crate::probe::{build_client, run_probe};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Everything one tick produced.
#[derive(Debug, Clone)]
pub struct TickReport {
    pub statuses: Vec<ServiceStatus>,
    pub transitions: Vec<Transition>,
    /// Ongoing incidents after this tick.
    pub incidents: Vec<Incident>,
    pub can_access_platform: bool,
}

/// Drives the monitoring pipeline on a fixed period.
pub struct Scheduler {
    targets: Vec<TargetConfig>,
    policy: EvaluationPolicy,
    retention: RetentionPolicy,
    period: Duration,
    store: Arc<dyn StatusStore>,
    notifier: Arc<Notifier>,
    client: reqwest::Client,
    running: Mutex<()>,
}

impl Scheduler {
    pub fn new(
        cfg: &ServerConfig,
        store: Arc<dyn StatusStore>,
        notifier: Arc<Notifier>,
    ) -> Result<Self, reqwest::Error> {
        Ok(Self {
            targets: cfg.targets.clone(),
            policy: EvaluationPolicy::default(),
            retention: RetentionPolicy::from_config(cfg),
            period: cfg.tick_interval(),
            store,
            notifier,
            client: build_client()?,
            running: Mutex::new(()),
        })
    }

    /// Start ticking in the background.
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        tracing::info!(
            "Starting scheduler with {} targets every {:?}",
            self.targets.len(),
            self.period
        );

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                interval.tick().await;
                let scheduler = self.clone();
                tokio::spawn(async move {
                    scheduler.tick().await;
                });
            }
        })
    }

    /// Run one tick unless another is still in flight, then dispatch alerts.
    pub async fn tick(&self) -> Option<TickReport> {
        let _guard = match self.running.try_lock() {
            Ok(g) => g,
            Err(_) => {
                tracing::warn!("Skipping tick due to overlap: previous tick still running");
                return None;
            }
        };

        let report = match self.run_tick(Utc::now()).await {
            Ok(r) => r,
            Err(e) => {
                tracing::error!("Tick failed: {}", e);
                return None;
            }
        };

        if !report.transitions.is_empty() {
            let notifier = self.notifier.clone();
            let transitions = report.transitions.clone();
            tokio::spawn(async move {
                notifier.dispatch(&transitions).await;
            });
        }

        Some(report)
    }

    /// Probe, evaluate, diff, track incidents, commit and evict.
    ///
    /// Alerts are not sent here; the caller owns dispatch of the returned
    /// transitions.
    pub async fn run_tick(&self, now: DateTime<Utc>) -> Result<TickReport, DbError> {
        let previous = self.store.current_snapshot()?;

        let results = join_all(self.targets.iter().map(|t| run_probe(&self.client, t))).await;

        let mut statuses = Vec::with_capacity(self.targets.len());
        let mut transitions = Vec::new();

        for (target, result) in self.targets.iter().zip(results) {
            let health = evaluate(&result, target, &self.policy);
            let before = previous.as_ref().and_then(|s| s.health_of(&target.id));

            if let Some(t) = detect_transition(&target.id, &target.name, before, health, now) {
                transitions.push(t);
            }

            statuses.push(ServiceStatus {
                id: target.id.clone(),
                name: target.name.clone(),
                status: health,
                http_code: result.http_code,
                response_time: result.response_time,
                last_checked: result.timestamp,
            });
        }

        for t in &transitions {
            apply_transition(self.store.as_ref(), t, now)?;
        }
        let incidents = refresh_durations(self.store.as_ref(), now)?;

        let can_access_platform = platform_reachable(&self.targets, &statuses);

        self.store.append_history(&HistoryPoint {
            timestamp: now,
            services: statuses.clone(),
        })?;

        // Last fallible step: until the snapshot moves, the next tick sees the
        // same previous health and re-detects these transitions.
        self.store.commit_snapshot(&StatusSnapshot {
            can_access_platform,
            last_checked: now,
            services: statuses.clone(),
            incidents: incidents.clone(),
        })?;

        // The snapshot is committed; a failed eviction waits for the next tick.
        if let Err(e) = apply_retention(self.store.as_ref(), now, &self.retention) {
            tracing::error!("Retention failed: {}", e);
        }

        tracing::info!("{}", tick_summary(&statuses, &transitions));

        Ok(TickReport {
            statuses,
            transitions,
            incidents,
            can_access_platform,
        })
    }
}

/// False when any critical target is down.
fn platform_reachable(targets: &[TargetConfig], statuses: &[ServiceStatus]) -> bool {
    targets
        .iter()
        .filter(|t| t.critical)
        .all(|t| statuses.iter().any(|s| s.id == t.id && s.status != Health::Down))
}

/// `lms=up, sso=down | Transitions: sso: up->down`
fn tick_summary(statuses: &[ServiceStatus], transitions: &[Transition]) -> String {
    let states = statuses
        .iter()
        .map(|s| format!("{}={}", s.id, s.status))
        .collect::<Vec<_>>()
        .join(", ");

    if transitions.is_empty() {
        return states;
    }

    let changes = transitions
        .iter()
        .map(|t| format!("{}: {}->{}", t.service_id, t.from, t.to))
        .collect::<Vec<_>>()
        .join(", ");

    format!("{} | Transitions: {}", states, changes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProbeMethod, TelegramConfig};
    use crate::db::MemoryStore;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn target(id: &str, server: &MockServer, critical: bool) -> TargetConfig {
        TargetConfig {
            id: id.to_string(),
            name: id.to_uppercase(),
            alert_name: None,
            url: format!("{}/health", server.uri()),
            method: ProbeMethod::Get,
            accepted_statuses: vec![200],
            interval: 60,
            degraded_threshold_ms: 3000,
            timeout_ms: 2000,
            critical,
        }
    }

    async fn answer(server: &MockServer, status: u16) {
        server.reset().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(status))
            .mount(server)
            .await;
    }

    fn status(id: &str, health: Health) -> ServiceStatus {
        ServiceStatus {
            id: id.to_string(),
            name: id.to_string(),
            status: health,
            http_code: None,
            response_time: None,
            last_checked: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_tick_end_to_end() {
        let (a, b, c) = (MockServer::start().await, MockServer::start().await, MockServer::start().await);
        for server in [&a, &b, &c] {
            answer(server, 200).await;
        }

        let telegram = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&telegram)
            .await;

        let mut cfg = ServerConfig::default();
        cfg.targets = vec![target("a", &a, false), target("b", &b, true), target("c", &c, false)];
        cfg.telegram = Some(TelegramConfig {
            bot_token: "t".to_string(),
            chat_id: "c".to_string(),
            api_base: telegram.uri(),
        });

        let store: Arc<dyn StatusStore> = Arc::new(MemoryStore::new());
        let notifier = Arc::new(Notifier::new(&cfg, store.clone()).unwrap());
        let scheduler = Scheduler::new(&cfg, store.clone(), notifier.clone()).unwrap();

        let t1 = Utc::now();
        let first = scheduler.run_tick(t1).await.unwrap();
        assert!(first.transitions.is_empty(), "cold start never transitions");
        assert!(first.statuses.iter().all(|s| s.status == Health::Up));
        assert!(first.can_access_platform);

        answer(&b, 503).await;

        let second = scheduler.run_tick(t1 + chrono::Duration::seconds(60)).await.unwrap();
        assert_eq!(second.transitions.len(), 1);
        let t = &second.transitions[0];
        assert_eq!((t.service_id.as_str(), t.from, t.to), ("b", Health::Up, Health::Down));
        assert!(!second.can_access_platform);

        let ongoing = store.active_incidents().unwrap();
        assert_eq!(ongoing.len(), 1);
        assert_eq!(ongoing[0].service, "b");

        let snapshot = store.current_snapshot().unwrap().unwrap();
        assert_eq!(snapshot.health_of("b"), Some(Health::Down));
        assert_eq!(snapshot.services[1].http_code, Some(503));
        assert!(!snapshot.can_access_platform);
        assert_eq!(snapshot.incidents.len(), 1);

        assert!(!store.history_for(t1.date_naive()).unwrap().is_empty());

        notifier.dispatch(&second.transitions).await;
        assert_eq!(telegram.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_tick_skips_while_another_runs() {
        let cfg = ServerConfig {
            targets: Vec::new(),
            ..ServerConfig::default()
        };
        let store: Arc<dyn StatusStore> = Arc::new(MemoryStore::new());
        let notifier = Arc::new(Notifier::new(&cfg, store.clone()).unwrap());
        let scheduler = Scheduler::new(&cfg, store, notifier).unwrap();

        let held = scheduler.running.lock().await;
        assert!(scheduler.tick().await.is_none());
        drop(held);

        let report = scheduler.tick().await.unwrap();
        assert!(report.statuses.is_empty());
        assert!(report.can_access_platform);
    }

    #[test]
    fn test_platform_reachable_only_counts_critical_down() {
        let mut cfg = ServerConfig::default();
        cfg.targets.truncate(3);
        let targets = cfg.targets;

        let degraded = vec![
            status("lms", Health::Degraded),
            status("sso", Health::Up),
            status("eservice", Health::Down),
        ];
        assert!(platform_reachable(&targets, &degraded));

        let down = vec![
            status("lms", Health::Up),
            status("sso", Health::Down),
            status("eservice", Health::Up),
        ];
        assert!(!platform_reachable(&targets, &down));
    }

    #[test]
    fn test_tick_summary() {
        let statuses = vec![status("lms", Health::Up), status("sso", Health::Down)];
        assert_eq!(tick_summary(&statuses, &[]), "lms=up, sso=down");

        let t = Transition {
            service_id: "sso".to_string(),
            service_name: "SSO".to_string(),
            from: Health::Up,
            to: Health::Down,
            timestamp: Utc::now(),
        };
        assert_eq!(
            tick_summary(&statuses, &[t]),
            "lms=up, sso=down | Transitions: sso: up->down"
        );
    }

    /// Memory store whose history writes can be switched to fail.
    #[derive(Default)]
    struct FlakyHistoryStore {
        inner: MemoryStore,
        fail_history: std::sync::atomic::AtomicBool,
    }

    impl StatusStore for FlakyHistoryStore {
        fn current_snapshot(&self) -> Result<Option<StatusSnapshot>, DbError> {
            self.inner.current_snapshot()
        }
        fn commit_snapshot(&self, snapshot: &StatusSnapshot) -> Result<(), DbError> {
            self.inner.commit_snapshot(snapshot)
        }
        fn append_history(&self, point: &HistoryPoint) -> Result<(), DbError> {
            if self.fail_history.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(DbError::Corrupt("history unavailable".to_string()));
            }
            self.inner.append_history(point)
        }
        fn history_for(&self, date: chrono::NaiveDate) -> Result<Vec<HistoryPoint>, DbError> {
            self.inner.history_for(date)
        }
        fn delete_history_before(&self, cutoff: DateTime<Utc>) -> Result<usize, DbError> {
            self.inner.delete_history_before(cutoff)
        }
        fn open_incident(&self, incident: &Incident) -> Result<Incident, DbError> {
            self.inner.open_incident(incident)
        }
        fn update_incident(&self, incident: &Incident) -> Result<(), DbError> {
            self.inner.update_incident(incident)
        }
        fn resolve_incident(
            &self,
            service: &str,
            resolved_at: DateTime<Utc>,
            duration: &str,
        ) -> Result<Option<Incident>, DbError> {
            self.inner.resolve_incident(service, resolved_at, duration)
        }
        fn active_incidents(&self) -> Result<Vec<Incident>, DbError> {
            self.inner.active_incidents()
        }
        fn resolved_incidents(&self, limit: usize) -> Result<Vec<Incident>, DbError> {
            self.inner.resolved_incidents(limit)
        }
        fn delete_resolved_incidents_before(&self, cutoff: DateTime<Utc>) -> Result<usize, DbError> {
            self.inner.delete_resolved_incidents_before(cutoff)
        }
        fn save_subscription(&self, sub: &crate::db::PushSubscription) -> Result<(), DbError> {
            self.inner.save_subscription(sub)
        }
        fn delete_subscription(&self, endpoint: &str) -> Result<bool, DbError> {
            self.inner.delete_subscription(endpoint)
        }
        fn subscriptions(&self) -> Result<Vec<crate::db::PushSubscription>, DbError> {
            self.inner.subscriptions()
        }
    }

    #[tokio::test]
    async fn test_failed_history_write_keeps_transition_for_next_tick() {
        let (a, b) = (MockServer::start().await, MockServer::start().await);
        answer(&a, 200).await;
        answer(&b, 200).await;

        let mut cfg = ServerConfig::default();
        cfg.targets = vec![target("a", &a, false), target("b", &b, true)];

        let store = Arc::new(FlakyHistoryStore::default());
        let notifier = Arc::new(Notifier::new(&cfg, store.clone()).unwrap());
        let scheduler = Scheduler::new(&cfg, store.clone(), notifier).unwrap();

        let t1 = Utc::now();
        scheduler.run_tick(t1).await.unwrap();

        answer(&b, 503).await;
        store.fail_history.store(true, std::sync::atomic::Ordering::SeqCst);
        assert!(scheduler.run_tick(t1 + chrono::Duration::seconds(60)).await.is_err());

        let snapshot = store.current_snapshot().unwrap().unwrap();
        assert_eq!(snapshot.health_of("b"), Some(Health::Up), "failed tick must not move the snapshot");

        store.fail_history.store(false, std::sync::atomic::Ordering::SeqCst);
        let third = scheduler.run_tick(t1 + chrono::Duration::seconds(120)).await.unwrap();
        assert_eq!(third.transitions.len(), 1);
        assert_eq!(third.transitions[0].service_id, "b");
        assert_eq!(third.transitions[0].to, Health::Down);
        // The incident opened by the failed tick is reused, not duplicated.
        assert_eq!(store.active_incidents().unwrap().len(), 1);
        assert_eq!(store.current_snapshot().unwrap().unwrap().health_of("b"), Some(Health::Down));
    }
}
