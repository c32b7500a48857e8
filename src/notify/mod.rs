//! Alert delivery for health transitions.
//!
//! Chat and push are independent best-effort channels. Nothing here returns an
//! error to the pipeline: failures are logged per recipient, and push
//! endpoints reported gone are removed from the store.

mod message;
mod telegram;
mod vapid;
mod webpush;

pub use message::*;
pub use telegram::*;
pub use vapid::*;
pub use webpush::*;

use crate::config::{ServerConfig, TelegramConfig};
use crate::db::{DbError, StatusStore};
use crate::monitor::Transition;

use chrono::{DateTime, FixedOffset, Offset, Utc};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Per-request timeout for chat and push deliveries.
pub const DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Notification error types.
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("{0} is not configured")]
    NotConfigured(&'static str),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },
    #[error("VAPID error: {0}")]
    Vapid(#[from] VapidError),
    #[error("encryption error: {0}")]
    Encryption(String),
    #[error("storage error: {0}")]
    Store(#[from] DbError),
}

/// Counts from one push fan-out.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PushSummary {
    pub delivered: usize,
    pub removed: usize,
    pub failed: usize,
}

/// Sends alerts to the chat channel and to every push subscription.
pub struct Notifier {
    client: reqwest::Client,
    store: Arc<dyn StatusStore>,
    telegram: Option<TelegramConfig>,
    vapid: Option<VapidKeys>,
    locale: Locale,
    offset: FixedOffset,
    alert_names: HashMap<String, String>,
}

impl Notifier {
    pub fn new(cfg: &ServerConfig, store: Arc<dyn StatusStore>) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder().timeout(DELIVERY_TIMEOUT).build()?;

        let vapid = match &cfg.vapid {
            Some(v) => match VapidKeys::from_config(v) {
                Ok(keys) => Some(keys),
                Err(e) => {
                    tracing::error!("Web push disabled: {}", e);
                    None
                }
            },
            None => None,
        };

        let offset = cfg
            .alert_utc_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .unwrap_or_else(|| {
                tracing::warn!("Alert UTC offset {} out of range, using UTC", cfg.alert_utc_offset_minutes);
                Utc.fix()
            });

        let alert_names = cfg
            .targets
            .iter()
            .map(|t| (t.id.clone(), t.alert_name().to_string()))
            .collect();

        Ok(Self {
            client,
            store,
            telegram: cfg.telegram.clone(),
            vapid,
            locale: cfg.locale,
            offset,
            alert_names,
        })
    }

    pub fn chat_enabled(&self) -> bool {
        self.telegram.is_some()
    }

    pub fn vapid_public_key(&self) -> Option<&str> {
        self.vapid.as_ref().map(|v| v.public_key())
    }

    fn alert_name<'a>(&'a self, t: &'a Transition) -> &'a str {
        self.alert_names
            .get(&t.service_id)
            .map(String::as_str)
            .unwrap_or(&t.service_name)
    }

    /// Send every alert for a tick's transitions; never fails.
    pub async fn dispatch(&self, transitions: &[Transition]) {
        join_all(transitions.iter().map(|t| async move {
            let (_, summary) = tokio::join!(self.send_chat_alert(t), self.send_push_alerts(t));
            if summary.delivered + summary.removed + summary.failed > 0 {
                tracing::info!(
                    "Push for {}: {} delivered, {} removed, {} failed",
                    t.service_id,
                    summary.delivered,
                    summary.removed,
                    summary.failed
                );
            }
        }))
        .await;
    }

    /// Chat alert for one transition; failures are logged.
    pub async fn send_chat_alert(&self, t: &Transition) {
        let cfg = match &self.telegram {
            Some(c) => c,
            None => {
                tracing::debug!("Telegram not configured, skipping alert for {}", t.service_id);
                return;
            }
        };

        let text = chat_message(t, self.alert_name(t), self.locale, self.offset);
        if let Err(e) = send_message(&self.client, cfg, &text).await {
            tracing::error!("Telegram alert failed for {}: {}", t.service_id, e);
        }
    }

    /// Manual test message on the chat channel.
    pub async fn send_test_alert(&self, now: DateTime<Utc>) -> Result<(), NotifyError> {
        let cfg = self.telegram.as_ref().ok_or(NotifyError::NotConfigured("Telegram"))?;
        send_message(&self.client, cfg, &test_message(now, self.offset, self.locale)).await
    }

    /// Push one transition to every subscription concurrently.
    pub async fn send_push_alerts(&self, t: &Transition) -> PushSummary {
        let mut summary = PushSummary::default();

        let vapid = match &self.vapid {
            Some(v) => v,
            None => {
                tracing::debug!("VAPID keys not configured, skipping web push");
                return summary;
            }
        };

        let subscriptions = match self.store.subscriptions() {
            Ok(s) => s,
            Err(e) => {
                tracing::error!("Failed to load push subscriptions: {}", e);
                return summary;
            }
        };
        if subscriptions.is_empty() {
            return summary;
        }

        let payload = match serde_json::to_vec(&push_payload(t, self.alert_name(t), self.locale)) {
            Ok(p) => p,
            Err(e) => {
                tracing::error!("Failed to encode push payload: {}", e);
                return summary;
            }
        };

        let now = Utc::now();
        let outcomes = join_all(
            subscriptions
                .iter()
                .map(|sub| deliver(&self.client, vapid, sub, &payload, now)),
        )
        .await;

        for (sub, outcome) in subscriptions.iter().zip(outcomes) {
            match outcome {
                DeliveryOutcome::Delivered => summary.delivered += 1,
                DeliveryOutcome::Gone => match self.store.delete_subscription(&sub.endpoint) {
                    Ok(_) => summary.removed += 1,
                    Err(e) => {
                        tracing::error!("Failed to remove gone subscription {}: {}", sub.key(), e);
                        summary.failed += 1;
                    }
                },
                DeliveryOutcome::Failed(reason) => {
                    tracing::warn!("Push failed for subscription {}: {}", sub.key(), reason);
                    summary.failed += 1;
                }
            }
        }

        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{TelegramConfig, VapidConfig};
    use crate::db::{MemoryStore, PushSubscription};
    use crate::monitor::Health;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    use p256::ecdsa::SigningKey;
    use rand::rngs::OsRng;
    use wiremock::matchers::{header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn transition() -> Transition {
        Transition {
            service_id: "sso".to_string(),
            service_name: "SSO Login".to_string(),
            from: Health::Up,
            to: Health::Down,
            timestamp: Utc::now(),
        }
    }

    fn vapid_config() -> VapidConfig {
        VapidConfig {
            public_key: None,
            private_key: URL_SAFE_NO_PAD.encode(SigningKey::random(&mut OsRng).to_bytes()),
            subject: "mailto:ops@example.edu".to_string(),
        }
    }

    fn subscription(server: &MockServer, id: &str) -> PushSubscription {
        let (_, keys) = webpush::tests::subscriber_keys();
        PushSubscription {
            endpoint: format!("{}/push/{}", server.uri(), id),
            keys,
        }
    }

    #[tokio::test]
    async fn test_push_fan_out_removes_only_gone_endpoints() {
        let server = MockServer::start().await;
        for (id, status) in [("ok", 201), ("gone", 410), ("missing", 404), ("broken", 500)] {
            Mock::given(method("POST"))
                .and(path(format!("/push/{}", id)))
                .and(header("content-encoding", "aes128gcm"))
                .and(header("ttl", "86400"))
                .and(header_exists("authorization"))
                .respond_with(ResponseTemplate::new(status))
                .expect(1)
                .mount(&server)
                .await;
        }

        let store = Arc::new(MemoryStore::new());
        for id in ["ok", "gone", "missing", "broken"] {
            store.save_subscription(&subscription(&server, id)).unwrap();
        }

        let mut cfg = ServerConfig::default();
        cfg.vapid = Some(vapid_config());
        let notifier = Notifier::new(&cfg, store.clone()).unwrap();

        let summary = notifier.send_push_alerts(&transition()).await;
        assert_eq!(summary, PushSummary { delivered: 1, removed: 2, failed: 1 });

        let mut left: Vec<String> = store.subscriptions().unwrap().into_iter().map(|s| s.endpoint).collect();
        left.sort();
        assert_eq!(left, vec![format!("{}/push/broken", server.uri()), format!("{}/push/ok", server.uri())]);
    }

    #[tokio::test]
    async fn test_push_skipped_without_vapid_keys() {
        let server = MockServer::start().await;
        let store = Arc::new(MemoryStore::new());
        store.save_subscription(&subscription(&server, "a")).unwrap();

        let notifier = Notifier::new(&ServerConfig::default(), store.clone()).unwrap();
        assert!(notifier.vapid_public_key().is_none());
        assert_eq!(notifier.send_push_alerts(&transition()).await, PushSummary::default());
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_isolates_chat_failure_from_push() {
        let telegram = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&telegram)
            .await;

        let push = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&push)
            .await;

        let store = Arc::new(MemoryStore::new());
        store.save_subscription(&subscription(&push, "a")).unwrap();

        let mut cfg = ServerConfig::default();
        cfg.vapid = Some(vapid_config());
        cfg.telegram = Some(TelegramConfig {
            bot_token: "t".to_string(),
            chat_id: "c".to_string(),
            api_base: telegram.uri(),
        });
        let notifier = Notifier::new(&cfg, store.clone()).unwrap();

        notifier.dispatch(&[transition()]).await;
        assert_eq!(store.subscriptions().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_chat_alert_uses_alert_name_and_locale() {
        let telegram = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bott/sendMessage"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&telegram)
            .await;

        let mut cfg = ServerConfig::default();
        cfg.locale = Locale::En;
        cfg.telegram = Some(TelegramConfig {
            bot_token: "t".to_string(),
            chat_id: "c".to_string(),
            api_base: telegram.uri(),
        });
        let notifier = Notifier::new(&cfg, Arc::new(MemoryStore::new())).unwrap();
        notifier.send_chat_alert(&transition()).await;

        let requests = telegram.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        let text = body["text"].as_str().unwrap();
        // Default targets carry an Arabic alert name for sso.
        assert!(text.contains("<b>تسجيل الدخول SSO</b> is down"), "{}", text);
    }

    #[test]
    fn test_out_of_range_alert_offset_falls_back_to_utc() {
        for minutes in [i32::MAX, i32::MIN, 24 * 60] {
            let mut cfg = ServerConfig::default();
            cfg.alert_utc_offset_minutes = minutes;
            let notifier = Notifier::new(&cfg, Arc::new(MemoryStore::new())).unwrap();
            assert_eq!(notifier.offset, Utc.fix(), "{} minutes", minutes);
        }

        let notifier = Notifier::new(&ServerConfig::default(), Arc::new(MemoryStore::new())).unwrap();
        assert_eq!(notifier.offset.local_minus_utc(), 3 * 3600);
    }

    #[tokio::test]
    async fn test_test_alert_requires_configuration() {
        let notifier = Notifier::new(&ServerConfig::default(), Arc::new(MemoryStore::new())).unwrap();
        assert!(!notifier.chat_enabled());
        assert!(matches!(
            notifier.send_test_alert(Utc::now()).await,
            Err(NotifyError::NotConfigured(_))
        ));
    }
}
