//! HTTP request handlers.

use super::AppState;
use crate::db::{PushKeys, PushSubscription};
use crate::monitor::with_fresh_durations;
use crate::notify::NotifyError;

use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use chrono::{NaiveDate, Utc};
use regex::Regex;
use serde::Deserialize;
use serde_json::json;
use std::sync::OnceLock;

/// Resolved incidents returned by `/incidents`.
const INCIDENT_LOG_LIMIT: usize = 50;

fn error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

fn internal(e: impl std::fmt::Display) -> Response {
    tracing::error!("Request failed: {}", e);
    error(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
}

pub async fn handle_status(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.current_snapshot() {
        Ok(Some(mut snapshot)) => {
            snapshot.incidents = with_fresh_durations(snapshot.incidents, Utc::now());
            Json(snapshot).into_response()
        }
        Ok(None) => error(StatusCode::SERVICE_UNAVAILABLE, "no status data yet"),
        Err(e) => internal(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub date: Option<String>,
}

fn date_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("valid date pattern"))
}

/// Parse a `YYYY-MM-DD` query value.
pub fn parse_history_date(raw: &str) -> Option<NaiveDate> {
    if !date_pattern().is_match(raw) {
        return None;
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()
}

pub async fn handle_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> impl IntoResponse {
    let date = match query.date.as_deref() {
        None | Some("") => Utc::now().date_naive(),
        Some(raw) => match parse_history_date(raw) {
            Some(d) => d,
            None => return error(StatusCode::BAD_REQUEST, "invalid date, expected YYYY-MM-DD"),
        },
    };

    match state.store.history_for(date) {
        Ok(points) => Json(json!({
            "date": date.format("%Y-%m-%d").to_string(),
            "points": points,
        }))
        .into_response(),
        Err(e) => internal(e),
    }
}

pub async fn handle_incidents(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.resolved_incidents(INCIDENT_LOG_LIMIT) {
        Ok(incidents) => Json(incidents).into_response(),
        Err(e) => internal(e),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct KeysRequest {
    pub p256dh: Option<String>,
    pub auth: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SubscribeRequest {
    pub endpoint: Option<String>,
    pub keys: Option<KeysRequest>,
}

fn present(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl SubscribeRequest {
    fn into_subscription(self) -> Option<PushSubscription> {
        let keys = self.keys.unwrap_or_default();
        Some(PushSubscription {
            endpoint: present(self.endpoint)?,
            keys: PushKeys {
                p256dh: present(keys.p256dh)?,
                auth: present(keys.auth)?,
            },
        })
    }
}

pub async fn handle_subscribe(
    State(state): State<AppState>,
    body: Result<Json<SubscribeRequest>, JsonRejection>,
) -> impl IntoResponse {
    let sub = match body.ok().and_then(|Json(req)| req.into_subscription()) {
        Some(s) => s,
        None => return error(StatusCode::BAD_REQUEST, "endpoint, keys.p256dh and keys.auth are required"),
    };

    match state.store.save_subscription(&sub) {
        Ok(()) => {
            tracing::info!("Saved push subscription {}", sub.key());
            (StatusCode::CREATED, Json(json!({ "ok": true }))).into_response()
        }
        Err(e) => internal(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct UnsubscribeRequest {
    pub endpoint: Option<String>,
}

pub async fn handle_unsubscribe(
    State(state): State<AppState>,
    body: Result<Json<UnsubscribeRequest>, JsonRejection>,
) -> impl IntoResponse {
    let endpoint = match body.ok().and_then(|Json(req)| present(req.endpoint)) {
        Some(e) => e,
        None => return error(StatusCode::BAD_REQUEST, "endpoint is required"),
    };

    match state.store.delete_subscription(&endpoint) {
        Ok(removed) => {
            if removed {
                tracing::info!("Removed push subscription");
            }
            Json(json!({ "ok": true })).into_response()
        }
        Err(e) => internal(e),
    }
}

pub async fn handle_vapid_key(State(state): State<AppState>) -> impl IntoResponse {
    match state.notifier.vapid_public_key() {
        Some(key) => Json(json!({ "publicKey": key })).into_response(),
        None => error(StatusCode::SERVICE_UNAVAILABLE, "web push is not configured"),
    }
}

pub async fn handle_test_alert(State(state): State<AppState>) -> impl IntoResponse {
    match state.notifier.send_test_alert(Utc::now()).await {
        Ok(()) => Json(json!({ "ok": true })).into_response(),
        Err(NotifyError::NotConfigured(what)) => {
            error(StatusCode::SERVICE_UNAVAILABLE, format!("{} is not configured", what))
        }
        Err(e) => {
            tracing::error!("Test alert failed: {}", e);
            error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

pub async fn handle_healthz() -> impl IntoResponse {
    "ok"
}
