//! Alert text, as pure functions of the transition and locale.

use chrono::{DateTime, FixedOffset, Utc};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use crate::monitor::{Health, Transition};

/// Language for alert text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Locale {
    Ar,
    En,
}

impl FromStr for Locale {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ar" => Ok(Locale::Ar),
            "en" => Ok(Locale::En),
            other => Err(format!("unsupported locale {:?}", other)),
        }
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locale::Ar => f.write_str("ar"),
            Locale::En => f.write_str("en"),
        }
    }
}

fn emoji(health: Health) -> &'static str {
    match health {
        Health::Up => "\u{2705}",
        Health::Degraded => "\u{26A0}\u{FE0F}",
        Health::Down => "\u{1F6D1}",
    }
}

fn health_label(health: Health, locale: Locale) -> &'static str {
    match (locale, health) {
        (Locale::Ar, Health::Up) => "شغال",
        (Locale::Ar, Health::Degraded) => "فيه مشاكل",
        (Locale::Ar, Health::Down) => "واقف",
        (Locale::En, Health::Up) => "up",
        (Locale::En, Health::Degraded) => "degraded",
        (Locale::En, Health::Down) => "down",
    }
}

/// Clock time in the alert time zone, e.g. "09:05 PM" or "09:05 م".
pub fn format_time(at: DateTime<Utc>, offset: FixedOffset, locale: Locale) -> String {
    let local = at.with_timezone(&offset);
    match locale {
        Locale::En => local.format("%I:%M %p").to_string(),
        Locale::Ar => {
            let suffix = if local.format("%p").to_string() == "AM" { "ص" } else { "م" };
            format!("{} {}", local.format("%I:%M"), suffix)
        }
    }
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

/// Telegram HTML message for a transition.
pub fn chat_message(t: &Transition, name: &str, locale: Locale, offset: FixedOffset) -> String {
    let name = escape_html(name);
    let time = format_time(t.timestamp, offset, locale);
    let previous = health_label(t.from, locale);

    let (headline, was, time_label) = match (locale, t.to) {
        (Locale::Ar, Health::Up) => ("رجع شغال".to_string(), "كان", "الوقت"),
        (Locale::Ar, to) => (health_label(to, locale).to_string(), "كان", "الوقت"),
        (Locale::En, Health::Up) => ("is back up".to_string(), "Was", "Recovered at"),
        (Locale::En, to) => (format!("is {}", health_label(to, locale)), "Was", "Detected at"),
    };

    [
        format!("{} <b>{}</b> {}", emoji(t.to), name, headline),
        String::new(),
        format!("{}: {}", was, previous),
        format!("{}: {}", time_label, time),
    ]
    .join("\n")
}

/// Telegram HTML message for the manual test endpoint.
pub fn test_message(now: DateTime<Utc>, offset: FixedOffset, locale: Locale) -> String {
    let time = format_time(now, offset, locale);
    match locale {
        Locale::Ar => format!(
            "\u{1F9EA} <b>اختبار</b>\n\nهذه رسالة اختبار من campus-status\nالوقت: {}",
            time
        ),
        Locale::En => format!(
            "\u{1F9EA} <b>Test</b>\n\nThis is a test message from campus-status\nTime: {}",
            time
        ),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PushData {
    pub url: String,
}

/// JSON body shown by the service worker's notification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PushPayload {
    pub title: String,
    pub body: String,
    pub tag: String,
    pub data: PushData,
}

pub fn push_payload(t: &Transition, name: &str, locale: Locale) -> PushPayload {
    let (title, body) = match (locale, t.to) {
        (Locale::En, Health::Up) => (
            format!("{} is back up", name),
            format!("Service has recovered from {} state.", t.from),
        ),
        (Locale::En, Health::Down) => (
            format!("{} is DOWN", name),
            "Service is not responding. We're monitoring the situation.".to_string(),
        ),
        (Locale::En, Health::Degraded) => (
            format!("{} is having issues", name),
            "Service is responding slowly or partially.".to_string(),
        ),
        (Locale::Ar, Health::Up) => (
            format!("{} رجع شغال", name),
            format!("الخدمة رجعت بعد ما كانت {}.", health_label(t.from, locale)),
        ),
        (Locale::Ar, Health::Down) => (
            format!("{} واقف", name),
            "الخدمة ما تستجيب. نتابع الوضع.".to_string(),
        ),
        (Locale::Ar, Health::Degraded) => (
            format!("{} فيه مشاكل", name),
            "الخدمة بطيئة أو تعمل جزئياً.".to_string(),
        ),
    };

    PushPayload {
        title,
        body,
        tag: format!("status-{}", t.service_id),
        data: PushData { url: "/".to_string() },
    }
}
