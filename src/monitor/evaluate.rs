//! Probe outcome classification.

use super::Health;
use crate::config::TargetConfig;
use crate::probe::ProbeResult;

/// Status codes that override per-target acceptance.
#[derive(Debug, Clone)]
pub struct EvaluationPolicy {
    /// Codes that always mean the upstream is down.
    pub hard_failure_codes: Vec<u16>,
    /// Code that means the upstream answers but is struggling.
    pub soft_failure_code: u16,
}

impl Default for EvaluationPolicy {
    fn default() -> Self {
        Self {
            hard_failure_codes: vec![502, 503],
            soft_failure_code: 500,
        }
    }
}

/// Classify one probe result. The first matching rule wins.
pub fn evaluate(result: &ProbeResult, target: &TargetConfig, policy: &EvaluationPolicy) -> Health {
    let code = match (&result.error, result.http_code) {
        (None, Some(code)) => code,
        _ => return Health::Down,
    };

    if policy.hard_failure_codes.contains(&code) {
        return Health::Down;
    }

    if code == policy.soft_failure_code {
        return Health::Degraded;
    }

    if !target.accepted_statuses.contains(&code) {
        return Health::Down;
    }

    match result.response_time {
        Some(ms) if ms >= target.degraded_threshold_ms => Health::Degraded,
        _ => Health::Up,
    }
}
