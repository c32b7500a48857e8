//! HTTP probe implementation.

use super::ProbeError;
use crate::config::ProbeMethod;

use reqwest::Method;
use std::time::{Duration, Instant};

/// Send one request and report the status code with time-to-headers.
///
/// The body is never read; the answer is the status line.
pub async fn run_http_probe(
    client: &reqwest::Client,
    method: ProbeMethod,
    url: &str,
    timeout: Duration,
) -> Result<(u16, Duration), ProbeError> {
    let url = reqwest::Url::parse(url).map_err(|e| ProbeError::Config(format!("{}: {}", url, e)))?;

    let method = match method {
        ProbeMethod::Get => Method::GET,
        ProbeMethod::Head => Method::HEAD,
    };

    let start = Instant::now();

    let response = client
        .request(method, url)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| {
            let elapsed = start.elapsed();
            if e.is_timeout() || elapsed >= timeout {
                ProbeError::Timeout(timeout)
            } else {
                ProbeError::Network {
                    message: e.to_string(),
                    elapsed,
                }
            }
        })?;

    Ok((response.status().as_u16(), start.elapsed()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProbeMethod, TargetConfig};
    use crate::probe::{build_client, run_probe};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn target(url: String, method: ProbeMethod, timeout_ms: u64) -> TargetConfig {
        TargetConfig {
            id: "t".to_string(),
            name: "Test".to_string(),
            alert_name: None,
            url,
            method,
            accepted_statuses: vec![200],
            interval: 60,
            degraded_threshold_ms: 3000,
            timeout_ms,
            critical: false,
        }
    }

    #[tokio::test]
    async fn test_http_probe_reports_status_code() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/login"))
            .and(header("user-agent", crate::probe::USER_AGENT))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let client = build_client().unwrap();
        let result = run_probe(&client, &target(format!("{}/login", server.uri()), ProbeMethod::Head, 2000)).await;

        assert_eq!(result.http_code, Some(401));
        assert!(result.response_time.is_some());
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn test_http_probe_does_not_follow_redirects() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(302).insert_header("location", "/elsewhere"))
            .mount(&server)
            .await;

        let client = build_client().unwrap();
        let result = run_probe(&client, &target(server.uri(), ProbeMethod::Get, 2000)).await;
        assert_eq!(result.http_code, Some(302));
    }

    #[tokio::test]
    async fn test_http_probe_timeout_has_no_latency() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let client = build_client().unwrap();
        let result = run_probe(&client, &target(server.uri(), ProbeMethod::Get, 100)).await;

        assert_eq!(result.http_code, None);
        assert_eq!(result.response_time, None);
        assert!(result.error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_http_probe_invalid_url() {
        let client = build_client().unwrap();
        let result = run_http_probe(&client, ProbeMethod::Get, "not a url", Duration::from_millis(100)).await;
        assert!(matches!(result, Err(ProbeError::Config(_))));
    }

    #[tokio::test]
    async fn test_http_probe_connection_refused_keeps_elapsed() {
        // Bind and drop a listener to get a port nothing listens on.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let client = build_client().unwrap();
        let result = run_probe(&client, &target(format!("http://127.0.0.1:{}", port), ProbeMethod::Get, 2000)).await;

        assert_eq!(result.http_code, None);
        assert!(result.error.is_some());
        assert!(result.response_time.is_some());
    }
}
