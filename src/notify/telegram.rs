//! Telegram Bot API chat delivery.

use serde::Serialize;

use super::NotifyError;
use crate::config::TelegramConfig;

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'a str,
    disable_web_page_preview: bool,
}

/// Post one HTML message to the configured chat.
pub async fn send_message(
    client: &reqwest::Client,
    cfg: &TelegramConfig,
    text: &str,
) -> Result<(), NotifyError> {
    let url = format!(
        "{}/bot{}/sendMessage",
        cfg.api_base.trim_end_matches('/'),
        cfg.bot_token
    );

    let response = client
        .post(url)
        .json(&SendMessage {
            chat_id: &cfg.chat_id,
            text,
            parse_mode: "HTML",
            disable_web_page_preview: true,
        })
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(NotifyError::Api {
            status: status.as_u16(),
            body,
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(server: &MockServer) -> TelegramConfig {
        TelegramConfig {
            bot_token: "123:abc".to_string(),
            chat_id: "-10042".to_string(),
            api_base: server.uri(),
        }
    }

    #[tokio::test]
    async fn test_send_message_posts_html() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bot123:abc/sendMessage"))
            .and(body_json(json!({
                "chat_id": "-10042",
                "text": "<b>hi</b>",
                "parse_mode": "HTML",
                "disable_web_page_preview": true
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        send_message(&reqwest::Client::new(), &config(&server), "<b>hi</b>")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_send_message_surfaces_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string(r#"{"ok":false,"description":"chat not found"}"#))
            .mount(&server)
            .await;

        let err = send_message(&reqwest::Client::new(), &config(&server), "x")
            .await
            .unwrap_err();
        match err {
            NotifyError::Api { status, body } => {
                assert_eq!(status, 400);
                assert!(body.contains("chat not found"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }
}
