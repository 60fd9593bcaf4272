//! Conversation backend webhook client
//!
//! One finalized utterance per request: the transcript plus the running
//! conversation history go out as JSON, the reply text comes back. A
//! non-2xx status is a hard failure for that turn; the orchestrator turns
//! it into the apology reply.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;

use crate::config::{WebhookMode, WebhookSettings};
use crate::{Error, Result};

/// One turn of conversation history on the wire
#[derive(Debug, Clone, Serialize)]
pub struct ChatTurn {
    /// `"user"` or `"assistant"`
    pub role: &'static str,
    /// Message text
    pub content: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WebhookPayload<'a> {
    transcript: &'a str,
    conversation_history: &'a [ChatTurn],
    timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    webhook_config: Option<WebhookConfigPayload<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WebhookConfigPayload<'a> {
    mode: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    api_key: Option<&'a str>,
}

/// Something that answers finalized utterances
#[async_trait]
pub trait Backend: Send + Sync {
    /// Send a transcript and history; returns the reply text
    ///
    /// # Errors
    ///
    /// Returns error on transport failure or non-2xx status
    async fn send(&self, transcript: &str, history: &[ChatTurn]) -> Result<String>;
}

/// HTTP webhook backend
pub struct WebhookClient {
    client: reqwest::Client,
    url: url::Url,
    api_key: Option<SecretString>,
    mode: WebhookMode,
}

impl WebhookClient {
    /// Create a client from settings
    ///
    /// # Errors
    ///
    /// Returns error if the URL is invalid
    pub fn from_settings(settings: &WebhookSettings) -> Result<Self> {
        let url = url::Url::parse(&settings.url)
            .map_err(|e| Error::Config(format!("invalid webhook URL: {e}")))?;

        Ok(Self {
            client: reqwest::Client::new(),
            url,
            api_key: settings
                .api_key
                .as_ref()
                .filter(|k| !k.is_empty())
                .map(|k| k.clone().into()),
            mode: settings.mode,
        })
    }

    /// Extract the reply text from a backend response body
    ///
    /// Reads the `response` field when present, else renders the whole
    /// payload as the reply.
    fn reply_text(body: serde_json::Value) -> String {
        match body.get("response") {
            Some(serde_json::Value::String(text)) => text.clone(),
            Some(other) => other.to_string(),
            None => match body {
                serde_json::Value::String(text) => text,
                other => other.to_string(),
            },
        }
    }
}

#[async_trait]
impl Backend for WebhookClient {
    async fn send(&self, transcript: &str, history: &[ChatTurn]) -> Result<String> {
        // Current utterance rides at the end of the history
        let mut full_history = history.to_vec();
        full_history.push(ChatTurn {
            role: "user",
            content: transcript.to_string(),
        });

        let config = (self.api_key.is_some() || self.mode != WebhookMode::Standard).then(|| {
            WebhookConfigPayload {
                mode: self.mode.as_str(),
                api_key: self.api_key.as_ref().map(ExposeSecret::expose_secret),
            }
        });

        let payload = WebhookPayload {
            transcript,
            conversation_history: &full_history,
            timestamp: chrono::Utc::now().to_rfc3339(),
            webhook_config: config,
        };

        let mut request = self.client.post(self.url.clone()).json(&payload);
        if let Some(key) = &self.api_key {
            request = request.header(
                "Authorization",
                format!("Bearer {}", key.expose_secret()),
            );
        }

        tracing::debug!(transcript = %transcript, turns = full_history.len(), "sending to webhook");

        let response = request.send().await?;
        let status = response.status();

        if !status.is_success() {
            return Err(Error::Webhook(format!("webhook returned {status}")));
        }

        let body: serde_json::Value = response.json().await?;
        let reply = Self::reply_text(body);

        tracing::debug!(reply_len = reply.len(), "webhook reply received");
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_text_from_response_field() {
        let body = serde_json::json!({ "response": "The lights are on." });
        assert_eq!(WebhookClient::reply_text(body), "The lights are on.");
    }

    #[test]
    fn test_reply_text_nonstring_response_field() {
        let body = serde_json::json!({ "response": { "ok": true } });
        assert_eq!(WebhookClient::reply_text(body), r#"{"ok":true}"#);
    }

    #[test]
    fn test_reply_text_whole_payload_fallback() {
        let body = serde_json::json!("plain reply");
        assert_eq!(WebhookClient::reply_text(body), "plain reply");
    }

    #[test]
    fn test_payload_shape() {
        let history = vec![ChatTurn {
            role: "assistant",
            content: "Hi!".to_string(),
        }];
        let payload = WebhookPayload {
            transcript: "turn on the lights",
            conversation_history: &history,
            timestamp: "2024-01-01T00:00:00Z".to_string(),
            webhook_config: Some(WebhookConfigPayload {
                mode: "standard",
                api_key: Some("key"),
            }),
        };

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["transcript"], "turn on the lights");
        assert_eq!(json["conversationHistory"][0]["role"], "assistant");
        assert_eq!(json["webhookConfig"]["apiKey"], "key");
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn test_invalid_url_rejected() {
        let settings = WebhookSettings {
            url: "not a url".to_string(),
            api_key: None,
            mode: WebhookMode::Standard,
        };
        assert!(WebhookClient::from_settings(&settings).is_err());
    }
}
