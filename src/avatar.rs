//! Talking-avatar video client
//!
//! Turns reply text into a playable video URL via D-ID or HeyGen. Without
//! an API key the provider's demo stream is returned, and a static avatar
//! image is always available as the non-animated fallback.

use secrecy::{ExposeSecret, SecretString};

use crate::config::{AvatarProvider, AvatarSettings};
use crate::{Error, Result};

/// Default avatar image when none is configured
pub const DEFAULT_AVATAR_URL: &str =
    "https://cdn.pixabay.com/photo/2014/04/02/10/25/woman-303628_1280.png";

/// Demo stream returned by the D-ID path when no API key is configured
const DID_DEMO_VIDEO_URL: &str =
    "https://d-id-talks-prod.s3.us-west-2.amazonaws.com/demo/talk.mp4";

/// Demo stream returned by the HeyGen path when no API key is configured
const HEYGEN_DEMO_VIDEO_URL: &str =
    "https://storage.googleapis.com/heygen-public/demo-video/talking_4.mp4";

#[derive(serde::Deserialize)]
struct DidTalkResponse {
    result_url: String,
}

/// Avatar video client
pub struct AvatarClient {
    client: reqwest::Client,
    provider: AvatarProvider,
    api_key: Option<SecretString>,
    avatar_url: String,
    voice_id: Option<String>,
}

impl AvatarClient {
    /// Create a client from settings
    #[must_use]
    pub fn from_settings(settings: &AvatarSettings) -> Self {
        Self {
            client: reqwest::Client::new(),
            provider: settings.provider,
            api_key: settings
                .api_key
                .as_ref()
                .filter(|k| !k.is_empty())
                .map(|k| k.clone().into()),
            avatar_url: settings
                .avatar_url
                .clone()
                .unwrap_or_else(|| DEFAULT_AVATAR_URL.to_string()),
            voice_id: settings.voice_id.clone(),
        }
    }

    /// Static avatar image, the fallback when no video can be produced
    #[must_use]
    pub fn avatar_image(&self) -> &str {
        &self.avatar_url
    }

    /// Create a talking video for `text`, returning a playable URL
    ///
    /// # Errors
    ///
    /// Returns error if the provider call fails
    pub async fn create_talk(&self, text: &str) -> Result<String> {
        match self.provider {
            AvatarProvider::Did => self.create_did_talk(text).await,
            AvatarProvider::Heygen => self.create_heygen_talk(),
        }
    }

    async fn create_did_talk(&self, text: &str) -> Result<String> {
        let Some(api_key) = &self.api_key else {
            tracing::warn!("no D-ID API key configured, using demo stream");
            return Ok(DID_DEMO_VIDEO_URL.to_string());
        };

        #[derive(serde::Serialize)]
        struct Script<'a> {
            #[serde(rename = "type")]
            kind: &'a str,
            input: &'a str,
        }

        #[derive(serde::Serialize)]
        struct TalkRequest<'a> {
            script: Script<'a>,
            source_url: &'a str,
            #[serde(skip_serializing_if = "Option::is_none")]
            voice_id: Option<&'a str>,
        }

        let request = TalkRequest {
            script: Script {
                kind: "text",
                input: text,
            },
            source_url: &self.avatar_url,
            voice_id: self.voice_id.as_deref(),
        };

        let response = self
            .client
            .post("https://api.d-id.com/talks")
            .header(
                "Authorization",
                format!("Basic {}", api_key.expose_secret()),
            )
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(Error::Avatar(format!("D-ID API error: {status}")));
        }

        let talk: DidTalkResponse = response.json().await?;
        tracing::debug!(url = %talk.result_url, "avatar video created");
        Ok(talk.result_url)
    }

    fn create_heygen_talk(&self) -> Result<String> {
        if self.api_key.is_none() {
            tracing::warn!("no HeyGen API key configured, using demo stream");
            return Ok(HEYGEN_DEMO_VIDEO_URL.to_string());
        }

        Err(Error::Avatar(
            "HeyGen API integration not implemented".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_avatar_image() {
        let client = AvatarClient::from_settings(&AvatarSettings {
            provider: AvatarProvider::Did,
            api_key: None,
            avatar_url: None,
            voice_id: None,
        });
        assert_eq!(client.avatar_image(), DEFAULT_AVATAR_URL);
    }

    #[tokio::test]
    async fn test_unconfigured_did_uses_demo_stream() {
        let client = AvatarClient::from_settings(&AvatarSettings {
            provider: AvatarProvider::Did,
            api_key: None,
            avatar_url: None,
            voice_id: None,
        });

        let url = client.create_talk("hello").await.unwrap();
        assert_eq!(url, DID_DEMO_VIDEO_URL);
    }

    #[tokio::test]
    async fn test_heygen_with_key_is_unimplemented() {
        let client = AvatarClient::from_settings(&AvatarSettings {
            provider: AvatarProvider::Heygen,
            api_key: Some("key".to_string()),
            avatar_url: None,
            voice_id: None,
        });

        assert!(client.create_talk("hello").await.is_err());
    }
}
