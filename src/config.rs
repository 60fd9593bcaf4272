//! Configuration management for Voxlet
//!
//! Settings persist as TOML in the platform config directory. Absence of a
//! config file is not an error; the `setup` subcommand creates one.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Voxlet configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Conversation backend webhook
    pub webhook: WebhookSettings,

    /// Speech synthesis settings
    #[serde(default)]
    pub tts: TtsSettings,

    /// Avatar video settings; absent disables video generation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<AvatarSettings>,

    /// Greeting spoken when the assistant starts
    #[serde(default = "default_greeting")]
    pub greeting: String,

    /// Recognition policy tunables
    #[serde(default)]
    pub tuning: Tuning,
}

/// Conversation backend webhook settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookSettings {
    /// Webhook endpoint URL
    pub url: String,

    /// Optional bearer token sent with each request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Webhook interaction mode
    #[serde(default)]
    pub mode: WebhookMode,
}

/// Webhook interaction mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookMode {
    #[default]
    Standard,
    Popup,
}

impl WebhookMode {
    /// Wire name used in the webhook payload
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Popup => "popup",
        }
    }
}

/// Speech synthesis settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsSettings {
    /// Synthesis provider
    #[serde(default)]
    pub provider: TtsProvider,

    /// Provider voice identifier
    #[serde(default = "default_tts_voice")]
    pub voice: String,

    /// Speech rate multiplier
    #[serde(default = "default_tts_speed")]
    pub speed: f32,

    /// Provider API key; absent means synthesis is muted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl Default for TtsSettings {
    fn default() -> Self {
        Self {
            provider: TtsProvider::default(),
            voice: default_tts_voice(),
            speed: default_tts_speed(),
            api_key: None,
        }
    }
}

/// Speech synthesis provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TtsProvider {
    #[default]
    OpenAI,
    ElevenLabs,
}

/// Avatar video settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvatarSettings {
    /// Video provider
    #[serde(default)]
    pub provider: AvatarProvider,

    /// Provider API key; absent uses the provider's demo stream
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Source image for the talking avatar
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,

    /// Provider voice identifier for the avatar's speech
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice_id: Option<String>,
}

/// Avatar video provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AvatarProvider {
    #[default]
    Did,
    Heygen,
}

/// Recognition and interruption policy tunables
///
/// The defaults match observed engine behavior; the end-of-session restart
/// delay must stay shorter than the error-restart delay so transient engine
/// hiccups are retried ahead of real errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tuning {
    /// Delay before restarting after a recoverable engine error (ms)
    #[serde(default = "default_error_restart_ms")]
    pub error_restart_ms: u64,

    /// Delay before restarting after the engine ends on its own (ms)
    #[serde(default = "default_end_restart_ms")]
    pub end_restart_ms: u64,

    /// Restart delay when the end triggers a full resource rebuild (ms)
    #[serde(default = "default_full_reset_restart_ms")]
    pub full_reset_restart_ms: u64,

    /// Consecutive engine restarts before a full resource rebuild
    #[serde(default = "default_cycle_reset_threshold")]
    pub cycle_reset_threshold: u32,

    /// Window after user speech during which replies stay silent (ms)
    #[serde(default = "default_interrupt_debounce_ms")]
    pub interrupt_debounce_ms: u64,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            error_restart_ms: default_error_restart_ms(),
            end_restart_ms: default_end_restart_ms(),
            full_reset_restart_ms: default_full_reset_restart_ms(),
            cycle_reset_threshold: default_cycle_reset_threshold(),
            interrupt_debounce_ms: default_interrupt_debounce_ms(),
        }
    }
}

impl Tuning {
    /// Delay before restarting after a recoverable engine error
    #[must_use]
    pub const fn error_restart(&self) -> Duration {
        Duration::from_millis(self.error_restart_ms)
    }

    /// Delay before restarting after the engine ends on its own
    #[must_use]
    pub const fn end_restart(&self) -> Duration {
        Duration::from_millis(self.end_restart_ms)
    }

    /// Restart delay when the end triggers a full resource rebuild
    #[must_use]
    pub const fn full_reset_restart(&self) -> Duration {
        Duration::from_millis(self.full_reset_restart_ms)
    }

    /// Window after user speech during which replies stay silent
    #[must_use]
    pub const fn interrupt_debounce(&self) -> Duration {
        Duration::from_millis(self.interrupt_debounce_ms)
    }
}

const fn default_error_restart_ms() -> u64 {
    1000
}

const fn default_end_restart_ms() -> u64 {
    300
}

const fn default_full_reset_restart_ms() -> u64 {
    500
}

const fn default_cycle_reset_threshold() -> u32 {
    4
}

const fn default_interrupt_debounce_ms() -> u64 {
    500
}

fn default_greeting() -> String {
    "Hello! I am your voice assistant. How may I help you today?".to_string()
}

fn default_tts_voice() -> String {
    "alloy".to_string()
}

const fn default_tts_speed() -> f32 {
    1.0
}

impl Config {
    /// Path of the config file
    ///
    /// `VOXLET_CONFIG` overrides the platform default
    /// (`~/.config/voxlet/config.toml` on Linux).
    #[must_use]
    pub fn path() -> PathBuf {
        if let Ok(path) = std::env::var("VOXLET_CONFIG") {
            return PathBuf::from(path);
        }

        directories::ProjectDirs::from("dev", "voxlet", "voxlet").map_or_else(
            || PathBuf::from("voxlet.toml"),
            |d| d.config_dir().join("config.toml"),
        )
    }

    /// Load the configuration, returning `None` when no file exists yet
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed
    pub fn load() -> Result<Option<Self>> {
        Self::load_from(&Self::path())
    }

    /// Load the configuration from an explicit path
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed
    pub fn load_from(path: &std::path::Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;

        if config.webhook.url.trim().is_empty() {
            return Err(Error::Config("webhook.url must not be empty".to_string()));
        }
        url::Url::parse(&config.webhook.url)
            .map_err(|e| Error::Config(format!("invalid webhook.url: {e}")))?;

        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(Some(config))
    }

    /// Persist the configuration
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be written
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::path())
    }

    /// Persist the configuration to an explicit path
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be written
    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        tracing::info!(path = %path.display(), "configuration saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> Config {
        Config {
            webhook: WebhookSettings {
                url: "https://automation.example.com/webhook/voice".to_string(),
                api_key: Some("secret-token".to_string()),
                mode: WebhookMode::Standard,
            },
            tts: TtsSettings::default(),
            avatar: Some(AvatarSettings {
                provider: AvatarProvider::Did,
                api_key: None,
                avatar_url: None,
                voice_id: None,
            }),
            greeting: default_greeting(),
            tuning: Tuning::default(),
        }
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let config = sample_config();
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap().expect("config present");
        assert_eq!(loaded.webhook.url, config.webhook.url);
        assert_eq!(loaded.webhook.api_key, config.webhook.api_key);
        assert_eq!(loaded.tuning.cycle_reset_threshold, 4);
        assert_eq!(loaded.tuning.error_restart_ms, 1000);
    }

    #[test]
    fn test_load_absent_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = Config::load_from(&dir.path().join("missing.toml")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_load_rejects_invalid_url() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[webhook]\nurl = \"not a url\"\n").unwrap();

        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn test_tuning_defaults() {
        let tuning = Tuning::default();
        assert!(tuning.end_restart() < tuning.error_restart());
        assert_eq!(tuning.interrupt_debounce(), Duration::from_millis(500));
    }
}
