//! Speech output
//!
//! [`SpeechOutput`] coordinates synthesized speech so the rest of the
//! system can ask whether the assistant is talking right now and cancel
//! it mid-sentence when the user barges in. The synthesizer
//! itself is a capability trait; the HTTP implementation covers OpenAI and
//! ElevenLabs and plays the returned audio through the speaker.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tokio::task::JoinHandle;

use crate::config::{TtsProvider, TtsSettings};
use crate::voice::playback;
use crate::{Error, Result};

/// Synthesizes and renders speech
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Speak `text`, returning once the speech has finished
    ///
    /// # Errors
    ///
    /// Returns error if synthesis or playback fails
    async fn speak(&self, text: &str, rate: f32) -> Result<()>;

    /// Cancel in-flight speech; safe when nothing is speaking
    fn cancel(&self);
}

struct SpeechShared {
    synth: Arc<dyn Synthesizer>,
    rate: f32,
    speaking: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Tracks and controls the assistant's voice
#[derive(Clone)]
pub struct SpeechOutput {
    inner: Arc<SpeechShared>,
}

impl SpeechOutput {
    #[must_use]
    pub fn new(synth: Arc<dyn Synthesizer>, rate: f32) -> Self {
        Self {
            inner: Arc::new(SpeechShared {
                synth,
                rate,
                speaking: AtomicBool::new(false),
                task: Mutex::new(None),
            }),
        }
    }

    /// Whether synthesized speech is currently playing
    #[must_use]
    pub fn is_speaking(&self) -> bool {
        self.inner.speaking.load(Ordering::SeqCst)
    }

    /// Begin speaking `text`; no-op on empty or whitespace-only text
    ///
    /// Returns immediately; the speaking flag clears when synthesis
    /// completion is signaled.
    pub fn speak(&self, text: &str) {
        if text.trim().is_empty() {
            return;
        }

        let inner = Arc::clone(&self.inner);
        inner.speaking.store(true, Ordering::SeqCst);

        let text = text.to_string();
        let task_inner = Arc::clone(&inner);
        let handle = tokio::spawn(async move {
            if let Err(e) = task_inner.synth.speak(&text, task_inner.rate).await {
                tracing::warn!(error = %e, "speech synthesis failed");
            }
            task_inner.speaking.store(false, Ordering::SeqCst);
        });

        if let Ok(mut task) = inner.task.lock() {
            if let Some(previous) = task.replace(handle) {
                previous.abort();
            }
        }
    }

    /// Cancel any in-flight speech immediately
    ///
    /// Safe to call when nothing is speaking.
    pub fn stop(&self) {
        self.inner.synth.cancel();

        if let Ok(mut task) = self.inner.task.lock() {
            if let Some(handle) = task.take() {
                handle.abort();
            }
        }

        self.inner.speaking.store(false, Ordering::SeqCst);
    }
}

/// HTTP text-to-speech backed by OpenAI or ElevenLabs
pub struct TextToSpeech {
    client: reqwest::Client,
    api_key: SecretString,
    voice: String,
    model: String,
    provider: TtsProvider,
    cancel: Arc<AtomicBool>,
}

impl TextToSpeech {
    /// Create a TTS client from settings
    ///
    /// # Errors
    ///
    /// Returns error if the API key is missing
    pub fn from_settings(settings: &TtsSettings) -> Result<Self> {
        let api_key = settings
            .api_key
            .as_ref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| Error::Config("TTS API key required".to_string()))?;

        let model = match settings.provider {
            TtsProvider::OpenAI => "tts-1".to_string(),
            TtsProvider::ElevenLabs => "eleven_monolingual_v1".to_string(),
        };

        Ok(Self {
            client: reqwest::Client::new(),
            api_key: api_key.clone().into(),
            voice: settings.voice.clone(),
            model,
            provider: settings.provider,
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    async fn synthesize(&self, text: &str, rate: f32) -> Result<Vec<u8>> {
        match self.provider {
            TtsProvider::OpenAI => self.synthesize_openai(text, rate).await,
            TtsProvider::ElevenLabs => self.synthesize_elevenlabs(text).await,
        }
    }

    async fn synthesize_openai(&self, text: &str, rate: f32) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct TtsRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
            speed: f32,
        }

        let request = TtsRequest {
            model: &self.model,
            input: text,
            voice: &self.voice,
            speed: rate,
        };

        let response = self
            .client
            .post("https://api.openai.com/v1/audio/speech")
            .header(
                "Authorization",
                format!("Bearer {}", self.api_key.expose_secret()),
            )
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("OpenAI TTS error {status}: {body}")));
        }

        Ok(response.bytes().await?.to_vec())
    }

    async fn synthesize_elevenlabs(&self, text: &str) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct ElevenLabsRequest<'a> {
            text: &'a str,
            model_id: &'a str,
        }

        let url = format!("https://api.elevenlabs.io/v1/text-to-speech/{}", self.voice);
        let request = ElevenLabsRequest {
            text,
            model_id: &self.model,
        };

        let response = self
            .client
            .post(&url)
            .header("xi-api-key", self.api_key.expose_secret())
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("ElevenLabs TTS error {status}: {body}")));
        }

        Ok(response.bytes().await?.to_vec())
    }
}

#[async_trait]
impl Synthesizer for TextToSpeech {
    async fn speak(&self, text: &str, rate: f32) -> Result<()> {
        self.cancel.store(false, Ordering::SeqCst);

        let audio = self.synthesize(text, rate).await?;
        if self.cancel.load(Ordering::SeqCst) {
            return Ok(());
        }

        let cancel = Arc::clone(&self.cancel);
        tokio::task::spawn_blocking(move || playback::play_mp3(&audio, &cancel))
            .await
            .map_err(|e| Error::Tts(e.to_string()))??;

        Ok(())
    }

    fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }
}

/// Synthesizer for hosts with no TTS configured: logs and completes
pub struct MuteSynthesizer;

#[async_trait]
impl Synthesizer for MuteSynthesizer {
    async fn speak(&self, text: &str, _rate: f32) -> Result<()> {
        tracing::info!(text = %text, "speech output muted (no TTS configured)");
        Ok(())
    }

    fn cancel(&self) {}
}
