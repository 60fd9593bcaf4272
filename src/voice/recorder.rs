//! Chunked-recorder fallback
//!
//! Used when no continuous recognition engine is available on the host.
//! Audio is sliced into fixed chunks; every audible chunk boundary yields
//! one final transcript. With an STT client the chunk is genuinely
//! transcribed; without one a fixed phrase rotation stands in (offline
//! development mode).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::seq::SliceRandom;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

use super::capture::{samples_to_wav, MicStream};
use super::recognition::{EngineErrorKind, EngineEvent, RecognizedSegment};
use super::stt::SpeechToText;
use crate::Result;

/// Chunk slicing interval
pub const CHUNK_INTERVAL: Duration = Duration::from_millis(1000);

/// RMS energy below which a chunk is considered silent
const SILENT_CHUNK_THRESHOLD: f32 = 0.01;

/// Phrases used by the offline transcriber rotation
const OFFLINE_PHRASES: &[&str] = &[
    "Hello, how can I help you today?",
    "I'd like more information please.",
    "Can you tell me more about this service?",
    "What are the next steps?",
    "Thank you for your assistance.",
];

/// Turns one recorded chunk into text
#[async_trait]
pub trait ChunkTranscriber: Send + Sync {
    /// Transcribe a WAV-encoded chunk
    ///
    /// # Errors
    ///
    /// Returns error if transcription fails
    async fn transcribe_chunk(&self, wav: Vec<u8>) -> Result<String>;
}

/// Chunk transcriber backed by the remote STT client
pub struct SttChunkTranscriber {
    stt: Arc<SpeechToText>,
}

impl SttChunkTranscriber {
    #[must_use]
    pub const fn new(stt: Arc<SpeechToText>) -> Self {
        Self { stt }
    }
}

#[async_trait]
impl ChunkTranscriber for SttChunkTranscriber {
    async fn transcribe_chunk(&self, wav: Vec<u8>) -> Result<String> {
        self.stt.transcribe(&wav).await
    }
}

/// Offline transcriber rotating through fixed phrases
pub struct PhraseRotation;

#[async_trait]
impl ChunkTranscriber for PhraseRotation {
    async fn transcribe_chunk(&self, _wav: Vec<u8>) -> Result<String> {
        let phrase = OFFLINE_PHRASES
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or(OFFLINE_PHRASES[0]);
        Ok(phrase.to_string())
    }
}

/// Records fixed-size chunks from the microphone feed
pub struct ChunkRecorder {
    stream: Arc<dyn MicStream>,
    transcriber: Arc<dyn ChunkTranscriber>,
    events: UnboundedSender<EngineEvent>,
    task: Option<JoinHandle<()>>,
}

impl ChunkRecorder {
    #[must_use]
    pub fn new(
        stream: Arc<dyn MicStream>,
        transcriber: Arc<dyn ChunkTranscriber>,
        events: UnboundedSender<EngineEvent>,
    ) -> Self {
        Self {
            stream,
            transcriber,
            events,
            task: None,
        }
    }

    /// Begin slicing chunks; no-op when already recording
    pub fn start(&mut self) {
        if self.task.is_some() {
            return;
        }

        let stream = Arc::clone(&self.stream);
        let transcriber = Arc::clone(&self.transcriber);
        let events = self.events.clone();

        self.task = Some(tokio::spawn(async move {
            run_chunks(stream, transcriber, events).await;
        }));

        tracing::debug!("chunked recorder started");
    }

    /// Stop recording; tolerates an already-inactive recorder
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            tracing::debug!("chunked recorder stopped");
        }
    }

    /// Whether the recorder is currently slicing chunks
    #[must_use]
    pub const fn is_recording(&self) -> bool {
        self.task.is_some()
    }
}

impl Drop for ChunkRecorder {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_chunks(
    stream: Arc<dyn MicStream>,
    transcriber: Arc<dyn ChunkTranscriber>,
    events: UnboundedSender<EngineEvent>,
) {
    if events.send(EngineEvent::Started).is_err() {
        return;
    }

    let mut interval = tokio::time::interval(CHUNK_INTERVAL);
    interval.tick().await;

    loop {
        interval.tick().await;

        if stream.is_stopped() {
            let _ = events.send(EngineEvent::End);
            return;
        }

        let chunk = stream.take_samples();
        if chunk.is_empty() || energy(&chunk) < SILENT_CHUNK_THRESHOLD {
            continue;
        }

        let wav = match samples_to_wav(&chunk, stream.sample_rate()) {
            Ok(wav) => wav,
            Err(e) => {
                tracing::warn!(error = %e, "chunk encoding failed");
                continue;
            }
        };

        match transcriber.transcribe_chunk(wav).await {
            Ok(text) if !text.trim().is_empty() => {
                let sent = events.send(EngineEvent::Result {
                    start_index: 0,
                    segments: vec![RecognizedSegment {
                        text,
                        is_final: true,
                    }],
                });
                if sent.is_err() {
                    return;
                }
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "chunk transcription failed");
                let _ = events.send(EngineEvent::Error {
                    kind: EngineErrorKind::Network,
                    message: e.to_string(),
                });
            }
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_phrase_rotation_yields_known_phrase() {
        let rotation = PhraseRotation;
        let text = rotation.transcribe_chunk(Vec::new()).await.unwrap();
        assert!(OFFLINE_PHRASES.contains(&text.as_str()));
    }

    #[test]
    fn test_silent_chunk_energy() {
        assert!(energy(&[0.0; 1600]) < SILENT_CHUNK_THRESHOLD);
        assert!(energy(&[0.3; 1600]) > SILENT_CHUNK_THRESHOLD);
    }
}
