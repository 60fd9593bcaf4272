//! HTTP streaming recognition engine
//!
//! Continuous recognition built from an energy endpointer plus the remote
//! STT client: while a speech segment is open it emits interim transcripts
//! of the partial segment, and at the trailing-silence endpoint it emits
//! the final transcript. Transport failures and prolonged silence surface
//! as native-style engine errors so the session's restart policy applies
//! uniformly.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

use super::capture::{samples_to_wav, MicStream};
use super::recognition::{
    EngineErrorKind, EngineEvent, EngineOptions, EngineProvider, RecognitionEngine,
    RecognizedSegment,
};
use super::stt::SpeechToText;
use crate::{Error, Result};

/// Minimum audio energy to consider speech
const ENERGY_THRESHOLD: f32 = 0.03;

/// Minimum speech per segment before transcribing (0.3s at 16kHz)
const MIN_SPEECH_SAMPLES: usize = 4800;

/// Trailing silence that ends a segment (0.5s at 16kHz)
const ENDPOINT_SILENCE_SAMPLES: usize = 8000;

/// How often an open segment is re-transcribed for interim results
const INTERIM_INTERVAL: Duration = Duration::from_millis(1200);

/// Continuous silence after which the engine gives up
const NO_SPEECH_TIMEOUT: Duration = Duration::from_secs(12);

/// Audio poll cadence
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Engine provider backed by a remote STT service
pub struct HttpEngineProvider {
    stt: Arc<SpeechToText>,
}

impl HttpEngineProvider {
    #[must_use]
    pub const fn new(stt: Arc<SpeechToText>) -> Self {
        Self { stt }
    }
}

impl EngineProvider for HttpEngineProvider {
    fn create(
        &self,
        stream: Arc<dyn MicStream>,
        options: &EngineOptions,
        events: UnboundedSender<EngineEvent>,
    ) -> Option<Box<dyn RecognitionEngine>> {
        Some(Box::new(HttpStreamEngine {
            stream,
            stt: Arc::clone(&self.stt),
            options: options.clone(),
            events: Some(events),
            task: None,
        }))
    }
}

/// A single recognition run over the microphone feed
pub struct HttpStreamEngine {
    stream: Arc<dyn MicStream>,
    stt: Arc<SpeechToText>,
    options: EngineOptions,
    events: Option<UnboundedSender<EngineEvent>>,
    task: Option<JoinHandle<()>>,
}

impl RecognitionEngine for HttpStreamEngine {
    fn start(&mut self) -> Result<()> {
        if self.task.is_some() {
            return Err(Error::Recognition("engine already started".to_string()));
        }

        let events = self
            .events
            .take()
            .ok_or_else(|| Error::Recognition("engine cannot be restarted".to_string()))?;

        let stream = Arc::clone(&self.stream);
        let stt = Arc::clone(&self.stt);
        let options = self.options.clone();

        self.task = Some(tokio::spawn(async move {
            run_stream(stream, stt, options, events).await;
        }));

        tracing::debug!("recognition engine started");
        Ok(())
    }

    fn abort(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            tracing::debug!("recognition engine aborted");
        }
    }
}

impl Drop for HttpStreamEngine {
    fn drop(&mut self) {
        self.abort();
    }
}

/// Segment accumulator state
struct Segmenter {
    buffer: Vec<f32>,
    in_speech: bool,
    silence_samples: usize,
}

impl Segmenter {
    const fn new() -> Self {
        Self {
            buffer: Vec::new(),
            in_speech: false,
            silence_samples: 0,
        }
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.in_speech = false;
        self.silence_samples = 0;
    }

    /// Feed a chunk; returns true when the segment endpoint is reached
    fn push(&mut self, chunk: &[f32]) -> bool {
        let speech = energy(chunk) > ENERGY_THRESHOLD;

        if !self.in_speech {
            if speech {
                self.in_speech = true;
                self.buffer.extend_from_slice(chunk);
                self.silence_samples = 0;
            }
            return false;
        }

        self.buffer.extend_from_slice(chunk);
        if speech {
            self.silence_samples = 0;
        } else {
            self.silence_samples += chunk.len();
        }

        self.silence_samples > ENDPOINT_SILENCE_SAMPLES && self.buffer.len() > MIN_SPEECH_SAMPLES
    }
}

#[allow(clippy::too_many_lines)]
async fn run_stream(
    stream: Arc<dyn MicStream>,
    stt: Arc<SpeechToText>,
    options: EngineOptions,
    events: UnboundedSender<EngineEvent>,
) {
    if events.send(EngineEvent::Started).is_err() {
        return;
    }

    let mut segmenter = Segmenter::new();
    let mut interval = tokio::time::interval(POLL_INTERVAL);
    let mut last_interim = tokio::time::Instant::now();
    let mut last_speech = tokio::time::Instant::now();

    loop {
        interval.tick().await;

        if stream.is_stopped() {
            let _ = events.send(EngineEvent::End);
            return;
        }

        let chunk = stream.take_samples();
        if chunk.is_empty() {
            continue;
        }

        let endpoint = segmenter.push(&chunk);

        if segmenter.in_speech {
            last_speech = tokio::time::Instant::now();
        } else if last_speech.elapsed() > NO_SPEECH_TIMEOUT {
            let _ = events.send(EngineEvent::Error {
                kind: EngineErrorKind::NoSpeech,
                message: "no speech detected".to_string(),
            });
            let _ = events.send(EngineEvent::End);
            return;
        }

        if endpoint {
            let samples = std::mem::take(&mut segmenter.buffer);
            segmenter.reset();

            match transcribe(&stt, &samples, stream.sample_rate()).await {
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
                    tracing::warn!(error = %e, "segment transcription failed");
                    let _ = events.send(EngineEvent::Error {
                        kind: EngineErrorKind::Network,
                        message: e.to_string(),
                    });
                    let _ = events.send(EngineEvent::End);
                    return;
                }
            }

            if !options.continuous {
                let _ = events.send(EngineEvent::End);
                return;
            }
        } else if options.interim_results
            && segmenter.in_speech
            && segmenter.buffer.len() > MIN_SPEECH_SAMPLES
            && last_interim.elapsed() >= INTERIM_INTERVAL
        {
            last_interim = tokio::time::Instant::now();

            match transcribe(&stt, &segmenter.buffer, stream.sample_rate()).await {
                Ok(text) if !text.trim().is_empty() => {
                    let sent = events.send(EngineEvent::Result {
                        start_index: 0,
                        segments: vec![RecognizedSegment {
                            text,
                            is_final: false,
                        }],
                    });
                    if sent.is_err() {
                        return;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "interim transcription failed");
                    let _ = events.send(EngineEvent::Error {
                        kind: EngineErrorKind::Network,
                        message: e.to_string(),
                    });
                    let _ = events.send(EngineEvent::End);
                    return;
                }
            }
        }
    }
}

async fn transcribe(stt: &SpeechToText, samples: &[f32], sample_rate: u32) -> Result<String> {
    let wav = samples_to_wav(samples, sample_rate)?;
    stt.transcribe(&wav).await
}

/// RMS energy of audio samples
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

    #[test]
    fn test_energy() {
        let silence = vec![0.0f32; 100];
        assert!(energy(&silence) < 0.001);

        let loud = vec![0.5f32; 100];
        assert!(energy(&loud) > 0.4);
    }

    #[test]
    fn test_segmenter_endpoint() {
        let mut seg = Segmenter::new();

        // Half a second of tone, then just over the endpoint of silence
        let speech = vec![0.5f32; 8000];
        assert!(!seg.push(&speech));
        assert!(seg.in_speech);

        let silence = vec![0.0f32; 8100];
        assert!(seg.push(&silence));
    }

    #[test]
    fn test_segmenter_ignores_leading_silence() {
        let mut seg = Segmenter::new();

        let silence = vec![0.0f32; 16000];
        assert!(!seg.push(&silence));
        assert!(!seg.in_speech);
        assert!(seg.buffer.is_empty());
    }

    #[test]
    fn test_segmenter_short_blip_is_not_endpoint() {
        let mut seg = Segmenter::new();

        // Too little speech to count as a segment
        let blip = vec![0.5f32; 800];
        seg.push(&blip);
        let silence = vec![0.0f32; 8100];
        assert!(!seg.push(&silence));
    }
}
