//! Continuous speech recognition interface
//!
//! The engine is a narrow capability: configured once, started, aborted,
//! with everything else delivered as events over a channel. A production
//! engine, the chunked-recorder fallback, and test doubles all speak this
//! interface, so the session's restart policy never cares which is live.

use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;

use super::capture::MicStream;
use crate::Result;

/// Default recognition language tag
pub const DEFAULT_LANGUAGE: &str = "en-US";

/// A recognized transcript fragment delivered to the application
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptResult {
    /// Recognized text
    pub text: String,
    /// Whether the engine will not revise this text further
    pub is_final: bool,
}

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Keep recognizing across utterances instead of stopping after one
    pub continuous: bool,
    /// Deliver provisional results while an utterance is in progress
    pub interim_results: bool,
    /// Recognition language tag
    pub language: String,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            continuous: true,
            interim_results: true,
            language: DEFAULT_LANGUAGE.to_string(),
        }
    }
}

/// One alternative in a native result batch
#[derive(Debug, Clone)]
pub struct RecognizedSegment {
    /// Transcript text of this segment
    pub text: String,
    /// Whether the engine marked this segment final
    pub is_final: bool,
}

/// Native engine events
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// The engine began listening
    Started,
    /// A result batch; `start_index` points at the first changed segment
    Result {
        start_index: usize,
        segments: Vec<RecognizedSegment>,
    },
    /// The engine reported an error
    Error { kind: EngineErrorKind, message: String },
    /// The engine stopped, possibly on its own
    End,
}

/// Classified engine error kinds
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineErrorKind {
    /// No speech was detected within the engine's window
    NoSpeech,
    /// The engine lost its audio input
    AudioCapture,
    /// A transport failure while recognizing
    Network,
    /// The host refused recognition
    NotAllowed,
    /// The engine was aborted by the application
    Aborted,
    /// Anything else, carrying the native code
    Other(String),
}

impl EngineErrorKind {
    /// Whether the session should restart the engine after this error
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::NoSpeech | Self::AudioCapture | Self::Network)
    }

    /// Parse a native error code
    #[must_use]
    pub fn from_code(code: &str) -> Self {
        match code {
            "no-speech" => Self::NoSpeech,
            "audio-capture" => Self::AudioCapture,
            "network" => Self::Network,
            "not-allowed" | "service-not-allowed" => Self::NotAllowed,
            "aborted" => Self::Aborted,
            other => Self::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for EngineErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoSpeech => write!(f, "no-speech"),
            Self::AudioCapture => write!(f, "audio-capture"),
            Self::Network => write!(f, "network"),
            Self::NotAllowed => write!(f, "not-allowed"),
            Self::Aborted => write!(f, "aborted"),
            Self::Other(code) => write!(f, "{code}"),
        }
    }
}

/// A classified error surfaced to the application
#[derive(Debug, Clone)]
pub struct ErrorInfo {
    /// Classified kind
    pub kind: EngineErrorKind,
    /// Human-readable message
    pub message: String,
}

/// A running continuous recognition engine
pub trait RecognitionEngine: Send {
    /// Begin recognizing; events flow to the sender given at creation
    ///
    /// # Errors
    ///
    /// Returns error if the engine cannot start
    fn start(&mut self) -> Result<()>;

    /// Abort recognition immediately; tolerates an already-stopped engine
    fn abort(&mut self);
}

/// Builds engines for hosts that support continuous recognition
pub trait EngineProvider: Send + Sync {
    /// Create an engine reading from `stream`, or `None` when continuous
    /// recognition is unsupported on this host
    fn create(
        &self,
        stream: Arc<dyn MicStream>,
        options: &EngineOptions,
        events: UnboundedSender<EngineEvent>,
    ) -> Option<Box<dyn RecognitionEngine>>;
}

/// Provider for hosts with no continuous recognition capability
pub struct UnsupportedEngineProvider;

impl EngineProvider for UnsupportedEngineProvider {
    fn create(
        &self,
        _stream: Arc<dyn MicStream>,
        _options: &EngineOptions,
        _events: UnboundedSender<EngineEvent>,
    ) -> Option<Box<dyn RecognitionEngine>> {
        None
    }
}

/// Translate a native result batch into transcript events
///
/// Walks the batch from its start index, emitting one event per segment:
/// interim fragments as provisional transcripts, final segments as
/// transcripts the engine will not revise. Nothing is accumulated across
/// batches.
pub fn translate_results(
    start_index: usize,
    segments: &[RecognizedSegment],
    mut emit: impl FnMut(TranscriptResult),
) {
    for segment in segments.iter().skip(start_index) {
        emit(TranscriptResult {
            text: segment.text.clone(),
            is_final: segment.is_final,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(EngineErrorKind::from_code("no-speech").is_recoverable());
        assert!(EngineErrorKind::from_code("audio-capture").is_recoverable());
        assert!(EngineErrorKind::from_code("network").is_recoverable());

        assert!(!EngineErrorKind::from_code("not-allowed").is_recoverable());
        assert!(!EngineErrorKind::from_code("aborted").is_recoverable());
        assert!(!EngineErrorKind::from_code("bad-grammar").is_recoverable());

        assert_eq!(
            EngineErrorKind::from_code("bad-grammar"),
            EngineErrorKind::Other("bad-grammar".to_string())
        );
    }

    #[test]
    fn test_translate_emits_in_order() {
        let segments = vec![
            RecognizedSegment {
                text: "turn on".to_string(),
                is_final: false,
            },
            RecognizedSegment {
                text: "turn on the lights".to_string(),
                is_final: true,
            },
        ];

        let mut out = Vec::new();
        translate_results(0, &segments, |r| out.push(r));

        assert_eq!(out.len(), 2);
        assert!(!out[0].is_final);
        assert_eq!(out[0].text, "turn on");
        assert!(out[1].is_final);
        assert_eq!(out[1].text, "turn on the lights");
    }

    #[test]
    fn test_translate_respects_start_index() {
        let segments = vec![
            RecognizedSegment {
                text: "already delivered".to_string(),
                is_final: true,
            },
            RecognizedSegment {
                text: "new words".to_string(),
                is_final: false,
            },
        ];

        let mut out = Vec::new();
        translate_results(1, &segments, |r| out.push(r));

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].text, "new words");
    }

    #[test]
    fn test_translate_past_end_is_empty() {
        let mut out = Vec::new();
        translate_results(5, &[], |r| out.push(r));
        assert!(out.is_empty());
    }
}
