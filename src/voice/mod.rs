//! Voice processing module
//!
//! Microphone capture, the audio-energy analyzer, continuous recognition
//! (with its chunked fallback), and the recording-session state machine
//! that ties them together.

pub mod analyzer;
pub mod capture;
pub mod engine;
pub mod playback;
pub mod recognition;
pub mod recorder;
pub mod resources;
pub mod session;
pub mod stt;

pub use analyzer::AudioAnalyzer;
pub use capture::{samples_to_wav, CpalMicrophone, MicStream, Microphone, SAMPLE_RATE};
pub use recognition::{EngineErrorKind, EngineEvent, EngineOptions, TranscriptResult};
pub use resources::ResourceSet;
pub use session::{RecordingSession, SessionBuilder, SessionState};
