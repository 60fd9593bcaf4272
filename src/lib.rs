//! Voxlet - voice-driven conversational assistant front-end
//!
//! This library provides the core functionality for Voxlet:
//! - Microphone capture with a self-healing continuous recognition session
//! - Audio-energy metering for a visual level indicator
//! - Speech output with barge-in (user speech interrupts the assistant)
//! - Conversation orchestration against an HTTP webhook backend
//! - Optional talking-avatar video generation
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                   Microphone                         │
//! └──────────┬──────────────────────────┬───────────────┘
//!            │                          │
//! ┌──────────▼──────────┐   ┌───────────▼───────────────┐
//! │   Audio Analyzer    │   │   Recognition Session      │
//! │   (level meter)     │   │   continuous │ chunked     │
//! └─────────────────────┘   └───────────┬───────────────┘
//!                                       │ transcripts
//! ┌─────────────────────────────────────▼───────────────┐
//! │              Conversation Orchestrator               │
//! │   webhook backend │ speech output │ avatar video    │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod avatar;
pub mod config;
pub mod conversation;
pub mod error;
pub mod speech;
pub mod voice;
pub mod webhook;

pub use config::Config;
pub use conversation::{Conversation, Message, Sender};
pub use error::{Error, Result};
pub use speech::{SpeechOutput, Synthesizer};
pub use voice::recognition::{EngineErrorKind, TranscriptResult};
pub use voice::session::{RecordingSession, SessionBuilder, SessionState};
