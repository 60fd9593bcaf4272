//! Recording-session resource set
//!
//! One recording session owns one `ResourceSet`: the microphone stream,
//! whichever capture strategy is live, and the background tasks serving it.
//! Teardown is total and idempotent: every step is guarded on its own so a
//! failure in one never prevents the rest, and resetting an already-empty
//! or half-initialized set is safe.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tokio::task::JoinHandle;

use super::capture::MicStream;
use super::recognition::RecognitionEngine;
use super::recorder::ChunkRecorder;

/// Releasable handles owned by one recording session
///
/// At most one of `engine` and `recorder` is populated at a time; the two
/// capture strategies are mutually exclusive.
#[derive(Default)]
pub struct ResourceSet {
    /// Live microphone stream
    pub stream: Option<Arc<dyn MicStream>>,

    /// Continuous recognition engine, when supported
    pub engine: Option<Box<dyn RecognitionEngine>>,

    /// Chunked fallback recorder, when the engine is unsupported
    pub recorder: Option<ChunkRecorder>,

    /// Level-meter tick task
    pub meter_task: Option<JoinHandle<()>>,

    /// Engine event pump task
    pub event_pump: Option<JoinHandle<()>>,

    /// Pending delayed-restart task
    pub restart_timer: Option<JoinHandle<()>>,
}

impl ResourceSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether every handle has been released
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.stream.is_none()
            && self.engine.is_none()
            && self.recorder.is_none()
            && self.meter_task.is_none()
            && self.event_pump.is_none()
            && self.restart_timer.is_none()
    }

    /// Cancel the pending restart task, if any
    pub fn cancel_restart_timer(&mut self) {
        if let Some(timer) = self.restart_timer.take() {
            timer.abort();
        }
    }

    /// Release every handle, in order, each step guarded
    ///
    /// `audio_cleanup` runs last, after the stream stops. Failures are
    /// logged and swallowed; the set is left fully empty regardless.
    pub fn reset(&mut self, audio_cleanup: impl FnOnce()) {
        if let Some(meter) = self.meter_task.take() {
            meter.abort();
        }

        self.cancel_restart_timer();

        if let Some(pump) = self.event_pump.take() {
            pump.abort();
        }

        if let Some(mut engine) = self.engine.take() {
            if let Err(e) = catch_unwind(AssertUnwindSafe(move || engine.abort())) {
                tracing::warn!(?e, "recognition engine abort failed");
            }
        }

        if let Some(mut recorder) = self.recorder.take() {
            if recorder.is_recording() {
                if let Err(e) = catch_unwind(AssertUnwindSafe(move || recorder.stop())) {
                    tracing::warn!(?e, "fallback recorder stop failed");
                }
            }
        }

        if let Some(stream) = self.stream.take() {
            if let Err(e) = catch_unwind(AssertUnwindSafe(move || stream.stop())) {
                tracing::warn!(?e, "microphone stream stop failed");
            }
        }

        if let Err(e) = catch_unwind(AssertUnwindSafe(audio_cleanup)) {
            tracing::warn!(?e, "audio cleanup failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_empty_set() {
        let mut set = ResourceSet::new();
        set.reset(|| {});
        assert!(set.is_empty());
    }

    #[test]
    fn test_reset_twice() {
        let mut set = ResourceSet::new();
        set.reset(|| {});
        set.reset(|| {});
        assert!(set.is_empty());
    }

    #[test]
    fn test_audio_cleanup_panic_is_swallowed() {
        let mut set = ResourceSet::new();
        set.reset(|| panic!("cleanup failure"));
        assert!(set.is_empty());
    }
}
