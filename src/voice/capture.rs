//! Microphone capture
//!
//! Capture is modeled as a capability: [`Microphone`] grants access (the
//! point where the host may deny permission) and yields a [`MicStream`]
//! that recognition and metering read from. The cpal-backed implementation
//! keeps the device stream on a dedicated thread because cpal streams are
//! not `Send`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleRate;

use crate::{Error, Result};

/// Sample rate for audio capture (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// Upper bound on buffered samples awaiting a consumer (30s at 16kHz)
const MAX_BUFFERED_SAMPLES: usize = SAMPLE_RATE as usize * 30;

/// Samples retained for the level meter's sliding window
const METER_WINDOW_SAMPLES: usize = 4096;

/// Grants access to a live microphone stream
#[async_trait]
pub trait Microphone: Send + Sync {
    /// Open the microphone
    ///
    /// # Errors
    ///
    /// Returns [`Error::Microphone`] when access is denied or no input
    /// device is available
    async fn open(&self) -> Result<Arc<dyn MicStream>>;
}

/// A live microphone stream
///
/// Stopping is idempotent; reads after stop return empty data.
pub trait MicStream: Send + Sync {
    /// Sample rate of the captured audio
    fn sample_rate(&self) -> u32;

    /// Drain samples captured since the last call
    fn take_samples(&self) -> Vec<f32>;

    /// Copy of the most recent `len` samples, without draining
    fn latest_window(&self, len: usize) -> Vec<f32>;

    /// Stop capturing and release the device
    fn stop(&self);

    /// Whether the stream has been stopped
    fn is_stopped(&self) -> bool;
}

/// Default-host microphone backed by cpal
pub struct CpalMicrophone;

impl CpalMicrophone {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Default for CpalMicrophone {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Microphone for CpalMicrophone {
    async fn open(&self) -> Result<Arc<dyn MicStream>> {
        let (init_tx, init_rx) = std::sync::mpsc::channel::<Result<Arc<CpalStream>>>();

        std::thread::Builder::new()
            .name("voxlet-capture".to_string())
            .spawn(move || run_capture_thread(&init_tx))
            .map_err(|e| Error::Audio(format!("failed to spawn capture thread: {e}")))?;

        let stream = tokio::task::spawn_blocking(move || init_rx.recv())
            .await
            .map_err(|e| Error::Audio(e.to_string()))?
            .map_err(|_| Error::Microphone("capture thread exited during init".to_string()))??;

        Ok(stream)
    }
}

/// Shared state between the capture thread's callback and consumers
struct CpalStream {
    buffer: Mutex<Vec<f32>>,
    window: Mutex<Vec<f32>>,
    stopped: AtomicBool,
    stop_tx: Mutex<Option<std::sync::mpsc::Sender<()>>>,
}

impl CpalStream {
    fn new(stop_tx: std::sync::mpsc::Sender<()>) -> Self {
        Self {
            buffer: Mutex::new(Vec::new()),
            window: Mutex::new(Vec::new()),
            stopped: AtomicBool::new(false),
            stop_tx: Mutex::new(Some(stop_tx)),
        }
    }

    fn push(&self, data: &[f32]) {
        if let Ok(mut buf) = self.buffer.lock() {
            buf.extend_from_slice(data);
            if buf.len() > MAX_BUFFERED_SAMPLES {
                let excess = buf.len() - MAX_BUFFERED_SAMPLES;
                buf.drain(..excess);
            }
        }
        if let Ok(mut win) = self.window.lock() {
            win.extend_from_slice(data);
            if win.len() > METER_WINDOW_SAMPLES {
                let excess = win.len() - METER_WINDOW_SAMPLES;
                win.drain(..excess);
            }
        }
    }
}

impl MicStream for CpalStream {
    fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }

    fn take_samples(&self) -> Vec<f32> {
        if self.is_stopped() {
            return Vec::new();
        }
        self.buffer
            .lock()
            .map(|mut buf| std::mem::take(&mut *buf))
            .unwrap_or_default()
    }

    fn latest_window(&self, len: usize) -> Vec<f32> {
        if self.is_stopped() {
            return Vec::new();
        }
        self.window
            .lock()
            .map(|win| {
                let start = win.len().saturating_sub(len);
                win[start..].to_vec()
            })
            .unwrap_or_default()
    }

    fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Ok(mut tx) = self.stop_tx.lock() {
            if let Some(tx) = tx.take() {
                let _ = tx.send(());
            }
        }
        tracing::debug!("microphone stream stopped");
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// Own the cpal stream for its whole lifetime, then drop it on stop
fn run_capture_thread(init_tx: &std::sync::mpsc::Sender<Result<Arc<CpalStream>>>) {
    let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();
    let shared = Arc::new(CpalStream::new(stop_tx));

    let stream = match build_input_stream(&shared) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = init_tx.send(Err(e));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = init_tx.send(Err(Error::Audio(e.to_string())));
        return;
    }

    if init_tx.send(Ok(Arc::clone(&shared))).is_err() {
        return;
    }

    // Blocks until stop() fires or every consumer handle is gone
    let _ = stop_rx.recv();
    drop(stream);
    tracing::debug!("capture thread exiting");
}

fn build_input_stream(shared: &Arc<CpalStream>) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| Error::Microphone("no input device available".to_string()))?;

    let supported_config = device
        .supported_input_configs()
        .map_err(|e| Error::Microphone(e.to_string()))?
        .find(|c| {
            c.channels() == 1
                && c.min_sample_rate() <= SampleRate(SAMPLE_RATE)
                && c.max_sample_rate() >= SampleRate(SAMPLE_RATE)
        })
        .ok_or_else(|| Error::Microphone("no suitable input config found".to_string()))?;

    let config = supported_config
        .with_sample_rate(SampleRate(SAMPLE_RATE))
        .config();

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate = SAMPLE_RATE,
        channels = config.channels,
        "microphone initialized"
    );

    let callback_shared = Arc::clone(shared);
    device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                callback_shared.push(data);
            },
            |err| {
                tracing::error!(error = %err, "audio capture error");
            },
            None,
        )
        .map_err(|e| Error::Microphone(e.to_string()))
}

/// Convert f32 samples to WAV bytes for STT APIs
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(sample_i16)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}
