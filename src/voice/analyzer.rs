//! Audio energy analyzer
//!
//! Feeds the visual level meter: a fixed 256-point transform over the
//! stream's most recent samples, reduced to one normalized level per tick.

use std::sync::Arc;

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

use super::capture::MicStream;

/// Transform size (fixed frequency resolution)
pub const FFT_SIZE: usize = 256;

/// Frequency bins produced per update
pub const BIN_COUNT: usize = FFT_SIZE / 2;

/// Reference magnitude a bin is normalized against
pub const REFERENCE_LEVEL: f32 = 128.0;

/// Analyzer state derived from a live microphone stream
///
/// Invalid once the stream stops; [`AudioAnalyzer::update`] returns 0 from
/// then on.
pub struct AudioAnalyzer {
    fft: Arc<dyn Fft<f32>>,
    scratch: Vec<Complex<f32>>,
    bins: Vec<f32>,
    closed: bool,
}

impl AudioAnalyzer {
    /// Build the processing graph for a live stream
    #[must_use]
    pub fn setup(stream: &Arc<dyn MicStream>) -> Self {
        if stream.is_stopped() {
            tracing::warn!("analyzer set up on a stopped stream");
        }

        let fft = FftPlanner::new().plan_fft_forward(FFT_SIZE);

        Self {
            fft,
            scratch: vec![Complex::default(); FFT_SIZE],
            bins: vec![0.0; BIN_COUNT],
            closed: false,
        }
    }

    /// Pull the latest frequency-domain sample and reduce it to one level
    ///
    /// Returns the mean bin magnitude normalized to `[0, 1]`.
    pub fn update(&mut self, stream: &dyn MicStream) -> f32 {
        if self.closed || stream.is_stopped() {
            return 0.0;
        }

        let window = stream.latest_window(FFT_SIZE);
        if window.is_empty() {
            return 0.0;
        }

        for (slot, sample) in self.scratch.iter_mut().zip(window.iter()) {
            *slot = Complex::new(*sample, 0.0);
        }
        for slot in self.scratch.iter_mut().skip(window.len()) {
            *slot = Complex::default();
        }

        self.fft.process(&mut self.scratch);

        #[allow(clippy::cast_precision_loss)]
        for (bin, value) in self.bins.iter_mut().zip(self.scratch.iter()) {
            // Magnitude rescaled to the 0-255 range of a byte-valued bin
            *bin = (value.norm() * 2.0 / FFT_SIZE as f32 * 255.0).min(255.0);
        }

        #[allow(clippy::cast_precision_loss)]
        let average = self.bins.iter().sum::<f32>() / self.bins.len() as f32;
        (average / REFERENCE_LEVEL).min(1.0)
    }

    /// Release the processing graph; tolerates repeated calls
    pub fn cleanup(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.scratch.clear();
        self.bins.clear();
        tracing::debug!("audio analyzer closed");
    }

    /// Whether the analyzer has been cleaned up
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.closed
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    /// Stream double feeding a fixed window
    struct FixedStream {
        window: Mutex<Vec<f32>>,
        stopped: std::sync::atomic::AtomicBool,
    }

    impl FixedStream {
        fn new(window: Vec<f32>) -> Arc<Self> {
            Arc::new(Self {
                window: Mutex::new(window),
                stopped: std::sync::atomic::AtomicBool::new(false),
            })
        }
    }

    impl MicStream for FixedStream {
        fn sample_rate(&self) -> u32 {
            16000
        }

        fn take_samples(&self) -> Vec<f32> {
            Vec::new()
        }

        fn latest_window(&self, len: usize) -> Vec<f32> {
            let win = self.window.lock().unwrap();
            let start = win.len().saturating_sub(len);
            win[start..].to_vec()
        }

        fn stop(&self) {
            self.stopped.store(true, std::sync::atomic::Ordering::SeqCst);
        }

        fn is_stopped(&self) -> bool {
            self.stopped.load(std::sync::atomic::Ordering::SeqCst)
        }
    }

    fn sine_window(amplitude: f32) -> Vec<f32> {
        (0..FFT_SIZE)
            .map(|i| {
                let t = i as f32 / FFT_SIZE as f32;
                amplitude * (2.0 * std::f32::consts::PI * 8.0 * t).sin()
            })
            .collect()
    }

    #[test]
    fn test_silence_is_zero() {
        let stream = FixedStream::new(vec![0.0; FFT_SIZE]);
        let arc: Arc<dyn MicStream> = stream;
        let mut analyzer = AudioAnalyzer::setup(&arc);

        assert_eq!(analyzer.update(arc.as_ref()), 0.0);
    }

    #[test]
    fn test_tone_raises_level() {
        let stream = FixedStream::new(sine_window(0.8));
        let arc: Arc<dyn MicStream> = stream;
        let mut analyzer = AudioAnalyzer::setup(&arc);

        let level = analyzer.update(arc.as_ref());
        assert!(level > 0.0);
        assert!(level <= 1.0);
    }

    #[test]
    fn test_louder_is_higher() {
        let quiet: Arc<dyn MicStream> = FixedStream::new(sine_window(0.1));
        let loud: Arc<dyn MicStream> = FixedStream::new(sine_window(0.9));

        let mut analyzer = AudioAnalyzer::setup(&quiet);
        let quiet_level = analyzer.update(quiet.as_ref());
        let loud_level = analyzer.update(loud.as_ref());

        assert!(loud_level > quiet_level);
    }

    #[test]
    fn test_stopped_stream_reads_zero() {
        let stream = FixedStream::new(sine_window(0.8));
        let arc: Arc<dyn MicStream> = stream;
        let mut analyzer = AudioAnalyzer::setup(&arc);

        arc.stop();
        assert_eq!(analyzer.update(arc.as_ref()), 0.0);
    }

    #[test]
    fn test_cleanup_is_idempotent() {
        let stream: Arc<dyn MicStream> = FixedStream::new(vec![0.0; FFT_SIZE]);
        let mut analyzer = AudioAnalyzer::setup(&stream);

        analyzer.cleanup();
        analyzer.cleanup();
        assert!(analyzer.is_closed());
        assert_eq!(analyzer.update(stream.as_ref()), 0.0);
    }
}
