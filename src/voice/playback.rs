//! Audio playback to speakers
//!
//! Blocking playback helpers; callers run them on a blocking thread. A
//! shared cancel flag lets in-flight playback be interrupted mid-utterance.

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleRate;

use crate::{Error, Result};

/// Sample rate for playback (matches common TTS output)
const PLAYBACK_SAMPLE_RATE: u32 = 24000;

/// Play MP3 bytes until done or `cancel` is set
///
/// # Errors
///
/// Returns error if decoding or playback fails
pub fn play_mp3(mp3_data: &[u8], cancel: &AtomicBool) -> Result<()> {
    let samples = decode_mp3(mp3_data)?;
    play_samples(samples, cancel)
}

/// Play f32 samples until done or `cancel` is set
///
/// # Errors
///
/// Returns error if playback fails
#[allow(clippy::significant_drop_tightening)]
pub fn play_samples(samples: Vec<f32>, cancel: &AtomicBool) -> Result<()> {
    if samples.is_empty() {
        return Ok(());
    }

    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

    let supported_config = device
        .supported_output_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .find(|c| {
            (c.channels() == 1 || c.channels() == 2)
                && c.min_sample_rate() <= SampleRate(PLAYBACK_SAMPLE_RATE)
                && c.max_sample_rate() >= SampleRate(PLAYBACK_SAMPLE_RATE)
        })
        .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))?;

    let config = supported_config
        .with_sample_rate(SampleRate(PLAYBACK_SAMPLE_RATE))
        .config();
    let channels = config.channels as usize;

    let sample_count = samples.len();
    let shared = Arc::new(Mutex::new((samples, 0usize)));
    let finished = Arc::new(AtomicBool::new(false));

    let callback_shared = Arc::clone(&shared);
    let callback_finished = Arc::clone(&finished);

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let Ok(mut guard) = callback_shared.lock() else {
                    return;
                };
                let (samples, pos) = &mut *guard;

                for frame in data.chunks_mut(channels) {
                    let sample = if *pos < samples.len() {
                        let s = samples[*pos];
                        *pos += 1;
                        s
                    } else {
                        callback_finished.store(true, Ordering::SeqCst);
                        0.0
                    };

                    for out in frame.iter_mut() {
                        *out = sample;
                    }
                }
            },
            |err| {
                tracing::error!(error = %err, "audio playback error");
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))?;

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;

    let duration_ms = (sample_count as u64 * 1000) / u64::from(PLAYBACK_SAMPLE_RATE);
    let start = std::time::Instant::now();
    let timeout = std::time::Duration::from_millis(duration_ms + 500);

    while !finished.load(Ordering::SeqCst) && !cancel.load(Ordering::SeqCst) {
        if start.elapsed() > timeout {
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(50));
    }

    drop(stream);
    tracing::debug!(
        samples = sample_count,
        interrupted = cancel.load(Ordering::SeqCst),
        "playback finished"
    );

    Ok(())
}

/// Play a short sine tone (speaker test)
///
/// # Errors
///
/// Returns error if playback fails
pub fn play_tone(frequency: f32, duration_secs: f32) -> Result<()> {
    #[allow(clippy::cast_precision_loss, clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    let samples: Vec<f32> = (0..(PLAYBACK_SAMPLE_RATE as f32 * duration_secs) as usize)
        .map(|i| {
            let t = i as f32 / PLAYBACK_SAMPLE_RATE as f32;
            0.3 * (2.0 * std::f32::consts::PI * frequency * t).sin()
        })
        .collect();

    play_samples(samples, &AtomicBool::new(false))
}

/// Decode MP3 bytes to mono f32 samples
fn decode_mp3(mp3_data: &[u8]) -> Result<Vec<f32>> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                if frame.channels == 2 {
                    samples.extend(frame.data.chunks(2).map(|chunk| {
                        let left = f32::from(chunk[0]) / 32768.0;
                        let right = f32::from(chunk.get(1).copied().unwrap_or(chunk[0])) / 32768.0;
                        f32::midpoint(left, right)
                    }));
                } else {
                    samples.extend(frame.data.iter().map(|&s| f32::from(s) / 32768.0));
                }
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Audio(format!("MP3 decode error: {e}"))),
        }
    }

    Ok(samples)
}
