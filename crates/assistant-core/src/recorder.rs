//! Energy-based utterance capture.

use crate::config::RecordingConfig;
use std::time::Instant;
use tracing::{debug, warn};
use voice_local::AudioCapture;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Enough trailing silence after the minimum chunk count.
    Silence,
    MaxDuration,
    /// The device stopped delivering audio.
    StreamEnded,
}

#[derive(Debug, Clone)]
pub struct Recording {
    /// Mono samples normalized to `-1.0..1.0`.
    pub samples: Vec<f32>,
    pub chunks: usize,
    pub reason: StopReason,
}

/// True when the chunk's mean absolute amplitude is under `threshold`.
pub fn is_silent(chunk: &[i16], threshold: f32) -> bool {
    if chunk.is_empty() {
        return true;
    }
    let total: u64 = chunk.iter().map(|s| u64::from(s.unsigned_abs())).sum();
    (total as f64 / chunk.len() as f64) < f64::from(threshold)
}

pub fn to_f32(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| f32::from(s) / 32768.0).collect()
}

/// Record until trailing silence, the duration cap, or the end of the stream.
pub fn record_utterance(capture: &mut dyn AudioCapture, config: &RecordingConfig) -> Recording {
    let started = Instant::now();
    let max_duration = config.max_duration();
    let max_silence = config.max_silence_samples(capture.sample_rate_hz());

    let mut pcm: Vec<i16> = Vec::new();
    let mut chunks = 0usize;
    let mut silent_samples = 0u64;

    let reason = loop {
        let elapsed = started.elapsed();
        if elapsed >= max_duration {
            break StopReason::MaxDuration;
        }
        let wait = config.chunk_timeout().min(max_duration - elapsed);
        match capture.next_chunk(wait) {
            Ok(Some(chunk)) => {
                if is_silent(&chunk, config.silence_threshold) {
                    silent_samples += chunk.len() as u64;
                } else {
                    silent_samples = 0;
                }
                pcm.extend_from_slice(&chunk);
                chunks += 1;
                if silent_samples > max_silence && chunks > config.min_chunks {
                    break StopReason::Silence;
                }
            }
            Ok(None) => continue,
            Err(e) => {
                warn!("recording stopped early: {e}");
                break StopReason::StreamEnded;
            }
        }
    };

    debug!(
        chunks,
        samples = pcm.len(),
        ?reason,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "recording finished"
    );
    Recording {
        samples: to_f32(&pcm),
        chunks,
        reason,
    }
}
