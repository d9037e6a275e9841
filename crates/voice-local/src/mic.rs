use crate::{AudioCapture, AudioSource, Result, VoiceError};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;
use tracing::{info, warn};

pub struct MicStream {
    _stream: cpal::Stream,
}

pub struct MicConfig {
    pub sample_rate_hz: u32,
    pub channels: u16,
}

/// Default input device, opened fresh for every capture.
#[derive(Debug, Clone)]
pub struct MicSource {
    pub sample_rate_hz: u32,
    pub chunk_samples: usize,
}

impl Default for MicSource {
    fn default() -> Self {
        Self {
            sample_rate_hz: 16_000,
            chunk_samples: 1600,
        }
    }
}

impl AudioSource for MicSource {
    fn open(&self) -> Result<Box<dyn AudioCapture>> {
        let (stream, config, rx) = start_default_input_i16(self.sample_rate_hz, self.chunk_samples)?;
        info!(
            sample_rate_hz = config.sample_rate_hz,
            channels = config.channels,
            "microphone opened"
        );
        Ok(Box::new(MicCapture {
            _stream: stream,
            sample_rate_hz: config.sample_rate_hz,
            rx,
        }))
    }
}

struct MicCapture {
    _stream: MicStream,
    sample_rate_hz: u32,
    rx: Receiver<Vec<i16>>,
}

impl AudioCapture for MicCapture {
    fn sample_rate_hz(&self) -> u32 {
        self.sample_rate_hz
    }

    fn next_chunk(&mut self, timeout: Duration) -> Result<Option<Vec<i16>>> {
        match self.rx.recv_timeout(timeout) {
            Ok(chunk) => Ok(Some(chunk)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(VoiceError::StreamClosed),
        }
    }
}

/// Open the default input device, preferring `preferred_rate` when the device supports it.
pub fn start_default_input_i16(
    preferred_rate: u32,
    chunk_samples: usize,
) -> Result<(MicStream, MicConfig, Receiver<Vec<i16>>)> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| VoiceError::Device("no default input device".into()))?;

    let preferred = device.supported_input_configs().ok().and_then(|mut ranges| {
        ranges.find(|r| {
            r.min_sample_rate().0 <= preferred_rate && preferred_rate <= r.max_sample_rate().0
        })
    });
    let config = match preferred {
        Some(range) => range.with_sample_rate(cpal::SampleRate(preferred_rate)),
        None => {
            let config = device
                .default_input_config()
                .map_err(|e| VoiceError::Device(format!("input config: {e}")))?;
            warn!(
                wanted = preferred_rate,
                got = config.sample_rate().0,
                "preferred sample rate unsupported, using device default"
            );
            config
        }
    };
    let sample_rate = config.sample_rate().0;
    let channels = config.channels();

    let (tx, rx) = mpsc::channel::<Vec<i16>>();
    let format = config.sample_format();
    let stream_config: cpal::StreamConfig = config.into();
    let chunk = chunk_samples.max(1);

    let stream = match format {
        cpal::SampleFormat::I16 => {
            build_stream::<i16>(&device, &stream_config, channels, chunk, tx, |s| s)?
        }
        cpal::SampleFormat::U16 => build_stream::<u16>(&device, &stream_config, channels, chunk, tx, |s| {
            (s as i32 - 32768) as i16
        })?,
        cpal::SampleFormat::F32 => build_stream::<f32>(&device, &stream_config, channels, chunk, tx, |s| {
            (s.clamp(-1.0, 1.0) * 32767.0) as i16
        })?,
        other => {
            return Err(VoiceError::Device(format!(
                "unsupported sample format: {other:?}"
            )))
        }
    };
    stream
        .play()
        .map_err(|e| VoiceError::Device(format!("stream play: {e}")))?;
    Ok((
        MicStream { _stream: stream },
        MicConfig {
            sample_rate_hz: sample_rate,
            channels,
        },
        rx,
    ))
}

fn build_stream<T: cpal::SizedSample + Copy>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    channels: u16,
    chunk_samples: usize,
    tx: Sender<Vec<i16>>,
    to_i16: fn(T) -> i16,
) -> Result<cpal::Stream> {
    let mut buf = Vec::<i16>::with_capacity(chunk_samples * 2);
    let stride = channels.max(1) as usize;
    let stream = device
        .build_input_stream(
            config,
            move |data: &[T], _| {
                // First channel only
                buf.extend(data.chunks_exact(stride).map(|frame| to_i16(frame[0])));
                while buf.len() >= chunk_samples {
                    let rest = buf.split_off(chunk_samples);
                    let out = std::mem::replace(&mut buf, rest);
                    let _ = tx.send(out);
                }
            },
            |err| warn!("input stream error: {err}"),
            None,
        )
        .map_err(|e| VoiceError::Device(format!("build input stream: {e}")))?;
    Ok(stream)
}
