//! Kyutai speech-to-text through an HTTP inference endpoint.
//!
//! Audio is resampled to the model rate, wrapped in a 16-bit mono WAV and
//! posted in one request. The same client backs batch transcription of a
//! recorded utterance and windowed streaming for wake word spotting.

use crate::{AsrSegment, AsrStream, AsrStreamConfig, Result, SttConfig, Transcriber, VoiceError};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct KyutaiClient {
    config: SttConfig,
    token: Option<String>,
    client: reqwest::blocking::Client,
}

#[derive(Deserialize)]
struct SttResponse {
    text: String,
}

impl KyutaiClient {
    /// Build a client for `config.endpoint`. The hosted endpoint is refused
    /// up front when no token is set, so selection can fall back early.
    pub fn connect(config: SttConfig) -> Result<Self> {
        let token = std::env::var(&config.token_env)
            .ok()
            .filter(|t| !t.trim().is_empty());
        if token.is_none() && config.endpoint.contains("huggingface.co") {
            return Err(VoiceError::Unavailable(format!(
                "{} is not set for {}",
                config.token_env, config.endpoint
            )));
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| VoiceError::Transport(e.to_string()))?;
        info!(endpoint = %config.endpoint, "kyutai speech-to-text ready");
        Ok(Self {
            config,
            token,
            client,
        })
    }

    /// Transcribe mono samples in `[-1, 1]` captured at `sample_rate_hz`.
    pub fn transcribe_pcm(&self, samples: &[f32], sample_rate_hz: u32) -> Result<String> {
        if samples.is_empty() {
            return Ok(String::new());
        }
        let resampled = resample_linear(samples, sample_rate_hz, self.config.model_rate_hz);
        let wav = encode_wav(&resampled, self.config.model_rate_hz)?;

        let mut request = self
            .client
            .post(&self.config.endpoint)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(wav);
        if let Some(token) = &self.token {
            request = request.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        let response = request.send().map_err(|e| {
            if e.is_timeout() {
                VoiceError::Timeout
            } else {
                VoiceError::Transport(e.to_string())
            }
        })?;
        let status = response.status();
        if !status.is_success() {
            return Err(VoiceError::Transport(format!(
                "inference endpoint returned {status}"
            )));
        }
        let body = response
            .text()
            .map_err(|e| VoiceError::Malformed(e.to_string()))?;
        debug!(bytes = body.len(), "kyutai response received");
        parse_transcript(&body)
    }
}

/// JSON bodies carry the text in a `text` field; anything else is taken as
/// the transcript itself.
fn parse_transcript(body: &str) -> Result<String> {
    let body = body.trim();
    if body.starts_with('{') {
        let parsed: SttResponse =
            serde_json::from_str(body).map_err(|e| VoiceError::Malformed(e.to_string()))?;
        return Ok(parsed.text.trim().to_string());
    }
    Ok(body.to_string())
}

fn encode_wav(samples: &[f32], sample_rate_hz: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: sample_rate_hz,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).map_err(wav_error)?;
        for &sample in samples {
            let pcm = (sample.clamp(-1.0, 1.0) * 32767.0) as i16;
            writer.write_sample(pcm).map_err(wav_error)?;
        }
        writer.finalize().map_err(wav_error)?;
    }
    Ok(cursor.into_inner())
}

fn wav_error(e: hound::Error) -> VoiceError {
    VoiceError::Malformed(format!("wav encoding: {e}"))
}

fn resample_linear(samples: &[f32], sr_in: u32, sr_out: u32) -> Vec<f32> {
    if sr_in == sr_out || samples.is_empty() || sr_in == 0 {
        return samples.to_vec();
    }

    let ratio = sr_out as f64 / sr_in as f64;
    let out_len = (samples.len() as f64 * ratio) as usize;
    let last = samples.len() - 1;
    (0..out_len)
        .map(|i| {
            let pos = i as f64 / ratio;
            let i0 = (pos.floor() as usize).min(last);
            let i1 = (i0 + 1).min(last);
            let t = (pos - i0 as f64) as f32;
            samples[i0] * (1.0 - t) + samples[i1] * t
        })
        .collect()
}

/// Batch transcription of a finished recording.
pub struct KyutaiTranscriber {
    client: Arc<KyutaiClient>,
    sample_rate_hz: u32,
}

impl KyutaiTranscriber {
    pub fn new(client: Arc<KyutaiClient>, sample_rate_hz: u32) -> Self {
        Self {
            client,
            sample_rate_hz,
        }
    }
}

impl Transcriber for KyutaiTranscriber {
    fn transcribe(&mut self, samples: &[f32]) -> Option<String> {
        match self.client.transcribe_pcm(samples, self.sample_rate_hz) {
            Ok(text) if !text.is_empty() => Some(text),
            Ok(_) => None,
            Err(e) => {
                warn!("kyutai transcription failed: {e}");
                None
            }
        }
    }
}

/// Streaming recognizer that transcribes fixed windows as they fill. Without
/// a client it accepts audio and never produces text.
pub struct KyutaiAsrStream {
    client: Option<Arc<KyutaiClient>>,
    sample_rate_hz: u32,
    window: usize,
    buffer: Vec<i16>,
    elapsed_ms: u64,
}

impl KyutaiAsrStream {
    pub fn with_client(client: Arc<KyutaiClient>, config: &AsrStreamConfig, window_ms: u32) -> Self {
        Self::build(Some(client), config, window_ms)
    }

    fn build(client: Option<Arc<KyutaiClient>>, config: &AsrStreamConfig, window_ms: u32) -> Self {
        let window = (config.sample_rate_hz as u64 * window_ms.max(100) as u64 / 1000) as usize;
        Self {
            client,
            sample_rate_hz: config.sample_rate_hz,
            window: window.max(1),
            buffer: Vec::with_capacity(window),
            elapsed_ms: 0,
        }
    }

    fn transcribe_window(&mut self, pcm: Vec<i16>) -> Option<AsrSegment> {
        let start_ms = self.elapsed_ms;
        self.elapsed_ms += pcm.len() as u64 * 1000 / self.sample_rate_hz.max(1) as u64;
        let client = self.client.as_ref()?;
        let samples: Vec<f32> = pcm.iter().map(|&s| s as f32 / 32768.0).collect();
        match client.transcribe_pcm(&samples, self.sample_rate_hz) {
            Ok(text) if !text.is_empty() => Some(AsrSegment {
                start_ms,
                end_ms: self.elapsed_ms,
                text,
                ts: Some(time::OffsetDateTime::now_utc()),
            }),
            Ok(_) => None,
            Err(e) => {
                warn!("kyutai window transcription failed: {e}");
                None
            }
        }
    }
}

impl AsrStream for KyutaiAsrStream {
    fn new(config: AsrStreamConfig) -> Self {
        let stt = SttConfig::default();
        let client = match KyutaiClient::connect(stt.clone()) {
            Ok(client) => Some(Arc::new(client)),
            Err(e) => {
                warn!("kyutai speech-to-text unavailable ({e}), stream stays silent");
                None
            }
        };
        Self::build(client, &config, stt.window_ms)
    }

    fn push_audio(&mut self, pcm_s16le: &[i16]) {
        if self.client.is_some() {
            self.buffer.extend_from_slice(pcm_s16le);
        }
    }

    fn poll(&mut self) -> Option<AsrSegment> {
        while self.buffer.len() >= self.window {
            let pcm: Vec<i16> = self.buffer.drain(..self.window).collect();
            if let Some(segment) = self.transcribe_window(pcm) {
                return Some(segment);
            }
        }
        None
    }

    fn end(&mut self) -> Option<AsrSegment> {
        if self.buffer.is_empty() {
            return None;
        }
        let pcm = std::mem::take(&mut self.buffer);
        self.transcribe_window(pcm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PhraseWakeDetector, WakeWordDetector};
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;
    use std::thread::{self, JoinHandle};

    /// One-shot HTTP endpoint answering with `reply`. The join handle yields
    /// the uploaded body.
    fn serve_once(reply: &'static str) -> (String, JoinHandle<Vec<u8>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/asr", listener.local_addr().unwrap());
        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream);
            let mut length = 0usize;
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                let line = line.trim_end();
                if line.is_empty() {
                    break;
                }
                if let Some((name, value)) = line.split_once(':') {
                    if name.eq_ignore_ascii_case("content-length") {
                        length = value.trim().parse().unwrap();
                    }
                }
            }
            let mut body = vec![0u8; length];
            reader.read_exact(&mut body).unwrap();
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{reply}",
                reply.len()
            );
            reader.get_mut().write_all(response.as_bytes()).unwrap();
            body
        });
        (url, handle)
    }

    fn local_config(endpoint: String) -> SttConfig {
        SttConfig {
            endpoint,
            token_env: "ASSISTANT_TEST_STT_TOKEN_UNSET".to_string(),
            timeout_secs: 5,
            ..SttConfig::default()
        }
    }

    #[test]
    fn test_resample_scales_length() {
        let input = vec![0.5f32; 16_000];
        let output = resample_linear(&input, 16_000, 24_000);
        assert_eq!(output.len(), 24_000);
        assert!(output.iter().all(|&s| (s - 0.5).abs() < 1e-6));
        assert_eq!(resample_linear(&input, 16_000, 16_000).len(), 16_000);
    }

    #[test]
    fn test_wav_is_16_bit_mono() {
        let wav = encode_wav(&[0.0, 0.5, -0.5, 1.0], 24_000).unwrap();
        assert_eq!(&wav[..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(wav.len(), 44 + 2 * 4);
        let reader = hound::WavReader::new(Cursor::new(wav)).unwrap();
        assert_eq!(reader.spec().channels, 1);
        assert_eq!(reader.spec().sample_rate, 24_000);
        assert_eq!(reader.spec().bits_per_sample, 16);
    }

    #[test]
    fn test_transcript_parsing() {
        assert_eq!(parse_transcript(r#"{"text": " hey max "}"#).unwrap(), "hey max");
        assert_eq!(parse_transcript("plain words\n").unwrap(), "plain words");
        assert!(matches!(
            parse_transcript(r#"{"error": "loading"}"#),
            Err(VoiceError::Malformed(_))
        ));
    }

    #[test]
    fn test_hosted_endpoint_needs_token() {
        let config = SttConfig {
            token_env: "ASSISTANT_TEST_STT_TOKEN_UNSET".to_string(),
            ..SttConfig::default()
        };
        assert!(matches!(
            KyutaiClient::connect(config),
            Err(VoiceError::Unavailable(_))
        ));
    }

    #[test]
    fn test_transcriber_uploads_wav_and_reads_text() {
        let (url, server) = serve_once(r#"{"text": "what time is it"}"#);
        let client = Arc::new(KyutaiClient::connect(local_config(url)).unwrap());
        let mut transcriber = KyutaiTranscriber::new(client, 16_000);

        let text = transcriber.transcribe(&[0.1; 1_600]);
        let body = server.join().unwrap();

        assert_eq!(text.as_deref(), Some("what time is it"));
        assert_eq!(&body[..4], b"RIFF");
        // 0.1 s at 16 kHz becomes 2400 samples at the model rate.
        assert_eq!(body.len(), 44 + 2 * 2_400);
    }

    #[test]
    fn test_stream_window_feeds_wake_detector() {
        let (url, server) = serve_once(r#"{"text": "Hey Max, are you there"}"#);
        let client = Arc::new(KyutaiClient::connect(local_config(url)).unwrap());
        let config = AsrStreamConfig::default();
        let stream = KyutaiAsrStream::with_client(client, &config, 200);
        let mut detector = PhraseWakeDetector::with_stream(stream, &config.wake_words);

        // 100 ms chunks: the first leaves the 200 ms window short.
        assert!(!detector.detect(&[0; 1_600]));
        assert!(detector.detect(&[0; 1_600]));
        server.join().unwrap();
    }

    #[test]
    fn test_stream_without_client_stays_silent() {
        let mut stream = KyutaiAsrStream::build(None, &AsrStreamConfig::default(), 100);
        stream.push_audio(&[1_000; 4_800]);
        assert!(stream.poll().is_none());
        assert!(stream.end().is_none());
    }
}
