//! Bridges from the streaming ASR/TTS traits to the collaborator traits the
//! assistant consumes.

use crate::{
    AsrStream, AsrStreamConfig, Result, SpeechEngine, Transcriber, TtsConfig, TtsEngine,
    VoiceError, WakeWordDetector,
};
use std::marker::PhantomData;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Runs a whole recording through a fresh streaming recognizer.
pub struct AsrTranscriber<A> {
    config: AsrStreamConfig,
    _stream: PhantomData<fn() -> A>,
}

impl<A: AsrStream> AsrTranscriber<A> {
    pub fn new(config: AsrStreamConfig) -> Self {
        Self {
            config,
            _stream: PhantomData,
        }
    }
}

impl<A: AsrStream> Transcriber for AsrTranscriber<A> {
    fn transcribe(&mut self, samples: &[f32]) -> Option<String> {
        let pcm: Vec<i16> = samples
            .iter()
            .map(|s| (s.clamp(-1.0, 1.0) * 32767.0) as i16)
            .collect();

        let mut stream = A::new(self.config.clone());
        stream.push_audio(&pcm);

        let mut parts = Vec::new();
        while let Some(segment) = stream.poll() {
            parts.push(segment.text);
        }
        if let Some(last) = stream.end() {
            parts.push(last.text);
        }

        let text = parts.join(" ").trim().to_string();
        debug!(samples = samples.len(), chars = text.len(), "asr transcription finished");
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

/// Wake word spotting by phrase match on streaming ASR output.
pub struct PhraseWakeDetector<A> {
    stream: A,
    phrases: Vec<String>,
}

impl<A: AsrStream> PhraseWakeDetector<A> {
    pub fn new(config: AsrStreamConfig) -> Self {
        let phrases = normalize_phrases(&config.wake_words);
        Self {
            stream: A::new(config),
            phrases,
        }
    }

    pub fn with_stream(stream: A, wake_words: &[String]) -> Self {
        Self {
            stream,
            phrases: normalize_phrases(wake_words),
        }
    }

    fn matches(&self, text: &str) -> bool {
        let text = text.to_lowercase();
        self.phrases.iter().any(|p| text.contains(p.as_str()))
    }
}

fn normalize_phrases(words: &[String]) -> Vec<String> {
    words
        .iter()
        .map(|w| w.trim().to_lowercase())
        .filter(|w| !w.is_empty())
        .collect()
}

impl<A: AsrStream + Send> WakeWordDetector for PhraseWakeDetector<A> {
    fn detect(&mut self, chunk: &[i16]) -> bool {
        self.stream.push_audio(chunk);
        let mut detected = false;
        while let Some(segment) = self.stream.poll() {
            if self.matches(&segment.text) {
                info!(text = %segment.text, "wake word detected");
                detected = true;
            }
        }
        detected
    }
}

#[derive(Default)]
struct Playback {
    active: bool,
    cancelled: bool,
}

/// Synthesizes with a [`TtsEngine`] and plays the result back in real time
/// without an output device. Cancellation interrupts the wait.
pub struct SynthSpeech<T> {
    engine: Mutex<T>,
    sample_rate_hz: u32,
    speed: f32,
    playback: Mutex<Playback>,
    wakeup: Condvar,
}

impl<T: TtsEngine> SynthSpeech<T> {
    pub fn new(config: TtsConfig) -> Self {
        let sample_rate_hz = config.sample_rate_hz.max(8000);
        let speed = config.speed.clamp(0.5, 2.0);
        Self {
            engine: Mutex::new(T::new(config)),
            sample_rate_hz,
            speed,
            playback: Mutex::new(Playback::default()),
            wakeup: Condvar::new(),
        }
    }

    pub fn is_speaking(&self) -> bool {
        self.playback.lock().map(|p| p.active).unwrap_or(false)
    }

    fn lock_playback(&self) -> Result<MutexGuard<'_, Playback>> {
        self.playback
            .lock()
            .map_err(|_| VoiceError::Unavailable("playback lock poisoned".into()))
    }

    fn set_active(&self, active: bool) -> Result<()> {
        let mut playback = self.lock_playback()?;
        playback.active = active;
        playback.cancelled = false;
        Ok(())
    }

    fn duration_of(&self, samples: usize) -> Duration {
        Duration::from_secs_f32(samples as f32 / self.sample_rate_hz as f32 / self.speed)
    }
}

impl<T: TtsEngine + Send> SpeechEngine for SynthSpeech<T> {
    fn speak(&self, text: &str) -> Result<()> {
        if text.trim().is_empty() {
            return Ok(());
        }
        // Busy from here on, so a cancel during synthesis is not lost.
        self.set_active(true)?;
        let pcm = match self.engine.lock() {
            Ok(mut engine) => engine.synthesize(text),
            Err(_) => {
                self.set_active(false)?;
                return Err(VoiceError::Unavailable("tts engine lock poisoned".into()));
            }
        };
        let duration = self.duration_of(pcm.len());

        let mut playback = self.lock_playback()?;
        let deadline = Instant::now() + duration;
        while !playback.cancelled {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            playback = match self.wakeup.wait_timeout(playback, deadline - now) {
                Ok((guard, _)) => guard,
                Err(_) => return Err(VoiceError::Unavailable("playback lock poisoned".into())),
            };
        }

        playback.active = false;
        if playback.cancelled {
            playback.cancelled = false;
            return Err(VoiceError::Cancelled);
        }
        Ok(())
    }

    fn cancel(&self) {
        if let Ok(mut playback) = self.playback.lock() {
            if playback.active {
                playback.cancelled = true;
                self.wakeup.notify_all();
            }
        }
    }
}
