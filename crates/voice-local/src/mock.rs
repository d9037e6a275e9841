use crate::{
    AsrSegment, AsrStream, AsrStreamConfig, AudioCapture, AudioSource, ConversationTurn,
    ReplyGenerator, Result, SpeechEngine, Transcriber, TtsConfig, TtsEngine, VoiceError,
    WakeWordDetector,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;
use time::OffsetDateTime;

/// Streaming recognizer that replays a script: each `push_audio` call consumes
/// one line, and non-empty lines come back from `poll` as segments.
pub struct MockAsr {
    cfg: AsrStreamConfig,
    script: VecDeque<String>,
    ready: VecDeque<AsrSegment>,
    elapsed_ms: u64,
}

impl MockAsr {
    pub fn scripted(config: AsrStreamConfig, script: Vec<String>) -> Self {
        Self {
            cfg: config,
            script: script.into(),
            ready: VecDeque::new(),
            elapsed_ms: 0,
        }
    }
}

impl AsrStream for MockAsr {
    fn new(config: AsrStreamConfig) -> Self
    where
        Self: Sized,
    {
        Self::scripted(config, Vec::new())
    }

    fn push_audio(&mut self, pcm_s16le: &[i16]) {
        let sr = u64::from(self.cfg.sample_rate_hz.max(1));
        let start_ms = self.elapsed_ms;
        self.elapsed_ms += pcm_s16le.len() as u64 * 1000 / sr;
        if let Some(line) = self.script.pop_front() {
            if !line.is_empty() {
                self.ready.push_back(AsrSegment {
                    start_ms,
                    end_ms: self.elapsed_ms,
                    text: line,
                    ts: Some(OffsetDateTime::now_utc()),
                });
            }
        }
    }

    fn poll(&mut self) -> Option<AsrSegment> {
        self.ready.pop_front()
    }
}

pub struct MockTts {
    cfg: TtsConfig,
}

impl TtsEngine for MockTts {
    fn new(config: TtsConfig) -> Self
    where
        Self: Sized,
    {
        Self { cfg: config }
    }

    fn synthesize(&mut self, text: &str) -> Vec<i16> {
        // Short 440Hz sine placeholder, longer for longer text
        let sr = self.cfg.sample_rate_hz.max(8000);
        let dur_s = (text.len() as f32 / 10.0).clamp(0.2, 1.0);
        let frames = (sr as f32 * dur_s) as usize;
        let freq = 440.0_f32;
        (0..frames)
            .map(|n| {
                let t = n as f32 / sr as f32;
                ((2.0 * std::f32::consts::PI * freq * t).sin() * 3000.0) as i16
            })
            .collect()
    }
}

const CANNED_PHRASES: &[&str] = &[
    "Hello Max, how are you today?",
    "What's the weather like?",
    "Tell me a joke",
    "What time is it?",
    "Set a reminder for tomorrow",
];

/// Transcriber used when no recognizer is available.
///
/// By default it cycles through canned phrases; a script replaces them with
/// exact results, and an exhausted script yields `None`.
pub struct MockTranscriber {
    script: Option<VecDeque<Option<String>>>,
    next_canned: usize,
    calls: Arc<AtomicUsize>,
}

impl MockTranscriber {
    pub fn new() -> Self {
        Self {
            script: None,
            next_canned: 0,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn scripted(results: Vec<Option<String>>) -> Self {
        Self {
            script: Some(results.into()),
            ..Self::new()
        }
    }

    /// Shared counter of `transcribe` calls, readable after the mock is moved.
    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

impl Default for MockTranscriber {
    fn default() -> Self {
        Self::new()
    }
}

impl Transcriber for MockTranscriber {
    fn transcribe(&mut self, _samples: &[f32]) -> Option<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.script.as_mut() {
            Some(script) => script.pop_front().flatten(),
            None => {
                let phrase = CANNED_PHRASES[self.next_canned % CANNED_PHRASES.len()];
                self.next_canned += 1;
                Some(phrase.to_string())
            }
        }
    }
}

/// Keyword-driven reply generator for running without a language model.
///
/// A script of `Some(reply)` / `None` (failure) overrides the keyword rules.
pub struct MockReply {
    script: Option<VecDeque<Option<String>>>,
    seen: Arc<Mutex<Vec<Vec<ConversationTurn>>>>,
}

impl MockReply {
    pub fn new() -> Self {
        Self {
            script: None,
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn scripted(replies: Vec<Option<String>>) -> Self {
        Self {
            script: Some(replies.into()),
            ..Self::new()
        }
    }

    /// Every history this generator was called with, in call order.
    pub fn history_log(&self) -> Arc<Mutex<Vec<Vec<ConversationTurn>>>> {
        self.seen.clone()
    }

    fn keyword_reply(last: &str) -> String {
        let last = last.to_lowercase();
        if last.contains("hello") || last.contains("hi") {
            "Hello there! I'm Max, your friendly AI assistant. How can I help you today?".into()
        } else if last.contains("weather") {
            "I'd love to tell you about the weather, but I'm running locally and don't have internet access.".into()
        } else if last.contains("joke") {
            "Why do programmers prefer dark mode? Because light attracts bugs!".into()
        } else if last.contains("time") {
            let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
            let clock = now
                .format(time::macros::format_description!(
                    "[hour repr:12]:[minute] [period]"
                ))
                .unwrap_or_else(|_| "a mystery".to_string());
            format!("It's currently {clock}. Time flies when you're having fun!")
        } else if last.contains("name") {
            "I'm Max! Your personal AI assistant living right here on this device.".into()
        } else if last.contains("how are you") {
            "I'm doing great! My circuits are humming nicely. How are you?".into()
        } else {
            "I'm in demo mode without a language model. Once one is running, I'll be much smarter!"
                .into()
        }
    }
}

impl Default for MockReply {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplyGenerator for MockReply {
    fn generate_reply(&mut self, history: &[ConversationTurn]) -> Result<String> {
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(history.to_vec());
        }
        match self.script.as_mut() {
            Some(script) => script
                .pop_front()
                .flatten()
                .ok_or_else(|| VoiceError::Transport("scripted reply failure".into())),
            None => {
                let last = history.last().map(|t| t.content.as_str()).unwrap_or("");
                Ok(Self::keyword_reply(last))
            }
        }
    }
}

#[derive(Default)]
struct SpeechState {
    spoken: Vec<String>,
    cancels: usize,
    active: bool,
    interrupted: bool,
    released: bool,
}

/// Speech engine that records what it was asked to say.
///
/// A holding engine blocks inside `speak` until cancelled or released, which
/// lets callers observe the speaking phase.
pub struct MockSpeech {
    state: Mutex<SpeechState>,
    wakeup: Condvar,
    hold: bool,
    fail: bool,
}

impl MockSpeech {
    pub fn instant() -> Self {
        Self {
            state: Mutex::new(SpeechState::default()),
            wakeup: Condvar::new(),
            hold: false,
            fail: false,
        }
    }

    pub fn holding() -> Self {
        Self {
            hold: true,
            ..Self::instant()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::instant()
        }
    }

    pub fn spoken(&self) -> Vec<String> {
        self.state.lock().map(|s| s.spoken.clone()).unwrap_or_default()
    }

    pub fn cancel_count(&self) -> usize {
        self.state.lock().map(|s| s.cancels).unwrap_or(0)
    }

    pub fn is_speaking(&self) -> bool {
        self.state.lock().map(|s| s.active).unwrap_or(false)
    }

    /// Let a held utterance finish normally.
    pub fn release(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.released = true;
            self.wakeup.notify_all();
        }
    }
}

impl SpeechEngine for MockSpeech {
    fn speak(&self, text: &str) -> Result<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| VoiceError::Unavailable("mock speech lock poisoned".into()))?;
        state.spoken.push(text.to_string());
        if self.fail {
            return Err(VoiceError::Unavailable("mock speech failure".into()));
        }
        if !self.hold {
            return Ok(());
        }

        state.active = true;
        state.interrupted = false;
        state.released = false;
        while !state.interrupted && !state.released {
            state = self
                .wakeup
                .wait(state)
                .map_err(|_| VoiceError::Unavailable("mock speech lock poisoned".into()))?;
        }
        state.active = false;
        if state.interrupted {
            return Err(VoiceError::Cancelled);
        }
        Ok(())
    }

    fn cancel(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.cancels += 1;
            if state.active {
                state.interrupted = true;
                self.wakeup.notify_all();
            }
        }
    }
}

/// Wake detector that fires on chosen chunk indices, counting every chunk it sees.
pub struct MockWakeDetector {
    fire_on: Vec<usize>,
    seen: Arc<AtomicUsize>,
}

impl MockWakeDetector {
    pub fn firing_on(fire_on: Vec<usize>) -> Self {
        Self {
            fire_on,
            seen: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn chunk_counter(&self) -> Arc<AtomicUsize> {
        self.seen.clone()
    }
}

impl WakeWordDetector for MockWakeDetector {
    fn detect(&mut self, _chunk: &[i16]) -> bool {
        let index = self.seen.fetch_add(1, Ordering::SeqCst);
        self.fire_on.contains(&index)
    }
}

/// What a scripted capture does once its chunks run out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptEnd {
    /// Report no audio until the caller's timeout, forever.
    Quiet,
    /// Keep producing silent chunks of the last chunk's length.
    Silence,
    /// Fail with [`VoiceError::StreamClosed`].
    Close,
}

/// Audio source replaying fixed chunks; every `open` starts from the top.
pub struct ScriptedAudio {
    sample_rate_hz: u32,
    chunks: Vec<Vec<i16>>,
    end: ScriptEnd,
    pace: Option<Duration>,
    opens: Arc<AtomicUsize>,
}

impl ScriptedAudio {
    pub fn new(sample_rate_hz: u32, chunks: Vec<Vec<i16>>, end: ScriptEnd) -> Self {
        Self {
            sample_rate_hz,
            chunks,
            end,
            pace: None,
            opens: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// `loud` chunks at a constant amplitude followed by `quiet` all-zero chunks.
    pub fn speech_then_silence(
        sample_rate_hz: u32,
        chunk_len: usize,
        loud: usize,
        quiet: usize,
        end: ScriptEnd,
    ) -> Self {
        let mut chunks = vec![vec![4000_i16; chunk_len]; loud];
        chunks.extend(std::iter::repeat(vec![0_i16; chunk_len]).take(quiet));
        Self::new(sample_rate_hz, chunks, end)
    }

    /// Sleep this long before handing out each chunk.
    pub fn paced(mut self, pace: Duration) -> Self {
        self.pace = Some(pace);
        self
    }

    pub fn open_counter(&self) -> Arc<AtomicUsize> {
        self.opens.clone()
    }
}

impl AudioSource for ScriptedAudio {
    fn open(&self) -> Result<Box<dyn AudioCapture>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedCapture {
            sample_rate_hz: self.sample_rate_hz,
            silent_len: self.chunks.last().map_or(1600, Vec::len),
            chunks: self.chunks.clone().into(),
            end: self.end,
            pace: self.pace,
        }))
    }
}

struct ScriptedCapture {
    sample_rate_hz: u32,
    chunks: VecDeque<Vec<i16>>,
    silent_len: usize,
    end: ScriptEnd,
    pace: Option<Duration>,
}

impl AudioCapture for ScriptedCapture {
    fn sample_rate_hz(&self) -> u32 {
        self.sample_rate_hz
    }

    fn next_chunk(&mut self, timeout: Duration) -> Result<Option<Vec<i16>>> {
        if let Some(pace) = self.pace {
            std::thread::sleep(pace);
        }
        if let Some(chunk) = self.chunks.pop_front() {
            return Ok(Some(chunk));
        }
        match self.end {
            ScriptEnd::Quiet => {
                std::thread::sleep(timeout);
                Ok(None)
            }
            ScriptEnd::Silence => Ok(Some(vec![0; self.silent_len])),
            ScriptEnd::Close => Err(VoiceError::StreamClosed),
        }
    }
}

/// Audio source whose device can never be opened.
pub struct UnavailableAudio;

impl AudioSource for UnavailableAudio {
    fn open(&self) -> Result<Box<dyn AudioCapture>> {
        Err(VoiceError::Device("no input device".into()))
    }
}
