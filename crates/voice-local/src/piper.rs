//! Piper text-to-speech with playback through an external WAV player.

use crate::{PiperConfig, Result, SpeechEngine, VoiceError};
use std::io::Write;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

pub struct PiperSpeech {
    config: PiperConfig,
    current: Mutex<Option<Child>>,
    speaking: AtomicBool,
    cancelled: AtomicBool,
}

impl PiperSpeech {
    /// Check that the piper binary runs before committing to this backend.
    pub fn probe(config: PiperConfig) -> Result<Self> {
        let output = Command::new(&config.binary)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|e| VoiceError::Unavailable(format!("{}: {e}", config.binary)))?;
        if !output.success() {
            return Err(VoiceError::Unavailable(format!(
                "{} --version exited with {output}",
                config.binary
            )));
        }
        if config.player.is_empty() {
            return Err(VoiceError::Unavailable("no audio player configured".into()));
        }
        info!(voice = %config.voice, "piper TTS available");
        Ok(Self {
            config,
            current: Mutex::new(None),
            speaking: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
        })
    }

    fn run(&self, mut command: Command, input: Option<&str>, limit: Option<Duration>) -> Result<()> {
        if self.cancelled.load(Ordering::SeqCst) {
            return Err(VoiceError::Cancelled);
        }
        command
            .stdin(if input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        let mut child = command.spawn()?;
        if let (Some(text), Some(mut stdin)) = (input, child.stdin.take()) {
            stdin.write_all(text.as_bytes())?;
        }
        self.slot()?.replace(child);

        let started = Instant::now();
        loop {
            if self.cancelled.load(Ordering::SeqCst) {
                self.kill_current();
                return Err(VoiceError::Cancelled);
            }
            let status = match self.slot()?.as_mut() {
                Some(child) => child.try_wait()?,
                None => return Err(VoiceError::Cancelled),
            };
            if let Some(status) = status {
                self.slot()?.take();
                if !status.success() {
                    return Err(VoiceError::Unavailable(format!("child exited with {status}")));
                }
                return Ok(());
            }
            if limit.is_some_and(|limit| started.elapsed() > limit) {
                self.kill_current();
                return Err(VoiceError::Timeout);
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    fn slot(&self) -> Result<std::sync::MutexGuard<'_, Option<Child>>> {
        self.current
            .lock()
            .map_err(|_| VoiceError::Unavailable("piper process lock poisoned".into()))
    }

    fn kill_current(&self) {
        if let Ok(mut slot) = self.current.lock() {
            if let Some(mut child) = slot.take() {
                let _ = child.kill();
                let _ = child.wait();
            }
        }
    }

    fn speak_inner(&self, text: &str) -> Result<()> {
        let wav = tempfile::Builder::new().suffix(".wav").tempfile()?;
        let wav_path = wav.path().to_path_buf();

        let mut synth = Command::new(&self.config.binary);
        synth
            .arg("--model")
            .arg(&self.config.voice)
            .arg("--output_file")
            .arg(&wav_path);
        self.run(
            synth,
            Some(text),
            Some(Duration::from_secs(self.config.synth_timeout_secs)),
        )?;

        if std::fs::metadata(&wav_path).map(|m| m.len()).unwrap_or(0) == 0 {
            return Err(VoiceError::Malformed("piper produced no audio".into()));
        }

        let mut player = Command::new(&self.config.player[0]);
        player.args(&self.config.player[1..]).arg(&wav_path);
        debug!(path = %wav_path.display(), "playing synthesized speech");
        self.run(player, None, None)
    }
}

impl SpeechEngine for PiperSpeech {
    fn speak(&self, text: &str) -> Result<()> {
        if text.trim().is_empty() {
            return Ok(());
        }
        // Marked busy before synthesis starts so an early cancel still lands.
        self.cancelled.store(false, Ordering::SeqCst);
        self.speaking.store(true, Ordering::SeqCst);
        let result = self.speak_inner(text);
        self.speaking.store(false, Ordering::SeqCst);
        if let Err(e) = &result {
            if !matches!(e, VoiceError::Cancelled) {
                warn!("piper speech failed: {e}");
            }
        }
        result
    }

    fn cancel(&self) {
        if self.speaking.load(Ordering::SeqCst) {
            self.cancelled.store(true, Ordering::SeqCst);
            self.kill_current();
        }
    }
}
