//! Backend selection. Each collaborator is chosen once at startup: the
//! requested backend is probed, and a mock stands in when it is unavailable.

use crate::{
    AsrStreamConfig, AudioSource, MockAsr, MockReply, MockTranscriber, MockTts, OllamaConfig,
    PhraseWakeDetector, PiperConfig, ReplyGenerator, ScriptEnd, ScriptedAudio, SpeechEngine,
    SttConfig, SynthSpeech, Transcriber, TtsConfig, VoiceError, WakeWordDetector,
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioBackendKind {
    Mock,
    Microphone,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscriberKind {
    Mock,
    Kyutai,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyBackendKind {
    Mock,
    Ollama,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeechBackendKind {
    Mock,
    Piper,
}

impl FromStr for ReplyBackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mock" => Ok(Self::Mock),
            "ollama" => Ok(Self::Ollama),
            other => Err(format!("unknown reply backend: {other}")),
        }
    }
}

impl FromStr for SpeechBackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mock" => Ok(Self::Mock),
            "piper" => Ok(Self::Piper),
            other => Err(format!("unknown speech backend: {other}")),
        }
    }
}

impl FromStr for TranscriberKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mock" => Ok(Self::Mock),
            "kyutai" | "kyutai_moshi" => Ok(Self::Kyutai),
            other => Err(format!("unknown transcriber: {other}")),
        }
    }
}

impl FromStr for AudioBackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mock" => Ok(Self::Mock),
            "microphone" | "mic" => Ok(Self::Microphone),
            other => Err(format!("unknown audio backend: {other}")),
        }
    }
}

/// 0.8 s of "speech" then endless silence, in real-time 100 ms chunks.
fn scripted_utterance(sample_rate_hz: u32) -> ScriptedAudio {
    ScriptedAudio::speech_then_silence(
        sample_rate_hz,
        (sample_rate_hz / 10) as usize,
        8,
        0,
        ScriptEnd::Silence,
    )
    .paced(Duration::from_millis(100))
}

/// Audio for recording. The mock plays one short utterance followed by silence.
pub fn new_audio_backend(
    kind: AudioBackendKind,
    sample_rate_hz: u32,
) -> Result<Arc<dyn AudioSource>, VoiceError> {
    match kind {
        AudioBackendKind::Mock => Ok(Arc::new(scripted_utterance(sample_rate_hz))),
        AudioBackendKind::Microphone => {
            #[cfg(feature = "audio")]
            {
                Ok(Arc::new(crate::mic::MicSource {
                    sample_rate_hz,
                    chunk_samples: (sample_rate_hz / 10) as usize,
                }))
            }
            #[cfg(not(feature = "audio"))]
            {
                let _ = sample_rate_hz;
                Err(VoiceError::NotCompiled("audio"))
            }
        }
    }
}

/// Audio for the wake-word watcher. The mock never produces sound.
pub fn new_wake_audio_backend(
    kind: AudioBackendKind,
    sample_rate_hz: u32,
) -> Result<Arc<dyn AudioSource>, VoiceError> {
    match kind {
        AudioBackendKind::Mock => Ok(Arc::new(ScriptedAudio::new(
            sample_rate_hz,
            Vec::new(),
            ScriptEnd::Quiet,
        ))),
        AudioBackendKind::Microphone => new_audio_backend(kind, sample_rate_hz),
    }
}

/// Speech-to-text for recorded utterances at `sample_rate_hz`.
pub fn new_transcriber(
    kind: TranscriberKind,
    stt: &SttConfig,
    sample_rate_hz: u32,
) -> Result<Box<dyn Transcriber>, VoiceError> {
    match kind {
        TranscriberKind::Mock => Ok(Box::new(MockTranscriber::new())),
        TranscriberKind::Kyutai => {
            #[cfg(feature = "kyutai_moshi")]
            {
                let client = Arc::new(crate::KyutaiClient::connect(stt.clone())?);
                Ok(Box::new(crate::KyutaiTranscriber::new(client, sample_rate_hz)))
            }
            #[cfg(not(feature = "kyutai_moshi"))]
            {
                let _ = (stt, sample_rate_hz);
                Err(VoiceError::NotCompiled("kyutai_moshi"))
            }
        }
    }
}

/// Wake word spotting on the same recognizer family as transcription. The
/// mock recognizer hears nothing, so with it only the keyboard starts turns.
pub fn new_wake_detector(
    kind: TranscriberKind,
    config: AsrStreamConfig,
    stt: &SttConfig,
) -> Result<Box<dyn WakeWordDetector>, VoiceError> {
    match kind {
        TranscriberKind::Mock => Ok(Box::new(PhraseWakeDetector::<MockAsr>::new(config))),
        TranscriberKind::Kyutai => {
            #[cfg(feature = "kyutai_moshi")]
            {
                let client = Arc::new(crate::KyutaiClient::connect(stt.clone())?);
                let stream = crate::KyutaiAsrStream::with_client(client, &config, stt.window_ms);
                Ok(Box::new(PhraseWakeDetector::with_stream(
                    stream,
                    &config.wake_words,
                )))
            }
            #[cfg(not(feature = "kyutai_moshi"))]
            {
                let _ = (config, stt);
                Err(VoiceError::NotCompiled("kyutai_moshi"))
            }
        }
    }
}

pub fn new_reply_backend(
    kind: ReplyBackendKind,
    ollama: &OllamaConfig,
) -> Result<Box<dyn ReplyGenerator>, VoiceError> {
    match kind {
        ReplyBackendKind::Mock => Ok(Box::new(MockReply::new())),
        ReplyBackendKind::Ollama => {
            #[cfg(feature = "ollama")]
            {
                crate::OllamaReply::connect(ollama.clone())
                    .map(|r| Box::new(r) as Box<dyn ReplyGenerator>)
            }
            #[cfg(not(feature = "ollama"))]
            {
                let _ = ollama;
                Err(VoiceError::NotCompiled("ollama"))
            }
        }
    }
}

pub fn new_speech_backend(
    kind: SpeechBackendKind,
    tts: &TtsConfig,
    piper: &PiperConfig,
) -> Result<Arc<dyn SpeechEngine>, VoiceError> {
    match kind {
        SpeechBackendKind::Mock => Ok(Arc::new(SynthSpeech::<MockTts>::new(tts.clone()))),
        SpeechBackendKind::Piper => {
            #[cfg(feature = "piper")]
            {
                let _ = tts;
                crate::PiperSpeech::probe(piper.clone())
                    .map(|s| Arc::new(s) as Arc<dyn SpeechEngine>)
            }
            #[cfg(not(feature = "piper"))]
            {
                let _ = (tts, piper);
                Err(VoiceError::NotCompiled("piper"))
            }
        }
    }
}

/// Requested reply backend, or the mock when it cannot be used.
pub fn select_reply_backend(
    kind: ReplyBackendKind,
    ollama: &OllamaConfig,
) -> (ReplyBackendKind, Box<dyn ReplyGenerator>) {
    match new_reply_backend(kind, ollama) {
        Ok(backend) => {
            info!(?kind, "reply backend ready");
            (kind, backend)
        }
        Err(e) => {
            warn!(?kind, "reply backend unavailable ({e}), using mock replies");
            (ReplyBackendKind::Mock, Box::new(MockReply::new()))
        }
    }
}

/// Requested speech backend, or synthesized mock speech when it cannot be used.
pub fn select_speech_backend(
    kind: SpeechBackendKind,
    tts: &TtsConfig,
    piper: &PiperConfig,
) -> (SpeechBackendKind, Arc<dyn SpeechEngine>) {
    match new_speech_backend(kind, tts, piper) {
        Ok(backend) => {
            info!(?kind, "speech backend ready");
            (kind, backend)
        }
        Err(e) => {
            warn!(?kind, "speech backend unavailable ({e}), using mock speech");
            (
                SpeechBackendKind::Mock,
                Arc::new(SynthSpeech::<MockTts>::new(tts.clone())),
            )
        }
    }
}

/// Requested transcriber, or the scripted mock when it cannot be used.
pub fn select_transcriber(
    kind: TranscriberKind,
    stt: &SttConfig,
    sample_rate_hz: u32,
) -> (TranscriberKind, Box<dyn Transcriber>) {
    match new_transcriber(kind, stt, sample_rate_hz) {
        Ok(transcriber) => {
            info!(?kind, "transcriber ready");
            (kind, transcriber)
        }
        Err(e) => {
            warn!(?kind, "transcriber unavailable ({e}), using mock transcripts");
            (TranscriberKind::Mock, Box::new(MockTranscriber::new()))
        }
    }
}

/// Requested wake word detector, or the silent mock when it cannot be used.
pub fn select_wake_detector(
    kind: TranscriberKind,
    config: AsrStreamConfig,
    stt: &SttConfig,
) -> (TranscriberKind, Box<dyn WakeWordDetector>) {
    match new_wake_detector(kind, config.clone(), stt) {
        Ok(detector) => (kind, detector),
        Err(e) => {
            warn!(?kind, "wake word recognizer unavailable ({e}), keyboard only");
            (
                TranscriberKind::Mock,
                Box::new(PhraseWakeDetector::<MockAsr>::new(config)),
            )
        }
    }
}

/// Requested audio backend, or the scripted mock when it cannot be used.
pub fn select_audio_backend(
    kind: AudioBackendKind,
    sample_rate_hz: u32,
) -> (AudioBackendKind, Arc<dyn AudioSource>) {
    match new_audio_backend(kind, sample_rate_hz) {
        Ok(source) => (kind, source),
        Err(e) => {
            warn!(?kind, "audio backend unavailable ({e}), using scripted audio");
            (
                AudioBackendKind::Mock,
                Arc::new(scripted_utterance(sample_rate_hz)),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_kind_parsing() {
        assert_eq!("ollama".parse::<ReplyBackendKind>(), Ok(ReplyBackendKind::Ollama));
        assert_eq!("piper".parse::<SpeechBackendKind>(), Ok(SpeechBackendKind::Piper));
        assert_eq!("mic".parse::<AudioBackendKind>(), Ok(AudioBackendKind::Microphone));
        assert_eq!("kyutai".parse::<TranscriberKind>(), Ok(TranscriberKind::Kyutai));
        assert!("gpt".parse::<ReplyBackendKind>().is_err());
    }

    #[cfg(not(feature = "ollama"))]
    #[test]
    fn test_missing_reply_backend_falls_back_to_mock() {
        let (kind, mut reply) =
            select_reply_backend(ReplyBackendKind::Ollama, &OllamaConfig::default());
        assert_eq!(kind, ReplyBackendKind::Mock);
        assert!(reply
            .generate_reply(&[crate::ConversationTurn::user("tell me a joke")])
            .is_ok());
    }

    #[cfg(not(feature = "piper"))]
    #[test]
    fn test_missing_speech_backend_falls_back_to_mock() {
        let (kind, _speech) = select_speech_backend(
            SpeechBackendKind::Piper,
            &TtsConfig::default(),
            &PiperConfig::default(),
        );
        assert_eq!(kind, SpeechBackendKind::Mock);
    }

    #[test]
    fn test_hosted_transcriber_without_token_falls_back_to_mock() {
        let stt = SttConfig {
            token_env: "ASSISTANT_TEST_STT_TOKEN_UNSET".to_string(),
            ..SttConfig::default()
        };
        let (kind, mut transcriber) = select_transcriber(TranscriberKind::Kyutai, &stt, 16_000);
        assert_eq!(kind, TranscriberKind::Mock);
        assert!(transcriber.transcribe(&[0.2; 1_600]).is_some());

        let (kind, mut detector) =
            select_wake_detector(TranscriberKind::Kyutai, AsrStreamConfig::default(), &stt);
        assert_eq!(kind, TranscriberKind::Mock);
        assert!(!detector.detect(&[0; 1_600]));
    }

    #[cfg(feature = "kyutai_moshi")]
    #[test]
    fn test_local_kyutai_endpoint_is_selected() {
        let stt = SttConfig {
            endpoint: "http://127.0.0.1:9/asr".to_string(),
            token_env: "ASSISTANT_TEST_STT_TOKEN_UNSET".to_string(),
            ..SttConfig::default()
        };
        let (kind, _transcriber) = select_transcriber(TranscriberKind::Kyutai, &stt, 16_000);
        assert_eq!(kind, TranscriberKind::Kyutai);
        let (kind, _detector) =
            select_wake_detector(TranscriberKind::Kyutai, AsrStreamConfig::default(), &stt);
        assert_eq!(kind, TranscriberKind::Kyutai);
    }
}
