//! Background tasks. Each one runs a single blocking collaborator call on
//! its own thread and reports back with exactly one tagged message.

use crate::config::RecordingConfig;
use crate::recorder::record_utterance;
use crate::{Envelope, ResponseOutcome, TaskId, TaskKind, TranscriptOutcome};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::thread;
use tracing::{debug, error, warn};
use voice_local::{
    AudioSource, ConversationTurn, ReplyGenerator, SpeechEngine, Transcriber, VoiceError,
};

pub type SharedTranscriber = Arc<Mutex<Box<dyn Transcriber>>>;
pub type SharedReplier = Arc<Mutex<Box<dyn ReplyGenerator>>>;

/// Holds a task's terminal send. If the task never posts, whether it
/// returned early, panicked or never started, dropping this sends the
/// fallback instead.
pub(crate) struct TerminalPost<M: Send + 'static> {
    task: TaskId,
    kind: TaskKind,
    slot: Option<(Sender<Envelope<M>>, M)>,
}

impl<M: Send + 'static> TerminalPost<M> {
    pub(crate) fn new(
        task: TaskId,
        kind: TaskKind,
        tx: Sender<Envelope<M>>,
        fallback: M,
    ) -> Self {
        Self {
            task,
            kind,
            slot: Some((tx, fallback)),
        }
    }

    pub(crate) fn post(mut self, outcome: M) {
        if let Some((tx, _)) = self.slot.take() {
            self.send(&tx, outcome);
        }
    }

    fn send(&self, tx: &Sender<Envelope<M>>, outcome: M) {
        let envelope = Envelope {
            task: self.task,
            outcome,
        };
        if tx.send(envelope).is_err() {
            debug!(kind = %self.kind, task = %self.task, "orchestrator gone, outcome dropped");
        }
    }
}

impl<M: Send + 'static> Drop for TerminalPost<M> {
    fn drop(&mut self) {
        if let Some((tx, fallback)) = self.slot.take() {
            warn!(kind = %self.kind, task = %self.task, "task ended without an outcome, posting failure");
            self.send(&tx, fallback);
        }
    }
}

/// Run `body` on a new thread and deliver its result on `tx`.
pub(crate) fn spawn_task<M, F>(
    kind: TaskKind,
    tx: Sender<Envelope<M>>,
    fallback: M,
    body: F,
) -> TaskId
where
    M: Send + 'static,
    F: FnOnce() -> M + Send + 'static,
{
    let task = TaskId::new();
    let post = TerminalPost::new(task, kind, tx, fallback);
    let spawned = thread::Builder::new()
        .name(format!("{kind}-task"))
        .spawn(move || {
            let span = tracing::debug_span!("task", %kind, %task);
            let _enter = span.enter();
            debug!("started");
            let outcome = body();
            post.post(outcome);
        });
    // A failed spawn drops the closure, and with it the guard's fallback post.
    if let Err(e) = spawned {
        error!(%kind, %task, "failed to start task thread: {e}");
    }
    task
}

pub(crate) fn spawn_recording(
    tx: Sender<Envelope<TranscriptOutcome>>,
    audio: Arc<dyn AudioSource>,
    transcriber: SharedTranscriber,
    config: RecordingConfig,
) -> TaskId {
    spawn_task(TaskKind::Recording, tx, TranscriptOutcome::Failed, move || {
        record_and_transcribe(audio.as_ref(), &transcriber, &config)
    })
}

fn record_and_transcribe(
    audio: &dyn AudioSource,
    transcriber: &SharedTranscriber,
    config: &RecordingConfig,
) -> TranscriptOutcome {
    let mut capture = match audio.open() {
        Ok(capture) => capture,
        Err(e) => {
            warn!("could not open audio for recording: {e}");
            return TranscriptOutcome::Failed;
        }
    };
    let recording = record_utterance(capture.as_mut(), config);
    drop(capture);

    if recording.samples.len() < config.min_samples {
        debug!(samples = recording.samples.len(), "recording too short to transcribe");
        return TranscriptOutcome::Failed;
    }

    let text = match transcriber.lock() {
        Ok(mut engine) => engine.transcribe(&recording.samples),
        Err(_) => {
            error!("transcriber lock poisoned");
            None
        }
    };
    match text.as_deref().map(str::trim) {
        Some(text) if !text.is_empty() => {
            debug!(%text, "transcribed");
            TranscriptOutcome::Ready(text.to_string())
        }
        _ => {
            debug!("nothing recognized");
            TranscriptOutcome::Failed
        }
    }
}

pub(crate) fn spawn_reply(
    tx: Sender<Envelope<ResponseOutcome>>,
    replier: SharedReplier,
    context: Vec<ConversationTurn>,
) -> TaskId {
    spawn_task(TaskKind::Reply, tx, ResponseOutcome::ReplyFailed, move || {
        let result = match replier.lock() {
            Ok(mut generator) => generator.generate_reply(&context),
            Err(_) => Err(VoiceError::Unavailable("reply generator lock poisoned".into())),
        };
        match result {
            Ok(reply) if !reply.trim().is_empty() => {
                ResponseOutcome::ReplyReady(reply.trim().to_string())
            }
            Ok(_) => {
                warn!("reply generator returned an empty reply");
                ResponseOutcome::ReplyFailed
            }
            Err(e) => {
                warn!("reply generation failed: {e}");
                ResponseOutcome::ReplyFailed
            }
        }
    })
}

/// `interrupted` latches a cancel that lands before the engine has started,
/// so the text is never spoken.
pub(crate) fn spawn_speech(
    tx: Sender<Envelope<ResponseOutcome>>,
    speech: Arc<dyn SpeechEngine>,
    text: String,
    interrupted: Arc<AtomicBool>,
) -> TaskId {
    spawn_task(TaskKind::Speech, tx, ResponseOutcome::SpeechDone, move || {
        if interrupted.load(Ordering::SeqCst) {
            debug!("speech cancelled before it started");
            return ResponseOutcome::SpeechDone;
        }
        match speech.speak(&text) {
            Ok(()) => debug!("speech finished"),
            Err(VoiceError::Cancelled) => debug!("speech cancelled"),
            Err(e) => warn!("speech failed: {e}"),
        }
        ResponseOutcome::SpeechDone
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;
    use voice_local::{MockReply, MockSpeech, MockTranscriber, ScriptEnd, ScriptedAudio};

    const WAIT: Duration = Duration::from_secs(5);

    #[test]
    fn test_dropped_guard_posts_fallback_once() {
        let (tx, rx) = mpsc::channel();
        let task = TaskId::new();
        drop(TerminalPost::new(
            task,
            TaskKind::Reply,
            tx,
            ResponseOutcome::ReplyFailed,
        ));
        let msg = rx.recv_timeout(WAIT).unwrap();
        assert_eq!(msg.task, task);
        assert_eq!(msg.outcome, ResponseOutcome::ReplyFailed);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_posted_guard_sends_only_the_outcome() {
        let (tx, rx) = mpsc::channel();
        let guard = TerminalPost::new(
            TaskId::new(),
            TaskKind::Speech,
            tx,
            ResponseOutcome::ReplyFailed,
        );
        guard.post(ResponseOutcome::SpeechDone);
        assert_eq!(rx.recv_timeout(WAIT).unwrap().outcome, ResponseOutcome::SpeechDone);
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn test_panicking_task_still_posts() {
        let (tx, rx) = mpsc::channel();
        let task = spawn_task(TaskKind::Recording, tx, TranscriptOutcome::Failed, || {
            if true {
                panic!("engine exploded");
            }
            TranscriptOutcome::Ready("unreachable".into())
        });
        let msg = rx.recv_timeout(WAIT).unwrap();
        assert_eq!(msg.task, task);
        assert_eq!(msg.outcome, TranscriptOutcome::Failed);
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn test_short_recording_skips_transcriber() {
        let (tx, rx) = mpsc::channel();
        let audio = Arc::new(ScriptedAudio::new(16_000, vec![vec![4000; 800]], ScriptEnd::Close));
        let transcriber = MockTranscriber::scripted(vec![Some("never used".into())]);
        let calls = transcriber.call_counter();
        let boxed: Box<dyn Transcriber> = Box::new(transcriber);
        spawn_recording(tx, audio, Arc::new(Mutex::new(boxed)), RecordingConfig::default());
        assert_eq!(rx.recv_timeout(WAIT).unwrap().outcome, TranscriptOutcome::Failed);
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[test]
    fn test_reply_error_maps_to_failure() {
        let (tx, rx) = mpsc::channel();
        let boxed: Box<dyn ReplyGenerator> = Box::new(MockReply::scripted(vec![None]));
        spawn_reply(tx, Arc::new(Mutex::new(boxed)), vec![ConversationTurn::user("hi")]);
        assert_eq!(rx.recv_timeout(WAIT).unwrap().outcome, ResponseOutcome::ReplyFailed);
    }

    #[test]
    fn test_failed_speech_still_completes() {
        let (tx, rx) = mpsc::channel();
        let speech = Arc::new(MockSpeech::failing());
        spawn_speech(
            tx,
            speech.clone(),
            "hello".into(),
            Arc::new(AtomicBool::new(false)),
        );
        assert_eq!(rx.recv_timeout(WAIT).unwrap().outcome, ResponseOutcome::SpeechDone);
        assert_eq!(speech.spoken(), vec!["hello".to_string()]);
    }

    #[test]
    fn test_speech_interrupted_before_start_is_never_spoken() {
        let (tx, rx) = mpsc::channel();
        let speech = Arc::new(MockSpeech::instant());
        let task = spawn_speech(
            tx,
            speech.clone(),
            "hello".into(),
            Arc::new(AtomicBool::new(true)),
        );
        let msg = rx.recv_timeout(WAIT).unwrap();
        assert_eq!(msg.task, task);
        assert_eq!(msg.outcome, ResponseOutcome::SpeechDone);
        assert!(speech.spoken().is_empty());
        assert!(rx.try_recv().is_err());
    }
}
