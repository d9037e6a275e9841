//! The turn-taking state machine.
//!
//! All state lives on the thread that owns the [`Orchestrator`]. Background
//! tasks only ever talk back through the two outcome channels, which are
//! drained by [`Orchestrator::poll`].

use crate::config::OrchestratorConfig;
use crate::history::ConversationHistory;
use crate::task::{self, SharedReplier, SharedTranscriber};
use crate::watcher::WakeGate;
use crate::{
    AssistantError, AssistantState, Envelope, ResponseOutcome, Result, TaskId, TaskKind,
    TranscriptOutcome,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};
use voice_local::{AudioSource, ConversationTurn, ReplyGenerator, SpeechEngine, Transcriber};

type StateObserver = Box<dyn FnMut(AssistantState) + Send>;

/// The external engines a turn goes through.
#[derive(Clone)]
pub struct Collaborators {
    pub audio: Arc<dyn AudioSource>,
    pub transcriber: SharedTranscriber,
    pub replier: SharedReplier,
    pub speech: Arc<dyn SpeechEngine>,
}

impl Collaborators {
    pub fn new(
        audio: Arc<dyn AudioSource>,
        transcriber: Box<dyn Transcriber>,
        replier: Box<dyn ReplyGenerator>,
        speech: Arc<dyn SpeechEngine>,
    ) -> Self {
        Self {
            audio,
            transcriber: Arc::new(Mutex::new(transcriber)),
            replier: Arc::new(Mutex::new(replier)),
            speech,
        }
    }
}

pub struct Orchestrator {
    state: AssistantState,
    gate: WakeGate,
    history: ConversationHistory,
    config: OrchestratorConfig,
    collaborators: Collaborators,
    transcript_tx: Sender<Envelope<TranscriptOutcome>>,
    transcript_rx: Receiver<Envelope<TranscriptOutcome>>,
    response_tx: Sender<Envelope<ResponseOutcome>>,
    response_rx: Receiver<Envelope<ResponseOutcome>>,
    /// The one task whose outcome the current state is waiting for.
    in_flight: Option<(TaskKind, TaskId)>,
    /// Speech tasks cancelled before they reported back.
    orphaned: HashSet<TaskId>,
    /// Set on cancel so a speech task that has not reached the engine yet
    /// skips speaking.
    speech_interrupt: Option<Arc<AtomicBool>>,
    observers: Vec<StateObserver>,
}

impl Orchestrator {
    pub fn new(collaborators: Collaborators, config: OrchestratorConfig) -> Self {
        let (transcript_tx, transcript_rx) = mpsc::channel();
        let (response_tx, response_rx) = mpsc::channel();
        Self {
            state: AssistantState::Idle,
            gate: WakeGate::default(),
            history: ConversationHistory::new(config.history_limit),
            config,
            collaborators,
            transcript_tx,
            transcript_rx,
            response_tx,
            response_rx,
            in_flight: None,
            orphaned: HashSet::new(),
            speech_interrupt: None,
            observers: Vec::new(),
        }
    }

    /// Called with the new state after every transition.
    pub fn on_state_changed<F>(&mut self, observer: F)
    where
        F: FnMut(AssistantState) + Send + 'static,
    {
        self.observers.push(Box::new(observer));
    }

    pub fn current_state(&self) -> AssistantState {
        self.state
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    /// Whether wake-word detection is currently muted.
    pub fn is_gated(&self) -> bool {
        self.gate.is_paused()
    }

    /// Read handle on the wake-word gate, for the watcher.
    pub fn gate(&self) -> WakeGate {
        self.gate.clone()
    }

    /// Begin a turn. Ignored unless idle; returns whether a turn started.
    pub fn handle_start_interaction(&mut self) -> bool {
        if self.state != AssistantState::Idle {
            debug!(state = %self.state, "start ignored, turn already in progress");
            return false;
        }
        self.transition(AssistantState::Listening);
        let task = task::spawn_recording(
            self.transcript_tx.clone(),
            self.collaborators.audio.clone(),
            self.collaborators.transcriber.clone(),
            self.config.recording.clone(),
        );
        self.in_flight = Some((TaskKind::Recording, task));
        true
    }

    /// Interrupt the spoken reply. Only speech can be cancelled; in any
    /// other state this does nothing and returns false.
    pub fn handle_cancel(&mut self) -> bool {
        if self.state != AssistantState::Speaking {
            debug!(state = %self.state, "cancel ignored, not speaking");
            return false;
        }
        if let Some(interrupt) = self.speech_interrupt.take() {
            interrupt.store(true, Ordering::SeqCst);
        }
        self.collaborators.speech.cancel();
        if let Some((TaskKind::Speech, task)) = self.in_flight.take() {
            self.orphaned.insert(task);
        }
        info!("speech interrupted");
        self.transition(AssistantState::Idle);
        true
    }

    /// Process at most one pending message from each channel, transcripts
    /// first. A transcript that starts a reply ends the poll, so no call
    /// spawns more than one task.
    ///
    /// A message that no live task could have sent is a protocol violation;
    /// the orchestrator should be considered broken once one is returned.
    pub fn poll(&mut self) -> Result<()> {
        if let Ok(msg) = self.transcript_rx.try_recv() {
            if self.on_transcript(msg)? {
                return Ok(());
            }
        }
        if let Ok(msg) = self.response_rx.try_recv() {
            self.on_response(msg)?;
        }
        Ok(())
    }

    /// Stop any speech and return to idle, for process shutdown.
    pub fn shutdown(&mut self) {
        if self.state == AssistantState::Speaking {
            self.handle_cancel();
        }
        self.in_flight = None;
    }

    #[cfg(test)]
    pub(crate) fn response_sender(&self) -> Sender<Envelope<ResponseOutcome>> {
        self.response_tx.clone()
    }

    fn on_transcript(&mut self, msg: Envelope<TranscriptOutcome>) -> Result<bool> {
        if !self.awaiting(AssistantState::Listening, TaskKind::Recording, msg.task) {
            return Err(self.violation(TaskKind::Recording, msg.task, msg.outcome.name()));
        }
        self.in_flight = None;
        match msg.outcome {
            TranscriptOutcome::Ready(text) => {
                info!(%text, "heard");
                self.history.append(ConversationTurn::user(text));
                self.transition(AssistantState::Thinking);
                let task = task::spawn_reply(
                    self.response_tx.clone(),
                    self.collaborators.replier.clone(),
                    self.history.as_context().to_vec(),
                );
                self.in_flight = Some((TaskKind::Reply, task));
                Ok(true)
            }
            TranscriptOutcome::Failed => {
                debug!("nothing to answer");
                self.transition(AssistantState::Idle);
                Ok(false)
            }
        }
    }

    fn on_response(&mut self, msg: Envelope<ResponseOutcome>) -> Result<bool> {
        if msg.outcome == ResponseOutcome::SpeechDone && self.orphaned.remove(&msg.task) {
            debug!(task = %msg.task, "late completion from interrupted speech dropped");
            return Ok(false);
        }
        let kind = msg.outcome.kind();
        let expected = match kind {
            TaskKind::Speech => AssistantState::Speaking,
            _ => AssistantState::Thinking,
        };
        if !self.awaiting(expected, kind, msg.task) {
            return Err(self.violation(kind, msg.task, msg.outcome.name()));
        }
        self.in_flight = None;
        match msg.outcome {
            ResponseOutcome::ReplyReady(reply) => {
                info!(%reply, "replying");
                self.history.append(ConversationTurn::assistant(reply.clone()));
                let dropped = self.history.trim();
                if dropped > 0 {
                    debug!(dropped, "trimmed conversation history");
                }
                self.speak(reply);
                Ok(true)
            }
            ResponseOutcome::ReplyFailed => {
                warn!("no reply available, apologizing");
                self.speak(self.config.apology.clone());
                Ok(true)
            }
            ResponseOutcome::SpeechDone => {
                self.speech_interrupt = None;
                self.transition(AssistantState::Idle);
                Ok(false)
            }
        }
    }

    fn speak(&mut self, text: String) {
        self.transition(AssistantState::Speaking);
        let interrupt = Arc::new(AtomicBool::new(false));
        self.speech_interrupt = Some(interrupt.clone());
        let task = task::spawn_speech(
            self.response_tx.clone(),
            self.collaborators.speech.clone(),
            text,
            interrupt,
        );
        self.in_flight = Some((TaskKind::Speech, task));
    }

    fn awaiting(&self, state: AssistantState, kind: TaskKind, task: TaskId) -> bool {
        self.state == state && self.in_flight == Some((kind, task))
    }

    fn violation(&self, kind: TaskKind, task: TaskId, outcome: &'static str) -> AssistantError {
        error!(state = %self.state, %kind, %task, outcome, "unexpected task message");
        AssistantError::ProtocolViolation {
            state: self.state,
            kind,
            task,
            outcome,
        }
    }

    /// The only place the state changes. The gate is updated before
    /// observers run so they never see the two disagree.
    fn transition(&mut self, next: AssistantState) {
        let previous = self.state;
        self.state = next;
        self.gate.set_paused(next != AssistantState::Idle);
        info!(from = %previous, to = %next, "state changed");
        for observer in &mut self.observers {
            observer(next);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RecordingConfig;
    use std::sync::atomic::Ordering;
    use std::thread;
    use std::time::{Duration, Instant};
    use voice_local::{
        MockReply, MockSpeech, MockTranscriber, ScriptEnd, ScriptedAudio, UnavailableAudio,
    };

    struct Harness {
        orchestrator: Orchestrator,
        speech: Arc<MockSpeech>,
        states: Arc<Mutex<Vec<AssistantState>>>,
    }

    fn quick_recording() -> RecordingConfig {
        RecordingConfig {
            max_silence_ms: 200,
            min_chunks: 2,
            max_duration_ms: 3000,
            chunk_timeout_ms: 20,
            ..RecordingConfig::default()
        }
    }

    fn utterance() -> Arc<dyn AudioSource> {
        Arc::new(ScriptedAudio::speech_then_silence(
            16_000,
            1600,
            3,
            0,
            ScriptEnd::Silence,
        ))
    }

    fn harness_with(
        audio: Arc<dyn AudioSource>,
        transcriber: MockTranscriber,
        replier: MockReply,
        speech: MockSpeech,
        config: OrchestratorConfig,
    ) -> Harness {
        let speech = Arc::new(speech);
        let collaborators = Collaborators::new(
            audio,
            Box::new(transcriber),
            Box::new(replier),
            speech.clone(),
        );
        let mut orchestrator = Orchestrator::new(collaborators, config);
        let states = Arc::new(Mutex::new(Vec::new()));
        let log = states.clone();
        orchestrator.on_state_changed(move |s| log.lock().unwrap().push(s));
        Harness {
            orchestrator,
            speech,
            states,
        }
    }

    fn owned(script: Vec<Option<&str>>) -> Vec<Option<String>> {
        script.into_iter().map(|s| s.map(String::from)).collect()
    }

    fn harness(
        transcripts: Vec<Option<&str>>,
        replies: Vec<Option<&str>>,
        speech: MockSpeech,
    ) -> Harness {
        harness_with(
            utterance(),
            MockTranscriber::scripted(owned(transcripts)),
            MockReply::scripted(owned(replies)),
            speech,
            OrchestratorConfig {
                recording: quick_recording(),
                ..OrchestratorConfig::default()
            },
        )
    }

    fn assert_gate_matches(o: &Orchestrator) {
        assert_eq!(
            o.is_gated(),
            o.current_state() != AssistantState::Idle,
            "gate out of step in {}",
            o.current_state()
        );
    }

    /// Poll until `done` holds, checking the gate invariant after every poll.
    fn drive_until(o: &mut Orchestrator, done: impl Fn(&Orchestrator) -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !done(o) {
            assert!(Instant::now() < deadline, "stuck in {}", o.current_state());
            o.poll().unwrap();
            assert_gate_matches(o);
            thread::sleep(Duration::from_millis(2));
        }
    }

    fn wait_for(done: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !done() {
            assert!(Instant::now() < deadline, "timed out");
            thread::sleep(Duration::from_millis(2));
        }
    }

    fn contents(o: &Orchestrator) -> Vec<String> {
        o.history()
            .as_context()
            .iter()
            .map(|t| t.content.clone())
            .collect()
    }

    fn in_state(state: AssistantState) -> impl Fn(&Orchestrator) -> bool {
        move |o: &Orchestrator| o.current_state() == state
    }

    #[test]
    fn test_full_turn() {
        let mut h = harness(
            vec![Some("hello max")],
            vec![Some("hi there")],
            MockSpeech::holding(),
        );
        let o = &mut h.orchestrator;
        assert!(!o.is_gated());

        assert!(o.handle_start_interaction());
        assert_eq!(o.current_state(), AssistantState::Listening);
        assert!(o.is_gated());

        drive_until(o, in_state(AssistantState::Speaking));
        assert_eq!(
            o.history().as_context(),
            &[
                ConversationTurn::user("hello max"),
                ConversationTurn::assistant("hi there")
            ]
        );
        wait_for(|| h.speech.is_speaking());
        assert_eq!(h.speech.spoken(), vec!["hi there".to_string()]);

        h.speech.release();
        drive_until(o, in_state(AssistantState::Idle));
        assert!(!o.is_gated());
        assert_eq!(
            *h.states.lock().unwrap(),
            vec![
                AssistantState::Listening,
                AssistantState::Thinking,
                AssistantState::Speaking,
                AssistantState::Idle
            ]
        );
    }

    #[test]
    fn test_reply_sees_new_user_turn() {
        let replier = MockReply::scripted(vec![Some("four".into())]);
        let log = replier.history_log();
        let mut h = harness_with(
            utterance(),
            MockTranscriber::scripted(vec![Some("two plus two".into())]),
            replier,
            MockSpeech::instant(),
            OrchestratorConfig {
                recording: quick_recording(),
                ..OrchestratorConfig::default()
            },
        );
        let o = &mut h.orchestrator;
        o.handle_start_interaction();
        drive_until(o, |o| {
            o.current_state() == AssistantState::Idle && o.history().len() == 2
        });
        assert_eq!(
            *log.lock().unwrap(),
            vec![vec![ConversationTurn::user("two plus two")]]
        );
    }

    #[test]
    fn test_empty_transcript_returns_to_idle() {
        let mut h = harness(vec![None], vec![], MockSpeech::instant());
        let o = &mut h.orchestrator;
        o.handle_start_interaction();
        drive_until(o, in_state(AssistantState::Idle));
        assert!(o.history().is_empty());
        assert!(h.speech.spoken().is_empty());
        assert_eq!(
            *h.states.lock().unwrap(),
            vec![AssistantState::Listening, AssistantState::Idle]
        );
    }

    #[test]
    fn test_missing_microphone_returns_to_idle() {
        let transcriber = MockTranscriber::scripted(vec![Some("unused".into())]);
        let calls = transcriber.call_counter();
        let mut h = harness_with(
            Arc::new(UnavailableAudio),
            transcriber,
            MockReply::scripted(vec![]),
            MockSpeech::instant(),
            OrchestratorConfig::default(),
        );
        let o = &mut h.orchestrator;
        assert!(o.handle_start_interaction());
        drive_until(o, in_state(AssistantState::Idle));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(o.history().is_empty());
    }

    #[test]
    fn test_reply_failure_speaks_apology() {
        let mut h = harness(vec![Some("what is love")], vec![None], MockSpeech::holding());
        let o = &mut h.orchestrator;
        o.handle_start_interaction();
        drive_until(o, in_state(AssistantState::Speaking));
        wait_for(|| h.speech.is_speaking());
        assert_eq!(
            h.speech.spoken(),
            vec!["Sorry, I had trouble thinking about that.".to_string()]
        );
        assert_eq!(o.history().as_context(), &[ConversationTurn::user("what is love")]);

        h.speech.release();
        drive_until(o, in_state(AssistantState::Idle));
        assert_eq!(o.history().len(), 1);
    }

    #[test]
    fn test_cancel_ignored_while_listening() {
        let audio = Arc::new(ScriptedAudio::new(16_000, Vec::new(), ScriptEnd::Quiet));
        let mut h = harness_with(
            audio,
            MockTranscriber::scripted(vec![]),
            MockReply::scripted(vec![]),
            MockSpeech::instant(),
            OrchestratorConfig {
                recording: RecordingConfig {
                    max_duration_ms: 1000,
                    chunk_timeout_ms: 20,
                    ..RecordingConfig::default()
                },
                ..OrchestratorConfig::default()
            },
        );
        let o = &mut h.orchestrator;
        o.handle_start_interaction();
        assert!(!o.handle_cancel());
        assert_eq!(o.current_state(), AssistantState::Listening);
        assert!(o.is_gated());
        assert_eq!(h.speech.cancel_count(), 0);
    }

    #[test]
    fn test_start_ignored_while_busy() {
        let audio = ScriptedAudio::new(16_000, Vec::new(), ScriptEnd::Quiet);
        let opens = audio.open_counter();
        let mut h = harness_with(
            Arc::new(audio),
            MockTranscriber::scripted(vec![]),
            MockReply::scripted(vec![]),
            MockSpeech::instant(),
            OrchestratorConfig {
                recording: RecordingConfig {
                    max_duration_ms: 1000,
                    chunk_timeout_ms: 20,
                    ..RecordingConfig::default()
                },
                ..OrchestratorConfig::default()
            },
        );
        let o = &mut h.orchestrator;
        assert!(o.handle_start_interaction());
        assert!(!o.handle_start_interaction());
        assert!(!o.handle_start_interaction());
        wait_for(|| opens.load(Ordering::SeqCst) == 1);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(opens.load(Ordering::SeqCst), 1);
        assert_eq!(h.states.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_cancel_while_speaking() {
        let mut h = harness(
            vec![Some("tell me a story")],
            vec![Some("once upon a time")],
            MockSpeech::holding(),
        );
        let o = &mut h.orchestrator;
        o.handle_start_interaction();
        drive_until(o, in_state(AssistantState::Speaking));
        wait_for(|| h.speech.is_speaking());

        assert!(o.handle_cancel());
        assert_eq!(o.current_state(), AssistantState::Idle);
        assert!(!o.is_gated());
        assert_eq!(h.speech.cancel_count(), 1);

        // The interrupted task still reports back; it must be swallowed.
        drive_until(o, |o| o.orphaned.is_empty());
        assert_eq!(o.current_state(), AssistantState::Idle);
        assert_eq!(o.history().len(), 2);
        assert!(!o.handle_cancel());
        assert_eq!(h.speech.cancel_count(), 1);
    }

    #[test]
    fn test_restart_right_after_cancel() {
        let mut h = harness(
            vec![Some("first"), Some("second")],
            vec![Some("one"), Some("two")],
            MockSpeech::holding(),
        );
        let o = &mut h.orchestrator;
        o.handle_start_interaction();
        drive_until(o, in_state(AssistantState::Speaking));
        wait_for(|| h.speech.is_speaking());
        o.handle_cancel();

        // The late completion lands while the next turn is underway.
        assert!(o.handle_start_interaction());
        drive_until(o, |o| {
            o.current_state() == AssistantState::Speaking && o.orphaned.is_empty()
        });
        wait_for(|| h.speech.spoken().len() == 2);
        h.speech.release();
        drive_until(o, in_state(AssistantState::Idle));
        assert_eq!(contents(o), vec!["first", "one", "second", "two"]);
    }

    #[test]
    fn test_history_trimmed_after_each_reply() {
        let transcripts = (0..3).map(|n| Some(format!("q{n}"))).collect();
        let replies = (0..3).map(|n| Some(format!("a{n}"))).collect();
        let mut h = harness_with(
            utterance(),
            MockTranscriber::scripted(transcripts),
            MockReply::scripted(replies),
            MockSpeech::instant(),
            OrchestratorConfig {
                history_limit: 4,
                recording: quick_recording(),
                ..OrchestratorConfig::default()
            },
        );
        let o = &mut h.orchestrator;
        for turn in 0..3 {
            assert!(o.handle_start_interaction(), "turn {turn} did not start");
            drive_until(o, |o| {
                o.current_state() == AssistantState::Idle && o.in_flight.is_none()
            });
        }
        assert_eq!(contents(o), vec!["q1", "a1", "q2", "a2"]);
    }

    #[test]
    fn test_unexpected_message_is_violation() {
        let mut h = harness(vec![], vec![], MockSpeech::instant());
        let o = &mut h.orchestrator;
        o.transcript_tx
            .send(Envelope {
                task: TaskId::new(),
                outcome: TranscriptOutcome::Ready("ghost".into()),
            })
            .unwrap();
        let err = o.poll().unwrap_err();
        assert!(matches!(
            err,
            AssistantError::ProtocolViolation {
                state: AssistantState::Idle,
                kind: TaskKind::Recording,
                ..
            }
        ));
    }

    #[test]
    fn test_unknown_speech_completion_is_violation() {
        let mut h = harness(vec![], vec![], MockSpeech::instant());
        let o = &mut h.orchestrator;
        o.response_tx
            .send(Envelope {
                task: TaskId::new(),
                outcome: ResponseOutcome::SpeechDone,
            })
            .unwrap();
        assert!(o.poll().is_err());
    }

    #[test]
    fn test_shutdown_stops_speech() {
        let mut h = harness(vec![Some("hi")], vec![Some("hello")], MockSpeech::holding());
        let o = &mut h.orchestrator;
        o.handle_start_interaction();
        drive_until(o, in_state(AssistantState::Speaking));
        wait_for(|| h.speech.is_speaking());
        o.shutdown();
        assert_eq!(o.current_state(), AssistantState::Idle);
        wait_for(|| !h.speech.is_speaking());
    }
}
