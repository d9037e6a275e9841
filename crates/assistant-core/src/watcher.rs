//! Background wake-word listening, muted while a turn is in flight.

use crate::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use voice_local::{AudioSource, WakeWordDetector};

/// Shared pause flag. Only the orchestrator sets it; everyone else reads.
#[derive(Debug, Clone, Default)]
pub struct WakeGate(Arc<AtomicBool>);

impl WakeGate {
    pub fn is_paused(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub(crate) fn set_paused(&self, paused: bool) {
        self.0.store(paused, Ordering::Release);
    }
}

pub struct WakeWordWatcher {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl WakeWordWatcher {
    /// Start listening on `source`. `on_wake` runs on the watcher thread for
    /// every detection while the gate is open; chunks captured while the gate
    /// is paused are discarded without reaching the detector.
    pub fn spawn<F>(
        source: Arc<dyn AudioSource>,
        detector: Box<dyn WakeWordDetector>,
        gate: WakeGate,
        poll_timeout: Duration,
        on_wake: F,
    ) -> Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        let handle = thread::Builder::new()
            .name("wake-word".into())
            .spawn(move || watch(source, detector, gate, flag, poll_timeout, on_wake))?;
        Ok(Self {
            running,
            handle: Some(handle),
        })
    }

    /// False once the watcher thread has exited, for example because the
    /// audio device could not be opened.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("wake word watcher panicked");
            }
        }
    }
}

impl Drop for WakeWordWatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn watch<F: FnMut()>(
    source: Arc<dyn AudioSource>,
    mut detector: Box<dyn WakeWordDetector>,
    gate: WakeGate,
    running: Arc<AtomicBool>,
    poll_timeout: Duration,
    mut on_wake: F,
) {
    let mut capture = match source.open() {
        Ok(capture) => capture,
        Err(e) => {
            error!("wake word audio unavailable, manual start only: {e}");
            return;
        }
    };
    info!("listening for wake word");

    let mut discarded = 0u64;
    while running.load(Ordering::Acquire) {
        match capture.next_chunk(poll_timeout) {
            Ok(Some(chunk)) => {
                if gate.is_paused() {
                    discarded += 1;
                    continue;
                }
                if detector.detect(&chunk) {
                    debug!("wake word detected");
                    on_wake();
                }
            }
            Ok(None) => {}
            Err(e) => {
                error!("wake word audio stream ended: {e}");
                break;
            }
        }
    }
    debug!(discarded, "wake word watcher stopped");
}
