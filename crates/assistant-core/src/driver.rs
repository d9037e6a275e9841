//! Fixed-rate loop that owns the orchestrator and feeds it input.

use crate::{AssistantState, Orchestrator, Result};
use std::sync::mpsc::{Receiver, TryRecvError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Requests from input surfaces: keyboard, wake word, signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// Start when idle, interrupt when speaking, ignored otherwise.
    Interact,
    Start,
    Cancel,
    Quit,
}

pub struct UpdateLoop {
    orchestrator: Orchestrator,
    controls: Receiver<Control>,
    period: Duration,
}

impl UpdateLoop {
    pub fn new(
        orchestrator: Orchestrator,
        controls: Receiver<Control>,
        ticks_per_second: u32,
    ) -> Self {
        let period = Duration::from_secs(1) / ticks_per_second.max(1);
        Self {
            orchestrator,
            controls,
            period,
        }
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Apply pending controls, then poll once. Returns false when asked to quit
    /// or when every control sender is gone.
    pub fn tick(&mut self) -> Result<bool> {
        loop {
            match self.controls.try_recv() {
                Ok(Control::Quit) => {
                    info!("quit requested");
                    return Ok(false);
                }
                Ok(control) => self.apply(control),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    debug!("all input sources closed");
                    return Ok(false);
                }
            }
        }
        self.orchestrator.poll()?;
        Ok(true)
    }

    fn apply(&mut self, control: Control) {
        let o = &mut self.orchestrator;
        match control {
            Control::Start => {
                o.handle_start_interaction();
            }
            Control::Cancel => {
                o.handle_cancel();
            }
            Control::Interact => match o.current_state() {
                AssistantState::Idle => {
                    o.handle_start_interaction();
                }
                AssistantState::Speaking => {
                    o.handle_cancel();
                }
                state => debug!(%state, "busy, interaction ignored"),
            },
            Control::Quit => {}
        }
    }

    /// Tick until quit. A protocol violation stops the loop and is returned
    /// after speech has been silenced.
    pub fn run(mut self) -> Result<Orchestrator> {
        let result = loop {
            let started = Instant::now();
            match self.tick() {
                Ok(true) => {}
                Ok(false) => break Ok(()),
                Err(e) => break Err(e),
            }
            thread::sleep(self.period.saturating_sub(started.elapsed()));
        };
        self.orchestrator.shutdown();
        result.map(|()| self.orchestrator)
    }
}
