//! Duplex stream lifecycle
//!
//! Several logical substreams share one physical duplex pair. The manager
//! counts active substreams and starts the pair once, stopping it only when
//! the last substream leaves.
//!
//! Two locks:
//! - `state` serializes the counter and the running flag. It is held across
//!   transport start/stop so that a start is atomic with respect to other
//!   openers.
//! - `triggers` guards attaching substreams to the live stream. It is taken
//!   from the data-transfer context and never held across transport start.

use crate::domain::audio::{Direction, Result, SubstreamId, Transport};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// Device-wide duplex stream state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplexStreamState {
    pub active_substream_count: u32,
    pub running: bool,
    /// Valid only while `running`
    pub committed_rate: Option<u32>,
}

/// Result of `ensure_started`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// The transport was brought up at this rate
    Started(u32),
    /// Already running at the committed rate; nothing done
    AlreadyRunning(u32),
    /// No substream is counted, so there is nothing to start for
    NoSubstreams,
}

#[derive(Debug, Default)]
struct TriggerSlots {
    pcm: [Option<SubstreamId>; 2],
    midi: Vec<(Direction, u8, SubstreamId)>,
}

/// Reference-counted start/stop of the physical duplex pair
pub struct DuplexLifecycle {
    transport: Arc<dyn Transport>,
    state: Mutex<DuplexStreamState>,
    triggers: Mutex<TriggerSlots>,
}

impl DuplexLifecycle {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            state: Mutex::new(DuplexStreamState::default()),
            triggers: Mutex::new(TriggerSlots::default()),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, DuplexStreamState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_triggers(&self) -> MutexGuard<'_, TriggerSlots> {
        self.triggers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Snapshot of the counter and running flag
    pub fn state(&self) -> DuplexStreamState {
        *self.lock_state()
    }

    pub fn is_running(&self) -> bool {
        self.lock_state().running
    }

    /// Count one more active substream; returns the new count
    pub fn add_substream(&self) -> u32 {
        let mut state = self.lock_state();
        state.active_substream_count += 1;
        debug!(count = state.active_substream_count, "Substream counted");
        state.active_substream_count
    }

    /// Count one substream fewer; returns the new count
    pub fn remove_substream(&self) -> u32 {
        let mut state = self.lock_state();
        Self::decrement(&mut state);
        state.active_substream_count
    }

    fn decrement(state: &mut DuplexStreamState) {
        if state.active_substream_count == 0 {
            warn!("Substream count already zero");
            return;
        }
        state.active_substream_count -= 1;
        debug!(count = state.active_substream_count, "Substream released");
    }

    /// Make sure the duplex pair runs
    ///
    /// Idempotent while running: the committed rate is kept whatever `rate`
    /// asks for. A transport failure leaves the state untouched.
    pub fn ensure_started(&self, rate: u32) -> Result<StartOutcome> {
        let mut state = self.lock_state();
        self.start_locked(&mut state, rate)
    }

    fn start_locked(&self, state: &mut DuplexStreamState, rate: u32) -> Result<StartOutcome> {
        if state.active_substream_count == 0 {
            return Ok(StartOutcome::NoSubstreams);
        }

        if state.running {
            let committed = state.committed_rate.unwrap_or(rate);
            if committed != rate {
                warn!(committed, requested = rate, "Duplex already running at another rate");
            }
            return Ok(StartOutcome::AlreadyRunning(committed));
        }

        self.transport.start_duplex(rate)?;

        state.running = true;
        state.committed_rate = Some(rate);
        info!(rate, count = state.active_substream_count, "Duplex stream started");

        Ok(StartOutcome::Started(rate))
    }

    /// Stop the duplex pair if no substream remains; returns whether it stopped
    pub fn ensure_stopped(&self) -> bool {
        let mut state = self.lock_state();
        self.stop_locked(&mut state)
    }

    fn stop_locked(&self, state: &mut DuplexStreamState) -> bool {
        if state.active_substream_count > 0 || !state.running {
            return false;
        }

        self.transport.stop_duplex();
        state.running = false;
        state.committed_rate = None;
        info!("Duplex stream stopped");

        true
    }

    /// Count a substream and start the pair in one step
    ///
    /// On transport failure the count is rolled back, so a later `leave`
    /// never tries to stop a stream that never started.
    pub fn join(&self, rate: u32) -> Result<StartOutcome> {
        let mut state = self.lock_state();
        state.active_substream_count += 1;

        match self.start_locked(&mut state, rate) {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                state.active_substream_count -= 1;
                warn!(rate, error = %err, "Duplex start failed, substream uncounted");
                Err(err)
            }
        }
    }

    /// Uncount a substream and stop the pair if it was the last one
    pub fn leave(&self) -> bool {
        let mut state = self.lock_state();
        Self::decrement(&mut state);
        self.stop_locked(&mut state)
    }

    /// Attach (Some) or detach (None) a PCM substream to the live stream
    pub fn trigger_pcm(&self, direction: Direction, substream: Option<SubstreamId>) {
        let mut slots = self.lock_triggers();
        slots.pcm[direction.index()] = substream;
        self.transport.attach_pcm(direction, substream);
    }

    /// Attach (Some) or detach (None) a MIDI substream on one port
    pub fn trigger_midi(&self, direction: Direction, port: u8, substream: Option<SubstreamId>) {
        let mut slots = self.lock_triggers();
        slots
            .midi
            .retain(|(dir, p, _)| !(*dir == direction && *p == port));
        if let Some(id) = substream {
            slots.midi.push((direction, port, id));
        }
        self.transport.attach_midi(direction, port, substream);
    }

    /// PCM substream currently attached in `direction`
    pub fn attached_pcm(&self, direction: Direction) -> Option<SubstreamId> {
        self.lock_triggers().pcm[direction.index()]
    }

    /// MIDI substream currently attached to `port`
    pub fn attached_midi(&self, direction: Direction, port: u8) -> Option<SubstreamId> {
        self.lock_triggers()
            .midi
            .iter()
            .find(|(dir, p, _)| *dir == direction && *p == port)
            .map(|(_, _, id)| *id)
    }

    pub fn is_direction_active(&self, direction: Direction) -> bool {
        self.transport.is_direction_active(direction)
    }
}
