//! Loopback packet transport
//!
//! Stands in for the isochronous packet streams. It records what the duplex
//! lifecycle asks of it and publishes each request as a `TransportEvent` on a
//! crossbeam channel, so a caller can observe the lifecycle from another
//! thread.

use crossbeam::channel::{unbounded, Receiver, Sender};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};
use fwpcm_core::domain::audio::{Direction, SubstreamId, Transport, TransportError};

use super::SimulatedClock;

/// Something the lifecycle asked the transport to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Started { rate: u32 },
    StartFailed { rate: u32 },
    Stopped,
    PcmAttached {
        direction: Direction,
        substream: Option<SubstreamId>,
    },
    MidiAttached {
        direction: Direction,
        port: u8,
        substream: Option<SubstreamId>,
    },
}

#[derive(Debug, Default)]
struct LoopbackState {
    running_rate: Option<u32>,
    pcm: [Option<SubstreamId>; 2],
    midi: Vec<(Direction, u8, SubstreamId)>,
    fail_next_start: Option<String>,
}

/// In-memory duplex transport
pub struct LoopbackTransport {
    state: Mutex<LoopbackState>,
    clock: Option<Arc<SimulatedClock>>,
    events_tx: Sender<TransportEvent>,
    events_rx: Receiver<TransportEvent>,
    start_calls: AtomicUsize,
    stop_calls: AtomicUsize,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        let (events_tx, events_rx) = unbounded();

        Self {
            state: Mutex::new(LoopbackState::default()),
            clock: None,
            events_tx,
            events_rx,
            start_calls: AtomicUsize::new(0),
            stop_calls: AtomicUsize::new(0),
        }
    }

    /// Drive `clock` to the rate of every successful start
    pub fn with_clock(mut self, clock: Arc<SimulatedClock>) -> Self {
        self.clock = Some(clock);
        self
    }

    fn lock(&self) -> MutexGuard<'_, LoopbackState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, event: TransportEvent) {
        // The receiver lives as long as self, so this cannot fail
        let _ = self.events_tx.send(event);
    }

    /// Receiver of every event published so far and from now on
    pub fn events(&self) -> Receiver<TransportEvent> {
        self.events_rx.clone()
    }

    /// Drain pending events
    pub fn take_events(&self) -> Vec<TransportEvent> {
        self.events_rx.try_iter().collect()
    }

    /// Fail the next `start_duplex` with `reason`
    pub fn fail_next_start(&self, reason: impl Into<String>) {
        self.lock().fail_next_start = Some(reason.into());
    }

    pub fn start_calls(&self) -> usize {
        self.start_calls.load(Ordering::SeqCst)
    }

    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }

    pub fn running_rate(&self) -> Option<u32> {
        self.lock().running_rate
    }

    pub fn attached_pcm(&self, direction: Direction) -> Option<SubstreamId> {
        self.lock().pcm[direction.index()]
    }

    pub fn attached_midi(&self, direction: Direction, port: u8) -> Option<SubstreamId> {
        self.lock()
            .midi
            .iter()
            .find(|(dir, p, _)| *dir == direction && *p == port)
            .map(|(_, _, id)| *id)
    }
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for LoopbackTransport {
    fn start_duplex(&self, rate: u32) -> Result<(), TransportError> {
        let mut state = self.lock();

        if let Some(reason) = state.fail_next_start.take() {
            warn!(rate, %reason, "Simulated start failure");
            drop(state);
            self.publish(TransportEvent::StartFailed { rate });
            return Err(TransportError::StartFailed { rate, reason });
        }

        state.running_rate = Some(rate);
        drop(state);

        self.start_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(clock) = &self.clock {
            clock.set_rate(rate);
        }

        info!(rate, "Loopback duplex started");
        self.publish(TransportEvent::Started { rate });
        Ok(())
    }

    fn stop_duplex(&self) {
        let mut state = self.lock();
        state.running_rate = None;
        state.pcm = [None, None];
        state.midi.clear();
        drop(state);

        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        info!("Loopback duplex stopped");
        self.publish(TransportEvent::Stopped);
    }

    fn is_direction_active(&self, direction: Direction) -> bool {
        self.lock().pcm[direction.index()].is_some()
    }

    fn attach_pcm(&self, direction: Direction, substream: Option<SubstreamId>) {
        self.lock().pcm[direction.index()] = substream;
        debug!(%direction, ?substream, "PCM attachment changed");
        self.publish(TransportEvent::PcmAttached {
            direction,
            substream,
        });
    }

    fn attach_midi(&self, direction: Direction, port: u8, substream: Option<SubstreamId>) {
        let mut state = self.lock();
        state
            .midi
            .retain(|(dir, p, _)| !(*dir == direction && *p == port));
        if let Some(id) = substream {
            state.midi.push((direction, port, id));
        }
        drop(state);

        debug!(%direction, port, ?substream, "MIDI attachment changed");
        self.publish(TransportEvent::MidiAttached {
            direction,
            port,
            substream,
        });
    }
}
