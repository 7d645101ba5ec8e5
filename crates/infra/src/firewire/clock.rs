//! Simulated device clock

use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;
use fwpcm_core::domain::audio::{ClockError, ClockProvider, ClockSource};

#[derive(Debug)]
struct ClockState {
    source: ClockSource,
    rate: u32,
    unreachable: bool,
}

/// Clock whose source and rate are set by the test or the transport
#[derive(Debug)]
pub struct SimulatedClock {
    state: Mutex<ClockState>,
}

impl SimulatedClock {
    pub fn new(source: ClockSource, rate: u32) -> Self {
        Self {
            state: Mutex::new(ClockState {
                source,
                rate,
                unreachable: false,
            }),
        }
    }

    /// Internal clock at 48 kHz
    pub fn internal() -> Self {
        Self::new(ClockSource::Internal, 48000)
    }

    fn lock(&self) -> MutexGuard<'_, ClockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_source(&self, source: ClockSource) {
        debug!(?source, "Clock source changed");
        self.lock().source = source;
    }

    pub fn set_rate(&self, rate: u32) {
        debug!(rate, "Clock rate changed");
        self.lock().rate = rate;
    }

    /// Make every query fail until cleared
    pub fn set_unreachable(&self, unreachable: bool) {
        self.lock().unreachable = unreachable;
    }
}

impl Default for SimulatedClock {
    fn default() -> Self {
        Self::internal()
    }
}

impl ClockProvider for SimulatedClock {
    fn current_clock_source(&self) -> Result<ClockSource, ClockError> {
        let state = self.lock();
        if state.unreachable {
            return Err(ClockError::Unreachable("simulated clock offline".to_string()));
        }
        Ok(state.source)
    }

    fn current_rate(&self) -> Result<u32, ClockError> {
        let state = self.lock();
        if state.unreachable {
            return Err(ClockError::ReadFailed("simulated clock offline".to_string()));
        }
        Ok(state.rate)
    }
}
