//! Clock source policy
//!
//! A duplex stream's rate is a device-wide property. When the device slaves
//! to an external clock, or when either direction is already moving samples,
//! a new opener must take the rate that is currently running.

use crate::domain::audio::{ClockProvider, ClockSource, Direction, Result, Transport};
use crate::domain::interval::Interval;
use tracing::debug;

/// Narrows an opener's rate window according to the clock state
pub struct ClockPolicy<'a> {
    provider: &'a dyn ClockProvider,
}

impl<'a> ClockPolicy<'a> {
    pub fn new(provider: &'a dyn ClockProvider) -> Self {
        Self { provider }
    }

    /// Collapse `window` to the effective rate when the clock is pinned
    ///
    /// The window is returned unchanged only for the internal clock with both
    /// directions idle. Otherwise the provider is asked for the running rate;
    /// a failed query aborts the open.
    pub fn apply(
        &self,
        window: Interval,
        source: ClockSource,
        tx_running: bool,
        rx_running: bool,
    ) -> Result<Interval> {
        if source.is_internal() && !tx_running && !rx_running {
            return Ok(window);
        }

        let rate = self.provider.current_rate()?;
        debug!(
            ?source,
            tx_running,
            rx_running,
            rate,
            "Rate window pinned to current clock"
        );

        Ok(Interval::single(rate))
    }

    /// Read the clock source and direction activity, then apply the policy
    pub fn constrain(&self, window: Interval, transport: &dyn Transport) -> Result<Interval> {
        let source = self.provider.current_clock_source()?;

        self.apply(
            window,
            source,
            transport.is_direction_active(Direction::Capture),
            transport.is_direction_active(Direction::Playback),
        )
    }
}
