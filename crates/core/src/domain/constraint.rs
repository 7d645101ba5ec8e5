//! Hardware parameter negotiation
//!
//! This module provides:
//! - The two refinement rules (rate given channels, channels given rate)
//! - The initial capability window derived from a mode table
//! - `HwConstraints`, which drives both rules to a fixed point the way the
//!   host parameter framework does
//!
//! Rules are pure folds over every (mode, rate) pair of the table. Both
//! bounds are tracked independently and pairing is exact, so the result does
//! not depend on iteration order.

use crate::domain::audio::{Direction, PcmError, RateMask, Result};
use crate::domain::interval::Interval;
use crate::domain::mode::{ModeTable, OperatingMode};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

/// Tightest rate interval compatible with `channels`
///
/// Returns the empty interval when no mode's channel count lies in
/// `channels`; the caller rejects the request in that case.
pub fn refine_rate_given_channels(channels: &Interval, table: &ModeTable) -> Interval {
    let mut rates = Interval::empty();

    for (mode, rate) in table.pairs() {
        if !channels.contains(mode.channels()) {
            continue;
        }
        rates.fold(rate);
    }

    rates
}

/// Tightest channel interval compatible with `rates`
pub fn refine_channels_given_rate(rates: &Interval, table: &ModeTable) -> Interval {
    let mut channels = Interval::empty();

    for (mode, rate) in table.pairs() {
        if !rates.contains(rate) {
            continue;
        }
        channels.fold(mode.channels());
    }

    channels
}

/// Snap `rates` inward to the nearest legal discrete rates
///
/// The interval rules alone would accept e.g. [45000, 47000] for a table
/// holding 44100 and 48000; the discrete rate list rejects it.
pub fn refine_rate_to_legal(rates: &Interval, table: &ModeTable) -> Interval {
    let mut legal = Interval::empty();

    for (mode, rate) in table.pairs() {
        if mode.is_enabled() && rates.contains(rate) {
            legal.fold(rate);
        }
    }

    legal
}

/// Whether `rate` may be requested at all
pub fn is_legal_rate(table: &ModeTable, rate: u32) -> bool {
    table
        .mode_for_rate(rate)
        .map(OperatingMode::is_enabled)
        .unwrap_or(false)
}

/// Bounds a substream may request before any refinement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityWindow {
    pub rates: Interval,
    pub channels: Interval,
    pub rate_mask: RateMask,
}

impl CapabilityWindow {
    /// No enabled mode contributed anything
    pub fn is_empty(&self) -> bool {
        self.rates.is_empty() || self.channels.is_empty()
    }
}

/// Overall rate/channel window of a table, skipping disabled modes
pub fn initial_window(table: &ModeTable) -> CapabilityWindow {
    let mut rates = Interval::empty();
    let mut channels = Interval::empty();

    for (mode, rate) in table.pairs() {
        if !mode.is_enabled() {
            continue;
        }
        rates.fold(rate);
        channels.fold(mode.channels());
    }

    CapabilityWindow {
        rates,
        channels,
        rate_mask: supported_rate_mask(table),
    }
}

/// Supported-rates bitmask: one bit per rate passing `is_legal_rate`
pub fn supported_rate_mask(table: &ModeTable) -> RateMask {
    table
        .pairs()
        .map(|(_, rate)| rate)
        .filter(|&rate| is_legal_rate(table, rate))
        .fold(RateMask::EMPTY, |mask, rate| mask | RateMask::from_rate(rate))
}

/// Outcome of a fixed-point negotiation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Negotiated {
    pub rates: Interval,
    pub channels: Interval,
    /// Refinement rounds until neither interval narrowed
    pub rounds: usize,
}

/// Committed hardware parameters of one substream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HwParams {
    pub rate: u32,
    pub channels: u32,
}

/// Negotiation state of one opened substream
///
/// Created at open from the capability window (already narrowed by the clock
/// policy), queried while the application proposes parameters, and dropped
/// with the substream.
#[derive(Debug, Clone)]
pub struct HwConstraints {
    direction: Direction,
    table: ModeTable,
    window: CapabilityWindow,
}

impl HwConstraints {
    pub fn new(direction: Direction, table: ModeTable, window: CapabilityWindow) -> Self {
        Self {
            direction,
            table,
            window,
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn window(&self) -> &CapabilityWindow {
        &self.window
    }

    pub fn table(&self) -> &ModeTable {
        &self.table
    }

    /// Modes with at least one rate in `rates` and a channel count in `channels`
    pub fn viable_modes<'a>(
        &'a self,
        rates: &'a Interval,
        channels: &'a Interval,
    ) -> impl Iterator<Item = &'a OperatingMode> + 'a {
        self.table.modes().iter().filter(move |mode| {
            mode.is_enabled()
                && channels.contains(mode.channels())
                && mode.rates.iter().any(|&rate| rates.contains(rate))
        })
    }

    /// Narrow a proposal to the fixed point of both rules
    ///
    /// The proposal is first clipped to the window. Each round applies the
    /// rate rule, the discrete rate list, then the channel rule; the loop ends
    /// when a round changes nothing or an interval becomes empty.
    pub fn refine(&self, rates: Interval, channels: Interval) -> Result<Negotiated> {
        let mut rates = rates.intersect(&self.window.rates);
        let mut channels = channels.intersect(&self.window.channels);
        let mut rounds = 0;

        loop {
            if rates.is_empty() || channels.is_empty() {
                debug!(
                    direction = %self.direction,
                    %rates,
                    %channels,
                    "Negotiation unsatisfiable"
                );
                return Err(PcmError::Unsatisfiable {
                    rate: rates,
                    channels,
                });
            }

            rounds += 1;
            let mut changed = rates.refine(&refine_rate_given_channels(&channels, &self.table));
            changed |= rates.refine(&refine_rate_to_legal(&rates, &self.table));
            changed |= channels.refine(&refine_channels_given_rate(&rates, &self.table));

            trace!(round = rounds, %rates, %channels, changed, "Refinement round");

            if !changed {
                break;
            }
        }

        Ok(Negotiated {
            rates,
            channels,
            rounds,
        })
    }

    /// Validate a concrete (rate, channels) choice
    pub fn select(&self, rate: u32, channels: u32) -> Result<HwParams> {
        let negotiated = self.refine(Interval::single(rate), Interval::single(channels))?;
        debug_assert!(negotiated.rates.is_single() && negotiated.channels.is_single());

        Ok(HwParams { rate, channels })
    }
}
