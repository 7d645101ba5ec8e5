//! Mode tables: the device's discrete (rate, channels) capability
//!
//! A device groups its sample rates into a few operating modes (low, mid and
//! high rate families). Each mode contributes a fixed number of PCM channels
//! plus a variable portion that is only usable in that mode. Tables are loaded
//! once and treated as immutable afterwards.

use crate::domain::audio::{Direction, PcmError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Clock rates supported by the transport, two per mode
pub const CLOCK_RATES: [u32; 6] = [44100, 48000, 88200, 96000, 176400, 192000];

/// Ports are addressed by `u8`
pub const MAX_MIDI_PORTS: u32 = u8::MAX as u32;

/// One operating mode of the device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatingMode {
    /// Channels always present in this mode
    pub fixed_channels: u32,

    /// Additional channels only usable in this mode
    #[serde(default)]
    pub variable_channels: u32,

    /// Sample rates belonging to this mode, ascending
    pub rates: Vec<u32>,

    /// MIDI ports carried alongside PCM in this mode
    #[serde(default)]
    pub midi_ports: u32,
}

impl OperatingMode {
    pub fn new(fixed_channels: u32, variable_channels: u32, rates: impl Into<Vec<u32>>) -> Self {
        Self {
            fixed_channels,
            variable_channels,
            rates: rates.into(),
            midi_ports: 0,
        }
    }

    pub fn with_midi_ports(mut self, ports: u8) -> Self {
        self.midi_ports = u32::from(ports);
        self
    }

    /// Total PCM channels of this mode
    pub fn channels(&self) -> u32 {
        self.fixed_channels + self.variable_channels
    }

    /// Modes without channels are disabled and never widen a window
    pub fn is_enabled(&self) -> bool {
        self.channels() > 0
    }

    pub fn supports_rate(&self, rate: u32) -> bool {
        self.rates.contains(&rate)
    }
}

/// Ordered, validated sequence of operating modes
///
/// Every rate belongs to exactly one mode.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "Vec<OperatingMode>", into = "Vec<OperatingMode>")]
pub struct ModeTable {
    modes: Vec<OperatingMode>,
}

impl ModeTable {
    pub fn new(modes: Vec<OperatingMode>) -> Result<Self> {
        let mut seen = BTreeSet::new();

        for (index, mode) in modes.iter().enumerate() {
            if mode.rates.windows(2).any(|pair| pair[0] >= pair[1]) {
                return Err(PcmError::InvalidModeTable(format!(
                    "mode {} rates are not strictly ascending: {:?}",
                    index, mode.rates
                )));
            }

            if mode.midi_ports > MAX_MIDI_PORTS {
                return Err(PcmError::InvalidModeTable(format!(
                    "mode {} has {} MIDI ports, at most {} are addressable",
                    index, mode.midi_ports, MAX_MIDI_PORTS
                )));
            }

            for &rate in &mode.rates {
                if rate == 0 {
                    return Err(PcmError::InvalidModeTable(format!(
                        "mode {} lists a zero rate",
                        index
                    )));
                }
                if !seen.insert(rate) {
                    return Err(PcmError::InvalidModeTable(format!(
                        "rate {} belongs to more than one mode",
                        rate
                    )));
                }
            }
        }

        Ok(Self { modes })
    }

    /// Build a table over `CLOCK_RATES`, pairing consecutive rates into modes
    ///
    /// `channels[i]` gives the (fixed, variable) contribution of mode `i`.
    pub fn from_clock_rates(channels: &[(u32, u32); 3]) -> Self {
        let modes = CLOCK_RATES
            .chunks(2)
            .zip(channels.iter())
            .map(|(rates, &(fixed, variable))| OperatingMode::new(fixed, variable, rates))
            .collect();

        Self { modes }
    }

    pub fn modes(&self) -> &[OperatingMode] {
        &self.modes
    }

    pub fn len(&self) -> usize {
        self.modes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modes.is_empty()
    }

    /// Every (mode, rate) pair in table order
    pub fn pairs(&self) -> impl Iterator<Item = (&OperatingMode, u32)> + '_ {
        self.modes
            .iter()
            .flat_map(|mode| mode.rates.iter().map(move |&rate| (mode, rate)))
    }

    pub fn mode_for_rate(&self, rate: u32) -> Option<&OperatingMode> {
        self.modes.iter().find(|mode| mode.supports_rate(rate))
    }

    /// Largest MIDI port count over all modes
    pub fn midi_ports(&self) -> u32 {
        self.modes.iter().map(|mode| mode.midi_ports).max().unwrap_or(0)
    }

    /// Set the MIDI port count of every mode
    pub fn with_midi_ports(mut self, ports: u8) -> Self {
        for mode in &mut self.modes {
            mode.midi_ports = u32::from(ports);
        }
        self
    }
}

impl TryFrom<Vec<OperatingMode>> for ModeTable {
    type Error = PcmError;

    fn try_from(modes: Vec<OperatingMode>) -> Result<Self> {
        Self::new(modes)
    }
}

impl From<ModeTable> for Vec<OperatingMode> {
    fn from(table: ModeTable) -> Self {
        table.modes
    }
}

/// Mode tables for both directions of the duplex stream
///
/// `tx` is what the device transmits (host capture), `rx` what it receives
/// (host playback).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StreamFormats {
    pub tx: ModeTable,
    pub rx: ModeTable,
}

impl StreamFormats {
    pub fn new(tx: ModeTable, rx: ModeTable) -> Self {
        Self { tx, rx }
    }

    pub fn for_direction(&self, direction: Direction) -> &ModeTable {
        match direction {
            Direction::Capture => &self.tx,
            Direction::Playback => &self.rx,
        }
    }

    pub fn midi_ports(&self, direction: Direction) -> u32 {
        self.for_direction(direction).midi_ports()
    }
}
