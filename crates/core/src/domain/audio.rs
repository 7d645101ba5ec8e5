//! Audio device vocabulary and collaborator interfaces
//!
//! This module defines the platform-agnostic types shared by the negotiation
//! engine and the duplex lifecycle, plus the traits implemented by the
//! transport, clock and format collaborators. Simulated implementations live
//! in the `infra` crate.

use crate::domain::interval::Interval;
use crate::domain::mode::StreamFormats;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors that can occur while negotiating or driving a duplex stream
#[derive(Debug, Error)]
pub enum PcmError {
    /// Another opener currently holds the device configuration
    #[error("Device busy: configuration is held by another opener")]
    Busy,

    /// Refinement left no legal (rate, channels) combination
    #[error("Unsatisfiable parameters: rate {rate}, channels {channels}")]
    Unsatisfiable { rate: Interval, channels: Interval },

    /// The clock provider could not report the clock source or rate
    #[error("Clock query failed: {0}")]
    ClockQueryFailed(#[from] ClockError),

    /// The packet transport failed to start the duplex stream
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The format provider could not refresh the mode tables
    #[error("Format query failed: {0}")]
    FormatQueryFailed(#[from] FormatError),

    /// Trigger command the device does not support
    #[error("Invalid trigger command: {0}")]
    InvalidTrigger(i32),

    /// MIDI port outside the range advertised by the device
    #[error("No MIDI {direction} port {port}")]
    NoSuchPort { direction: Direction, port: u8 },

    /// Operation not allowed in the substream's current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Mode table violates its structural invariants
    #[error("Invalid mode table: {0}")]
    InvalidModeTable(String),
}

pub type Result<T> = std::result::Result<T, PcmError>;

/// Errors reported by a clock provider
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClockError {
    #[error("Clock source unreachable: {0}")]
    Unreachable(String),

    #[error("Clock register read failed: {0}")]
    ReadFailed(String),
}

/// Errors reported by the packet transport
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Failed to start duplex stream at {rate} Hz: {reason}")]
    StartFailed { rate: u32, reason: String },

    #[error("Transport unavailable: {0}")]
    Unavailable(String),
}

/// Errors reported by the mode/format provider
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    #[error("Packet format query failed: {0}")]
    QueryFailed(String),
}

/// Direction of a substream relative to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Device transmits, host captures
    Capture,
    /// Host plays back, device receives
    Playback,
}

impl Direction {
    pub const ALL: [Direction; 2] = [Direction::Capture, Direction::Playback];

    pub fn index(self) -> usize {
        match self {
            Direction::Capture => 0,
            Direction::Playback => 1,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Capture => write!(f, "capture"),
            Direction::Playback => write!(f, "playback"),
        }
    }
}

/// Discrete supported-rates bitmask in the host framework's bit layout
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RateMask(u32);

impl RateMask {
    pub const EMPTY: RateMask = RateMask(0);
    /// Set when a rate outside the standard table is supported
    pub const KNOT: RateMask = RateMask(1 << 31);

    const TABLE: [(u32, u32); 13] = [
        (5512, 1 << 0),
        (8000, 1 << 1),
        (11025, 1 << 2),
        (16000, 1 << 3),
        (22050, 1 << 4),
        (32000, 1 << 5),
        (44100, 1 << 6),
        (48000, 1 << 7),
        (64000, 1 << 8),
        (88200, 1 << 9),
        (96000, 1 << 10),
        (176400, 1 << 11),
        (192000, 1 << 12),
    ];

    /// Bit for a single rate; non-standard rates map to `KNOT`
    pub fn from_rate(hz: u32) -> Self {
        Self::TABLE
            .iter()
            .find(|(rate, _)| *rate == hz)
            .map(|(_, bit)| RateMask(*bit))
            .unwrap_or(Self::KNOT)
    }

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn contains(&self, other: RateMask) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }

    /// Standard rates whose bit is set, ascending
    pub fn standard_rates(&self) -> impl Iterator<Item = u32> + '_ {
        Self::TABLE
            .iter()
            .filter(move |(_, bit)| self.0 & bit != 0)
            .map(|(rate, _)| *rate)
    }
}

impl std::ops::BitOr for RateMask {
    type Output = RateMask;

    fn bitor(self, rhs: RateMask) -> RateMask {
        RateMask(self.0 | rhs.0)
    }
}

/// Sampling clock source selected on the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClockSource {
    /// Free-running internal oscillator
    Internal,
    WordOnBnc,
    SpdifCoax,
    SpdifOptical,
    AdatOptical,
    AdatOnDsub,
    SphSync,
    Unknown,
}

impl ClockSource {
    pub fn is_internal(&self) -> bool {
        matches!(self, ClockSource::Internal)
    }
}

/// Identifier of an opened logical substream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubstreamId(u32);

impl SubstreamId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn get(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for SubstreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Packet transport carrying both directions of the duplex stream
///
/// Implementations must keep `attach_*` calls short: they run inside the
/// trigger critical section, which is shared with the data-transfer context.
pub trait Transport: Send + Sync {
    /// Bring up both directions at `rate`
    fn start_duplex(&self, rate: u32) -> std::result::Result<(), TransportError>;

    /// Tear down both directions
    fn stop_duplex(&self);

    /// Whether samples are actively flowing in `direction`
    fn is_direction_active(&self, direction: Direction) -> bool;

    /// Attach (Some) or detach (None) a PCM substream to the live stream
    fn attach_pcm(&self, direction: Direction, substream: Option<SubstreamId>);

    /// Attach (Some) or detach (None) a MIDI substream to one port of the live stream
    fn attach_midi(&self, direction: Direction, port: u8, substream: Option<SubstreamId>);
}

/// Source of the device's sampling clock state
pub trait ClockProvider: Send + Sync {
    fn current_clock_source(&self) -> std::result::Result<ClockSource, ClockError>;

    fn current_rate(&self) -> std::result::Result<u32, ClockError>;
}

/// Supplier of the per-direction mode tables
pub trait FormatProvider: Send + Sync {
    /// Refresh and return the packet formats; called at every open
    fn cache_packet_formats(&self) -> std::result::Result<StreamFormats, FormatError>;
}
