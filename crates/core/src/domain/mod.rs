//! Domain entities and negotiation rules

pub mod audio;
pub mod clock;
pub mod config;
pub mod constraint;
pub mod device;
pub mod duplex;
pub mod interval;
pub mod lock;
pub mod midi;
pub mod mode;

// Re-export specific items to avoid ambiguous glob imports
pub use audio::{
    ClockError, ClockProvider, ClockSource, Direction, FormatError, FormatProvider, PcmError,
    RateMask, SubstreamId, Transport, TransportError,
};
pub use clock::ClockPolicy;
pub use config::{
    AppConfig, ConfigError, ConfigManager, DeviceProfile, FwpcmConfig, ProfileManager,
    ProfileWatcher,
};
pub use constraint::{
    initial_window, is_legal_rate, refine_channels_given_rate, refine_rate_given_channels,
    supported_rate_mask, CapabilityWindow, HwConstraints, HwParams, Negotiated,
};
pub use device::{Device, PcmSubstream, SubstreamState, TriggerCommand};
pub use duplex::{DuplexLifecycle, DuplexStreamState, StartOutcome};
pub use interval::Interval;
pub use lock::{ExclusivityLock, ExclusivityToken};
pub use midi::{MidiPorts, MidiSubstream};
pub use mode::{ModeTable, OperatingMode, StreamFormats, CLOCK_RATES};
