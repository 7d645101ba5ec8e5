//! In-process stand-ins for the packet transport, clock and format provider
//!
//! These implement the collaborator traits of `fwpcm-core` without touching
//! hardware:
//! - `LoopbackTransport`: counts start/stop calls and records attachments
//! - `SimulatedClock`: settable clock source and rate
//! - `SharedFormats`: mode tables refreshable from a device profile

pub mod clock;
pub mod formats;
pub mod transport;

pub use clock::*;
pub use formats::*;
pub use transport::*;
