//! MIDI substreams riding on the duplex stream
//!
//! MIDI ports share the packet stream with PCM, so opening one needs the
//! duplex pair running. A MIDI opener has no rate preference and starts the
//! pair at whatever rate the clock currently runs.

use crate::domain::audio::{Direction, PcmError, Result, SubstreamId};
use crate::domain::device::Device;
use crate::domain::lock::ExclusivityToken;
use crate::domain::mode::StreamFormats;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// MIDI ports the device exposes per direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MidiPorts {
    pub capture: u32,
    pub playback: u32,
}

impl MidiPorts {
    /// Port counts, or `None` when the device has no MIDI at all
    pub fn from_formats(formats: &StreamFormats) -> Option<Self> {
        let ports = Self {
            capture: formats.midi_ports(Direction::Capture),
            playback: formats.midi_ports(Direction::Playback),
        };

        if ports.capture + ports.playback == 0 {
            None
        } else {
            Some(ports)
        }
    }

    pub fn count(&self, direction: Direction) -> u32 {
        match direction {
            Direction::Capture => self.capture,
            Direction::Playback => self.playback,
        }
    }

    /// Display names of the ports in `direction`, numbered from 1
    pub fn port_names(&self, device_name: &str, direction: Direction) -> Vec<String> {
        (0..self.count(direction))
            .filter_map(|port| u8::try_from(port).ok())
            .map(|port| midi_port_name(device_name, port))
            .collect()
    }
}

pub fn midi_port_name(device_name: &str, port: u8) -> String {
    format!("{} MIDI {}", device_name, port as u32 + 1)
}

impl Device {
    /// Open one MIDI port and make sure the duplex pair runs
    pub fn open_midi(self: &Arc<Self>, direction: Direction, port: u8) -> Result<MidiSubstream> {
        let token = self.lock().try_acquire()?;

        let formats = self.packet_formats()?;
        let available = MidiPorts::from_formats(&formats)
            .map(|ports| ports.count(direction))
            .unwrap_or(0);
        if u32::from(port) >= available {
            return Err(PcmError::NoSuchPort { direction, port });
        }

        let rate = match self.lifecycle().state().committed_rate {
            Some(rate) => rate,
            None => self.clock().current_rate()?,
        };
        self.lifecycle().join(rate)?;

        let id = self.allocate_substream_id();
        info!(
            substream = %id,
            %direction,
            port,
            "MIDI substream opened"
        );

        Ok(MidiSubstream {
            id,
            device: Arc::clone(self),
            direction,
            port,
            triggered: false,
            token: Some(token),
        })
    }
}

/// An opened MIDI port holding the device's exclusivity token
#[derive(Debug)]
pub struct MidiSubstream {
    id: SubstreamId,
    device: Arc<Device>,
    direction: Direction,
    port: u8,
    triggered: bool,
    token: Option<ExclusivityToken>,
}

impl MidiSubstream {
    pub fn id(&self) -> SubstreamId {
        self.id
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn port(&self) -> u8 {
        self.port
    }

    pub fn name(&self) -> String {
        midi_port_name(self.device.name(), self.port)
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered
    }

    /// Attach (`up`) or detach the port on the live stream
    pub fn trigger(&mut self, up: bool) {
        let substream = up.then_some(self.id);
        self.device
            .lifecycle()
            .trigger_midi(self.direction, self.port, substream);
        self.triggered = up;
        debug!(substream = %self.id, up, "MIDI trigger");
    }

    pub fn close(mut self) -> Result<()> {
        self.teardown();
        Ok(())
    }

    fn teardown(&mut self) {
        let Some(token) = self.token.take() else {
            return;
        };

        if self.triggered {
            self.trigger(false);
        }
        self.device.lifecycle().leave();
        self.device.lock().release(token);
        info!(substream = %self.id, "MIDI substream closed");
    }
}

impl Drop for MidiSubstream {
    fn drop(&mut self) {
        self.teardown();
    }
}
