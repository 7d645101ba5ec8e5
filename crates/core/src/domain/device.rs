//! Attached device and its PCM substreams
//!
//! One `Device` exists per attached interface, constructed at attach and
//! dropped at detach. It owns the exclusivity lock and the duplex lifecycle
//! and hands out substreams that follow the host framework's lifecycle:
//! open, hw_params, prepare, trigger, hw_free, close.

use crate::domain::audio::{
    ClockProvider, Direction, FormatProvider, PcmError, Result, SubstreamId, Transport,
};
use crate::domain::clock::ClockPolicy;
use crate::domain::constraint::{initial_window, CapabilityWindow, HwConstraints, HwParams, Negotiated};
use crate::domain::duplex::{DuplexLifecycle, DuplexStreamState, StartOutcome};
use crate::domain::interval::Interval;
use crate::domain::lock::{ExclusivityLock, ExclusivityToken};
use crate::domain::mode::StreamFormats;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// One attached audio interface
pub struct Device {
    name: String,
    lock: ExclusivityLock,
    lifecycle: DuplexLifecycle,
    clock: Arc<dyn ClockProvider>,
    formats: Arc<dyn FormatProvider>,
    next_substream: AtomicU32,
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("name", &self.name)
            .field("state", &self.lifecycle.state())
            .field("locked", &self.lock.is_held())
            .finish()
    }
}

impl Device {
    /// Attach a device backed by the given collaborators
    pub fn attach(
        name: impl Into<String>,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn ClockProvider>,
        formats: Arc<dyn FormatProvider>,
    ) -> Arc<Self> {
        let name = name.into();
        info!(device = %name, "Device attached");

        Arc::new(Self {
            name,
            lock: ExclusivityLock::new(),
            lifecycle: DuplexLifecycle::new(transport),
            clock,
            formats,
            next_substream: AtomicU32::new(0),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn lifecycle(&self) -> &DuplexLifecycle {
        &self.lifecycle
    }

    pub fn stream_state(&self) -> DuplexStreamState {
        self.lifecycle.state()
    }

    pub fn is_locked(&self) -> bool {
        self.lock.is_held()
    }

    pub(crate) fn lock(&self) -> &ExclusivityLock {
        &self.lock
    }

    pub(crate) fn clock(&self) -> &dyn ClockProvider {
        self.clock.as_ref()
    }

    /// Refresh the mode tables from the format provider
    pub fn packet_formats(&self) -> Result<StreamFormats> {
        Ok(self.formats.cache_packet_formats()?)
    }

    pub(crate) fn allocate_substream_id(&self) -> SubstreamId {
        SubstreamId::new(self.next_substream.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Open a PCM substream
    ///
    /// Takes the exclusivity token, refreshes formats, builds the hardware
    /// window and applies the clock policy. Any failure drops the token.
    #[instrument(skip(self), fields(device = %self.name))]
    pub fn open_pcm(self: &Arc<Self>, direction: Direction) -> Result<PcmSubstream> {
        let token = self.lock.try_acquire()?;

        let formats = self.packet_formats()?;
        let table = formats.for_direction(direction).clone();

        let mut window = initial_window(&table);
        if window.is_empty() {
            return Err(PcmError::Unsatisfiable {
                rate: window.rates,
                channels: window.channels,
            });
        }

        let policy = ClockPolicy::new(self.clock.as_ref());
        window.rates = policy.constrain(window.rates, self.lifecycle.transport().as_ref())?;

        let id = self.allocate_substream_id();
        info!(
            substream = %id,
            rates = %window.rates,
            channels = %window.channels,
            "PCM substream opened"
        );

        Ok(PcmSubstream {
            id,
            device: Arc::clone(self),
            direction,
            constraints: HwConstraints::new(direction, table, window),
            state: SubstreamState::Open,
            params: None,
            token: Some(token),
        })
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        let state = self.lifecycle.state();
        if state.running {
            warn!(device = %self.name, "Detaching with duplex stream running");
            self.lifecycle.transport().stop_duplex();
        }
        info!(device = %self.name, "Device detached");
    }
}

/// Host framework state of a PCM substream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubstreamState {
    Open,
    Setup,
    Prepared,
    Running,
}

/// Trigger commands issued by the host framework
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerCommand {
    Stop,
    Start,
    PausePush,
    PauseRelease,
    Suspend,
    Resume,
    Drain,
}

impl TriggerCommand {
    pub fn from_raw(raw: i32) -> Result<Self> {
        match raw {
            0 => Ok(TriggerCommand::Stop),
            1 => Ok(TriggerCommand::Start),
            3 => Ok(TriggerCommand::PausePush),
            4 => Ok(TriggerCommand::PauseRelease),
            5 => Ok(TriggerCommand::Suspend),
            6 => Ok(TriggerCommand::Resume),
            7 => Ok(TriggerCommand::Drain),
            other => Err(PcmError::InvalidTrigger(other)),
        }
    }

    pub fn raw(&self) -> i32 {
        match self {
            TriggerCommand::Stop => 0,
            TriggerCommand::Start => 1,
            TriggerCommand::PausePush => 3,
            TriggerCommand::PauseRelease => 4,
            TriggerCommand::Suspend => 5,
            TriggerCommand::Resume => 6,
            TriggerCommand::Drain => 7,
        }
    }
}

/// An opened PCM endpoint holding the device's exclusivity token
pub struct PcmSubstream {
    id: SubstreamId,
    device: Arc<Device>,
    direction: Direction,
    constraints: HwConstraints,
    state: SubstreamState,
    params: Option<HwParams>,
    token: Option<ExclusivityToken>,
}

impl fmt::Debug for PcmSubstream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PcmSubstream")
            .field("id", &self.id)
            .field("direction", &self.direction)
            .field("state", &self.state)
            .field("params", &self.params)
            .finish()
    }
}

impl PcmSubstream {
    pub fn id(&self) -> SubstreamId {
        self.id
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn state(&self) -> SubstreamState {
        self.state
    }

    pub fn params(&self) -> Option<HwParams> {
        self.params
    }

    /// Window the application may choose from
    pub fn window(&self) -> &CapabilityWindow {
        self.constraints.window()
    }

    /// Run the refinement rules on a proposal without committing
    ///
    /// While the duplex pair runs, only its committed rate is on offer.
    pub fn refine(&self, rates: Interval, channels: Interval) -> Result<Negotiated> {
        self.constraints
            .refine(rates.intersect(&self.running_rates()), channels)
    }

    fn running_rates(&self) -> Interval {
        self.device
            .lifecycle
            .state()
            .committed_rate
            .map(Interval::single)
            .unwrap_or_else(Interval::full)
    }

    /// Commit hardware parameters
    ///
    /// The substream is counted on its first commit only; recommitting in
    /// `Setup` or `Prepared` replaces the parameters. A running duplex pair
    /// pins the rate, so a recommit at any other rate is `Unsatisfiable`.
    pub fn hw_params(&mut self, rate: u32, channels: u32) -> Result<HwParams> {
        if self.state == SubstreamState::Running {
            return Err(PcmError::InvalidState(
                "hw_params while running".to_string(),
            ));
        }

        let running = self.running_rates();
        if !running.contains(rate) {
            debug!(
                substream = %self.id,
                rate,
                running = %running,
                "Rate differs from running stream"
            );
            return Err(PcmError::Unsatisfiable {
                rate: Interval::single(rate).intersect(&running),
                channels: Interval::single(channels),
            });
        }

        let params = self.constraints.select(rate, channels)?;

        if self.state == SubstreamState::Open {
            self.device.lifecycle.add_substream();
        }
        self.state = SubstreamState::Setup;
        self.params = Some(params);

        debug!(substream = %self.id, rate, channels, "Hardware parameters committed");
        Ok(params)
    }

    /// Release hardware parameters, stopping the duplex pair if unused
    pub fn hw_free(&mut self) -> Result<()> {
        if self.state == SubstreamState::Running {
            return Err(PcmError::InvalidState("hw_free while running".to_string()));
        }

        if self.state == SubstreamState::Open {
            self.device.lifecycle.ensure_stopped();
        } else {
            self.device.lifecycle.leave();
        }
        self.state = SubstreamState::Open;
        self.params = None;

        Ok(())
    }

    /// Make sure the duplex pair runs at the committed rate
    pub fn prepare(&mut self) -> Result<()> {
        let params = match (self.state, self.params) {
            (SubstreamState::Setup | SubstreamState::Prepared, Some(params)) => params,
            (state, _) => {
                return Err(PcmError::InvalidState(format!(
                    "prepare in state {:?}",
                    state
                )))
            }
        };

        if let StartOutcome::AlreadyRunning(committed) =
            self.device.lifecycle.ensure_started(params.rate)?
        {
            if committed != params.rate {
                return Err(PcmError::InvalidState(format!(
                    "duplex stream runs at {} Hz, substream committed {} Hz",
                    committed, params.rate
                )));
            }
        }
        self.state = SubstreamState::Prepared;

        Ok(())
    }

    /// Attach to or detach from the live stream
    pub fn trigger(&mut self, command: TriggerCommand) -> Result<()> {
        match command {
            TriggerCommand::Start => {
                if self.state != SubstreamState::Prepared {
                    return Err(PcmError::InvalidState(format!(
                        "start in state {:?}",
                        self.state
                    )));
                }
                self.device
                    .lifecycle
                    .trigger_pcm(self.direction, Some(self.id));
                self.state = SubstreamState::Running;
            }
            TriggerCommand::Stop => {
                self.device.lifecycle.trigger_pcm(self.direction, None);
                if self.state == SubstreamState::Running {
                    self.state = SubstreamState::Prepared;
                }
            }
            other => return Err(PcmError::InvalidTrigger(other.raw())),
        }

        debug!(substream = %self.id, ?command, "Trigger");
        Ok(())
    }

    /// Trigger from a raw command code
    pub fn trigger_raw(&mut self, raw: i32) -> Result<()> {
        self.trigger(TriggerCommand::from_raw(raw)?)
    }

    /// Tear down and release the exclusivity token
    pub fn close(mut self) -> Result<()> {
        self.teardown();
        Ok(())
    }

    fn teardown(&mut self) {
        let Some(token) = self.token.take() else {
            return;
        };

        if self.state == SubstreamState::Running {
            self.device.lifecycle.trigger_pcm(self.direction, None);
            self.state = SubstreamState::Prepared;
        }
        if self.state != SubstreamState::Open {
            self.device.lifecycle.leave();
            self.state = SubstreamState::Open;
        }

        self.device.lock.release(token);
        info!(substream = %self.id, "PCM substream closed");
    }
}

impl Drop for PcmSubstream {
    fn drop(&mut self) {
        self.teardown();
    }
}
