//! fwpcm CLI Application

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use fwpcm_core::domain::{
    initial_window, ClockSource, ConfigManager, Device, DeviceProfile, Direction, HwConstraints,
    Interval, MidiPorts, PcmError, ProfileManager, ProfileWatcher, TriggerCommand,
};
use fwpcm_infra::firewire::{LoopbackTransport, SharedFormats, SimulatedClock};

#[derive(Parser)]
#[command(name = "fwpcm")]
#[command(about = "Rate/channel negotiation for multichannel audio interfaces", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Device profile (TOML); defaults to the one in the main config
    #[arg(short, long, global = true)]
    profile: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum DirectionArg {
    Capture,
    Playback,
}

impl From<DirectionArg> for Direction {
    fn from(arg: DirectionArg) -> Self {
        match arg {
            DirectionArg::Capture => Direction::Capture,
            DirectionArg::Playback => Direction::Playback,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ClockArg {
    Internal,
    Word,
    Spdif,
    Adat,
}

impl From<ClockArg> for ClockSource {
    fn from(arg: ClockArg) -> Self {
        match arg {
            ClockArg::Internal => ClockSource::Internal,
            ClockArg::Word => ClockSource::WordOnBnc,
            ClockArg::Spdif => ClockSource::SpdifCoax,
            ClockArg::Adat => ClockSource::AdatOptical,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Print the capability window before any refinement
    Window {
        #[arg(short, long, value_enum, default_value = "capture")]
        direction: DirectionArg,
    },

    /// Narrow a proposal to its negotiation fixed point
    Refine {
        #[arg(short, long, value_enum, default_value = "capture")]
        direction: DirectionArg,

        /// Rate proposal, `N` or `MIN..MAX`
        #[arg(long)]
        rate: Option<Interval>,

        /// Channel proposal, `N` or `MIN..MAX`
        #[arg(long)]
        channels: Option<Interval>,
    },

    /// Run an open/prepare/trigger/close cycle against simulated hardware
    Simulate {
        /// Rate to commit; defaults to the lowest legal rate
        #[arg(long)]
        rate: Option<u32>,

        /// Clock source the simulated device is locked to
        #[arg(long, value_enum, default_value = "internal")]
        clock: ClockArg,

        /// Rate the simulated clock reports before any stream starts
        #[arg(long, default_value_t = 48000)]
        clock_rate: u32,
    },

    /// Watch the profile directory and print windows as profiles change
    Watch,

    /// Manage the profile directory
    Profiles {
        #[command(subcommand)]
        action: ProfileAction,
    },
}

#[derive(Subcommand)]
enum ProfileAction {
    /// List saved profiles
    List,

    /// Save the factory default profile under NAME
    Init { name: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();

    tracing::info!("fwpcm starting");

    match cli.command {
        Commands::Window { direction } => {
            let profile = load_profile(cli.profile.as_deref()).await?;
            print_window(&profile, direction.into(), cli.json)?;
        }
        Commands::Refine {
            direction,
            rate,
            channels,
        } => {
            let profile = load_profile(cli.profile.as_deref()).await?;
            refine(
                &profile,
                direction.into(),
                rate.unwrap_or_else(Interval::full),
                channels.unwrap_or_else(Interval::full),
                cli.json,
            )?;
        }
        Commands::Simulate {
            rate,
            clock,
            clock_rate,
        } => {
            let profile = load_profile(cli.profile.as_deref()).await?;
            simulate(&profile, rate, clock.into(), clock_rate)?;
        }
        Commands::Watch => watch(cli.profile.as_deref()).await?,
        Commands::Profiles { action } => profiles(action).await?,
    }

    Ok(())
}

async fn load_profile(path: Option<&Path>) -> anyhow::Result<DeviceProfile> {
    if let Some(path) = path {
        return DeviceProfile::load_from_file(path)
            .await
            .with_context(|| format!("loading profile {}", path.display()));
    }

    let manager = ConfigManager::new(ConfigManager::default_config_dir()?);
    let config = manager.load().await;

    match &config.app.default_profile {
        Some(name) => Ok(ProfileManager::new(config.app.profile_dir.clone())
            .load_profile(name)
            .await?),
        None => Ok(config.device),
    }
}

fn print_window(profile: &DeviceProfile, direction: Direction, json: bool) -> anyhow::Result<()> {
    let window = initial_window(profile.formats.for_direction(direction));

    if json {
        println!("{}", serde_json::to_string_pretty(&window)?);
        return Ok(());
    }

    let rates: Vec<String> = window
        .rate_mask
        .standard_rates()
        .map(|rate| rate.to_string())
        .collect();

    println!("{} {}", profile.name, direction);
    println!("  rates     {}", window.rates);
    println!("  channels  {}", window.channels);
    println!("  legal     {}", rates.join(", "));

    if let Some(ports) = MidiPorts::from_formats(&profile.formats) {
        println!("  midi      {}", ports.port_names(&profile.name, direction).join(", "));
    }

    Ok(())
}

fn refine(
    profile: &DeviceProfile,
    direction: Direction,
    rates: Interval,
    channels: Interval,
    json: bool,
) -> anyhow::Result<()> {
    let table = profile.formats.for_direction(direction).clone();
    let window = initial_window(&table);
    let constraints = HwConstraints::new(direction, table, window);

    match constraints.refine(rates, channels) {
        Ok(negotiated) if json => println!("{}", serde_json::to_string_pretty(&negotiated)?),
        Ok(negotiated) => {
            println!(
                "rates {} channels {} ({} rounds)",
                negotiated.rates, negotiated.channels, negotiated.rounds
            );
        }
        Err(PcmError::Unsatisfiable { rate, channels }) => {
            anyhow::bail!("parameters incompatible: rate {} channels {}", rate, channels)
        }
        Err(other) => return Err(other.into()),
    }

    Ok(())
}

fn simulate(
    profile: &DeviceProfile,
    rate: Option<u32>,
    source: ClockSource,
    clock_rate: u32,
) -> anyhow::Result<()> {
    let clock = Arc::new(SimulatedClock::new(source, clock_rate));
    let transport = Arc::new(LoopbackTransport::new().with_clock(clock.clone()));
    let formats = Arc::new(SharedFormats::from_profile(profile));
    let device = Device::attach(profile.name.clone(), transport.clone(), clock, formats);

    let mut capture = device.open_pcm(Direction::Capture)?;
    let window = *capture.window();
    println!("opened capture: rates {} channels {}", window.rates, window.channels);

    let rate = rate.unwrap_or(window.rates.min());
    let negotiated = capture.refine(Interval::single(rate), window.channels)?;
    let params = capture.hw_params(rate, negotiated.channels.max())?;
    println!("committed {} Hz, {} channels", params.rate, params.channels);

    capture.prepare()?;
    capture.trigger(TriggerCommand::Start)?;

    match device.open_midi(Direction::Capture, 0) {
        Err(PcmError::Busy) => println!("second opener while capture runs: busy"),
        Err(other) => println!("second opener failed: {}", other),
        Ok(midi) => midi.close()?,
    }

    capture.trigger(TriggerCommand::Stop)?;
    capture.hw_free()?;
    capture.close()?;

    if let Some(ports) = MidiPorts::from_formats(&device.packet_formats()?) {
        if ports.playback > 0 {
            let mut midi = device.open_midi(Direction::Playback, 0)?;
            println!("opened {}", midi.name());
            midi.trigger(true);
            midi.trigger(false);
            midi.close()?;
        }
    }

    println!("transport events:");
    for event in transport.take_events() {
        println!("  {:?}", event);
    }

    let state = device.stream_state();
    println!(
        "final: running={} substreams={} starts={} stops={}",
        state.running,
        state.active_substream_count,
        transport.start_calls(),
        transport.stop_calls()
    );

    Ok(())
}

async fn watch(profile: Option<&Path>) -> anyhow::Result<()> {
    let manager = ConfigManager::new(ConfigManager::default_config_dir()?);
    let config = manager.load().await;

    let initial = load_profile(profile).await?;
    let formats = SharedFormats::from_profile(&initial);
    let watcher = ProfileWatcher::new(config.app.profile_dir.clone()).await?;
    let mut changes = watcher.subscribe();

    println!("watching {} (ctrl-c to stop)", config.app.profile_dir.display());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = changes.recv() => {
                let path = match changed {
                    Ok(path) => path,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Missed profile change events");
                        continue;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                };

                match formats.reload(&path).await {
                    Ok(profile) => {
                        for direction in Direction::ALL {
                            print_window(&profile, direction, false)?;
                        }
                    }
                    Err(e) => tracing::error!(path = %path.display(), error = %e, "Profile reload failed"),
                }
            }
        }
    }

    Ok(())
}

async fn profiles(action: ProfileAction) -> anyhow::Result<()> {
    let manager = ConfigManager::new(ConfigManager::default_config_dir()?);
    let config = manager.load().await;
    let profiles = ProfileManager::new(config.app.profile_dir.clone());

    match action {
        ProfileAction::List => {
            for name in profiles.list_profiles().await? {
                println!("{}", name);
            }
        }
        ProfileAction::Init { name } => {
            profiles
                .save_profile(&name, &DeviceProfile::factory_default())
                .await?;
            println!("saved {}", profiles.profile_path(&name).display());
        }
    }

    Ok(())
}
