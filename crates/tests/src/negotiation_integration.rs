//! Integration tests for parameter negotiation
//!
//! These open substreams on a simulated device and check the window each
//! opener is offered and how proposals narrow against it.

use fwpcm_core::domain::{
    ClockSource, DeviceProfile, Direction, Interval, PcmError, SubstreamId,
};
use fwpcm_core::domain::Transport;
use fwpcm_tests::{two_mode_formats, Rig};
use proptest::prelude::*;
use tempfile::TempDir;

// ============================================================================
// WINDOW AND REFINEMENT
// ============================================================================

#[test]
fn test_open_offers_full_window_on_internal_clock() {
    let rig = Rig::new(two_mode_formats());
    let pcm = rig.device.open_pcm(Direction::Playback).unwrap();

    assert_eq!(pcm.window().rates, Interval::new(44100, 96000));
    assert_eq!(pcm.window().channels, Interval::new(2, 4));
    assert_eq!(
        pcm.window().rate_mask.standard_rates().collect::<Vec<_>>(),
        vec![44100, 48000, 88200, 96000]
    );
}

#[test]
fn test_channel_choice_narrows_rates() {
    let rig = Rig::new(two_mode_formats());
    let pcm = rig.device.open_pcm(Direction::Playback).unwrap();

    let negotiated = pcm.refine(Interval::full(), Interval::single(4)).unwrap();
    assert_eq!(negotiated.rates, Interval::new(88200, 96000));
    assert_eq!(negotiated.channels, Interval::single(4));
}

#[test]
fn test_rate_choice_narrows_channels() {
    let rig = Rig::new(two_mode_formats());
    let pcm = rig.device.open_pcm(Direction::Capture).unwrap();

    let negotiated = pcm.refine(Interval::single(44100), Interval::full()).unwrap();
    assert_eq!(negotiated.rates, Interval::single(44100));
    assert_eq!(negotiated.channels, Interval::single(2));
}

#[test]
fn test_rate_range_between_modes_snaps_to_legal_rates() {
    let rig = Rig::new(two_mode_formats());
    let pcm = rig.device.open_pcm(Direction::Capture).unwrap();

    // 50000..90000 only holds 88200 of the table's rates
    let negotiated = pcm
        .refine(Interval::new(50000, 90000), Interval::full())
        .unwrap();
    assert_eq!(negotiated.rates, Interval::single(88200));
    assert_eq!(negotiated.channels, Interval::single(4));
}

#[test]
fn test_channel_count_no_mode_offers_is_unsatisfiable() {
    let rig = Rig::new(two_mode_formats());
    let pcm = rig.device.open_pcm(Direction::Capture).unwrap();

    let err = pcm.refine(Interval::full(), Interval::single(3)).unwrap_err();
    assert!(matches!(err, PcmError::Unsatisfiable { .. }));
}

#[test]
fn test_hw_params_rejects_mismatched_pair() {
    let rig = Rig::new(two_mode_formats());
    let mut pcm = rig.device.open_pcm(Direction::Capture).unwrap();

    assert!(matches!(
        pcm.hw_params(44100, 4),
        Err(PcmError::Unsatisfiable { .. })
    ));
    // A rejected commit leaves the substream uncounted
    assert_eq!(rig.device.stream_state().active_substream_count, 0);

    let params = pcm.hw_params(96000, 4).unwrap();
    assert_eq!((params.rate, params.channels), (96000, 4));
}

// ============================================================================
// CLOCK POLICY
// ============================================================================

#[test]
fn test_external_clock_pins_rate_window() {
    let rig = Rig::with_clock(two_mode_formats(), ClockSource::WordOnBnc, 96000);
    let pcm = rig.device.open_pcm(Direction::Capture).unwrap();

    assert_eq!(pcm.window().rates, Interval::single(96000));

    let negotiated = pcm.refine(Interval::full(), Interval::full()).unwrap();
    assert_eq!(negotiated.channels, Interval::single(4));
}

#[test]
fn test_active_direction_pins_rate_window() {
    let rig = Rig::new(two_mode_formats());
    rig.transport
        .attach_pcm(Direction::Playback, Some(SubstreamId::new(99)));

    let pcm = rig.device.open_pcm(Direction::Capture).unwrap();
    assert_eq!(pcm.window().rates, Interval::single(48000));
    assert!(matches!(
        pcm.refine(Interval::single(96000), Interval::full()),
        Err(PcmError::Unsatisfiable { .. })
    ));
}

#[test]
fn test_external_clock_at_unsupported_rate_leaves_nothing() {
    let rig = Rig::with_clock(two_mode_formats(), ClockSource::AdatOptical, 32000);
    let pcm = rig.device.open_pcm(Direction::Capture).unwrap();

    assert_eq!(pcm.window().rates, Interval::single(32000));
    assert!(matches!(
        pcm.refine(Interval::full(), Interval::full()),
        Err(PcmError::Unsatisfiable { .. })
    ));
}

#[test]
fn test_clock_failure_aborts_open_and_releases_lock() {
    let rig = Rig::new(two_mode_formats());
    rig.clock.set_unreachable(true);

    let err = rig.device.open_pcm(Direction::Capture).unwrap_err();
    assert!(matches!(err, PcmError::ClockQueryFailed(_)));
    assert!(!rig.device.is_locked());

    rig.clock.set_unreachable(false);
    assert!(rig.device.open_pcm(Direction::Capture).is_ok());
}

// ============================================================================
// FORMAT PROVIDER
// ============================================================================

#[test]
fn test_format_failure_aborts_open_and_releases_lock() {
    let rig = Rig::new(two_mode_formats());
    rig.formats.set_failing(true);

    let err = rig.device.open_pcm(Direction::Playback).unwrap_err();
    assert!(matches!(err, PcmError::FormatQueryFailed(_)));
    assert!(!rig.device.is_locked());
}

#[test]
fn test_open_refreshes_formats() {
    let rig = Rig::new(two_mode_formats());
    let first = rig.device.open_pcm(Direction::Capture).unwrap();
    first.close().unwrap();

    rig.formats.replace(DeviceProfile::factory_default().formats);
    let second = rig.device.open_pcm(Direction::Capture).unwrap();

    assert_eq!(second.window().rates, Interval::new(44100, 192000));
    assert_eq!(second.window().channels, Interval::new(6, 18));
    assert_eq!(rig.formats.queries(), 2);
}

#[test]
fn test_table_without_enabled_modes_cannot_open() {
    let mut formats = two_mode_formats();
    formats.rx = fwpcm_core::domain::ModeTable::from_clock_rates(&[(0, 0), (0, 0), (0, 0)]);
    let rig = Rig::new(formats);

    assert!(matches!(
        rig.device.open_pcm(Direction::Playback),
        Err(PcmError::Unsatisfiable { .. })
    ));
    assert!(!rig.device.is_locked());
    assert!(rig.device.open_pcm(Direction::Capture).is_ok());
}

#[tokio::test]
async fn test_saved_profile_drives_negotiation() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("interface.toml");
    DeviceProfile::factory_default()
        .save_to_file(&path)
        .await
        .unwrap();

    let rig = Rig::new(two_mode_formats());
    let profile = rig.formats.reload(&path).await.unwrap();
    assert_eq!(profile.name, "FireWire Interface");

    let pcm = rig.device.open_pcm(Direction::Playback).unwrap();
    let negotiated = pcm.refine(Interval::single(176400), Interval::full()).unwrap();
    assert_eq!(negotiated.channels, Interval::single(4));
}

// ============================================================================
// PROPERTIES
// ============================================================================

proptest! {
    #[test]
    fn prop_negotiated_bounds_are_achievable(
        rate_lo in 40000u32..200000,
        rate_span in 0u32..160000,
        ch_lo in 0u32..20,
        ch_span in 0u32..20,
    ) {
        let rig = Rig::new(DeviceProfile::factory_default().formats);
        let pcm = rig.device.open_pcm(Direction::Capture).unwrap();
        let rates = Interval::new(rate_lo, rate_lo.saturating_add(rate_span));
        let channels = Interval::new(ch_lo, ch_lo + ch_span);

        if let Ok(negotiated) = pcm.refine(rates, channels) {
            // Both rate bounds are concrete rates with a channel count inside
            // the negotiated channel interval
            for rate in [negotiated.rates.min(), negotiated.rates.max()] {
                let params = pcm.refine(Interval::single(rate), negotiated.channels);
                prop_assert!(params.is_ok());
            }
            prop_assert!(rates.includes(&negotiated.rates));
            prop_assert!(channels.includes(&negotiated.channels));
        }
    }
}
