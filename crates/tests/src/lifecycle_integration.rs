//! Integration tests for exclusivity and the duplex lifecycle
//!
//! These drive PCM and MIDI substreams through open, prepare, trigger and
//! close on a loopback transport and check what reached the transport.

use fwpcm_core::domain::{
    ClockSource, Direction, Interval, PcmError, StartOutcome, SubstreamState, TransportError,
    TriggerCommand,
};
use fwpcm_infra::firewire::TransportEvent;
use fwpcm_tests::{two_mode_formats, Rig};
use std::sync::{Arc, Barrier};
use std::thread;

// ============================================================================
// EXCLUSIVITY
// ============================================================================

#[test]
fn test_second_open_is_busy_until_first_closes() {
    let rig = Rig::new(two_mode_formats());

    let first = rig.device.open_pcm(Direction::Capture).unwrap();
    assert!(matches!(
        rig.device.open_pcm(Direction::Playback),
        Err(PcmError::Busy)
    ));

    first.close().unwrap();
    assert!(!rig.device.is_locked());
    assert!(rig.device.open_pcm(Direction::Playback).is_ok());
}

#[test]
fn test_pcm_and_midi_exclude_each_other() {
    let rig = Rig::new(two_mode_formats());

    let pcm = rig.device.open_pcm(Direction::Playback).unwrap();
    assert!(matches!(
        rig.device.open_midi(Direction::Capture, 0),
        Err(PcmError::Busy)
    ));
    drop(pcm);

    let midi = rig.device.open_midi(Direction::Capture, 0).unwrap();
    assert!(matches!(
        rig.device.open_pcm(Direction::Playback),
        Err(PcmError::Busy)
    ));
    midi.close().unwrap();
    assert!(!rig.device.is_locked());
}

#[test]
fn test_concurrent_opens_have_one_winner() {
    let rig = Rig::new(two_mode_formats());
    let barrier = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let device = Arc::clone(&rig.device);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let direction = if i % 2 == 0 {
                    Direction::Capture
                } else {
                    Direction::Playback
                };
                device.open_pcm(direction)
            })
        })
        .collect();

    // Winners stay open until every thread has finished
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let opened = results.iter().filter(|r| r.is_ok()).count();
    let busy = results
        .iter()
        .filter(|r| matches!(r, Err(PcmError::Busy)))
        .count();

    assert_eq!(opened, 1);
    assert_eq!(busy, 7);
}

// ============================================================================
// PCM LIFECYCLE
// ============================================================================

#[test]
fn test_full_pcm_cycle_reaches_transport() {
    let rig = Rig::new(two_mode_formats());
    let mut pcm = rig.device.open_pcm(Direction::Capture).unwrap();
    let id = pcm.id();

    pcm.hw_params(96000, 4).unwrap();
    assert_eq!(pcm.state(), SubstreamState::Setup);
    assert_eq!(rig.device.stream_state().active_substream_count, 1);
    assert!(!rig.device.stream_state().running);

    pcm.prepare().unwrap();
    assert_eq!(rig.transport.running_rate(), Some(96000));
    assert_eq!(rig.device.stream_state().committed_rate, Some(96000));

    pcm.trigger(TriggerCommand::Start).unwrap();
    assert_eq!(pcm.state(), SubstreamState::Running);
    assert_eq!(rig.transport.attached_pcm(Direction::Capture), Some(id));
    assert_eq!(rig.device.lifecycle().attached_pcm(Direction::Capture), Some(id));

    pcm.trigger(TriggerCommand::Stop).unwrap();
    pcm.hw_free().unwrap();
    assert!(!rig.device.stream_state().running);
    pcm.close().unwrap();

    assert_eq!(
        rig.transport.take_events(),
        vec![
            TransportEvent::Started { rate: 96000 },
            TransportEvent::PcmAttached {
                direction: Direction::Capture,
                substream: Some(id),
            },
            TransportEvent::PcmAttached {
                direction: Direction::Capture,
                substream: None,
            },
            TransportEvent::Stopped,
        ]
    );
}

#[test]
fn test_start_failure_leaves_state_consistent() {
    let rig = Rig::new(two_mode_formats());
    let mut pcm = rig.device.open_pcm(Direction::Playback).unwrap();
    pcm.hw_params(48000, 2).unwrap();

    rig.transport.fail_next_start("bus reset");
    let err = pcm.prepare().unwrap_err();
    assert!(matches!(
        err,
        PcmError::Transport(TransportError::StartFailed { rate: 48000, .. })
    ));

    let state = rig.device.stream_state();
    assert!(!state.running);
    assert_eq!(state.committed_rate, None);
    assert_eq!(pcm.state(), SubstreamState::Setup);

    // Freeing a stream that never ran must not stop the transport
    pcm.hw_free().unwrap();
    assert_eq!(rig.device.stream_state().active_substream_count, 0);
    assert_eq!(rig.transport.stop_calls(), 0);

    // The next attempt succeeds
    pcm.hw_params(48000, 2).unwrap();
    pcm.prepare().unwrap();
    assert_eq!(rig.transport.start_calls(), 1);
}

#[test]
fn test_hw_free_without_params_is_harmless() {
    let rig = Rig::new(two_mode_formats());
    let mut pcm = rig.device.open_pcm(Direction::Capture).unwrap();

    pcm.hw_free().unwrap();
    assert_eq!(pcm.state(), SubstreamState::Open);
    assert_eq!(rig.device.stream_state().active_substream_count, 0);
    assert_eq!(rig.transport.stop_calls(), 0);
}

#[test]
fn test_recommit_at_other_rate_while_running_is_rejected() {
    let rig = Rig::new(two_mode_formats());
    let mut pcm = rig.device.open_pcm(Direction::Capture).unwrap();

    pcm.hw_params(48000, 2).unwrap();
    pcm.prepare().unwrap();

    assert!(matches!(
        pcm.hw_params(96000, 4),
        Err(PcmError::Unsatisfiable { .. })
    ));
    assert_eq!(pcm.state(), SubstreamState::Prepared);
    assert_eq!(pcm.params().map(|p| p.rate), Some(48000));

    // Only the running rate is on offer until the stream stops
    let negotiated = pcm.refine(Interval::full(), Interval::full()).unwrap();
    assert_eq!(negotiated.rates, Interval::single(48000));
    assert_eq!(negotiated.channels, Interval::single(2));

    pcm.hw_params(48000, 2).unwrap();
    pcm.prepare().unwrap();
    assert_eq!(pcm.params().map(|p| p.rate), rig.transport.running_rate());
    assert_eq!(rig.transport.start_calls(), 1);
    assert_eq!(rig.device.stream_state().active_substream_count, 1);
}

#[test]
fn test_recommit_after_stop_may_change_rate() {
    let rig = Rig::new(two_mode_formats());
    let mut pcm = rig.device.open_pcm(Direction::Capture).unwrap();

    pcm.hw_params(48000, 2).unwrap();
    pcm.prepare().unwrap();
    pcm.hw_free().unwrap();
    assert!(!rig.device.stream_state().running);

    pcm.hw_params(96000, 4).unwrap();
    pcm.prepare().unwrap();
    assert_eq!(rig.transport.running_rate(), Some(96000));
}

#[test]
fn test_prepare_fails_when_stream_runs_at_other_rate() {
    let rig = Rig::new(two_mode_formats());
    let mut pcm = rig.device.open_pcm(Direction::Capture).unwrap();
    pcm.hw_params(96000, 4).unwrap();

    // Another user of the lifecycle started the pair first
    rig.device.lifecycle().join(48000).unwrap();

    assert!(matches!(pcm.prepare(), Err(PcmError::InvalidState(_))));
    assert_eq!(pcm.state(), SubstreamState::Setup);
    assert_eq!(rig.transport.running_rate(), Some(48000));
}

#[test]
fn test_state_machine_rejects_out_of_order_calls() {
    let rig = Rig::new(two_mode_formats());
    let mut pcm = rig.device.open_pcm(Direction::Capture).unwrap();

    assert!(matches!(pcm.prepare(), Err(PcmError::InvalidState(_))));
    assert!(matches!(
        pcm.trigger(TriggerCommand::Start),
        Err(PcmError::InvalidState(_))
    ));

    pcm.hw_params(44100, 2).unwrap();
    pcm.prepare().unwrap();
    pcm.trigger(TriggerCommand::Start).unwrap();

    assert!(matches!(pcm.hw_params(44100, 2), Err(PcmError::InvalidState(_))));
    assert!(matches!(pcm.hw_free(), Err(PcmError::InvalidState(_))));
}

#[test]
fn test_unsupported_trigger_commands() {
    let rig = Rig::new(two_mode_formats());
    let mut pcm = rig.device.open_pcm(Direction::Capture).unwrap();
    pcm.hw_params(44100, 2).unwrap();
    pcm.prepare().unwrap();

    assert!(matches!(pcm.trigger_raw(2), Err(PcmError::InvalidTrigger(2))));
    assert!(matches!(
        pcm.trigger(TriggerCommand::PausePush),
        Err(PcmError::InvalidTrigger(3))
    ));
    assert_eq!(pcm.state(), SubstreamState::Prepared);

    pcm.trigger_raw(1).unwrap();
    assert_eq!(pcm.state(), SubstreamState::Running);
}

#[test]
fn test_dropping_running_substream_cleans_up() {
    let rig = Rig::new(two_mode_formats());
    {
        let mut pcm = rig.device.open_pcm(Direction::Playback).unwrap();
        pcm.hw_params(88200, 4).unwrap();
        pcm.prepare().unwrap();
        pcm.trigger(TriggerCommand::Start).unwrap();
    }

    let state = rig.device.stream_state();
    assert!(!state.running);
    assert_eq!(state.active_substream_count, 0);
    assert!(!rig.device.is_locked());
    assert_eq!(rig.transport.attached_pcm(Direction::Playback), None);
    assert_eq!(rig.transport.stop_calls(), 1);
}

#[test]
fn test_detach_stops_running_transport() {
    let rig = Rig::new(two_mode_formats());
    rig.device.lifecycle().join(48000).unwrap();

    let Rig {
        transport, device, ..
    } = rig;
    drop(device);

    assert_eq!(transport.stop_calls(), 1);
    assert_eq!(transport.running_rate(), None);
}

// ============================================================================
// MIDI
// ============================================================================

#[test]
fn test_midi_open_starts_at_clock_rate() {
    let rig = Rig::with_clock(two_mode_formats(), ClockSource::Internal, 96000);

    let mut midi = rig.device.open_midi(Direction::Playback, 0).unwrap();
    assert_eq!(midi.name(), "Test Interface MIDI 1");
    assert_eq!(rig.transport.running_rate(), Some(96000));
    assert_eq!(rig.device.stream_state().active_substream_count, 1);

    midi.trigger(true);
    assert_eq!(
        rig.transport.attached_midi(Direction::Playback, 0),
        Some(midi.id())
    );

    midi.close().unwrap();
    assert!(!rig.device.stream_state().running);
    assert_eq!(rig.transport.attached_midi(Direction::Playback, 0), None);
}

#[test]
fn test_midi_open_failure_rolls_back() {
    let rig = Rig::new(two_mode_formats());
    rig.transport.fail_next_start("no isochronous channel");

    assert!(matches!(
        rig.device.open_midi(Direction::Capture, 0),
        Err(PcmError::Transport(_))
    ));
    assert_eq!(rig.device.stream_state().active_substream_count, 0);
    assert!(!rig.device.is_locked());

    let midi = rig.device.open_midi(Direction::Capture, 0).unwrap();
    midi.close().unwrap();
    assert_eq!(rig.transport.stop_calls(), 1);
}

#[test]
fn test_midi_port_outside_table_is_rejected() {
    let rig = Rig::new(two_mode_formats());

    assert!(matches!(
        rig.device.open_midi(Direction::Capture, 1),
        Err(PcmError::NoSuchPort {
            direction: Direction::Capture,
            port: 1
        })
    ));
    assert!(!rig.device.is_locked());
    assert_eq!(rig.transport.start_calls(), 0);
}

#[test]
fn test_midi_clock_failure_leaves_stream_idle() {
    let rig = Rig::new(two_mode_formats());
    rig.clock.set_unreachable(true);

    assert!(matches!(
        rig.device.open_midi(Direction::Capture, 0),
        Err(PcmError::ClockQueryFailed(_))
    ));
    assert_eq!(rig.device.stream_state().active_substream_count, 0);
    assert_eq!(rig.transport.start_calls(), 0);
}

// ============================================================================
// SHARED LIFECYCLE UNDER CONTENTION
// ============================================================================

#[test]
fn test_concurrent_joins_start_and_stop_once() {
    let rig = Rig::new(two_mode_formats());
    let joined = Arc::new(Barrier::new(6));

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let device = Arc::clone(&rig.device);
            let joined = Arc::clone(&joined);
            thread::spawn(move || {
                let outcome = device.lifecycle().join(48000).unwrap();
                joined.wait();
                device.lifecycle().leave();
                outcome
            })
        })
        .collect();

    let outcomes: Vec<StartOutcome> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let started = outcomes
        .iter()
        .filter(|o| matches!(o, StartOutcome::Started(48000)))
        .count();
    assert_eq!(started, 1);
    assert_eq!(rig.transport.start_calls(), 1);
    assert_eq!(rig.transport.stop_calls(), 1);
    assert_eq!(rig.device.stream_state().active_substream_count, 0);
}

#[test]
fn test_events_observed_from_another_thread() {
    let rig = Rig::new(two_mode_formats());
    let events = rig.transport.events();

    let observer = thread::spawn(move || events.recv().unwrap());

    let mut pcm = rig.device.open_pcm(Direction::Capture).unwrap();
    pcm.hw_params(44100, 2).unwrap();
    pcm.prepare().unwrap();

    assert_eq!(
        observer.join().unwrap(),
        TransportEvent::Started { rate: 44100 }
    );
}
