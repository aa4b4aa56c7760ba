//! Routing survives devices coming, going and being renumbered

mod common;

use binaura_core::device::{RouteDecision, TopologyError};
use binaura_core::engine::{EngineContext, EngineError, EngineEvent, PipelineState};
use binaura_core::{ChannelRange, Direction};
use common::{config, context, drain, init_logging, render, selection, virtual_hal, BLOCK};
use tempfile::TempDir;

#[test]
fn test_uid_reconnect_within_one_debounce_window() {
    let presets = TempDir::new().unwrap();
    let hal = virtual_hal(true);
    let mut ctx = context(&hal, &presets);
    ctx.start().unwrap();
    assert_eq!(hal.active_request().unwrap().output_device, 5);

    let events = ctx.events();
    drain(&events);

    // Unplug and replug coalesced into one notification: phones is now id 9
    hal.reconnect("phones", 9);
    assert_eq!(ctx.handle_topology_change().unwrap(), RouteDecision::Restart);

    assert!(ctx.is_running());
    assert_eq!(hal.open_count(), 2);
    assert_eq!(hal.active_request().unwrap().output_device, 9);

    let events = drain(&events);
    assert!(events.contains(&EngineEvent::Reconnected {
        direction: Direction::Output,
        uid: "phones".to_string(),
        id: 9,
    }));

    // Speakers were available the whole time but never chosen
    let persisted = ctx.persisted_selection();
    assert_eq!(persisted.output_uid.as_deref(), Some("phones"));
}

#[test]
fn test_disconnect_then_reconnect_resumes() {
    let presets = TempDir::new().unwrap();
    let hal = virtual_hal(false);
    let mut ctx = context(&hal, &presets);
    ctx.start().unwrap();

    let events = ctx.events();
    drain(&events);

    let mut phones = hal.remove_device("phones").unwrap();
    assert_eq!(ctx.handle_topology_change().unwrap(), RouteDecision::Disconnect);
    assert_eq!(ctx.state(), PipelineState::Stopped);

    let fault = TopologyError::Disconnected {
        direction: Direction::Output,
        uid: "phones".to_string(),
    };
    let seen = drain(&events);
    assert!(seen.contains(&EngineEvent::StateChanged(PipelineState::Stopped)));
    assert!(seen.contains(&EngineEvent::Disconnected(fault.clone())));
    assert_eq!(ctx.status().last_error, Some(EngineError::Topology(fault)));

    // A second notification while still disconnected is not reported again
    assert_eq!(ctx.handle_topology_change().unwrap(), RouteDecision::Disconnect);
    assert!(drain(&events).is_empty());

    phones.id = 9;
    hal.add_device(phones);
    assert_eq!(ctx.handle_topology_change().unwrap(), RouteDecision::Restart);

    assert!(ctx.is_running());
    assert_eq!(hal.active_request().unwrap().output_device, 9);
    assert!(drain(&events).contains(&EngineEvent::Reconnected {
        direction: Direction::Output,
        uid: "phones".to_string(),
        id: 9,
    }));
    assert_eq!(ctx.status().last_error, None);
}

#[test]
fn test_fallback_adopts_remaining_output() {
    let presets = TempDir::new().unwrap();
    let hal = virtual_hal(true);
    let mut ctx = context(&hal, &presets);
    ctx.start().unwrap();

    hal.remove_device("phones");
    assert_eq!(ctx.handle_topology_change().unwrap(), RouteDecision::Restart);

    assert!(ctx.is_running());
    assert_eq!(hal.active_request().unwrap().output_device, 2);
    assert_eq!(ctx.persisted_selection().output_uid.as_deref(), Some("speakers"));
}

#[test]
fn test_channel_shift_remaps_without_restart() {
    let presets = TempDir::new().unwrap();
    let hal = virtual_hal(true);
    let mut ctx = context(&hal, &presets);
    ctx.start().unwrap();
    let events = ctx.events();
    drain(&events);

    // Speakers grow to four channels; phones slides from 2..4 to 4..6
    hal.set_channels("speakers", 0, 4);
    assert_eq!(ctx.handle_topology_change().unwrap(), RouteDecision::Remap);
    assert_eq!(hal.open_count(), 1);

    let selection = ctx.status().selection.unwrap();
    assert_eq!(selection.output, ChannelRange::new(4, 6).unwrap());
    assert!(drain(&events).contains(&EngineEvent::Remapped(selection)));

    // The stream itself was widened, not just the published selection
    let request = hal.active_request().unwrap();
    assert_eq!(request.output_channels, 6);
    assert_eq!(request.output_span, ChannelRange::new(4, 6).unwrap());

    let output = render(&hal, &[0.5; BLOCK], &[0.25; BLOCK]);
    assert_eq!(output.channel_count(), 6);
    assert!(output.channel(4).iter().all(|&s| s == 0.5));
    assert!(output.channel(5).iter().all(|&s| s == 0.25));
    assert!(output.channel(2).iter().all(|&s| s == 0.0));
}

#[test]
fn test_channel_shift_past_stream_capacity_restarts() {
    init_logging();
    let presets = TempDir::new().unwrap();
    let hal = virtual_hal(true);
    let mut narrow = config(presets.path());
    narrow.max_channels = 4;
    let mut ctx = EngineContext::new(hal.clone(), narrow);
    ctx.restore(&selection()).unwrap();
    ctx.start().unwrap();
    let events = ctx.events();
    drain(&events);

    // Six output channels no longer fit the four the stream reserved
    hal.set_channels("speakers", 0, 4);
    assert_eq!(ctx.handle_topology_change().unwrap(), RouteDecision::Remap);
    assert!(ctx.is_running());
    assert_eq!(hal.open_count(), 2);
    assert_eq!(hal.active_request().unwrap().output_channels, 6);

    let seen = drain(&events);
    assert!(!seen.iter().any(|e| matches!(e, EngineEvent::Remapped(_))));
    assert!(seen.iter().any(|e| matches!(e, EngineEvent::RouteChanged(_))));

    let output = render(&hal, &[0.5; BLOCK], &[0.25; BLOCK]);
    assert!(output.channel(4).iter().all(|&s| s == 0.5));
    assert!(output.channel(5).iter().all(|&s| s == 0.25));
}

#[test]
fn test_aggregate_loss_is_a_disconnect() {
    let presets = TempDir::new().unwrap();
    let hal = virtual_hal(true);
    let mut ctx = context(&hal, &presets);
    ctx.start().unwrap();

    hal.remove_device("agg");
    assert_eq!(ctx.handle_topology_change().unwrap(), RouteDecision::Disconnect);
    assert!(!ctx.is_running());
    assert_eq!(
        ctx.status().last_error,
        Some(EngineError::Topology(TopologyError::DeviceNotFound("agg".to_string())))
    );
}

#[test]
fn test_unchanged_topology_keeps_stream() {
    let presets = TempDir::new().unwrap();
    let hal = virtual_hal(true);
    let mut ctx = context(&hal, &presets);
    ctx.start().unwrap();

    assert_eq!(ctx.handle_topology_change().unwrap(), RouteDecision::Unchanged);
    assert_eq!(hal.open_count(), 1);
}

#[test]
fn test_user_selection_restarts_on_new_device() {
    let presets = TempDir::new().unwrap();
    let hal = virtual_hal(true);
    let mut ctx = context(&hal, &presets);
    ctx.start().unwrap();
    let events = ctx.events();
    drain(&events);

    ctx.select_output("speakers").unwrap();
    assert_eq!(hal.active_request().unwrap().output_device, 2);

    // A user choice is a route change, not a reconnection
    let seen = drain(&events);
    assert!(seen.iter().any(|e| matches!(e, EngineEvent::RouteChanged(_))));
    assert!(!seen.iter().any(|e| matches!(e, EngineEvent::Reconnected { .. })));

    assert!(matches!(
        ctx.select_output("nowhere"),
        Err(EngineError::Topology(TopologyError::DeviceNotFound(_)))
    ));
}

#[test]
fn test_start_failure_reports_status() {
    let presets = TempDir::new().unwrap();
    let hal = virtual_hal(true);
    let mut ctx = context(&hal, &presets);
    let events = ctx.events();
    drain(&events);

    hal.fail_next_start("AudioOutputUnitStart", -66635);
    let err = ctx.start().unwrap_err();
    assert_eq!(err.status(), Some(-66635));
    assert_eq!(ctx.state(), PipelineState::Stopped);

    let seen = drain(&events);
    assert!(seen.contains(&EngineEvent::StateChanged(PipelineState::Error)));
    assert!(seen.contains(&EngineEvent::Error(err.clone())));
    assert_eq!(seen.last(), Some(&EngineEvent::StateChanged(PipelineState::Stopped)));
    assert_eq!(ctx.status().last_error, Some(err));

    // The next attempt succeeds
    ctx.start().unwrap();
    assert!(ctx.is_running());
}
