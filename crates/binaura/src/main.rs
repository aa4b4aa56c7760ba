//! Binaura - system-wide binaural spatialization daemon
//!
//! Routes an aggregate device's input (typically a virtual loopback the
//! system mixes into) through an HRIR preset and out to headphones. Device
//! choices are remembered by UID and survive unplugging and replugging.
//!
//! ## Command line flags
//!
//! - `--list-devices`: print aggregates and their sub-devices, then exit
//! - `--render <preset.wav> <input.wav> <output.wav>`: spatialize a file offline
//! - `--start`: start streaming even if auto-start is off

mod daemon;
mod offline;

use std::path::Path;

use anyhow::{bail, Result};

use binaura_core::config::{default_config_path, load_config, EngineConfig};
use binaura_core::device::{DeviceInspector, Topology};
use binaura_core::hal::CpalHal;

const USAGE: &str = "usage: binaura [--start] | --list-devices | --render <preset.wav> <input.wav> <output.wav>";

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    // Initialize logger - set RUST_LOG=debug for verbose output
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    if args.iter().any(|arg| arg == "--help" || arg == "-h") {
        println!("{}", USAGE);
        return Ok(());
    }

    let engine_path = default_config_path("engine.yaml");
    let config: EngineConfig = load_config(&engine_path);
    log::info!(
        "Engine config: block {} @ {} Hz, presets in {}",
        config.block_size,
        config.sample_rate,
        config.preset_dir().display()
    );

    if args.iter().any(|arg| arg == "--list-devices") {
        return list_devices(&config);
    }

    if let Some(pos) = args.iter().position(|arg| arg == "--render") {
        let files = &args[pos + 1..];
        if files.len() < 3 {
            bail!("{}", USAGE);
        }
        return offline::render_file(
            &config,
            Path::new(&files[0]),
            Path::new(&files[1]),
            Path::new(&files[2]),
        );
    }

    let force_start = args.iter().any(|arg| arg == "--start");
    daemon::run(config, force_start)
}

fn list_devices(config: &EngineConfig) -> Result<()> {
    let hal = CpalHal::new(config.poll_interval());
    let topology = Topology::capture(&hal)?;
    let inspector = DeviceInspector::new(&config.loopback_patterns);

    let aggregates: Vec<_> = topology
        .devices()
        .iter()
        .filter(|d| DeviceInspector::is_aggregate(d))
        .collect();
    if aggregates.is_empty() {
        println!("No audio devices found");
        return Ok(());
    }

    for aggregate in aggregates {
        println!(
            "{}  [{}]  {} in / {} out @ {} Hz",
            aggregate.name,
            aggregate.uid,
            aggregate.input_channels,
            aggregate.output_channels,
            aggregate.sample_rate
        );

        let subs = inspector.list_sub_devices(&topology, aggregate);
        for route in &subs.outputs {
            println!("    out {:>7}  {}  [{}]", route.range.to_string(), route.device.name, route.uid());
        }
        for route in &subs.inputs {
            let loopback = topology
                .by_uid(route.uid())
                .is_some_and(|d| inspector.is_loopback(d));
            println!(
                "    in  {:>7}  {}  [{}]{}",
                route.range.to_string(),
                route.device.name,
                route.uid(),
                if loopback { "  (loopback)" } else { "" }
            );
        }
        for uid in &subs.missing {
            println!("    missing  [{}]", uid);
        }
    }
    Ok(())
}
