//! Headless determinism harness.
//!
//! Runs the construct demo twice in isolated worlds, checks the per-tick
//! digests agree, then records the first run's command stream and replays it
//! against a fresh world.
//!
//! Usage: `lockstep-harness [TICKS] [REPLAY_LOG_PATH]`
//!
//! `TICKS` defaults to 320. When a path is given, the recorded replay log is
//! written there as JSON. Set `RUST_LOG` to adjust verbosity.

use anyhow::{bail, Context};
use lockstep_engine::prelude::*;
use lockstep_engine::replay::{replay, ReplayRecorder};
use lockstep_engine::scenario::construct_demo;
use tracing::info;

const DEFAULT_TICKS: u64 = 320;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let ticks = match args.next() {
        Some(arg) => arg
            .parse::<u64>()
            .with_context(|| format!("invalid tick count '{arg}'"))?,
        None => DEFAULT_TICKS,
    };
    let log_path = args.next();

    let tick_config = TickConfig {
        headless: true,
        ..TickConfig::default()
    };

    // -- two isolated runs ----------------------------------------------------

    let mut first = construct_demo(WorldConfig::default(), tick_config.clone())?;
    let mut second = construct_demo(WorldConfig::default(), tick_config.clone())?;
    let mut recorder = ReplayRecorder::start(&first.tick_loop);

    for _ in 0..ticks {
        let report = first.tick_loop.tick();
        let other = second.tick_loop.tick();
        if report.digest != other.digest {
            bail!(
                "runs diverged at tick {}: {} vs {}",
                report.tick,
                report.digest,
                other.digest
            );
        }
        recorder.record_tick(&report);
    }
    let digest = first.tick_loop.state_digest();
    info!(ticks, digest, "isolated runs agree");

    let world = first.tick_loop.world();
    if let Some(structure) = world.agent(first.site).and_then(|a| a.structure.as_ref()) {
        info!(
            build_points = %structure.build_points(),
            finished = !structure.needs_construction(),
            "red site"
        );
    }
    info!(
        red = %first.red,
        blue = %first.blue,
        worker = %first.worker,
        active = world.registry().active_count(),
        "final state"
    );

    // -- record and replay ----------------------------------------------------

    let log = recorder.finish()?;
    if let Some(path) = &log_path {
        let json = serde_json::to_string_pretty(&log).context("failed to encode replay log")?;
        std::fs::write(path, json).with_context(|| format!("failed to write replay log to {path}"))?;
        info!(path = %path, entries = log.entries.len(), "replay log written");
    }

    let mut fresh = construct_demo(WorldConfig::default(), tick_config)?;
    // The log carries the opening commands.
    fresh.tick_loop.take_pending();
    let result = replay(&mut fresh.tick_loop, &log)?;
    if let Some(divergence) = result.first_divergence {
        bail!(
            "replay diverged at tick {}: expected {}, got {}",
            divergence.tick,
            divergence.expected_digest,
            divergence.actual_digest
        );
    }
    info!(ticks = result.ticks_replayed, "replay verified");
    Ok(())
}
