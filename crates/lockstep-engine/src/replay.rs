//! Command-stream replay with digest checkpoints.
//!
//! A [`ReplayRecorder`] collects the commands routed each tick and a digest
//! checkpoint every `checkpoint_interval` ticks, producing a [`ReplayLog`].
//! [`replay`] feeds the log back into a [`TickLoop`] that starts from the
//! same initial state and reports the first checkpoint whose digest differs.
//!
//! Worlds are not snapshotted. The caller rebuilds the initial world (same
//! catalog, config, controllers and setup agents); the log records the
//! starting tick and digest so a mismatched setup is rejected up front.
//!
//! # Recording and replaying
//!
//! ```
//! use lockstep_engine::prelude::*;
//! use lockstep_engine::replay::{replay, ReplayRecorder};
//!
//! fn build() -> TickLoop {
//!     let catalog = AgentCatalog::from_json(r#"{ "scout": { "kind": "unit" } }"#).unwrap();
//!     let mut world = World::new(catalog, WorldConfig::default());
//!     let red = world.create_controller("red", Allegiance::Enemy).unwrap();
//!     world.create_agent_facing_right(red, "scout", Vec2Fixed::ZERO).unwrap();
//!     TickLoop::new(world, TickConfig::default())
//! }
//!
//! let mut live = build();
//! let mut recorder = ReplayRecorder::start(&live);
//! for _ in 0..64 {
//!     let report = live.tick();
//!     recorder.record_tick(&report);
//! }
//! let log = recorder.finish().unwrap();
//!
//! let result = replay(&mut build(), &log).unwrap();
//! assert!(result.completed);
//! assert!(result.first_divergence.is_none());
//! ```

use std::collections::BTreeMap;

use anyhow::{anyhow, bail, Context};
use lockstep_core::command::Command;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::tick::{TickLoop, TickReport};

// ---------------------------------------------------------------------------
// ReplayLog
// ---------------------------------------------------------------------------

/// A recorded session: where it started, the commands of every tick that had
/// any, and periodic digest checkpoints. Serializable to JSON for storage and
/// regression fixtures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayLog {
    /// Tick count of the loop when recording began.
    pub start_tick: u64,
    /// State digest of the world when recording began.
    pub initial_digest: i32,
    /// Number of ticks recorded. Replay runs exactly this many ticks.
    pub total_ticks: u64,
    /// Command and checkpoint entries in recording order.
    pub entries: Vec<ReplayEntry>,
    /// BLAKE3 hex digest of the command stream (see [`command_stream_hash`]).
    pub command_stream_hash: String,
}

/// A single entry in a [`ReplayLog`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ReplayEntry {
    /// Commands routed at the start of `tick`, in routing order.
    Commands { tick: u64, commands: Vec<Command> },
    /// State digest after `tick` ran.
    Checkpoint { tick: u64, digest: i32 },
}

/// Hash the command entries of a log: for each, the tick as little-endian
/// bytes followed by the JSON encoding of its commands.
pub fn command_stream_hash(entries: &[ReplayEntry]) -> anyhow::Result<String> {
    let mut hasher = blake3::Hasher::new();
    for entry in entries {
        if let ReplayEntry::Commands { tick, commands } = entry {
            hasher.update(&tick.to_le_bytes());
            serde_json::to_writer(&mut hasher, commands)
                .with_context(|| format!("failed to encode commands of tick {tick}"))?;
        }
    }
    Ok(hasher.finalize().to_hex().to_string())
}

// ---------------------------------------------------------------------------
// ReplayResult
// ---------------------------------------------------------------------------

/// The outcome of replaying a [`ReplayLog`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayResult {
    /// Whether every recorded tick ran without a divergence.
    pub completed: bool,
    /// Ticks executed, the diverging one included.
    pub ticks_replayed: u64,
    /// The first checkpoint whose digest did not match.
    pub first_divergence: Option<ReplayDivergence>,
}

/// A checkpoint mismatch found during replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayDivergence {
    pub tick: u64,
    pub expected_digest: i32,
    pub actual_digest: i32,
}

// ---------------------------------------------------------------------------
// ReplayRecorder
// ---------------------------------------------------------------------------

/// Records a run into a [`ReplayLog`].
///
/// Feed it the [`TickReport`] of every tick, in order. Ticks must be
/// contiguous and strictly increasing.
pub struct ReplayRecorder {
    log: ReplayLog,
    checkpoint_interval: u64,
    last: Option<(u64, i32)>,
}

impl ReplayRecorder {
    /// Create a recorder for a loop currently at `start_tick` with digest
    /// `initial_digest`. A `checkpoint_interval` of 0 records a checkpoint
    /// only for the final tick.
    pub fn new(start_tick: u64, initial_digest: i32, checkpoint_interval: u64) -> Self {
        Self {
            log: ReplayLog {
                start_tick,
                initial_digest,
                total_ticks: 0,
                entries: Vec::new(),
                command_stream_hash: String::new(),
            },
            checkpoint_interval,
            last: None,
        }
    }

    /// Create a recorder from the loop's current tick, digest and configured
    /// checkpoint interval.
    pub fn start(tick_loop: &TickLoop) -> Self {
        Self::new(
            tick_loop.tick_count(),
            tick_loop.state_digest(),
            tick_loop.config().checkpoint_interval,
        )
    }

    /// Record one executed tick.
    ///
    /// # Panics
    ///
    /// Panics if `report.tick` is not the tick after the previous report (or
    /// the start tick, for the first report).
    pub fn record_tick(&mut self, report: &TickReport) {
        let expected = match self.last {
            Some((tick, _)) => tick + 1,
            None => self.log.start_tick,
        };
        assert!(
            report.tick == expected,
            "ReplayRecorder::record_tick: got tick {}, expected tick {expected}. \
             Ticks must be recorded in order without gaps.",
            report.tick
        );

        if !report.commands.is_empty() {
            self.log.entries.push(ReplayEntry::Commands {
                tick: report.tick,
                commands: report.commands.clone(),
            });
        }

        self.log.total_ticks += 1;
        self.last = Some((report.tick, report.digest));
        if self.checkpoint_interval > 0 && self.log.total_ticks % self.checkpoint_interval == 0 {
            self.log.entries.push(ReplayEntry::Checkpoint {
                tick: report.tick,
                digest: report.digest,
            });
        }
    }

    /// Finish recording. The final tick always carries a checkpoint.
    pub fn finish(mut self) -> anyhow::Result<ReplayLog> {
        if let Some((tick, digest)) = self.last {
            let has_final = self
                .log
                .entries
                .iter()
                .any(|e| matches!(e, ReplayEntry::Checkpoint { tick: t, .. } if *t == tick));
            if !has_final {
                self.log.entries.push(ReplayEntry::Checkpoint { tick, digest });
            }
        }
        self.log.command_stream_hash = command_stream_hash(&self.log.entries)?;
        Ok(self.log)
    }
}

// ---------------------------------------------------------------------------
// replay()
// ---------------------------------------------------------------------------

/// Replay `log` on `tick_loop` and compare every checkpoint.
///
/// The loop must sit at the log's start tick with the log's initial digest
/// and no queued commands. Replay stops at the first divergence.
///
/// # Errors
///
/// Returns an error if the log is malformed (duplicate or out-of-range
/// entries, tick overflow, command stream hash mismatch) or does not match
/// the loop's starting state. All checks run before the loop is touched, so
/// on error its state is unmodified.
pub fn replay(tick_loop: &mut TickLoop, log: &ReplayLog) -> anyhow::Result<ReplayResult> {
    let start_tick = log.start_tick;
    let total_ticks = log.total_ticks;
    let end_tick = start_tick.checked_add(total_ticks).ok_or_else(|| {
        anyhow!(
            "tick range overflow: start_tick ({start_tick}) + total_ticks ({total_ticks}) exceeds u64::MAX"
        )
    })?;

    let mut command_map: BTreeMap<u64, &[Command]> = BTreeMap::new();
    let mut checkpoint_map: BTreeMap<u64, i32> = BTreeMap::new();
    for entry in &log.entries {
        let (tick, duplicate) = match entry {
            ReplayEntry::Commands { tick, commands } => {
                (*tick, command_map.insert(*tick, commands).is_some())
            }
            ReplayEntry::Checkpoint { tick, digest } => {
                (*tick, checkpoint_map.insert(*tick, *digest).is_some())
            }
        };
        if duplicate {
            bail!("replay log contains duplicate entries at tick {tick}");
        }
        if !(start_tick..end_tick).contains(&tick) {
            bail!("replay log entry at tick {tick} is outside the recorded range {start_tick}..{end_tick}");
        }
    }

    let actual_hash = command_stream_hash(&log.entries)?;
    if actual_hash != log.command_stream_hash {
        bail!(
            "command stream hash mismatch: log says {}, entries hash to {actual_hash}",
            log.command_stream_hash
        );
    }

    if tick_loop.tick_count() != start_tick {
        bail!(
            "tick loop is at tick {}, but the log starts at tick {start_tick}",
            tick_loop.tick_count()
        );
    }
    let digest = tick_loop.state_digest();
    if digest != log.initial_digest {
        bail!(
            "initial state mismatch: log starts from digest {}, tick loop is at {digest}",
            log.initial_digest
        );
    }
    let queued = tick_loop.pending_commands().len();
    if queued > 0 {
        bail!("tick loop has {queued} queued commands; replay needs an empty queue");
    }

    let mut ticks_replayed = 0;
    for tick in start_tick..end_tick {
        if let Some(commands) = command_map.get(&tick) {
            tick_loop.queue_commands(commands.iter().cloned());
        }
        let report = tick_loop.tick();
        ticks_replayed += 1;

        if let Some(&expected_digest) = checkpoint_map.get(&tick) {
            if report.digest != expected_digest {
                warn!(tick, expected_digest, actual_digest = report.digest, "replay diverged");
                return Ok(ReplayResult {
                    completed: false,
                    ticks_replayed,
                    first_divergence: Some(ReplayDivergence {
                        tick,
                        expected_digest,
                        actual_digest: report.digest,
                    }),
                });
            }
        }
    }

    info!(ticks_replayed, checkpoints = checkpoint_map.len(), "replay finished");
    Ok(ReplayResult {
        completed: true,
        ticks_replayed,
        first_divergence: None,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
