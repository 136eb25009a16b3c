//! Lockstep Engine -- fixed-timestep driver for the lockstep simulation core.
//!
//! This crate builds on [`lockstep_core`] to provide the simulation driver: a
//! tick loop that routes queued commands in a deterministic order, runs the
//! world's phases and takes a state digest after every tick, plus
//! command-stream recording and replay for verifying determinism.
//!
//! # Quick Start
//!
//! ```
//! use lockstep_engine::prelude::*;
//! use lockstep_engine::scenario::construct_demo;
//!
//! let mut first = construct_demo(WorldConfig::default(), TickConfig::default()).unwrap();
//! let mut second = construct_demo(WorldConfig::default(), TickConfig::default()).unwrap();
//!
//! let digests = first.tick_loop.run_ticks(100);
//! assert_eq!(digests, second.tick_loop.run_ticks(100));
//! assert_eq!(first.tick_loop.tick_count(), 100);
//! ```

#![deny(unsafe_code)]

pub mod replay;
pub mod scenario;
pub mod tick;

/// Re-export the core crate for convenience.
pub use lockstep_core;

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common engine usage.
pub mod prelude {
    pub use lockstep_core::prelude::*;

    pub use crate::replay::{
        replay, ReplayDivergence, ReplayEntry, ReplayLog, ReplayRecorder, ReplayResult,
    };
    pub use crate::tick::{TickConfig, TickDiagnostics, TickLoop, TickReport};
}
