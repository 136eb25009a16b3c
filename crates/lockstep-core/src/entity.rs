//! Agent handles and ID stacks.
//!
//! An [`AgentHandle`] is a 64-bit handle that packs a *spawn version* in the
//! high 32 bits and an arena *slot* in the low 32 bits. The version is bumped
//! when a slot's life ends, whether the agent is parked in a pool or
//! discarded. A pooled agent comes back under the version it was parked with,
//! so a handle cached by an ability goes stale as soon as its target is torn
//! down, before the slot is ever reused.
//!
//! Global and local IDs are the small integers the simulation itself hands
//! out. They come from [`IdStack`]s: released IDs are pushed and the next
//! request pops the most recently released one, so ID assignment is a pure
//! function of the allocate/release history.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Per-world agent identifier. Drives the per-tick scan order.
pub type GlobalId = u16;

/// Per-controller agent identifier. Commands address agents by local ID.
pub type LocalId = u16;

// ---------------------------------------------------------------------------
// AgentHandle
// ---------------------------------------------------------------------------

/// A versioned handle to an agent slot.
///
/// Layout: `[spawn_version: u32 | slot: u32]`
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AgentHandle(u64);

impl AgentHandle {
    #[inline]
    pub fn new(slot: u32, version: u32) -> Self {
        Self((version as u64) << 32 | slot as u64)
    }

    /// The arena slot (low 32 bits).
    #[inline]
    pub fn slot(self) -> u32 {
        self.0 as u32
    }

    /// The spawn version (high 32 bits).
    #[inline]
    pub fn version(self) -> u32 {
        (self.0 >> 32) as u32
    }

    #[inline]
    pub fn to_raw(self) -> u64 {
        self.0
    }

    #[inline]
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Debug for AgentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AgentHandle({}v{})", self.slot(), self.version())
    }
}

impl fmt::Display for AgentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.slot(), self.version())
    }
}

// ---------------------------------------------------------------------------
// IdStack
// ---------------------------------------------------------------------------

/// Hands out IDs below a fixed capacity, recycling released ones LIFO.
///
/// Fresh IDs are drawn by bumping a peak counter; released IDs go on a stack
/// that is always consulted first. The stack's storage is reserved up front
/// and never grows past `capacity`.
#[derive(Debug, Clone)]
pub struct IdStack {
    open: Vec<u16>,
    peak: u32,
    capacity: u32,
}

impl IdStack {
    /// Create a stack able to issue IDs `0..capacity`.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` exceeds the `u16` ID range.
    pub fn with_capacity(capacity: u32) -> Self {
        assert!(
            capacity <= u16::MAX as u32 + 1,
            "IdStack capacity {capacity} exceeds the u16 id range"
        );
        Self {
            open: Vec::with_capacity(capacity as usize),
            peak: 0,
            capacity,
        }
    }

    /// Whether [`generate`](Self::generate) would succeed.
    #[inline]
    pub fn can_generate(&self) -> bool {
        !self.open.is_empty() || self.peak < self.capacity
    }

    /// Issue an ID: the most recently released one, else the next fresh one.
    pub fn generate(&mut self) -> Option<u16> {
        if let Some(id) = self.open.pop() {
            return Some(id);
        }
        if self.peak < self.capacity {
            let id = self.peak as u16;
            self.peak += 1;
            return Some(id);
        }
        None
    }

    /// Return an ID to the stack. It will be the next one issued.
    pub fn release(&mut self, id: u16) {
        debug_assert!((id as u32) < self.peak, "released id {id} was never issued");
        debug_assert!(!self.open.contains(&id), "id {id} released twice");
        self.open.push(id);
    }

    /// One past the highest ID ever issued.
    #[inline]
    pub fn peak(&self) -> u32 {
        self.peak
    }

    #[inline]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// IDs currently issued and not yet released.
    pub fn in_use(&self) -> usize {
        self.peak as usize - self.open.len()
    }

    /// Forget every issued ID. The peak counter restarts at zero.
    pub fn clear(&mut self) {
        self.open.clear();
        self.peak = 0;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
