//! Straight-line movement and facing.
//!
//! [`Mover`] walks an agent toward a destination at a fixed speed. It has no
//! pathfinding and no collision avoidance: a separate collision layer is
//! expected to consult [`Mover::collision_stop_paused`] and
//! [`Mover::is_looking_for_stop_pause`] when it resolves contacts.
//!
//! The pause flags are one-shot. An ability raises them during its own
//! simulate step and they govern the mover's *next* step, after which they
//! clear. Abilities that want a pause to persist raise it every tick.

use crate::agent::Body;
use crate::catalog::{MoverConfig, TurnerConfig};
use crate::math::{Fixed, Vec2Fixed};

/// Cross-product tolerance under which a turn snaps to its target.
const TURN_SNAP: Fixed = Fixed::from_bits(64);

// ---------------------------------------------------------------------------
// Mover
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Mover {
    speed: Fixed,
    destination: Vec2Fixed,
    moving: bool,
    /// When set, a freshly assigned construction project does not trigger an
    /// automatic approach move; the agent keeps its current order.
    pub move_on_group_processed: bool,
    auto_stop_paused: bool,
    collision_stop_paused: bool,
    looking_for_stop_pause: bool,
}

impl Mover {
    pub fn new(config: &MoverConfig) -> Self {
        Self {
            speed: config.speed,
            destination: Vec2Fixed::ZERO,
            moving: false,
            move_on_group_processed: false,
            auto_stop_paused: false,
            collision_stop_paused: false,
            looking_for_stop_pause: false,
        }
    }

    pub(crate) fn reset(&mut self) {
        self.destination = Vec2Fixed::ZERO;
        self.moving = false;
        self.move_on_group_processed = false;
        self.auto_stop_paused = false;
        self.collision_stop_paused = false;
        self.looking_for_stop_pause = false;
    }

    pub fn start_move(&mut self, destination: Vec2Fixed) {
        self.destination = destination;
        self.moving = true;
    }

    pub fn stop_move(&mut self) {
        self.moving = false;
    }

    /// Stop as if the destination had been reached. Returns `true` when the
    /// mover was actually moving, i.e. when an arrival took place.
    pub fn arrive(&mut self) -> bool {
        let was_moving = self.moving;
        self.moving = false;
        was_moving
    }

    /// Retarget an in-flight move without restarting it.
    pub fn set_destination(&mut self, destination: Vec2Fixed) {
        self.destination = destination;
    }

    pub fn destination(&self) -> Vec2Fixed {
        self.destination
    }

    pub fn is_moving(&self) -> bool {
        self.moving
    }

    pub fn speed(&self) -> Fixed {
        self.speed
    }

    /// Suppress the within-radius auto stop for the next step.
    pub fn pause_auto_stop(&mut self) {
        self.auto_stop_paused = true;
    }

    /// Suppress collision-triggered stops for the next step.
    pub fn pause_collision_stop(&mut self) {
        self.collision_stop_paused = true;
    }

    /// Ask the collision layer to stop this agent if it gets blocked.
    pub fn start_looking_for_stop_pause(&mut self) {
        self.looking_for_stop_pause = true;
    }

    pub fn collision_stop_paused(&self) -> bool {
        self.collision_stop_paused
    }

    pub fn is_looking_for_stop_pause(&self) -> bool {
        self.looking_for_stop_pause
    }

    /// Advance one tick. Returns `true` if the agent arrived this step.
    pub(crate) fn step(&mut self, body: &mut Body, delta: Fixed) -> bool {
        let auto_stop_paused = std::mem::take(&mut self.auto_stop_paused);
        self.collision_stop_paused = false;
        self.looking_for_stop_pause = false;

        if !self.moving {
            return false;
        }

        let to_destination = self.destination - body.position;
        let remaining_sq = to_destination.fast_magnitude();
        if !auto_stop_paused && body.radius > Fixed::ZERO && remaining_sq <= body.radius * body.radius {
            self.moving = false;
            return true;
        }

        let step = self.speed * delta;
        if remaining_sq <= step * step {
            body.position = self.destination;
            self.moving = false;
            return true;
        }

        let (direction, _) = to_destination.normalize();
        body.position += direction * step;
        false
    }
}

// ---------------------------------------------------------------------------
// Turner
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Turner {
    turn_rate: Fixed,
    target: Option<Vec2Fixed>,
}

impl Turner {
    pub fn new(config: &TurnerConfig) -> Self {
        Self {
            turn_rate: config.turn_rate,
            target: None,
        }
    }

    pub(crate) fn reset(&mut self) {
        self.target = None;
    }

    /// Start turning toward a unit-length direction.
    pub fn start_turn_direction(&mut self, direction: Vec2Fixed) {
        self.target = Some(direction);
    }

    /// Start turning toward an arbitrary vector. Zero vectors are ignored.
    pub fn start_turn_vector(&mut self, vector: Vec2Fixed) {
        let (direction, magnitude) = vector.normalize();
        if magnitude != Fixed::ZERO {
            self.target = Some(direction);
        }
    }

    pub fn stop_turn(&mut self) {
        self.target = None;
    }

    pub fn is_turning(&self) -> bool {
        self.target.is_some()
    }

    pub(crate) fn step(&mut self, body: &mut Body) {
        let Some(target) = self.target else {
            return;
        };
        let (next, magnitude) = body.rotation.lerp(target, self.turn_rate).normalize();
        let settled = magnitude == Fixed::ZERO
            || (next.dot(target) > Fixed::ZERO && next.cross(target).abs() <= TURN_SNAP);
        if settled {
            body.rotation = target;
            self.target = None;
        } else {
            body.rotation = next;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
