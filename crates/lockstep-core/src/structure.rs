//! Build-point bookkeeping for agents that are constructed by others.

use crate::catalog::StructureConfig;
use crate::math::Fixed;

#[derive(Debug, Clone)]
pub struct Structure {
    max_build_points: Fixed,
    build_points: Fixed,
    construction_started: bool,
    /// Whether other agents may walk through the footprint. Cleared once the
    /// first builder arrives.
    pub blocker_transparent: bool,
}

impl Structure {
    pub fn new(config: &StructureConfig) -> Self {
        Self {
            max_build_points: config.max_build_points,
            build_points: Fixed::ZERO,
            construction_started: false,
            blocker_transparent: true,
        }
    }

    pub(crate) fn reset(&mut self) {
        self.build_points = Fixed::ZERO;
        self.construction_started = false;
        self.blocker_transparent = true;
    }

    pub fn needs_construction(&self) -> bool {
        self.build_points < self.max_build_points
    }

    pub fn construction_started(&self) -> bool {
        self.construction_started
    }

    /// Mark the foundation as laid. Returns `false` if it already was.
    pub fn start_construction(&mut self) -> bool {
        if self.construction_started {
            return false;
        }
        self.construction_started = true;
        self.blocker_transparent = false;
        true
    }

    /// Add build points, saturating at the maximum. Returns the new total.
    pub fn build_up(&mut self, amount: Fixed) -> Fixed {
        self.build_points = (self.build_points + amount).min(self.max_build_points);
        self.build_points
    }

    pub fn build_points(&self) -> Fixed {
        self.build_points
    }

    pub fn max_build_points(&self) -> Fixed {
        self.max_build_points
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn depot(max: i32) -> Structure {
        Structure::new(&StructureConfig {
            max_build_points: Fixed::from_num(max),
        })
    }

    #[test]
    fn build_up_saturates_at_max() {
        let mut s = depot(3);
        assert!(s.needs_construction());
        assert_eq!(s.build_up(Fixed::from_num(2)), Fixed::from_num(2));
        assert_eq!(s.build_up(Fixed::from_num(2)), Fixed::from_num(3));
        assert!(!s.needs_construction());
        assert_eq!(s.build_up(Fixed::ONE), Fixed::from_num(3));
    }

    #[test]
    fn start_construction_happens_once() {
        let mut s = depot(1);
        assert!(s.blocker_transparent);
        assert!(s.start_construction());
        assert!(!s.blocker_transparent);
        assert!(!s.start_construction());
    }

    #[test]
    fn reset_clears_progress() {
        let mut s = depot(2);
        s.start_construction();
        s.build_up(Fixed::ONE);
        s.reset();
        assert_eq!(s.build_points(), Fixed::ZERO);
        assert!(!s.construction_started());
        assert!(s.blocker_transparent);
    }
}
