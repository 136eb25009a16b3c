//! Deterministic fixed-point scalars and 2-D vectors.
//!
//! Every quantity that feeds the simulation (positions, timers, charge
//! counters, ranges) is a [`Fixed`] value: a signed 64-bit number with 16
//! fractional bits. Arithmetic on it is bit-exact on every platform, which is
//! what keeps peers in lockstep. Floating point never touches simulation
//! state.
//!
//! ```
//! use lockstep_core::math::{Fixed, Vec2Fixed};
//!
//! let a = Vec2Fixed::from_num(3, 4);
//! assert_eq!(a.fast_magnitude(), Fixed::from_num(25));
//! assert_eq!(a.magnitude(), Fixed::from_num(5));
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign};

/// Simulation scalar: 48 integer bits, 16 fractional bits.
pub type Fixed = fixed::types::I48F16;

/// Number of fractional bits in [`Fixed`].
pub const FRACTION_BITS: u32 = 16;

/// Square root of a non-negative fixed-point value.
///
/// Negative inputs yield zero. The result is the floor of the exact root in
/// raw fixed-point units, computed with integer Newton iteration.
pub fn fixed_sqrt(value: Fixed) -> Fixed {
    let bits = value.to_bits();
    if bits <= 0 {
        return Fixed::ZERO;
    }
    let scaled = (bits as u128) << FRACTION_BITS;
    Fixed::from_bits(isqrt(scaled) as i64)
}

fn isqrt(n: u128) -> u128 {
    if n < 2 {
        return n;
    }
    let mut x = n;
    let mut y = (x + 1) / 2;
    while y < x {
        x = y;
        y = (x + n / x) / 2;
    }
    x
}

// ---------------------------------------------------------------------------
// Vec2Fixed
// ---------------------------------------------------------------------------

/// A 2-D vector of [`Fixed`] components.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Vec2Fixed {
    #[serde(with = "raw_bits")]
    pub x: Fixed,
    #[serde(with = "raw_bits")]
    pub y: Fixed,
}

impl Vec2Fixed {
    pub const ZERO: Self = Self {
        x: Fixed::ZERO,
        y: Fixed::ZERO,
    };

    /// Unit vector along +x. Default facing for freshly initialized agents.
    pub const RIGHT: Self = Self {
        x: Fixed::ONE,
        y: Fixed::ZERO,
    };

    #[inline]
    pub const fn new(x: Fixed, y: Fixed) -> Self {
        Self { x, y }
    }

    /// Build a vector from whole-number coordinates.
    pub fn from_num(x: i32, y: i32) -> Self {
        Self::new(Fixed::from_num(x), Fixed::from_num(y))
    }

    /// Squared length. Cheap and exact; use it for range comparisons.
    #[inline]
    pub fn fast_magnitude(self) -> Fixed {
        self.x * self.x + self.y * self.y
    }

    pub fn magnitude(self) -> Fixed {
        fixed_sqrt(self.fast_magnitude())
    }

    #[inline]
    pub fn dot(self, other: Self) -> Fixed {
        self.x * other.x + self.y * other.y
    }

    /// The z component of the 3-D cross product.
    #[inline]
    pub fn cross(self, other: Self) -> Fixed {
        self.x * other.y - self.y * other.x
    }

    /// Unit vector in the same direction, paired with the original length.
    ///
    /// A zero vector is returned unchanged with a magnitude of zero.
    pub fn normalize(self) -> (Self, Fixed) {
        let mag = self.magnitude();
        if mag == Fixed::ZERO {
            return (self, mag);
        }
        (Self::new(self.x / mag, self.y / mag), mag)
    }

    /// Squared distance between two points.
    #[inline]
    pub fn fast_distance(self, other: Self) -> Fixed {
        (self - other).fast_magnitude()
    }

    /// Linear interpolation from `self` toward `target` by `t`.
    pub fn lerp(self, target: Self, t: Fixed) -> Self {
        self + (target - self) * t
    }

    /// Hash of the raw component bits, folded into the registry digest.
    pub fn state_hash(self) -> i32 {
        let x = self.x.to_bits();
        let y = self.y.to_bits();
        (x ^ y.wrapping_shl(1)) as i32
    }
}

impl Add for Vec2Fixed {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl AddAssign for Vec2Fixed {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sub for Vec2Fixed {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl SubAssign for Vec2Fixed {
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

impl Mul<Fixed> for Vec2Fixed {
    type Output = Self;
    fn mul(self, rhs: Fixed) -> Self {
        Self::new(self.x * rhs, self.y * rhs)
    }
}

impl Neg for Vec2Fixed {
    type Output = Self;
    fn neg(self) -> Self {
        Self::new(-self.x, -self.y)
    }
}

impl fmt::Debug for Vec2Fixed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

// ---------------------------------------------------------------------------
// Serde helpers
// ---------------------------------------------------------------------------

/// Serialize a [`Fixed`] as its raw `i64` bits. Used for saved state, where
/// exactness matters more than readability.
pub mod raw_bits {
    use super::Fixed;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Fixed, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(value.to_bits())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Fixed, D::Error> {
        i64::deserialize(deserializer).map(Fixed::from_bits)
    }
}

/// Serialize a [`Fixed`] as a decimal string such as `"0.25"`. Used for
/// hand-written agent templates. Parsing is exact and never goes through
/// floating point.
pub mod decimal {
    use super::Fixed;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Fixed, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Fixed, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.trim()
            .parse::<Fixed>()
            .map_err(|e| serde::de::Error::custom(format!("invalid fixed-point value '{text}': {e}")))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
