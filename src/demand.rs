//! Demand: the backpressure credit a subscriber grants its upstream.
//!
//! A subscriber never receives more values than it has asked for. It asks
//! through [`Subscription::request`](crate::subscription::Subscription) and
//! through the [`Demand`] returned from every
//! [`Subscriber::receive`](crate::subscriber::Subscriber) call.
//!
//! Arithmetic never overflows and never goes negative:
//!
//! ```rust
//! use rxrelay::prelude::*;
//!
//! assert_eq!(Demand::max(3) + Demand::max(4), Demand::max(7));
//! assert_eq!(Demand::max(1) - Demand::max(2), Demand::none());
//! assert_eq!(Demand::max(usize::MAX) + 1_usize, Demand::unlimited());
//! assert!(Demand::unlimited() > Demand::max(usize::MAX));
//! ```

use std::{
  cmp::Ordering,
  fmt::{Display, Formatter},
  ops::{Add, AddAssign, Mul, Sub, SubAssign},
};

use crate::error::DemandError;

/// How many more elements may still be produced.
///
/// Variant order matters: the derived `Ord` places every `Bounded` value
/// below `Unbounded`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Demand {
  /// At most this many elements.
  Bounded(usize),
  /// Any number of elements.
  Unbounded,
}

impl Demand {
  /// No demand at all.
  pub const NONE: Demand = Demand::Bounded(0);

  #[inline]
  pub const fn none() -> Self { Demand::NONE }

  #[inline]
  pub const fn max(n: usize) -> Self { Demand::Bounded(n) }

  #[inline]
  pub const fn unlimited() -> Self { Demand::Unbounded }

  /// `true` once the credit is used up.
  #[inline]
  pub const fn is_zero(&self) -> bool { matches!(self, Demand::Bounded(0)) }

  #[inline]
  pub const fn is_unbounded(&self) -> bool { matches!(self, Demand::Unbounded) }

  /// The finite count, or `None` for an unbounded demand.
  #[inline]
  pub const fn max_count(&self) -> Option<usize> {
    match self {
      Demand::Bounded(n) => Some(*n),
      Demand::Unbounded => None,
    }
  }

  /// Subtraction that refuses to clamp.
  ///
  /// `-` clamps a negative result to zero; this returns
  /// [`DemandError::Underflow`] instead, for callers that treat over-delivery
  /// as a bug.
  pub fn checked_sub(self, rhs: Demand) -> Result<Demand, DemandError> {
    match (self, rhs) {
      (Demand::Unbounded, Demand::Bounded(_)) => Ok(Demand::Unbounded),
      (Demand::Bounded(lhs), Demand::Bounded(r)) if lhs >= r => Ok(Demand::Bounded(lhs - r)),
      _ => Err(DemandError::Underflow { lhs: self, rhs }),
    }
  }
}

impl Default for Demand {
  fn default() -> Self { Demand::NONE }
}

impl Display for Demand {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    match self {
      Demand::Bounded(n) => write!(f, "max({n})"),
      Demand::Unbounded => f.write_str("unlimited"),
    }
  }
}

impl From<usize> for Demand {
  fn from(n: usize) -> Self { Demand::Bounded(n) }
}

impl TryFrom<i64> for Demand {
  type Error = DemandError;

  fn try_from(n: i64) -> Result<Self, Self::Error> {
    usize::try_from(n).map(Demand::Bounded).map_err(|_| DemandError::Negative(n))
  }
}

// ============================================================================
// Arithmetic
// ============================================================================

impl Add for Demand {
  type Output = Demand;

  fn add(self, rhs: Demand) -> Demand {
    match (self, rhs) {
      (Demand::Bounded(a), Demand::Bounded(b)) => {
        a.checked_add(b).map_or(Demand::Unbounded, Demand::Bounded)
      }
      _ => Demand::Unbounded,
    }
  }
}

impl Add<usize> for Demand {
  type Output = Demand;

  fn add(self, rhs: usize) -> Demand { self + Demand::Bounded(rhs) }
}

impl AddAssign for Demand {
  fn add_assign(&mut self, rhs: Demand) { *self = *self + rhs; }
}

impl AddAssign<usize> for Demand {
  fn add_assign(&mut self, rhs: usize) { *self = *self + rhs; }
}

impl Sub for Demand {
  type Output = Demand;

  /// Clamps at zero. See [`Demand::checked_sub`] for the strict variant.
  fn sub(self, rhs: Demand) -> Demand {
    match (self, rhs) {
      (Demand::Unbounded, Demand::Bounded(_)) => Demand::Unbounded,
      (Demand::Bounded(a), Demand::Bounded(b)) => Demand::Bounded(a.saturating_sub(b)),
      (_, Demand::Unbounded) => Demand::NONE,
    }
  }
}

impl Sub<usize> for Demand {
  type Output = Demand;

  fn sub(self, rhs: usize) -> Demand { self - Demand::Bounded(rhs) }
}

impl SubAssign for Demand {
  fn sub_assign(&mut self, rhs: Demand) { *self = *self - rhs; }
}

impl SubAssign<usize> for Demand {
  fn sub_assign(&mut self, rhs: usize) { *self = *self - rhs; }
}

impl Mul<usize> for Demand {
  type Output = Demand;

  fn mul(self, rhs: usize) -> Demand {
    match self {
      Demand::Bounded(a) => a.checked_mul(rhs).map_or(Demand::Unbounded, Demand::Bounded),
      Demand::Unbounded if rhs == 0 => Demand::NONE,
      Demand::Unbounded => Demand::Unbounded,
    }
  }
}

// ============================================================================
// Comparison with plain counts
// ============================================================================

impl PartialEq<usize> for Demand {
  fn eq(&self, other: &usize) -> bool { *self == Demand::Bounded(*other) }
}

impl PartialOrd<usize> for Demand {
  fn partial_cmp(&self, other: &usize) -> Option<Ordering> {
    Some(self.cmp(&Demand::Bounded(*other)))
  }
}
