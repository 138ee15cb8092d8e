//! Errors raised by the crate itself.
//!
//! Stream failures are never represented here: they travel as the generic
//! `Failure` parameter of a [`Publisher`](crate::publisher::Publisher) and are
//! delivered through [`Completion::Failure`](crate::subscriber::Completion).

use thiserror::Error;

use crate::demand::Demand;

/// Strict demand arithmetic failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DemandError {
  /// Subtraction would have produced a negative demand.
  #[error("demand underflow: {lhs} - {rhs} is negative")]
  Underflow { lhs: Demand, rhs: Demand },

  /// A negative count cannot be turned into a demand.
  #[error("demand must not be negative, got {0}")]
  Negative(i64),
}
