//! Subscriber trait and the terminal [`Completion`] event.
//!
//! A subscriber sees, in order: exactly one `receive_subscription`, any number
//! of `receive` calls bounded by the demand it granted, and at most one
//! `receive_completion`. A cancelled stream ends without a completion.

use crate::{demand::Demand, subscription::SharedSubscription};

mod recorder;
mod sink;
pub use recorder::{Event, Recorder};
pub use sink::Sink;

// ============================================================================
// Completion
// ============================================================================

/// How a stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Completion<E> {
  /// The publisher has no more values.
  Finished,
  /// The stream failed; no value follows.
  Failure(E),
}

impl<E> Completion<E> {
  #[inline]
  pub fn is_finished(&self) -> bool { matches!(self, Completion::Finished) }

  #[inline]
  pub fn is_failure(&self) -> bool { matches!(self, Completion::Failure(_)) }

  pub fn map_err<F>(self, f: impl FnOnce(E) -> F) -> Completion<F> {
    match self {
      Completion::Finished => Completion::Finished,
      Completion::Failure(err) => Completion::Failure(f(err)),
    }
  }

  pub fn into_result(self) -> Result<(), E> {
    match self {
      Completion::Finished => Ok(()),
      Completion::Failure(err) => Err(err),
    }
  }
}

impl<E> From<Result<(), E>> for Completion<E> {
  fn from(result: Result<(), E>) -> Self {
    match result {
      Ok(()) => Completion::Finished,
      Err(err) => Completion::Failure(err),
    }
  }
}

// ============================================================================
// Subscriber Trait
// ============================================================================

/// Subscriber trait: the consumer side of the demand protocol.
///
/// Subscribers are shared between the publisher side and whoever created
/// them, so every method takes `&self`. Any method may be called from any
/// thread; a subscriber that keeps mutable state guards it itself.
pub trait Subscriber<Input, Failure>: Send + Sync {
  /// The first callback, delivered exactly once. Nothing flows until demand
  /// is requested through `subscription`.
  fn receive_subscription(&self, subscription: SharedSubscription);

  /// Receives one value and returns the demand granted *in addition* to what
  /// is still outstanding.
  fn receive(&self, input: Input) -> Demand;

  /// Terminal callback, delivered at most once.
  fn receive_completion(&self, completion: Completion<Failure>);
}
