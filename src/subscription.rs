//! Subscription: the consumer-facing handle of a live stream.
//!
//! A subscriber receives exactly one handle through
//! [`Subscriber::receive_subscription`](crate::subscriber::Subscriber) and uses
//! it to grant demand or to cancel. Both calls may come from any thread, any
//! number of times, even after the stream has terminated.

use std::{
  fmt::{Debug, Formatter},
  sync::Arc,
};

use crate::demand::Demand;

mod composite;
pub use composite::CompositeSubscription;

/// Handle used to request more values or to stop the stream.
pub trait Subscription: Send + Sync {
  /// Grant `demand` more values. A no-op once the stream is terminal.
  fn request(&self, demand: Demand);

  /// Stop the stream. Idempotent, and never followed by a completion.
  fn cancel(&self);
}

/// Type-erased subscription handle, the form every subscriber receives.
///
/// Subscriptions are control handles, not data views, so they are `'static`
/// and can be stored and called at any later time.
pub type SharedSubscription = Arc<dyn Subscription>;

impl<T: Subscription + ?Sized> Subscription for Arc<T> {
  #[inline]
  fn request(&self, demand: Demand) { (**self).request(demand) }

  #[inline]
  fn cancel(&self) { (**self).cancel() }
}

impl<T: Subscription + ?Sized> Subscription for Box<T> {
  #[inline]
  fn request(&self, demand: Demand) { (**self).request(demand) }

  #[inline]
  fn cancel(&self) { (**self).cancel() }
}

/// A subscription that does nothing.
///
/// Handed to subscribers of a source that is already terminal, so the
/// `subscription -> completion` order of the protocol still holds.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptySubscription;

impl Subscription for EmptySubscription {
  fn request(&self, _demand: Demand) {}

  fn cancel(&self) {}
}

// ============================================================================
// Cancellable
// ============================================================================

/// An RAII handle over a subscription: the subscription is cancelled as soon
/// as the handle is dropped.
///
/// **Attention:** if you don't bind the return value of
/// [`PublisherExt::sink`](crate::publisher::PublisherExt::sink) to a
/// variable, the stream is cancelled immediately. Use [`Cancellable::detach`]
/// to keep the stream running without holding the handle.
#[must_use]
pub struct Cancellable {
  subscription: Option<SharedSubscription>,
}

impl Cancellable {
  pub fn new(subscription: SharedSubscription) -> Self {
    Cancellable { subscription: Some(subscription) }
  }

  /// Cancels now. Dropping the handle afterwards does nothing more.
  pub fn cancel(&mut self) {
    if let Some(subscription) = self.subscription.take() {
      subscription.cancel();
    }
  }

  /// Releases the handle without cancelling and returns the subscription.
  pub fn detach(mut self) -> Option<SharedSubscription> { self.subscription.take() }

  pub fn is_cancelled(&self) -> bool { self.subscription.is_none() }
}

impl Debug for Cancellable {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Cancellable").field("is_cancelled", &self.is_cancelled()).finish()
  }
}

impl Drop for Cancellable {
  fn drop(&mut self) { self.cancel() }
}
