//! RelayState: the state machine shared by every intermediate operator.
//!
//! An operator instance is at the same time a [`Subscriber`] of its upstream
//! and the [`Subscription`] of its downstream. Between the two handshakes, and
//! while cancellation races with completion, it needs three guarantees:
//!
//! 1. each handshake is delivered exactly once,
//! 2. completion and cancellation exclude each other and fire at most once,
//! 3. the publisher, subscriber and upstream handle are released as soon as
//!    the stream is terminal.
//!
//! `RelayState` provides them once, so operators only supply their value
//! logic.
//!
//! ```text
//!  Waiting(pub, sub) ──receive_subscription──▶ Relaying(pub, sub, upstream)
//!         │                                              │
//!         └────────────complete─────────┐   ┌──complete / complete_if_relaying
//!                                       ▼   ▼
//!                                     Completed
//! ```
//!
//! Every transition replaces the whole stage under a short lock. Whatever a
//! transition releases is handed back to the caller and dropped outside the
//! lock, and no operator calls user code while holding it: a slow consumer on
//! one thread never blocks a `cancel` on another.
//!
//! [`Subscriber`]: crate::subscriber::Subscriber
//! [`Subscription`]: crate::subscription::Subscription

use std::{
  fmt::{Debug, Formatter},
  mem,
  sync::{Mutex, MutexGuard, PoisonError},
};

use tracing::{trace, warn};

use crate::subscription::SharedSubscription;

/// The stage a relay is in. Transitions are monotonic.
pub enum RelayStage<P, S> {
  /// Subscribed downstream, upstream handshake not landed yet.
  Waiting { publisher: P, subscriber: S },
  /// Both ends connected.
  Relaying { publisher: P, subscriber: S, upstream: SharedSubscription },
  /// Terminal. Holds nothing.
  Completed,
}

/// What a terminal transition released.
///
/// `upstream` is `None` when the relay was still waiting for its upstream
/// handshake.
pub struct Released<P, S> {
  pub publisher: P,
  pub subscriber: S,
  pub upstream: Option<SharedSubscription>,
}

/// Atomic cell over a [`RelayStage`].
pub struct RelayState<P, S> {
  stage: Mutex<RelayStage<P, S>>,
}

impl<P, S> RelayState<P, S> {
  pub fn new(publisher: P, subscriber: S) -> Self {
    RelayState { stage: Mutex::new(RelayStage::Waiting { publisher, subscriber }) }
  }

  #[inline]
  fn lock(&self) -> MutexGuard<'_, RelayStage<P, S>> {
    self.stage.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Moves `Waiting` to `Relaying` and returns the subscriber to hand the
  /// downstream handshake to.
  ///
  /// Returns `None` if the relay is already `Completed` (cancelled before the
  /// upstream confirmed) or already `Relaying` (a second handshake). In both
  /// cases the caller must cancel `subscription` right away.
  pub fn receive_subscription(&self, subscription: SharedSubscription) -> Option<S>
  where
    S: Clone,
  {
    let mut stage = self.lock();
    match mem::replace(&mut *stage, RelayStage::Completed) {
      RelayStage::Waiting { publisher, subscriber } => {
        let downstream = subscriber.clone();
        *stage = RelayStage::Relaying { publisher, subscriber, upstream: subscription };
        Some(downstream)
      }
      relaying @ RelayStage::Relaying { .. } => {
        *stage = relaying;
        drop(stage);
        warn!("relay received a second upstream subscription, cancelling it");
        None
      }
      RelayStage::Completed => None,
    }
  }

  /// The upstream handle while relaying, used to forward demand.
  pub fn subscription(&self) -> Option<SharedSubscription> {
    match &*self.lock() {
      RelayStage::Relaying { upstream, .. } => Some(upstream.clone()),
      _ => None,
    }
  }

  /// A snapshot of `(publisher, subscriber)` while relaying. The lock is
  /// released before this returns, so callers may invoke user code on the
  /// pair.
  pub fn current_pair_if_relaying(&self) -> Option<(P, S)>
  where
    P: Clone,
    S: Clone,
  {
    match &*self.lock() {
      RelayStage::Relaying { publisher, subscriber, .. } => {
        Some((publisher.clone(), subscriber.clone()))
      }
      _ => None,
    }
  }

  /// `Relaying -> Completed`. Exactly one racing caller gets the released
  /// triple; every other caller gets `None`.
  pub fn complete_if_relaying(&self) -> Option<(P, S, SharedSubscription)> {
    let mut stage = self.lock();
    if !matches!(&*stage, RelayStage::Relaying { .. }) {
      return None;
    }
    match mem::replace(&mut *stage, RelayStage::Completed) {
      RelayStage::Relaying { publisher, subscriber, upstream } => {
        drop(stage);
        trace!("relay completed");
        Some((publisher, subscriber, upstream))
      }
      _ => None,
    }
  }

  /// `Waiting | Relaying -> Completed`, with the same at-most-once guarantee
  /// as [`complete_if_relaying`](Self::complete_if_relaying). Covers a
  /// downstream that cancels before the upstream handshake lands.
  pub fn complete(&self) -> Option<Released<P, S>> {
    let released = match mem::replace(&mut *self.lock(), RelayStage::Completed) {
      RelayStage::Waiting { publisher, subscriber } => {
        Released { publisher, subscriber, upstream: None }
      }
      RelayStage::Relaying { publisher, subscriber, upstream } => {
        Released { publisher, subscriber, upstream: Some(upstream) }
      }
      RelayStage::Completed => return None,
    };
    trace!(early = released.upstream.is_none(), "relay completed");
    Some(released)
  }

  pub fn is_relaying(&self) -> bool { matches!(&*self.lock(), RelayStage::Relaying { .. }) }

  pub fn is_completed(&self) -> bool { matches!(&*self.lock(), RelayStage::Completed) }
}

impl<P, S> Debug for RelayState<P, S> {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    let stage = match &*self.lock() {
      RelayStage::Waiting { .. } => "Waiting",
      RelayStage::Relaying { .. } => "Relaying",
      RelayStage::Completed => "Completed",
    };
    f.debug_tuple("RelayState").field(&stage).finish()
  }
}
