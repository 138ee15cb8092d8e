//! PassthroughSubject: a hot publisher fed by hand.
//!
//! Values go out through [`PassthroughSubject::send`] to every subscriber
//! that currently has outstanding demand; subscribers without demand miss
//! the value. [`PassthroughSubject::send_completion`] terminates every
//! subscriber once, and a subscriber that arrives after that receives an
//! [`EmptySubscription`] followed by the stored completion.
//!
//! ```rust
//! use std::{convert::Infallible, sync::Arc};
//!
//! use rxrelay::prelude::*;
//!
//! let subject = PassthroughSubject::<i32, Infallible>::new();
//! let recorder = Arc::new(Recorder::<i32, Infallible>::new(Demand::max(2)));
//! subject.subscribe(recorder.clone());
//!
//! subject.send(1);
//! subject.send(2);
//! subject.send(3);
//! subject.send_completion(Completion::Finished);
//!
//! assert_eq!(recorder.values(), vec![1, 2]);
//! assert_eq!(recorder.completion(), Some(Completion::Finished));
//! ```

use std::{
  fmt::{Debug, Formatter},
  mem,
  sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use smallvec::SmallVec;
use tracing::trace;

use crate::{
  demand::Demand,
  publisher::Publisher,
  subscriber::{Completion, Subscriber},
  subscription::{EmptySubscription, Subscription},
};

type DynSubscriber<Output, Failure> = Arc<dyn Subscriber<Output, Failure>>;

// ============================================================================
// Conduit
// ============================================================================

/// The link between the subject and one subscriber. Also the subscriber's
/// subscription handle.
struct Conduit<Output, Failure> {
  state: Mutex<ConduitState<Output, Failure>>,
}

struct ConduitState<Output, Failure> {
  /// `None` once cancelled or terminated.
  subscriber: Option<DynSubscriber<Output, Failure>>,
  demand: Demand,
  handshake_done: bool,
  /// Values claimed but not yet returned from `receive`.
  in_flight: usize,
  /// A completion sent while the handshake or a value was still in flight.
  pending: Option<Completion<Failure>>,
}

impl<Output, Failure> ConduitState<Output, Failure> {
  /// Takes the subscriber for its completion once nothing else is in flight.
  fn settle(&mut self) -> Option<(DynSubscriber<Output, Failure>, Completion<Failure>)> {
    if !self.handshake_done || self.in_flight > 0 {
      return None;
    }
    let completion = self.pending.take()?;
    self.subscriber.take().map(|subscriber| (subscriber, completion))
  }
}

impl<Output, Failure> Conduit<Output, Failure> {
  fn new(subscriber: DynSubscriber<Output, Failure>) -> Self {
    Conduit {
      state: Mutex::new(ConduitState {
        subscriber: Some(subscriber),
        demand: Demand::NONE,
        handshake_done: false,
        in_flight: 0,
        pending: None,
      }),
    }
  }

  #[inline]
  fn lock(&self) -> MutexGuard<'_, ConduitState<Output, Failure>> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn is_live(&self) -> bool {
    let state = self.lock();
    state.subscriber.is_some() && state.pending.is_none()
  }

  /// Takes one unit of demand, if there is any.
  fn claim(&self) -> Option<DynSubscriber<Output, Failure>> {
    let mut state = self.lock();
    if state.demand.is_zero() || state.pending.is_some() {
      return None;
    }
    let subscriber = state.subscriber.clone()?;
    state.demand -= 1_usize;
    state.in_flight += 1;
    Some(subscriber)
  }

  fn deliver(&self, subscriber: DynSubscriber<Output, Failure>, value: Output) {
    let more = subscriber.receive(value);
    drop(subscriber);
    let settled = {
      let mut state = self.lock();
      state.in_flight -= 1;
      if state.subscriber.is_some() && state.pending.is_none() {
        state.demand += more;
      }
      state.settle()
    };
    if let Some((subscriber, completion)) = settled {
      subscriber.receive_completion(completion);
    }
  }

  fn terminate(&self, completion: Completion<Failure>) {
    let settled = {
      let mut state = self.lock();
      if state.subscriber.is_none() {
        return;
      }
      state.pending = Some(completion);
      state.settle()
    };
    if let Some((subscriber, completion)) = settled {
      subscriber.receive_completion(completion);
    }
  }

  fn handshake_done(&self) {
    let settled = {
      let mut state = self.lock();
      state.handshake_done = true;
      state.settle()
    };
    if let Some((subscriber, completion)) = settled {
      subscriber.receive_completion(completion);
    }
  }
}

impl<Output, Failure> Subscription for Conduit<Output, Failure>
where
  Output: 'static,
  Failure: Send + 'static,
{
  fn request(&self, demand: Demand) {
    let mut state = self.lock();
    if state.subscriber.is_some() && state.pending.is_none() {
      state.demand += demand;
    }
  }

  fn cancel(&self) {
    let released = {
      let mut state = self.lock();
      state.demand = Demand::NONE;
      (state.subscriber.take(), state.pending.take())
    };
    drop(released);
  }
}

// ============================================================================
// PassthroughSubject
// ============================================================================

struct SubjectState<Output, Failure> {
  conduits: Vec<Arc<Conduit<Output, Failure>>>,
  completion: Option<Completion<Failure>>,
}

/// Multicasts values to its current subscribers, honouring each
/// subscriber's demand separately.
///
/// Clones share the same subscriber list.
pub struct PassthroughSubject<Output, Failure> {
  inner: Arc<Mutex<SubjectState<Output, Failure>>>,
}

impl<Output, Failure> PassthroughSubject<Output, Failure> {
  pub fn new() -> Self {
    PassthroughSubject {
      inner: Arc::new(Mutex::new(SubjectState { conduits: Vec::new(), completion: None })),
    }
  }

  #[inline]
  fn lock(&self) -> MutexGuard<'_, SubjectState<Output, Failure>> {
    self.inner.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Get the number of subscribers that are neither cancelled nor
  /// terminated.
  pub fn subscriber_count(&self) -> usize {
    self.lock().conduits.iter().filter(|conduit| conduit.is_live()).count()
  }

  pub fn is_completed(&self) -> bool { self.lock().completion.is_some() }

  /// Sends `value` to every subscriber with outstanding demand.
  ///
  /// The value is cloned for all receivers but the last, which gets it by
  /// move. Does nothing after `send_completion`.
  pub fn send(&self, value: Output)
  where
    Output: Clone,
  {
    let conduits: SmallVec<[_; 4]> = {
      let mut state = self.lock();
      if state.completion.is_some() {
        return;
      }
      state.conduits.retain(|conduit| conduit.is_live());
      state.conduits.iter().cloned().collect()
    };

    let mut ready: SmallVec<[_; 4]> =
      conduits.iter().filter_map(|conduit| conduit.claim().map(|s| (conduit, s))).collect();
    let last = ready.pop();
    for (conduit, subscriber) in ready {
      conduit.deliver(subscriber, value.clone());
    }
    if let Some((conduit, subscriber)) = last {
      conduit.deliver(subscriber, value);
    }
  }

  /// Terminates every subscriber. Only the first call has an effect.
  pub fn send_completion(&self, completion: Completion<Failure>)
  where
    Failure: Clone,
  {
    let conduits = {
      let mut state = self.lock();
      if state.completion.is_some() {
        return;
      }
      state.completion = Some(completion.clone());
      mem::take(&mut state.conduits)
    };
    trace!(subscribers = conduits.len(), "subject completed");
    for conduit in conduits {
      conduit.terminate(completion.clone());
    }
  }
}

impl<Output, Failure> Default for PassthroughSubject<Output, Failure> {
  fn default() -> Self { Self::new() }
}

impl<Output, Failure> Clone for PassthroughSubject<Output, Failure> {
  fn clone(&self) -> Self { PassthroughSubject { inner: self.inner.clone() } }
}

impl<Output, Failure> Publisher for PassthroughSubject<Output, Failure>
where
  Output: 'static,
  Failure: Clone + Send + 'static,
{
  type Output = Output;
  type Failure = Failure;

  fn subscribe<S>(&self, subscriber: Arc<S>)
  where
    S: Subscriber<Output, Failure> + 'static,
  {
    let conduit = {
      let mut state = self.lock();
      match state.completion.clone() {
        Some(completion) => Err(completion),
        None => {
          let conduit = Arc::new(Conduit::new(subscriber.clone()));
          state.conduits.push(conduit.clone());
          Ok(conduit)
        }
      }
    };
    match conduit {
      Ok(conduit) => {
        subscriber.receive_subscription(conduit.clone());
        conduit.handshake_done();
      }
      Err(completion) => {
        subscriber.receive_subscription(Arc::new(EmptySubscription));
        subscriber.receive_completion(completion);
      }
    }
  }
}

impl<Output, Failure> Debug for PassthroughSubject<Output, Failure> {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    let state = self.lock();
    f.debug_struct("PassthroughSubject")
      .field("subscribers", &state.conduits.len())
      .field("completed", &state.completion.is_some())
      .finish()
  }
}
