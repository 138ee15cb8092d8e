//! Fallible transform operators: `try_compact_map`, `try_map` and
//! `try_filter`.
//!
//! All three are the same relay with a different [`TryTransform`]. A
//! transform either republishes a value, drops it, or fails the stream. A
//! failure is not a per-value event: the upstream is cancelled and the error
//! becomes the single failure completion of the downstream.

use std::{
  fmt::{Debug, Formatter},
  sync::{Arc, Weak},
};

use tracing::trace;

use crate::{
  demand::Demand,
  publisher::Publisher,
  relay::RelayState,
  subscriber::{Completion, Subscriber},
  subscription::{SharedSubscription, Subscription},
};

/// A fallible, possibly filtering, value transform.
pub trait TryTransform<Input>: Send + Sync + 'static {
  type Output;
  type Error;

  /// `Ok(None)` drops the value, `Err` fails the stream.
  fn apply(&self, input: Input) -> Result<Option<Self::Output>, Self::Error>;
}

/// Adapts `Fn(I) -> Result<Option<T>, E>`.
#[derive(Clone, Copy)]
pub struct CompactMapFn<F>(pub F);

/// Adapts `Fn(I) -> Result<T, E>`.
#[derive(Clone, Copy)]
pub struct MapFn<F>(pub F);

/// Adapts `Fn(&I) -> Result<bool, E>`.
#[derive(Clone, Copy)]
pub struct FilterFn<F>(pub F);

/// Two transforms applied back to back inside one operator.
pub struct Fused<A, B> {
  first: Arc<A>,
  then: B,
}

impl<I, T, E, F> TryTransform<I> for CompactMapFn<F>
where
  F: Fn(I) -> Result<Option<T>, E> + Send + Sync + 'static,
{
  type Output = T;
  type Error = E;

  #[inline]
  fn apply(&self, input: I) -> Result<Option<T>, E> { (self.0)(input) }
}

impl<I, T, E, F> TryTransform<I> for MapFn<F>
where
  F: Fn(I) -> Result<T, E> + Send + Sync + 'static,
{
  type Output = T;
  type Error = E;

  #[inline]
  fn apply(&self, input: I) -> Result<Option<T>, E> { (self.0)(input).map(Some) }
}

impl<I, E, F> TryTransform<I> for FilterFn<F>
where
  F: Fn(&I) -> Result<bool, E> + Send + Sync + 'static,
{
  type Output = I;
  type Error = E;

  fn apply(&self, input: I) -> Result<Option<I>, E> {
    (self.0)(&input).map(|keep| if keep { Some(input) } else { None })
  }
}

impl<I, A, B> TryTransform<I> for Fused<A, B>
where
  A: TryTransform<I>,
  B: TryTransform<A::Output, Error = A::Error>,
{
  type Output = B::Output;
  type Error = A::Error;

  fn apply(&self, input: I) -> Result<Option<B::Output>, A::Error> {
    match self.first.apply(input)? {
      Some(value) => self.then.apply(value),
      None => Ok(None),
    }
  }
}

// ==================== Publisher ====================

/// Publisher returned by
/// [`try_compact_map`](crate::publisher::PublisherExt::try_compact_map).
pub struct TryCompactMap<U, T> {
  upstream: U,
  transform: Arc<T>,
}

pub type TryMap<U, F> = TryCompactMap<U, MapFn<F>>;
pub type TryFilter<U, F> = TryCompactMap<U, FilterFn<F>>;

impl<U, T> TryCompactMap<U, T> {
  pub fn new(upstream: U, transform: T) -> Self {
    TryCompactMap { upstream, transform: Arc::new(transform) }
  }

  /// Chains another fallible transform into this operator instead of
  /// stacking a second relay on top of it. The closure shares the failure
  /// type of this operator.
  pub fn try_compact_map<V, G>(self, transform: G) -> TryCompactMap<U, Fused<T, CompactMapFn<G>>>
  where
    U: Publisher,
    T: TryTransform<U::Output>,
    G: Fn(T::Output) -> Result<Option<V>, T::Error> + Send + Sync + 'static,
  {
    let fused = Fused { first: self.transform, then: CompactMapFn(transform) };
    TryCompactMap { upstream: self.upstream, transform: Arc::new(fused) }
  }
}

impl<U: Clone, T> Clone for TryCompactMap<U, T> {
  fn clone(&self) -> Self {
    TryCompactMap { upstream: self.upstream.clone(), transform: self.transform.clone() }
  }
}

impl<U, T> Publisher for TryCompactMap<U, T>
where
  U: Publisher,
  U::Output: 'static,
  U::Failure: Into<T::Error> + 'static,
  T: TryTransform<U::Output>,
  T::Output: 'static,
  T::Error: 'static,
{
  type Output = T::Output;
  type Failure = T::Error;

  fn subscribe<S>(&self, subscriber: Arc<S>)
  where
    S: Subscriber<T::Output, T::Error> + 'static,
  {
    let inner = Arc::new_cyclic(|me| TryCompactMapInner {
      relay: RelayState::new(self.transform.clone(), subscriber),
      me: me.clone(),
    });
    self.upstream.subscribe(inner);
  }
}

// ==================== Relay ====================

struct TryCompactMapInner<T, S> {
  relay: RelayState<Arc<T>, Arc<S>>,
  me: Weak<Self>,
}

impl<T, S> TryCompactMapInner<T, S> {
  fn complete<Output, Error>(&self, completion: Completion<Error>)
  where
    S: Subscriber<Output, Error>,
  {
    if let Some((transform, subscriber, upstream)) = self.relay.complete_if_relaying() {
      drop(transform);
      upstream.cancel();
      drop(upstream);
      trace!(failed = completion.is_failure(), "try_compact_map completed");
      subscriber.receive_completion(completion);
    }
  }
}

impl<In, UpErr, T, S> Subscriber<In, UpErr> for TryCompactMapInner<T, S>
where
  T: TryTransform<In>,
  S: Subscriber<T::Output, T::Error> + 'static,
  UpErr: Into<T::Error>,
{
  fn receive_subscription(&self, subscription: SharedSubscription) {
    let me = match self.me.upgrade() {
      Some(me) => me,
      None => return subscription.cancel(),
    };
    match self.relay.receive_subscription(subscription.clone()) {
      Some(downstream) => downstream.receive_subscription(me),
      None => subscription.cancel(),
    }
  }

  fn receive(&self, input: In) -> Demand {
    let (transform, subscriber) = match self.relay.current_pair_if_relaying() {
      Some(pair) => pair,
      None => return Demand::NONE,
    };
    match transform.apply(input) {
      Ok(Some(output)) => subscriber.receive(output),
      // Nothing went downstream, so ask the upstream for a replacement.
      Ok(None) => Demand::max(1),
      Err(err) => {
        drop(subscriber);
        self.complete::<T::Output, T::Error>(Completion::Failure(err));
        Demand::NONE
      }
    }
  }

  fn receive_completion(&self, completion: Completion<UpErr>) {
    self.complete::<T::Output, T::Error>(completion.map_err(Into::into));
  }
}

impl<T, S> Subscription for TryCompactMapInner<T, S>
where
  T: Send + Sync,
  S: Send + Sync,
{
  fn request(&self, demand: Demand) {
    if let Some(upstream) = self.relay.subscription() {
      upstream.request(demand);
    }
  }

  fn cancel(&self) {
    if let Some(released) = self.relay.complete() {
      if let Some(upstream) = released.upstream {
        upstream.cancel();
      }
    }
  }
}

impl<T, S> Debug for TryCompactMapInner<T, S> {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    f.debug_tuple("TryCompactMap").field(&self.relay).finish()
  }
}
