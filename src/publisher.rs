//! Publisher trait and the [`PublisherExt`] operator methods.

use std::sync::Arc;

use crate::{
  ops::{
    try_compact_map::{CompactMapFn, FilterFn, MapFn, TryCompactMap, TryFilter, TryMap},
    zip::Zip,
  },
  subscriber::{Completion, Sink, Subscriber},
  subscription::Cancellable,
};

mod sequence;
pub use sequence::{just, sequence, Sequence};

/// A value-producing role exposing a single `subscribe` operation.
///
/// Every call builds an independent stream for `subscriber`: publishers keep
/// no mutable state shared between subscriptions. Nothing is produced until
/// the subscriber requests demand through the subscription it receives.
pub trait Publisher {
  type Output;
  type Failure;

  fn subscribe<S>(&self, subscriber: Arc<S>)
  where
    S: Subscriber<Self::Output, Self::Failure> + 'static;
}

/// Operator methods available on every [`Publisher`].
pub trait PublisherExt: Publisher + Sized {
  /// Republishes every `Some` returned by a fallible closure.
  ///
  /// When the closure fails, the upstream is cancelled and the error becomes
  /// the stream's failure; no further values are delivered.
  ///
  /// ```rust
  /// use std::sync::Arc;
  ///
  /// use rxrelay::prelude::*;
  ///
  /// let recorder = Arc::new(Recorder::<i32, String>::new(Demand::unlimited()));
  /// sequence::<_, String>(["1", "x", "3", "oops", "5"])
  ///   .try_compact_map(|s| match s {
  ///     "oops" => Err("bad input".to_string()),
  ///     s => Ok(s.parse::<i32>().ok()),
  ///   })
  ///   .subscribe(recorder.clone());
  ///
  /// assert_eq!(recorder.values(), vec![1, 3]);
  /// assert_eq!(recorder.completion(), Some(Completion::Failure("bad input".to_string())));
  /// ```
  fn try_compact_map<T, E, F>(self, transform: F) -> TryCompactMap<Self, CompactMapFn<F>>
  where
    F: Fn(Self::Output) -> Result<Option<T>, E> + Send + Sync + 'static,
  {
    TryCompactMap::new(self, CompactMapFn(transform))
  }

  /// Maps every value through a fallible closure.
  fn try_map<T, E, F>(self, transform: F) -> TryMap<Self, F>
  where
    F: Fn(Self::Output) -> Result<T, E> + Send + Sync + 'static,
  {
    TryCompactMap::new(self, MapFn(transform))
  }

  /// Keeps the values a fallible predicate accepts.
  fn try_filter<E, F>(self, predicate: F) -> TryFilter<Self, F>
  where
    F: Fn(&Self::Output) -> Result<bool, E> + Send + Sync + 'static,
  {
    TryCompactMap::new(self, FilterFn(predicate))
  }

  /// Pairs the values of two publishers in arrival order of full pairs.
  #[allow(clippy::type_complexity)]
  fn zip<B>(
    self,
    other: B,
  ) -> Zip<(Self, B), fn((Self::Output, B::Output)) -> (Self::Output, B::Output)>
  where
    B: Publisher<Failure = Self::Failure>,
  {
    Zip::new((self, other), std::convert::identity as fn(_) -> _)
  }

  /// Combines the heads of two publishers with `combine`.
  fn zip_with<B, T, F>(self, other: B, combine: F) -> Zip<(Self, B), F>
  where
    B: Publisher<Failure = Self::Failure>,
    F: Fn((Self::Output, B::Output)) -> T + Send + Sync + 'static,
  {
    Zip::new((self, other), combine)
  }

  /// Groups the values of three publishers into triples.
  #[allow(clippy::type_complexity)]
  fn zip3<B, C>(
    self,
    b: B,
    c: C,
  ) -> Zip<
    (Self, B, C),
    fn((Self::Output, B::Output, C::Output)) -> (Self::Output, B::Output, C::Output),
  >
  where
    B: Publisher<Failure = Self::Failure>,
    C: Publisher<Failure = Self::Failure>,
  {
    Zip::new((self, b, c), std::convert::identity as fn(_) -> _)
  }

  fn zip3_with<B, C, T, F>(self, b: B, c: C, combine: F) -> Zip<(Self, B, C), F>
  where
    B: Publisher<Failure = Self::Failure>,
    C: Publisher<Failure = Self::Failure>,
    F: Fn((Self::Output, B::Output, C::Output)) -> T + Send + Sync + 'static,
  {
    Zip::new((self, b, c), combine)
  }

  fn zip4_with<B, C, D, T, F>(self, b: B, c: C, d: D, combine: F) -> Zip<(Self, B, C, D), F>
  where
    B: Publisher<Failure = Self::Failure>,
    C: Publisher<Failure = Self::Failure>,
    D: Publisher<Failure = Self::Failure>,
    F: Fn((Self::Output, B::Output, C::Output, D::Output)) -> T + Send + Sync + 'static,
  {
    Zip::new((self, b, c, d), combine)
  }

  /// Subscribes a [`Sink`] with unlimited demand.
  ///
  /// The returned handle cancels the stream when dropped.
  fn sink<V, C>(&self, on_value: V, on_completion: C) -> Cancellable
  where
    V: FnMut(Self::Output) + Send + 'static,
    C: FnOnce(Completion<Self::Failure>) + Send + 'static,
    Self::Output: 'static,
    Self::Failure: 'static,
  {
    let sink = Arc::new(Sink::new(on_value, on_completion));
    self.subscribe(sink.clone());
    Cancellable::new(sink)
  }

  /// Bridges into a `futures::Stream` that pulls one value per poll.
  #[cfg(feature = "stream")]
  fn into_stream(&self) -> crate::ops::into_stream::IntoStream<Self::Output, Self::Failure>
  where
    Self::Output: Send + 'static,
    Self::Failure: Send + 'static,
  {
    crate::ops::into_stream::IntoStream::new(self)
  }
}

impl<P: Publisher> PublisherExt for P {}
