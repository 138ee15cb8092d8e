use std::{
  fmt::{Debug, Formatter},
  iter::{Once, Peekable},
  marker::PhantomData,
  sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use tracing::{debug, trace};

use crate::{
  demand::Demand,
  publisher::Publisher,
  subscriber::{Completion, Subscriber},
  subscription::Subscription,
};

/// Creates a publisher that emits the elements of `iter` on demand, then
/// finishes. Values are pulled from the iterator only as demand arrives, so
/// infinite iterators are fine.
///
/// # Examples
///
/// ```
/// use std::{convert::Infallible, sync::Arc};
///
/// use rxrelay::prelude::*;
///
/// let recorder = Arc::new(Recorder::<i32, Infallible>::new(Demand::unlimited()));
/// sequence(vec![0, 1, 2, 3]).subscribe(recorder.clone());
///
/// assert_eq!(recorder.values(), vec![0, 1, 2, 3]);
/// assert_eq!(recorder.completion(), Some(Completion::Finished));
/// ```
pub fn sequence<I, E>(iter: I) -> Sequence<I, E>
where
  I: IntoIterator,
{
  Sequence::new(iter)
}

/// Creates a publisher that emits `value` once, then finishes.
pub fn just<T, E>(value: T) -> Sequence<Once<T>, E>
where
  T: Clone,
{
  Sequence::new(std::iter::once(value))
}

/// Pull-driven publisher over an iterator.
///
/// Each subscription clones the source and advances its own cursor. The
/// cursor only moves under the subscription's lock and every move consumes
/// one unit of demand, so concurrent `request` calls never deliver a value
/// twice or skip one. Delivery itself runs outside the lock, and a `cancel`
/// issued during a slow `receive` takes effect at the next element.
pub struct Sequence<I, E> {
  iter: I,
  _failure: PhantomData<fn() -> E>,
}

impl<I, E> Sequence<I, E> {
  pub fn new(iter: I) -> Self { Sequence { iter, _failure: PhantomData } }
}

impl<I: Clone, E> Clone for Sequence<I, E> {
  fn clone(&self) -> Self { Sequence::new(self.iter.clone()) }
}

impl<I, E> Publisher for Sequence<I, E>
where
  I: IntoIterator + Clone,
  I::IntoIter: Send + 'static,
  I::Item: Send + 'static,
  E: 'static,
{
  type Output = I::Item;
  type Failure = E;

  fn subscribe<S>(&self, subscriber: Arc<S>)
  where
    S: Subscriber<I::Item, E> + 'static,
  {
    let iter = self.iter.clone().into_iter();
    let cursor = Arc::new(SequenceSubscription::new(iter, subscriber.clone()));
    subscriber.receive_subscription(cursor.clone());
    // An empty source finishes straight after the handshake.
    cursor.finish_if_exhausted();
  }
}

// ==================== Subscription ====================

struct Active<It: Iterator, S> {
  iter: Peekable<It>,
  subscriber: Arc<S>,
}

struct Cursor<It: Iterator, S> {
  /// `None` once finished or cancelled.
  active: Option<Active<It, S>>,
  demand: Demand,
  /// Set while one thread owns the pull loop.
  pulling: bool,
}

enum Step<It: Iterator, S> {
  Deliver(Arc<S>, It::Item),
  Finish(Active<It, S>),
  Idle,
}

impl<It: Iterator, S> Cursor<It, S> {
  fn next_step(&mut self) -> Step<It, S> {
    let exhausted = match self.active.as_mut() {
      Some(active) => active.iter.peek().is_none(),
      None => {
        self.pulling = false;
        return Step::Idle;
      }
    };
    if exhausted {
      self.pulling = false;
      return self.active.take().map_or(Step::Idle, Step::Finish);
    }
    if self.demand.is_zero() {
      self.pulling = false;
      return Step::Idle;
    }
    match self.active.as_mut() {
      Some(active) => match active.iter.next() {
        Some(value) => {
          self.demand -= 1_usize;
          Step::Deliver(active.subscriber.clone(), value)
        }
        None => {
          self.pulling = false;
          Step::Idle
        }
      },
      None => Step::Idle,
    }
  }
}

pub(crate) struct SequenceSubscription<It: Iterator, S, E> {
  cursor: Mutex<Cursor<It, S>>,
  _failure: PhantomData<fn() -> E>,
}

impl<It, S, E> SequenceSubscription<It, S, E>
where
  It: Iterator,
  S: Subscriber<It::Item, E>,
{
  fn new(iter: It, subscriber: Arc<S>) -> Self {
    SequenceSubscription {
      cursor: Mutex::new(Cursor {
        active: Some(Active { iter: iter.peekable(), subscriber }),
        demand: Demand::NONE,
        pulling: false,
      }),
      _failure: PhantomData,
    }
  }

  fn finish_if_exhausted(&self) {
    let finished = {
      let mut cursor = self.lock();
      if cursor.pulling {
        return;
      }
      let exhausted = cursor.active.as_mut().map_or(false, |active| active.iter.peek().is_none());
      if exhausted {
        cursor.active.take()
      } else {
        None
      }
    };
    if let Some(active) = finished {
      Self::finish(active);
    }
  }

  fn finish(active: Active<It, S>) {
    let Active { iter, subscriber } = active;
    drop(iter);
    trace!("sequence exhausted");
    subscriber.receive_completion(Completion::Finished);
  }
}

impl<It, S, E> Subscription for SequenceSubscription<It, S, E>
where
  It: Iterator + Send,
  It::Item: Send,
  S: Subscriber<It::Item, E>,
{
  fn request(&self, demand: Demand) {
    let mut cursor = self.lock();
    if cursor.active.is_none() {
      return;
    }
    cursor.demand += demand;
    if cursor.pulling {
      return;
    }
    cursor.pulling = true;
    loop {
      match cursor.next_step() {
        Step::Idle => return,
        Step::Finish(active) => {
          drop(cursor);
          Self::finish(active);
          return;
        }
        Step::Deliver(subscriber, value) => {
          drop(cursor);
          let more = subscriber.receive(value);
          drop(subscriber);
          cursor = self.lock();
          cursor.demand += more;
        }
      }
    }
  }

  fn cancel(&self) {
    let released = self.lock().active.take();
    if released.is_some() {
      debug!("sequence cancelled");
    }
    drop(released);
  }
}

impl<It: Iterator, S, E> SequenceSubscription<It, S, E> {
  #[inline]
  fn lock(&self) -> MutexGuard<'_, Cursor<It, S>> {
    self.cursor.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

impl<It: Iterator, S, E> Debug for SequenceSubscription<It, S, E> {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    let cursor = self.lock();
    f.debug_struct("Sequence")
      .field("demand", &cursor.demand)
      .field("finished", &cursor.active.is_none())
      .finish()
  }
}
