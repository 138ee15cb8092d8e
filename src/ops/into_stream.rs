//! IntoStream Operator
//!
//! Converts a [`Publisher`] into a `futures::Stream`, so a demand-driven
//! stream can be consumed with the usual async patterns like `while let`
//! loops.
//!
//! The stream pulls: every poll that finds its buffer empty requests exactly
//! one more value from the upstream.
//!
//! # Example
//!
//! ```rust
//! use std::convert::Infallible;
//!
//! use futures::{executor::block_on, StreamExt};
//! use rxrelay::prelude::*;
//!
//! let mut stream = just::<_, Infallible>(123).into_stream();
//! assert_eq!(block_on(stream.next()), Some(Ok(123)));
//! assert_eq!(block_on(stream.next()), None);
//! ```

use std::{
  collections::VecDeque,
  fmt::{Debug, Formatter},
  pin::Pin,
  sync::{Arc, Mutex, MutexGuard, PoisonError},
  task::{Context as AsyncContext, Poll, Waker},
};

use futures::stream::Stream;

use crate::{
  demand::Demand,
  publisher::Publisher,
  subscriber::{Completion, Subscriber},
  subscription::SharedSubscription,
};

/// State shared between the upstream subscription and the stream consumer.
struct BridgeState<T, E> {
  /// Items and the failure waiting to be polled.
  queue: VecDeque<Result<T, E>>,
  /// The task waiting on the stream.
  waker: Option<Waker>,
  /// The upstream completed or failed, or the stream was dropped.
  closed: bool,
  subscription: Option<SharedSubscription>,
  /// A requested value has not arrived yet.
  outstanding: bool,
}

struct Bridge<T, E> {
  state: Mutex<BridgeState<T, E>>,
}

impl<T, E> Bridge<T, E> {
  fn new() -> Self {
    Bridge {
      state: Mutex::new(BridgeState {
        queue: VecDeque::new(),
        waker: None,
        closed: false,
        subscription: None,
        outstanding: false,
      }),
    }
  }

  #[inline]
  fn lock(&self) -> MutexGuard<'_, BridgeState<T, E>> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Pops a ready item, or reports the end of the stream.
  fn ready(state: &mut BridgeState<T, E>) -> Option<Option<Result<T, E>>> {
    match state.queue.pop_front() {
      Some(item) => Some(Some(item)),
      None if state.closed => Some(None),
      None => None,
    }
  }
}

impl<T: Send, E: Send> Subscriber<T, E> for Bridge<T, E> {
  fn receive_subscription(&self, subscription: SharedSubscription) {
    let request = {
      let mut state = self.lock();
      if state.closed || state.subscription.is_some() {
        None
      } else {
        state.subscription = Some(subscription.clone());
        // Polled before the handshake landed.
        state.outstanding = state.waker.is_some();
        Some(state.outstanding)
      }
    };
    match request {
      None => subscription.cancel(),
      Some(true) => subscription.request(Demand::max(1)),
      Some(false) => {}
    }
  }

  fn receive(&self, input: T) -> Demand {
    let waker = {
      let mut state = self.lock();
      state.queue.push_back(Ok(input));
      state.outstanding = false;
      state.waker.take()
    };
    if let Some(waker) = waker {
      waker.wake();
    }
    Demand::NONE
  }

  fn receive_completion(&self, completion: Completion<E>) {
    let (waker, subscription) = {
      let mut state = self.lock();
      if let Completion::Failure(err) = completion {
        state.queue.push_back(Err(err));
      }
      state.closed = true;
      (state.waker.take(), state.subscription.take())
    };
    drop(subscription);
    if let Some(waker) = waker {
      waker.wake();
    }
  }
}

/// A `Stream` that yields the values of a [`Publisher`].
///
/// Created by [`into_stream`](crate::publisher::PublisherExt::into_stream).
///
/// - `Ok(T)`: one per value received.
/// - `Err(E)`: the failure completion, followed by the end of the stream.
/// - `None`: after the upstream finished or failed.
///
/// Dropping the stream cancels the upstream.
pub struct IntoStream<T, E> {
  bridge: Arc<Bridge<T, E>>,
}

impl<T, E> IntoStream<T, E>
where
  T: Send + 'static,
  E: Send + 'static,
{
  /// Subscribes to `publisher`. Nothing is requested until the first poll.
  pub fn new<P>(publisher: &P) -> Self
  where
    P: Publisher<Output = T, Failure = E> + ?Sized,
  {
    let bridge = Arc::new(Bridge::new());
    publisher.subscribe(bridge.clone());
    IntoStream { bridge }
  }
}

impl<T, E> Stream for IntoStream<T, E> {
  type Item = Result<T, E>;

  fn poll_next(self: Pin<&mut Self>, cx: &mut AsyncContext<'_>) -> Poll<Option<Self::Item>> {
    let bridge = &self.bridge;
    let request = {
      let mut state = bridge.lock();
      if let Some(item) = Bridge::ready(&mut state) {
        return Poll::Ready(item);
      }
      state.waker = Some(cx.waker().clone());
      if state.outstanding {
        None
      } else {
        let subscription = state.subscription.clone();
        state.outstanding = subscription.is_some();
        subscription
      }
    };

    if let Some(subscription) = request {
      subscription.request(Demand::max(1));
      // Synchronous upstreams deliver inside `request`.
      if let Some(item) = Bridge::ready(&mut bridge.lock()) {
        return Poll::Ready(item);
      }
    }
    Poll::Pending
  }
}

impl<T, E> Drop for IntoStream<T, E> {
  fn drop(&mut self) {
    let subscription = {
      let mut state = self.bridge.lock();
      state.closed = true;
      state.waker = None;
      state.subscription.take()
    };
    if let Some(subscription) = subscription {
      subscription.cancel();
    }
  }
}

impl<T, E> Debug for IntoStream<T, E> {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    let state = self.bridge.lock();
    f.debug_struct("IntoStream")
      .field("buffered", &state.queue.len())
      .field("closed", &state.closed)
      .finish()
  }
}
