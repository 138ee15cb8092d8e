use std::{
  fmt::{Debug, Formatter},
  marker::PhantomData,
  sync::{
    atomic::{AtomicBool, Ordering},
    Mutex, PoisonError,
  },
};

use crate::{
  demand::Demand,
  subscriber::{Completion, Subscriber},
  subscription::{SharedSubscription, Subscription},
};

/// Closure subscriber with unlimited demand.
///
/// Requests [`Demand::Unbounded`] as soon as it is subscribed and forwards
/// every value to `on_value`. It is also a [`Subscription`], so cancelling the
/// sink cancels its upstream and drops both closures, even while a value
/// callback is running on another thread.
///
/// Usually created through
/// [`PublisherExt::sink`](crate::publisher::PublisherExt::sink).
pub struct Sink<V, C, Input, Failure> {
  upstream: Mutex<Option<SharedSubscription>>,
  on_value: Mutex<Option<V>>,
  on_completion: Mutex<Option<C>>,
  closed: AtomicBool,
  _p: PhantomData<fn(Input, Failure)>,
}

impl<V, C, Input, Failure> Sink<V, C, Input, Failure>
where
  V: FnMut(Input) + Send,
  C: FnOnce(Completion<Failure>) + Send,
{
  pub fn new(on_value: V, on_completion: C) -> Self {
    Sink {
      upstream: Mutex::new(None),
      on_value: Mutex::new(Some(on_value)),
      on_completion: Mutex::new(Some(on_completion)),
      closed: AtomicBool::new(false),
      _p: PhantomData,
    }
  }
}

impl<V, C, Input, Failure> Sink<V, C, Input, Failure> {
  pub fn is_closed(&self) -> bool { self.closed.load(Ordering::Acquire) }

  /// Drops the value closure unless a callback holds it right now; that
  /// callback drops it itself once it sees `closed`.
  fn release_on_value(&self) {
    let released = match self.on_value.try_lock() {
      Ok(mut guard) => guard.take(),
      Err(_) => None,
    };
    drop(released);
  }
}

impl<V, C, Input, Failure> Subscriber<Input, Failure> for Sink<V, C, Input, Failure>
where
  V: FnMut(Input) + Send,
  C: FnOnce(Completion<Failure>) + Send,
{
  fn receive_subscription(&self, subscription: SharedSubscription) {
    {
      let mut upstream = self.upstream.lock().unwrap_or_else(PoisonError::into_inner);
      if upstream.is_some() || self.is_closed() {
        drop(upstream);
        subscription.cancel();
        return;
      }
      *upstream = Some(subscription.clone());
    }
    subscription.request(Demand::Unbounded);
  }

  fn receive(&self, input: Input) -> Demand {
    if self.is_closed() {
      return Demand::NONE;
    }
    let mut on_value = self.on_value.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(f) = on_value.as_mut() {
      f(input);
    }
    if self.is_closed() {
      let released = on_value.take();
      drop(on_value);
      drop(released);
    }
    Demand::NONE
  }

  fn receive_completion(&self, completion: Completion<Failure>) {
    if self.closed.swap(true, Ordering::AcqRel) {
      return;
    }
    let upstream = self.upstream.lock().unwrap_or_else(PoisonError::into_inner).take();
    drop(upstream);
    self.release_on_value();
    let on_completion = self.on_completion.lock().unwrap_or_else(PoisonError::into_inner).take();
    if let Some(f) = on_completion {
      f(completion);
    }
  }
}

impl<V, C, Input, Failure> Subscription for Sink<V, C, Input, Failure>
where
  V: Send,
  C: Send,
{
  fn request(&self, demand: Demand) {
    let upstream = self.upstream.lock().unwrap_or_else(PoisonError::into_inner).clone();
    if let Some(upstream) = upstream {
      upstream.request(demand);
    }
  }

  fn cancel(&self) {
    if self.closed.swap(true, Ordering::AcqRel) {
      return;
    }
    let upstream = self.upstream.lock().unwrap_or_else(PoisonError::into_inner).take();
    if let Some(upstream) = upstream {
      upstream.cancel();
    }
    let on_completion = self.on_completion.lock().unwrap_or_else(PoisonError::into_inner).take();
    drop(on_completion);
    self.release_on_value();
  }
}

impl<V, C, Input, Failure> Debug for Sink<V, C, Input, Failure> {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Sink").field("is_closed", &self.is_closed()).finish()
  }
}

#[cfg(test)]
mod tests {
  use std::{
    convert::Infallible,
    sync::{Arc, Mutex},
  };

  use crate::prelude::*;

  #[test]
  fn sink_pulls_everything() {
    let values = Arc::new(Mutex::new(Vec::new()));
    let finished = Arc::new(Mutex::new(None));
    let (v, c) = (values.clone(), finished.clone());

    let handle = sequence::<_, Infallible>(0..5).sink(
      move |value| v.lock().unwrap().push(value),
      move |completion| *c.lock().unwrap() = Some(completion),
    );

    assert_eq!(*values.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    assert_eq!(*finished.lock().unwrap(), Some(Completion::Finished));
    drop(handle);
  }

  #[test]
  fn dropping_the_handle_cancels() {
    let subject = PassthroughSubject::<i32, Infallible>::new();
    let values = Arc::new(Mutex::new(Vec::new()));
    let v = values.clone();

    let handle = subject.sink(move |value| v.lock().unwrap().push(value), |_| {});
    subject.send(1);
    drop(handle);
    subject.send(2);

    assert_eq!(*values.lock().unwrap(), vec![1]);
  }

  #[test]
  fn cancelled_sink_ignores_completion() {
    let completed = Arc::new(Mutex::new(false));
    let c = completed.clone();
    let sink = Arc::new(Sink::new(|_: i32| {}, move |_: Completion<Infallible>| {
      *c.lock().unwrap() = true;
    }));
    sink.receive_subscription(Arc::new(EmptySubscription));
    sink.cancel();
    sink.receive_completion(Completion::Finished);

    assert!(!*completed.lock().unwrap());
    assert!(sink.is_closed());
  }
}
