use std::{
  fmt::{Debug, Formatter},
  sync::{Mutex, MutexGuard, PoisonError},
};

use crate::{
  demand::Demand,
  subscriber::{Completion, Subscriber},
  subscription::SharedSubscription,
};

/// One callback observed by a [`Recorder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event<Input, Failure> {
  Subscription,
  Value(Input),
  Completion(Completion<Failure>),
}

type DemandFn<Input> = Box<dyn Fn(&Input) -> Demand + Send + Sync>;

/// A subscriber that records every callback it receives.
///
/// It requests `initial` demand on handshake, and asks `on_value` how much
/// extra demand to grant for each value. Meant for asserting protocol
/// conformance of publishers and operators.
///
/// ```rust
/// use std::{convert::Infallible, sync::Arc};
///
/// use rxrelay::prelude::*;
///
/// let recorder = Arc::new(Recorder::<i32, Infallible>::new(Demand::max(2)));
/// sequence(0..10).subscribe(recorder.clone());
/// assert_eq!(recorder.values(), vec![0, 1]);
/// ```
pub struct Recorder<Input, Failure> {
  initial: Demand,
  on_value: DemandFn<Input>,
  subscription: Mutex<Option<SharedSubscription>>,
  events: Mutex<Vec<Event<Input, Failure>>>,
}

impl<Input, Failure> Recorder<Input, Failure> {
  /// Grants `initial` demand and nothing more per value.
  pub fn new(initial: Demand) -> Self { Self::with_demand(initial, |_| Demand::NONE) }

  pub fn with_demand(
    initial: Demand,
    on_value: impl Fn(&Input) -> Demand + Send + Sync + 'static,
  ) -> Self {
    Recorder {
      initial,
      on_value: Box::new(on_value),
      subscription: Mutex::new(None),
      events: Mutex::new(Vec::new()),
    }
  }

  fn lock_events(&self) -> MutexGuard<'_, Vec<Event<Input, Failure>>> {
    self.events.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// The handle received on handshake, if any.
  pub fn subscription(&self) -> Option<SharedSubscription> {
    self.subscription.lock().unwrap_or_else(PoisonError::into_inner).clone()
  }

  /// Drops the stored handle, breaking the recorder's link to its upstream.
  pub fn release_subscription(&self) -> Option<SharedSubscription> {
    self.subscription.lock().unwrap_or_else(PoisonError::into_inner).take()
  }

  pub fn events(&self) -> Vec<Event<Input, Failure>>
  where
    Input: Clone,
    Failure: Clone,
  {
    self.lock_events().clone()
  }

  /// Events without the leading `Subscription` marker.
  pub fn events_without_subscription(&self) -> Vec<Event<Input, Failure>>
  where
    Input: Clone,
    Failure: Clone,
  {
    self.lock_events().iter().filter(|e| !matches!(e, Event::Subscription)).cloned().collect()
  }

  pub fn values(&self) -> Vec<Input>
  where
    Input: Clone,
  {
    self
      .lock_events()
      .iter()
      .filter_map(|e| match e {
        Event::Value(v) => Some(v.clone()),
        _ => None,
      })
      .collect()
  }

  pub fn value_count(&self) -> usize {
    self.lock_events().iter().filter(|e| matches!(e, Event::Value(_))).count()
  }

  pub fn completion(&self) -> Option<Completion<Failure>>
  where
    Failure: Clone,
  {
    self.lock_events().iter().find_map(|e| match e {
      Event::Completion(c) => Some(c.clone()),
      _ => None,
    })
  }

  pub fn subscription_count(&self) -> usize {
    self.lock_events().iter().filter(|e| matches!(e, Event::Subscription)).count()
  }
}

impl<Input, Failure> Subscriber<Input, Failure> for Recorder<Input, Failure>
where
  Input: Send,
  Failure: Send,
{
  fn receive_subscription(&self, subscription: SharedSubscription) {
    self.lock_events().push(Event::Subscription);
    *self.subscription.lock().unwrap_or_else(PoisonError::into_inner) = Some(subscription.clone());
    if !self.initial.is_zero() {
      subscription.request(self.initial);
    }
  }

  fn receive(&self, input: Input) -> Demand {
    let demand = (self.on_value)(&input);
    self.lock_events().push(Event::Value(input));
    demand
  }

  fn receive_completion(&self, completion: Completion<Failure>) {
    self.lock_events().push(Event::Completion(completion));
  }
}

impl<Input, Failure> Debug for Recorder<Input, Failure> {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Recorder")
      .field("initial", &self.initial)
      .field("events", &self.lock_events().len())
      .finish()
  }
}
