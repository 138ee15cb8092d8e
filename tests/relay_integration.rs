//! Integration tests for rxrelay
//!
//! Tests operator chains, demand accounting across relays, teardown, and
//! threading behavior.

use std::{
  convert::Infallible,
  sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Barrier, Mutex,
  },
  thread,
  time::{Duration, Instant},
};

use rxrelay::prelude::*;

#[derive(Debug, Clone, PartialEq)]
enum TestError {
  Oops,
}

impl From<Infallible> for TestError {
  fn from(never: Infallible) -> Self { match never {} }
}

/// Counts up forever.
#[derive(Clone, Default)]
struct Counter(usize);

impl Iterator for Counter {
  type Item = usize;

  fn next(&mut self) -> Option<usize> {
    self.0 += 1;
    Some(self.0 - 1)
  }
}

#[derive(Default)]
struct CountingSubscription {
  requested: Mutex<Vec<Demand>>,
  cancels: AtomicUsize,
}

impl Subscription for CountingSubscription {
  fn request(&self, demand: Demand) { self.requested.lock().unwrap().push(demand); }

  fn cancel(&self) { self.cancels.fetch_add(1, Ordering::SeqCst); }
}

type Slot<Output, Failure> = Arc<Mutex<Option<Arc<dyn Subscriber<Output, Failure>>>>>;

/// A publisher driven by hand: the test pushes values into whoever
/// subscribed, and observes requests and cancels on the handle.
#[derive(Clone)]
struct ManualPublisher {
  slot: Slot<i32, TestError>,
  handle: Arc<CountingSubscription>,
}

impl ManualPublisher {
  fn new() -> Self { ManualPublisher { slot: Arc::default(), handle: Arc::default() } }

  fn subscriber(&self) -> Arc<dyn Subscriber<i32, TestError>> {
    self.slot.lock().unwrap().clone().unwrap()
  }
}

impl Publisher for ManualPublisher {
  type Output = i32;
  type Failure = TestError;

  fn subscribe<S>(&self, subscriber: Arc<S>)
  where
    S: Subscriber<i32, TestError> + 'static,
  {
    let stored: Arc<dyn Subscriber<i32, TestError>> = subscriber.clone();
    *self.slot.lock().unwrap() = Some(stored);
    subscriber.receive_subscription(self.handle.clone());
  }
}

// ============================================================================
// Demand accounting
// ============================================================================

#[test]
fn concurrent_requests_through_a_relay_deliver_each_value_once() {
  let recorder = Arc::new(Recorder::<usize, Infallible>::new(Demand::NONE));
  sequence::<_, Infallible>(Counter::default())
    .try_map(|v| Ok::<_, Infallible>(v))
    .subscribe(recorder.clone());
  let subscription = recorder.subscription().unwrap();

  let barrier = Arc::new(Barrier::new(100));
  let handles: Vec<_> = (0..100)
    .map(|_| {
      let subscription = subscription.clone();
      let barrier = barrier.clone();
      thread::spawn(move || {
        barrier.wait();
        subscription.request(Demand::max(1));
      })
    })
    .collect();
  handles.into_iter().for_each(|h| h.join().unwrap());

  let values = recorder.values();
  assert_eq!(values.len(), 100);
  assert!(values.windows(2).all(|w| w[0] < w[1]));
  assert_eq!(values, (0..100).collect::<Vec<_>>());
  subscription.cancel();
}

#[test]
fn delivery_never_exceeds_granted_demand() {
  let recorder = Arc::new(Recorder::<i32, TestError>::with_demand(Demand::max(50), |v| {
    if [0, 10].contains(v) { Demand::max(10) } else { Demand::NONE }
  }));
  sequence::<_, Infallible>(0..100)
    .try_filter(|_| Ok::<_, TestError>(true))
    .subscribe(recorder.clone());

  assert_eq!(recorder.values(), (0..70).collect::<Vec<_>>());
  assert_eq!(recorder.completion(), None);
}

#[test]
fn dropped_values_keep_the_pull_rate() {
  let upstream = ManualPublisher::new();
  let recorder = Arc::new(Recorder::<i32, TestError>::new(Demand::max(2)));
  upstream
    .clone()
    .try_compact_map(|v| Ok::<_, TestError>(if v % 2 == 0 { Some(v) } else { None }))
    .subscribe(recorder.clone());

  let subscriber = upstream.subscriber();
  assert_eq!(subscriber.receive(1), Demand::max(1));
  assert_eq!(subscriber.receive(2), Demand::NONE);
  assert_eq!(*upstream.handle.requested.lock().unwrap(), vec![Demand::max(2)]);
  assert_eq!(recorder.values(), vec![2]);
}

// ============================================================================
// Failure and teardown
// ============================================================================

#[test]
fn transform_error_short_circuits_with_one_upstream_cancel() {
  let upstream = ManualPublisher::new();
  let recorder = Arc::new(Recorder::<i32, TestError>::new(Demand::unlimited()));
  upstream
    .clone()
    .try_map(|v| if v == 3 { Err(TestError::Oops) } else { Ok(v * 100) })
    .subscribe(recorder.clone());

  let subscriber = upstream.subscriber();
  for v in 1..=5 {
    subscriber.receive(v);
  }
  subscriber.receive_completion(Completion::Finished);
  recorder.subscription().unwrap().cancel();

  assert_eq!(
    recorder.events(),
    vec![
      Event::Subscription,
      Event::Value(100),
      Event::Value(200),
      Event::Completion(Completion::Failure(TestError::Oops)),
    ]
  );
  assert_eq!(upstream.handle.cancels.load(Ordering::SeqCst), 1);
}

#[test]
fn upstream_completion_releases_the_upstream_handle() {
  let upstream = ManualPublisher::new();
  let recorder = Arc::new(Recorder::<i32, TestError>::new(Demand::unlimited()));
  upstream.clone().try_filter(|v| Ok::<_, TestError>(v % 2 == 0)).subscribe(recorder.clone());

  let subscriber = upstream.subscriber();
  subscriber.receive(2);
  subscriber.receive_completion(Completion::Finished);
  subscriber.receive_completion(Completion::Failure(TestError::Oops));

  assert_eq!(
    recorder.events(),
    vec![Event::Subscription, Event::Value(2), Event::Completion(Completion::Finished)]
  );
  assert_eq!(upstream.handle.cancels.load(Ordering::SeqCst), 1);
}

#[test]
fn subscriber_is_released_after_completion() {
  let recorder = Arc::new(Recorder::<i32, TestError>::new(Demand::NONE));
  let weak = Arc::downgrade(&recorder);
  sequence::<_, Infallible>(0..10)
    .try_map(|v| Ok::<_, TestError>(v + 1))
    .try_compact_map(|v| Ok(Some(v * 2)))
    .subscribe(recorder.clone());

  let subscription = recorder.release_subscription().unwrap();
  drop(recorder);
  assert!(weak.upgrade().is_some());

  subscription.request(Demand::unlimited());
  assert!(weak.upgrade().is_none());
}

#[test]
fn subscriber_is_released_after_cancel() {
  let left = PassthroughSubject::<i32, Infallible>::new();
  let recorder = Arc::new(Recorder::<(i32, usize), Infallible>::new(Demand::max(1)));
  let weak = Arc::downgrade(&recorder);
  left.clone().zip(sequence(Counter::default())).subscribe(recorder.clone());

  left.send(1);
  let subscription = recorder.release_subscription().unwrap();
  drop(recorder);
  assert!(weak.upgrade().is_some());

  subscription.cancel();
  assert!(weak.upgrade().is_none());
  assert_eq!(left.subscriber_count(), 0);
}

#[test]
fn cancel_does_not_wait_for_a_slow_value_callback() {
  let recorder = Arc::new(Recorder::<usize, Infallible>::with_demand(Demand::NONE, |_| {
    thread::sleep(Duration::from_millis(300));
    Demand::NONE
  }));
  sequence::<_, Infallible>(Counter::default())
    .try_map(|v| Ok::<_, Infallible>(v))
    .subscribe(recorder.clone());
  let subscription = recorder.subscription().unwrap();

  let producer = {
    let subscription = subscription.clone();
    thread::spawn(move || subscription.request(Demand::max(3)))
  };
  thread::sleep(Duration::from_millis(50));

  let started = Instant::now();
  subscription.cancel();
  let cancel_took = started.elapsed();
  producer.join().unwrap();

  assert!(cancel_took < Duration::from_millis(200));
  assert_eq!(recorder.value_count(), 1);
  assert_eq!(recorder.completion(), None);
}

#[test]
fn concurrent_cancel_is_idempotent() {
  let sources: Vec<_> = (0..2).map(|_| PassthroughSubject::<i32, Infallible>::new()).collect();
  let recorder = Arc::new(Recorder::<(i32, i32), Infallible>::new(Demand::unlimited()));
  sources[0].clone().zip(sources[1].clone()).subscribe(recorder.clone());
  let subscription = recorder.subscription().unwrap();

  let barrier = Arc::new(Barrier::new(8));
  let handles: Vec<_> = (0..8)
    .map(|_| {
      let subscription = subscription.clone();
      let barrier = barrier.clone();
      thread::spawn(move || {
        barrier.wait();
        subscription.cancel();
      })
    })
    .collect();
  handles.into_iter().for_each(|h| h.join().unwrap());

  sources.iter().for_each(|s| s.send(1));
  assert_eq!(recorder.events(), vec![Event::Subscription]);
  assert!(sources.iter().all(|s| s.subscriber_count() == 0));
}

// ============================================================================
// Zip
// ============================================================================

#[test]
fn zip_pairs_interleaved_sends() {
  let digits = PassthroughSubject::<&'static str, Infallible>::new();
  let letters = PassthroughSubject::<&'static str, Infallible>::new();
  let recorder = Arc::new(Recorder::<String, Infallible>::new(Demand::unlimited()));
  digits
    .clone()
    .zip_with(letters.clone(), |(d, l)| format!("{d}{l}"))
    .subscribe(recorder.clone());

  digits.send("0");
  digits.send("1");
  letters.send("a");
  digits.send("2");
  letters.send("b");
  letters.send("c");

  assert_eq!(recorder.values(), vec!["0a", "1b", "2c"]);
}

#[test]
fn zip3_combines_in_tuple_completion_order() {
  let digits = PassthroughSubject::<&'static str, Infallible>::new();
  let lower = PassthroughSubject::<&'static str, Infallible>::new();
  let upper = PassthroughSubject::<&'static str, Infallible>::new();
  let recorder = Arc::new(Recorder::<String, Infallible>::new(Demand::unlimited()));
  digits
    .clone()
    .zip3_with(lower.clone(), upper.clone(), |(d, l, u)| format!("{d}{l}{u}"))
    .subscribe(recorder.clone());

  digits.send("0");
  lower.send("a");
  upper.send("A");
  digits.send("1");
  digits.send("2");
  lower.send("b");
  upper.send("B");
  upper.send("C");
  lower.send("c");
  digits.send("3");
  lower.send("d");
  upper.send("D");

  assert_eq!(recorder.values(), vec!["0aA", "1bB", "2cC", "3dD"]);
}

#[test]
fn zip_under_restricted_demand() {
  let left = PassthroughSubject::<usize, Infallible>::new();
  let right = PassthroughSubject::<usize, Infallible>::new();
  let received = Arc::new(AtomicUsize::new(0));
  let r = received.clone();
  let recorder =
    Arc::new(Recorder::<(usize, usize), Infallible>::with_demand(Demand::max(10), move |_| {
      match r.fetch_add(1, Ordering::SeqCst) + 1 {
        1 | 11 => Demand::max(1),
        _ => Demand::NONE,
      }
    }));
  left.clone().zip(right.clone()).subscribe(recorder.clone());

  for i in 0..100 {
    if i % 2 == 0 {
      left.send(i);
    } else {
      right.send(i);
    }
  }

  assert_eq!(recorder.value_count(), 12);
  assert_eq!(recorder.completion(), None);
}

#[test]
fn zip_of_relays_fails_with_the_transform_error() {
  let recorder = Arc::new(Recorder::<i32, TestError>::new(Demand::max(5)));
  let evens =
    sequence::<_, Infallible>(0..).try_filter(|v: &i32| Ok::<_, TestError>(v % 2 == 0));
  let checked = sequence::<_, Infallible>(0..)
    .try_map(|v: i32| if v < 3 { Ok(v) } else { Err(TestError::Oops) });
  evens.zip_with(checked, |(a, b)| a + b).subscribe(recorder.clone());

  assert_eq!(recorder.values(), vec![0, 3, 6]);
  assert_eq!(recorder.completion(), Some(Completion::Failure(TestError::Oops)));
}

// ============================================================================
// Async bridge
// ============================================================================

#[tokio::test]
async fn into_stream_feeds_an_async_consumer() {
  use futures::StreamExt;

  let subject = PassthroughSubject::<i32, Infallible>::new();
  let stream = subject.clone().try_map(|v| Ok::<_, Infallible>(v * 2)).into_stream();

  let producer = tokio::spawn(async move {
    for v in 0..5 {
      tokio::time::sleep(Duration::from_millis(10)).await;
      subject.send(v);
    }
    subject.send_completion(Completion::Finished);
  });

  let values: Vec<i32> = stream.map(Result::unwrap).collect().await;
  producer.await.unwrap();
  assert!(values.iter().all(|v| v % 2 == 0));
  assert!(values.windows(2).all(|w| w[0] < w[1]));
}
