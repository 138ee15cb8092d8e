//! Zip operator implementation
//!
//! Zip subscribes to N publishers, buffers what each of them emits, and
//! combines one head from every buffer as soon as all N are non-empty. The
//! number of combined values is the minimum, over time, of values received
//! per branch.
//!
//! Downstream demand is added to the zip's own credit and also forwarded to
//! every upstream. Extra demand returned by the consumer is forwarded the
//! same way. Values a branch buffers ahead of the others never consume
//! credit, so granting more demand later resumes exactly where combination
//! stopped.
//!
//! The combined stream finishes once some finished branch has an empty
//! buffer, because no further tuple can be formed. A failing branch fails
//! the stream at once. Both terminal events cancel every upstream.

use std::{
  collections::VecDeque,
  fmt::{Debug, Formatter},
  mem,
  sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
};

use smallvec::{smallvec, SmallVec};
use tracing::{debug, trace};

use crate::{
  demand::Demand,
  publisher::Publisher,
  relay::{RelayState, Released},
  subscriber::{Completion, Subscriber},
  subscription::{CompositeSubscription, EmptySubscription, SharedSubscription, Subscription},
};

// ==================== Zip Operator ====================

/// Zip operator
///
/// `Sources` is a tuple of 2 to 4 publishers sharing one failure type, and
/// `combine` receives a tuple holding one head value per source.
pub struct Zip<Sources, F> {
  sources: Sources,
  combine: Arc<F>,
}

impl<Sources, F> Zip<Sources, F> {
  pub fn new(sources: Sources, combine: F) -> Self { Zip { sources, combine: Arc::new(combine) } }
}

impl<Sources: Clone, F> Clone for Zip<Sources, F> {
  fn clone(&self) -> Self { Zip { sources: self.sources.clone(), combine: self.combine.clone() } }
}

/// The per-branch buffers of a zip, one `VecDeque` per source.
pub trait ZipQueues: Default + Send + 'static {
  /// One value per branch.
  type Heads;
  const ARITY: usize;

  /// Every branch has at least one buffered value.
  fn is_ready(&self) -> bool;

  fn pop_heads(&mut self) -> Option<Self::Heads>;

  fn is_empty_at(&self, index: usize) -> bool;
}

// ==================== Shared State ====================

/// Progress of the downstream handshake.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Handshake {
  /// Some branch has not delivered its handle yet.
  Waiting,
  /// `receive_subscription` is running on the downstream.
  InFlight,
  Done,
}

struct ZipBuffers<Q, Err> {
  queues: Q,
  finished: SmallVec<[bool; 4]>,
  /// Branch handles, filled as each branch finishes its handshake.
  upstreams: SmallVec<[Option<SharedSubscription>; 4]>,
  demand: Demand,
  handshake: Handshake,
  /// A branch failure waiting for the drain owner.
  pending: Option<Completion<Err>>,
  /// Set while one thread owns the drain loop.
  draining: bool,
  terminated: bool,
}

impl<Q: ZipQueues, Err> ZipBuffers<Q, Err> {
  fn new() -> Self {
    ZipBuffers {
      queues: Q::default(),
      finished: smallvec![false; Q::ARITY],
      upstreams: smallvec![None; Q::ARITY],
      demand: Demand::NONE,
      handshake: Handshake::Waiting,
      pending: None,
      draining: false,
      terminated: false,
    }
  }

  /// A finished branch with nothing buffered can never contribute again.
  fn is_exhausted(&self) -> bool {
    let queues = &self.queues;
    self.finished.iter().enumerate().any(|(index, finished)| *finished && queues.is_empty_at(index))
  }

  /// Marks the buffers terminal and hands back what they held.
  fn terminate(&mut self) -> (Q, SmallVec<[SharedSubscription; 4]>) {
    self.terminated = true;
    self.draining = false;
    self.demand = Demand::NONE;
    self.pending = None;
    let upstreams = self.upstreams.iter_mut().filter_map(Option::take).collect();
    (mem::take(&mut self.queues), upstreams)
  }
}

struct ZipInner<Q, F, Out, Err> {
  relay: RelayState<Arc<F>, Arc<dyn Subscriber<Out, Err>>>,
  buffers: Mutex<ZipBuffers<Q, Err>>,
  me: Weak<Self>,
}

enum Step<Q: ZipQueues, Err> {
  Combine(Q::Heads),
  Finish { completion: Completion<Err>, queues: Q, upstreams: SmallVec<[SharedSubscription; 4]> },
  Idle,
}

impl<Q, F, Out, Err> ZipInner<Q, F, Out, Err>
where
  Q: ZipQueues,
  F: Fn(Q::Heads) -> Out + Send + Sync + 'static,
  Out: 'static,
  Err: Send + 'static,
{
  fn new(combine: Arc<F>, subscriber: Arc<dyn Subscriber<Out, Err>>) -> Arc<Self> {
    Arc::new_cyclic(|me| ZipInner {
      relay: RelayState::new(combine, subscriber),
      buffers: Mutex::new(ZipBuffers::new()),
      me: me.clone(),
    })
  }

  #[inline]
  fn lock(&self) -> MutexGuard<'_, ZipBuffers<Q, Err>> {
    self.buffers.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Stores a branch handle. The downstream handshake happens once the last
  /// branch has delivered its handle.
  fn attach(&self, index: usize, subscription: SharedSubscription) {
    let composite: SharedSubscription = {
      let mut buffers = self.lock();
      if buffers.terminated || buffers.upstreams[index].is_some() {
        drop(buffers);
        subscription.cancel();
        return;
      }
      buffers.upstreams[index] = Some(subscription);
      if buffers.upstreams.iter().any(Option::is_none) {
        return;
      }
      buffers.handshake = Handshake::InFlight;
      Arc::new(buffers.upstreams.iter().flatten().cloned().collect::<CompositeSubscription>())
    };

    let me = match self.me.upgrade() {
      Some(me) => me,
      None => return composite.cancel(),
    };
    match self.relay.receive_subscription(composite.clone()) {
      Some(downstream) => downstream.receive_subscription(me),
      None => return composite.cancel(),
    }
    self.lock().handshake = Handshake::Done;
    // Values and terminal events held back during the handshake.
    self.drain();
  }

  fn push<Item>(&self, push: fn(&mut Q, Item), value: Item) {
    {
      let mut buffers = self.lock();
      if buffers.terminated {
        return;
      }
      push(&mut buffers.queues, value);
    }
    self.drain();
  }

  fn branch_finished(&self, index: usize) {
    {
      let mut buffers = self.lock();
      if buffers.terminated {
        return;
      }
      buffers.finished[index] = true;
    }
    self.drain();
  }

  fn branch_failed(&self, completion: Completion<Err>) {
    {
      let mut buffers = self.lock();
      if buffers.terminated || buffers.pending.is_some() {
        return;
      }
      buffers.pending = Some(completion);
    }
    self.drain();
  }

  fn next_step(buffers: &mut ZipBuffers<Q, Err>) -> Step<Q, Err> {
    if buffers.terminated || buffers.handshake == Handshake::InFlight {
      buffers.draining = false;
      return Step::Idle;
    }
    let completion = match buffers.pending.take() {
      Some(failure) => Some(failure),
      None if buffers.is_exhausted() => Some(Completion::Finished),
      None => None,
    };
    if let Some(completion) = completion {
      let (queues, upstreams) = buffers.terminate();
      return Step::Finish { completion, queues, upstreams };
    }
    if buffers.handshake == Handshake::Waiting || buffers.demand.is_zero() {
      buffers.draining = false;
      return Step::Idle;
    }
    match buffers.queues.pop_heads() {
      Some(heads) => {
        buffers.demand -= 1_usize;
        Step::Combine(heads)
      }
      None => {
        buffers.draining = false;
        Step::Idle
      }
    }
  }

  /// Emits every tuple that is both complete and covered by demand, then the
  /// terminal event if one is due. Only one thread drains at a time; others
  /// only update the buffers and leave, and the owner picks up their work.
  fn drain(&self) {
    {
      let mut buffers = self.lock();
      if buffers.draining || buffers.terminated {
        return;
      }
      buffers.draining = true;
    }
    loop {
      let step = Self::next_step(&mut self.lock());
      let heads = match step {
        Step::Combine(heads) => heads,
        Step::Finish { completion, queues, upstreams } => {
          drop(queues);
          return self.finish(completion, upstreams);
        }
        Step::Idle => return,
      };
      let (combine, subscriber) = match self.relay.current_pair_if_relaying() {
        Some(pair) => pair,
        None => {
          self.lock().draining = false;
          return;
        }
      };
      let more = subscriber.receive(combine(heads));
      drop(subscriber);
      if !more.is_zero() {
        self.lock().demand += more;
        if let Some(upstream) = self.relay.subscription() {
          upstream.request(more);
        }
      }
    }
  }

  /// Delivers the terminal event. Only the drain owner gets here, after the
  /// buffers were terminated.
  fn finish(&self, completion: Completion<Err>, upstreams: SmallVec<[SharedSubscription; 4]>) {
    let released = self.relay.complete();
    for upstream in upstreams {
      upstream.cancel();
    }
    if let Some(Released { publisher, subscriber, upstream }) = released {
      drop(publisher);
      // Terminated before every branch handed over its handle: the
      // subscriber still gets its handshake first.
      if upstream.is_none() {
        subscriber.receive_subscription(Arc::new(EmptySubscription));
      }
      drop(upstream);
      trace!(failed = completion.is_failure(), "zip completed");
      subscriber.receive_completion(completion);
    }
  }
}

impl<Q, F, Out, Err> Subscription for ZipInner<Q, F, Out, Err>
where
  Q: ZipQueues,
  F: Fn(Q::Heads) -> Out + Send + Sync + 'static,
  Out: 'static,
  Err: Send + 'static,
{
  fn request(&self, demand: Demand) {
    {
      let mut buffers = self.lock();
      if buffers.terminated {
        return;
      }
      buffers.demand += demand;
    }
    if let Some(upstream) = self.relay.subscription() {
      upstream.request(demand);
    }
    self.drain();
  }

  fn cancel(&self) {
    let (queues, upstreams) = {
      let mut buffers = self.lock();
      if buffers.terminated {
        return;
      }
      buffers.terminate()
    };
    drop(queues);
    if self.relay.complete().is_some() {
      debug!("zip cancelled");
    }
    for upstream in upstreams {
      upstream.cancel();
    }
  }
}

impl<Q, F, Out, Err> Debug for ZipInner<Q, F, Out, Err> {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    f.debug_tuple("Zip").field(&self.relay).finish()
  }
}

// ==================== Branch Subscriber ====================

/// Subscriber attached to one zip source.
struct ZipBranch<Q, F, Out, Err, Item> {
  zip: Arc<ZipInner<Q, F, Out, Err>>,
  index: usize,
  push: fn(&mut Q, Item),
}

impl<Q, F, Out, Err, Item> ZipBranch<Q, F, Out, Err, Item> {
  fn new(zip: Arc<ZipInner<Q, F, Out, Err>>, index: usize, push: fn(&mut Q, Item)) -> Self {
    ZipBranch { zip, index, push }
  }
}

impl<Q, F, Out, Err, Item> Subscriber<Item, Err> for ZipBranch<Q, F, Out, Err, Item>
where
  Q: ZipQueues,
  F: Fn(Q::Heads) -> Out + Send + Sync + 'static,
  Out: 'static,
  Err: Send + 'static,
{
  fn receive_subscription(&self, subscription: SharedSubscription) {
    self.zip.attach(self.index, subscription);
  }

  fn receive(&self, input: Item) -> Demand {
    self.zip.push(self.push, input);
    Demand::NONE
  }

  fn receive_completion(&self, completion: Completion<Err>) {
    match completion {
      Completion::Finished => self.zip.branch_finished(self.index),
      failure => self.zip.branch_failed(failure),
    }
  }
}

// ==================== Arities ====================

macro_rules! impl_zip {
  ($arity:literal; $($P:ident: $idx:tt),+) => {
    impl<$($P),+> ZipQueues for ($(VecDeque<$P>,)+)
    where
      $($P: Send + 'static),+
    {
      type Heads = ($($P,)+);
      const ARITY: usize = $arity;

      fn is_ready(&self) -> bool { $(!self.$idx.is_empty())&&+ }

      fn pop_heads(&mut self) -> Option<Self::Heads> {
        if !self.is_ready() {
          return None;
        }
        Some(($(self.$idx.pop_front()?,)+))
      }

      fn is_empty_at(&self, index: usize) -> bool {
        match index {
          $($idx => self.$idx.is_empty(),)+
          _ => true,
        }
      }
    }

    impl<F, Out, Err, $($P),+> Publisher for Zip<($($P,)+), F>
    where
      $($P: Publisher<Failure = Err>, $P::Output: Send + 'static,)+
      F: Fn(($($P::Output,)+)) -> Out + Send + Sync + 'static,
      Out: 'static,
      Err: Send + 'static,
    {
      type Output = Out;
      type Failure = Err;

      fn subscribe<S>(&self, subscriber: Arc<S>)
      where
        S: Subscriber<Out, Err> + 'static,
      {
        let inner: Arc<ZipInner<($(VecDeque<$P::Output>,)+), F, Out, Err>> =
          ZipInner::new(self.combine.clone(), subscriber);
        $(
          self.sources.$idx.subscribe(Arc::new(ZipBranch::new(
            inner.clone(),
            $idx,
            |queues, value| queues.$idx.push_back(value),
          )));
        )+
      }
    }
  };
}

impl_zip!(2; A: 0, B: 1);
impl_zip!(3; A: 0, B: 1, C: 2);
impl_zip!(4; A: 0, B: 1, C: 2, D: 3);

#[cfg(test)]
mod tests {
  use std::{
    convert::Infallible,
    sync::{
      atomic::{AtomicBool, AtomicUsize, Ordering},
      Arc, Barrier, Mutex,
    },
    thread,
  };

  use crate::prelude::*;

  type Slot = Arc<Mutex<Option<Arc<dyn Subscriber<i32, Infallible>>>>>;

  /// Pushes values whether or not they were requested.
  #[derive(Clone, Default)]
  struct Firehose {
    slot: Slot,
  }

  impl Firehose {
    fn push(&self, value: i32) {
      let subscriber = self.slot.lock().unwrap().clone();
      if let Some(subscriber) = subscriber {
        subscriber.receive(value);
      }
    }
  }

  impl Publisher for Firehose {
    type Output = i32;
    type Failure = Infallible;

    fn subscribe<S>(&self, subscriber: Arc<S>)
    where
      S: Subscriber<i32, Infallible> + 'static,
    {
      let subscriber: Arc<dyn Subscriber<i32, Infallible>> = subscriber;
      *self.slot.lock().unwrap() = Some(subscriber.clone());
      subscriber.receive_subscription(Arc::new(EmptySubscription));
    }
  }

  /// Fails one zip source from inside the downstream handshake.
  struct FailsOnSubscribe {
    source: PassthroughSubject<i32, &'static str>,
    events: Mutex<Vec<&'static str>>,
  }

  impl Subscriber<(i32, i32), &'static str> for FailsOnSubscribe {
    fn receive_subscription(&self, _subscription: SharedSubscription) {
      self.source.send_completion(Completion::Failure("early"));
      self.events.lock().unwrap().push("subscription");
    }

    fn receive(&self, _input: (i32, i32)) -> Demand {
      self.events.lock().unwrap().push("value");
      Demand::NONE
    }

    fn receive_completion(&self, _completion: Completion<&'static str>) {
      self.events.lock().unwrap().push("completion");
    }
  }

  fn concat((a, b): (&'static str, &'static str)) -> String { format!("{a}{b}") }

  #[test]
  fn zips_in_tuple_order() {
    let recorder = Arc::new(Recorder::<(i32, char), Infallible>::new(Demand::unlimited()));
    sequence::<_, Infallible>(vec![1, 2, 3])
      .zip(sequence(vec!['a', 'b', 'c', 'd']))
      .subscribe(recorder.clone());

    assert_eq!(recorder.values(), vec![(1, 'a'), (2, 'b'), (3, 'c')]);
    assert_eq!(recorder.completion(), Some(Completion::Finished));
  }

  #[test]
  fn combines_interleaved_sends() {
    let left = PassthroughSubject::<&'static str, Infallible>::new();
    let right = PassthroughSubject::<&'static str, Infallible>::new();
    let recorder = Arc::new(Recorder::<String, Infallible>::new(Demand::unlimited()));
    left.clone().zip_with(right.clone(), concat).subscribe(recorder.clone());

    left.send("0");
    left.send("1");
    right.send("a");
    left.send("2");
    right.send("b");
    right.send("c");

    assert_eq!(recorder.values(), vec!["0a", "1b", "2c"]);
    assert_eq!(recorder.completion(), None);
  }

  #[test]
  fn finishes_when_a_finished_branch_runs_dry() {
    let left = PassthroughSubject::<i32, Infallible>::new();
    let right = PassthroughSubject::<i32, Infallible>::new();
    let recorder = Arc::new(Recorder::<i32, Infallible>::new(Demand::unlimited()));
    left.clone().zip_with(right.clone(), |(a, b)| a + b).subscribe(recorder.clone());

    left.send(1);
    left.send(2);
    left.send_completion(Completion::Finished);
    assert_eq!(recorder.completion(), None);

    right.send(10);
    assert_eq!(recorder.completion(), None);
    right.send(20);

    assert_eq!(recorder.values(), vec![11, 22]);
    assert_eq!(recorder.completion(), Some(Completion::Finished));
    assert_eq!(right.subscriber_count(), 0);
  }

  #[test]
  fn branch_failure_fails_at_once() {
    let left = PassthroughSubject::<i32, &'static str>::new();
    let right = PassthroughSubject::<i32, &'static str>::new();
    let recorder = Arc::new(Recorder::<(i32, i32), &'static str>::new(Demand::unlimited()));
    left.clone().zip(right.clone()).subscribe(recorder.clone());

    left.send(1);
    right.send(2);
    left.send(3);
    right.send_completion(Completion::Failure("broken"));
    left.send(4);

    assert_eq!(
      recorder.events(),
      vec![
        Event::Subscription,
        Event::Value((1, 2)),
        Event::Completion(Completion::Failure("broken")),
      ]
    );
    assert_eq!(left.subscriber_count(), 0);
  }

  #[test]
  fn empty_branch_completes_before_handshake() {
    let right = PassthroughSubject::<i32, Infallible>::new();
    let recorder = Arc::new(Recorder::<(i32, i32), Infallible>::new(Demand::unlimited()));
    sequence(Vec::<i32>::new()).zip(right.clone()).subscribe(recorder.clone());

    assert_eq!(
      recorder.events(),
      vec![Event::Subscription, Event::Completion(Completion::Finished)]
    );
    assert_eq!(right.subscriber_count(), 0);
  }

  #[test]
  fn buffered_values_do_not_consume_demand() {
    let left = PassthroughSubject::<i32, Infallible>::new();
    let right = PassthroughSubject::<i32, Infallible>::new();
    let recorder = Arc::new(Recorder::<(i32, i32), Infallible>::new(Demand::max(2)));
    left.clone().zip(right.clone()).subscribe(recorder.clone());

    left.send(1);
    left.send(2);
    right.send(10);
    assert_eq!(recorder.values(), vec![(1, 10)]);

    right.send(20);
    // Both branches are out of demand now.
    left.send(3);
    right.send(30);
    assert_eq!(recorder.values(), vec![(1, 10), (2, 20)]);

    recorder.subscription().unwrap().request(Demand::max(1));
    left.send(3);
    right.send(30);
    assert_eq!(recorder.values(), vec![(1, 10), (2, 20), (3, 30)]);
  }

  #[test]
  fn extra_demand_reaches_every_branch() {
    let left = PassthroughSubject::<i32, Infallible>::new();
    let right = PassthroughSubject::<i32, Infallible>::new();
    let received = Arc::new(AtomicUsize::new(0));
    let r = received.clone();
    let recorder = Arc::new(Recorder::<i32, Infallible>::with_demand(Demand::max(10), move |_| {
      match r.fetch_add(1, Ordering::SeqCst) + 1 {
        1 | 11 => Demand::max(1),
        _ => Demand::NONE,
      }
    }));
    left.clone().zip_with(right.clone(), |(a, b)| a * b).subscribe(recorder.clone());

    for i in 0..50 {
      left.send(i);
      right.send(i);
    }

    assert_eq!(recorder.value_count(), 12);
    assert_eq!(recorder.values(), (0..12).map(|i| i * i).collect::<Vec<_>>());
  }

  #[test]
  fn cancel_cancels_every_branch() {
    let sources: Vec<_> = (0..4).map(|_| PassthroughSubject::<i32, Infallible>::new()).collect();
    let recorder = Arc::new(Recorder::<i32, Infallible>::new(Demand::unlimited()));
    let weak = Arc::downgrade(&recorder);
    sources[0]
      .clone()
      .zip4_with(sources[1].clone(), sources[2].clone(), sources[3].clone(), |(a, b, c, d)| {
        a + b + c + d
      })
      .subscribe(recorder.clone());

    sources.iter().for_each(|s| s.send(1));
    let subscription = recorder.release_subscription().unwrap();
    drop(recorder);
    subscription.cancel();
    subscription.cancel();

    assert!(weak.upgrade().is_none());
    sources.iter().for_each(|s| {
      s.send(2);
      assert_eq!(s.subscriber_count(), 0);
    });
  }

  #[test]
  fn failure_waits_for_value_being_combined() {
    let left = PassthroughSubject::<i32, &'static str>::new();
    let right = PassthroughSubject::<i32, &'static str>::new();
    let recorder = Arc::new(Recorder::<i32, &'static str>::new(Demand::unlimited()));
    let entered = Arc::new(Barrier::new(2));
    let release = Arc::new(Barrier::new(2));
    let first = AtomicBool::new(true);
    let (e, r) = (entered.clone(), release.clone());
    left
      .clone()
      .zip_with(right.clone(), move |(a, b)| {
        if first.swap(false, Ordering::SeqCst) {
          e.wait();
          r.wait();
        }
        a + b
      })
      .subscribe(recorder.clone());

    left.send(1);
    let sender = {
      let right = right.clone();
      thread::spawn(move || right.send(2))
    };
    entered.wait();
    left.send_completion(Completion::Failure("boom"));
    assert_eq!(recorder.completion(), None);

    release.wait();
    sender.join().unwrap();
    assert_eq!(
      recorder.events(),
      vec![Event::Subscription, Event::Value(3), Event::Completion(Completion::Failure("boom"))]
    );
    assert_eq!(right.subscriber_count(), 0);
  }

  #[test]
  fn failure_during_handshake_follows_it() {
    let left = PassthroughSubject::<i32, &'static str>::new();
    let right = PassthroughSubject::<i32, &'static str>::new();
    let subscriber =
      Arc::new(FailsOnSubscribe { source: left.clone(), events: Mutex::new(vec![]) });
    left.clone().zip(right.clone()).subscribe(subscriber.clone());

    assert_eq!(*subscriber.events.lock().unwrap(), vec!["subscription", "completion"]);
    assert_eq!(right.subscriber_count(), 0);
  }

  #[test]
  fn sends_only_as_many_as_demanded() {
    let left = Firehose::default();
    let right = Firehose::default();
    let received = Arc::new(AtomicUsize::new(0));
    let r = received.clone();
    let recorder = Arc::new(Recorder::<i32, Infallible>::with_demand(Demand::max(10), move |_| {
      match r.fetch_add(1, Ordering::SeqCst) + 1 {
        1 | 11 => Demand::max(1),
        _ => Demand::NONE,
      }
    }));
    left.clone().zip_with(right.clone(), |(a, b)| a + b).subscribe(recorder.clone());

    for i in 0..100 {
      if i % 3 == 0 {
        left.push(i);
      } else {
        right.push(i);
      }
    }

    assert_eq!(recorder.value_count(), 12);
    assert_eq!(recorder.completion(), None);
  }
}
