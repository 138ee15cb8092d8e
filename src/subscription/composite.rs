use smallvec::SmallVec;

use super::{SharedSubscription, Subscription};
use crate::demand::Demand;

/// Subscription that fans `request` and `cancel` out to several upstreams.
///
/// Multi-source operators such as [`Zip`](crate::ops::zip::Zip) hand one of
/// these to their relay once every branch has delivered its own handle, so
/// the relay can treat N upstreams as one.
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
///
/// use rxrelay::prelude::*;
///
/// let composite: CompositeSubscription =
///   vec![Arc::new(EmptySubscription) as SharedSubscription, Arc::new(EmptySubscription)]
///     .into_iter()
///     .collect();
/// composite.request(Demand::max(1));
/// composite.cancel();
/// assert_eq!(composite.len(), 2);
/// ```
#[derive(Default)]
pub struct CompositeSubscription {
  upstreams: SmallVec<[SharedSubscription; 4]>,
}

impl CompositeSubscription {
  pub fn new(upstreams: impl IntoIterator<Item = SharedSubscription>) -> Self {
    CompositeSubscription { upstreams: upstreams.into_iter().collect() }
  }

  pub fn len(&self) -> usize { self.upstreams.len() }

  pub fn is_empty(&self) -> bool { self.upstreams.is_empty() }
}

impl FromIterator<SharedSubscription> for CompositeSubscription {
  fn from_iter<T: IntoIterator<Item = SharedSubscription>>(iter: T) -> Self {
    CompositeSubscription::new(iter)
  }
}

impl Subscription for CompositeSubscription {
  fn request(&self, demand: Demand) {
    for upstream in &self.upstreams {
      upstream.request(demand);
    }
  }

  fn cancel(&self) {
    for upstream in &self.upstreams {
      upstream.cancel();
    }
  }
}
