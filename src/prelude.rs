//! Prelude module for convenient imports
//!
//! This module re-exports commonly used types and traits for easy access.

// Operators
#[cfg(feature = "stream")]
pub use crate::ops::into_stream::IntoStream;
pub use crate::ops::{
  try_compact_map::{TryCompactMap, TryFilter, TryMap, TryTransform},
  zip::Zip,
};
// Core contracts
pub use crate::{
  demand::Demand,
  error::DemandError,
  publisher::{just, sequence, Publisher, PublisherExt, Sequence},
  relay::RelayState,
  subject::PassthroughSubject,
  subscriber::{Completion, Event, Recorder, Sink, Subscriber},
  subscription::{
    Cancellable, CompositeSubscription, EmptySubscription, SharedSubscription, Subscription,
  },
};
