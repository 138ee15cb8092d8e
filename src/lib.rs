//! # rxrelay: demand-driven reactive streams
//!
//! Publishers, subscribers and subscriptions that exchange values under
//! backpressure: nothing is produced before a subscriber asks for it, and
//! never more than it asked for. Every method may be called from any thread.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::{convert::Infallible, sync::Arc};
//!
//! use rxrelay::prelude::*;
//!
//! let recorder = Arc::new(Recorder::<String, Infallible>::new(Demand::max(2)));
//! sequence::<_, Infallible>(0..10)
//!   .zip_with(sequence(["a", "b", "c"]), |(n, s)| format!("{n}{s}"))
//!   .subscribe(recorder.clone());
//!
//! assert_eq!(recorder.values(), vec!["0a", "1b"]);
//!
//! recorder.subscription().unwrap().request(Demand::unlimited());
//! assert_eq!(recorder.values(), vec!["0a", "1b", "2c"]);
//! assert_eq!(recorder.completion(), Some(Completion::Finished));
//! ```
//!
//! ## Key Concepts
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Demand`] | Backpressure credit, bounded or unbounded |
//! | [`Publisher`] | Produces values for each subscriber it is given |
//! | [`Subscriber`] | Receives a subscription, values and one completion |
//! | [`Subscription`] | Handle to request more values or cancel |
//! | [`RelayState`] | Handshake and teardown state machine shared by operators |
//!
//! ## Feature Flags
//!
//! - **`stream`** (default): [`IntoStream`], a `futures::Stream` bridge
//!
//! [`Demand`]: demand::Demand
//! [`Publisher`]: publisher::Publisher
//! [`Subscriber`]: subscriber::Subscriber
//! [`Subscription`]: subscription::Subscription
//! [`RelayState`]: relay::RelayState
//! [`IntoStream`]: ops::into_stream::IntoStream

pub mod demand;
pub mod error;
pub mod ops;
pub mod prelude;
pub mod publisher;
pub mod relay;
pub mod subject;
pub mod subscriber;
pub mod subscription;

// Re-export the prelude module
pub use prelude::*;
