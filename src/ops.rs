//! Relay operators.
//!
//! Every operator here is a publisher wrapping its upstream(s). Subscribing
//! builds one inner relay per subscriber, which is at the same time the
//! upstream's subscriber and the downstream's subscription.

#[cfg(feature = "stream")]
pub mod into_stream;
pub mod try_compact_map;
pub mod zip;
