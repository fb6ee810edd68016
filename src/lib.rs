//! Gamelib - library fulfillment for a digital game store.
//!
//! Consumes checkout-completed events from a queue and adds the purchased
//! games to the buyer's library. Delivery is at-least-once; library updates
//! are idempotent set unions, so redelivery is harmless.

pub mod config;
pub mod dlq;
pub mod envelope;
pub mod library;
pub mod queue;
pub mod utils;
pub mod worker;
