//! Durable typed publish/consume primitive over Postgres-backed queues.
//!
//! One queue per worker type; delivery is lease-based and at-least-once
//! with manual acknowledgement:
//!
//! - [`Broker::publish`] appends a message, retrying transient database
//!   failures with bounded backoff before surfacing `DispatchUnavailable`.
//! - [`Broker::claim`] hands out up to `credit` messages per call using
//!   `FOR UPDATE SKIP LOCKED` and stamps each with a lease. A message whose
//!   lease expires without an ack becomes claimable again (redelivery).
//! - [`Broker::ack`] deletes the delivery; [`Broker::nack_requeue`] makes
//!   it visible again after a delay; [`Broker::nack_dead_letter`] parks it
//!   terminally while keeping the row inspectable.

mod message;
mod queue;

pub use message::Delivery;
pub use queue::{Broker, BrokerConfig};
