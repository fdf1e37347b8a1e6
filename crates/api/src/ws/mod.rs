//! WebSocket delivery of change events.
//!
//! The HTTP upgrade handler authenticates and opens the hub subscription
//! *before* upgrading, so credential failures and resume gaps surface as
//! proper HTTP statuses with no subscription side effect.

mod handler;

pub use handler::events_subscribe;
