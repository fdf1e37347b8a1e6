//! Osprey notification broker.
//!
//! [`NotifyHub`] is the fan-out point for [`ChangeEvent`]s: it assigns
//! gap-free per-channel sequence numbers, appends every event durably to
//! the `change_events` log *before* delivery, and pushes to subscribers
//! through bounded per-subscriber queues. A subscriber that cannot keep up
//! is disconnected rather than allowed to slow anyone else down.
//!
//! Reconnecting subscribers may resume from their last seen sequence; the
//! missed events are replayed from the log in order, seamlessly followed
//! by live delivery. Resuming past the retained window fails with
//! `ResumeGap`.

pub mod event;
pub mod hub;
pub mod retention;

pub use event::ChangeEvent;
pub use hub::{NotifyHub, NotifyHubConfig, SubscriptionStream};
