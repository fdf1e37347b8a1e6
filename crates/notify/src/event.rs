//! The change-event envelope delivered to subscribers.

use osprey_core::types::{Seq, Timestamp};
use serde::{Deserialize, Serialize};

/// Well-known channel carrying job lifecycle changes.
pub const CHANNEL_JOBS: &str = "jobs";

/// Well-known channel carrying schedule fires.
pub const CHANNEL_SCHEDULES: &str = "schedules";

/// A state-change event on one channel.
///
/// `seq` is strictly increasing and gap-free within `channel`; events are
/// immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub channel: String,
    pub seq: Seq,
    pub payload: serde_json::Value,
    pub emitted_at: Timestamp,
}
