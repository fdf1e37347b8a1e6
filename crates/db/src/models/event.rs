//! Change-event log row.

use osprey_core::types::{DbId, Seq, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `change_events` table.
///
/// `seq` is monotonic and gap-free per channel; rows are never updated
/// after insert and age out of the bounded replay window.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ChangeEventRow {
    pub id: DbId,
    pub channel: String,
    pub seq: Seq,
    pub payload: serde_json::Value,
    pub emitted_at: Timestamp,
}
