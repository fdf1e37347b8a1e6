/// All database primary keys are PostgreSQL BIGSERIAL.
pub type DbId = i64;

/// Per-channel change-event sequence numbers.
pub type Seq = i64;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
