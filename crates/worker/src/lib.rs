//! `osprey-worker` -- worker pool runtime.
//!
//! Consumes the durable queues for its configured worker types with a
//! credit window equal to each type's concurrency limit, executes the
//! registered handler for every delivery under an execution deadline, and
//! acknowledges or negative-acknowledges the delivery based on the
//! outcome. Every attempt start and result is reported to the central
//! service over its narrow callback interface; workers never touch job
//! records directly.

pub mod config;
pub mod handler;
pub mod handlers;
pub mod report;
pub mod runtime;
