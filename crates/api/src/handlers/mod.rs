pub mod jobs;
pub mod schedules;
