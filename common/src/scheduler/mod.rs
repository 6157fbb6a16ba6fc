// Scheduler module for due-post detection and publishing

pub mod engine;

pub use engine::{is_eligible, select_candidates, Scheduler, SchedulerEngine, TickReport};
