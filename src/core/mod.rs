//! Runtime: providers, formatting, topics, readiness and the scheduler.

pub mod formatter;
pub mod providers;
pub mod readiness;
pub mod reading;
pub mod scheduler;
pub mod topics;
