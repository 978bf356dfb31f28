//! Distributed mutual-exclusion cron scheduling.
//! Jobs are loaded from a directory of definition files and every worker
//! process runs the same schedule; a shared lock store makes sure each tick
//! of a job runs on at most one worker.

pub mod action;
pub mod error;
pub mod lock;
pub mod lock_memory;
pub mod lock_redis;
pub mod registry;
pub mod schedule;
pub mod scheduler;
pub mod types;

pub use error::{Error, Result};
