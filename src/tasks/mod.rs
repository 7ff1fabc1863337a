//! Background Tasks Module
//!
//! Contains background tasks that run while a manager is ready.
//!
//! # Tasks
//! - TTL Sweep: Removes expired L1 entries at the configured interval

mod cleanup;

pub use cleanup::spawn_cleanup_task;
