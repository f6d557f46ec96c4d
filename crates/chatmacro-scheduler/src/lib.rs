//! # ChatMacro Scheduler
//!
//! Fires outbound commands on cron schedules.
//!
//! ## Architecture
//! ```text
//! spawn_ticker (tokio interval)
//!   ├── SharedExecutionLock::reconcile   — external busy flag desync
//!   └── SchedulerDriver::tick(now, elapsed)
//!         ├── CronTrigger: "0 8 * * *" @ Europe/Berlin → "/echo good morning"
//!         └── due → MacroExecutor::execute (same path as a direct invocation)
//! ```
//!
//! Firing is detected per tick ("the occurrence falls inside the last tick
//! window"), so precision is bounded by the tick interval.

pub mod trigger;
pub mod engine;

pub use trigger::{CronTrigger, TriggerZone, try_parse};
pub use engine::{FiredTrigger, SchedulerDriver, spawn_ticker};
