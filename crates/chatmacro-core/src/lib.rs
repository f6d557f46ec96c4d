//! # ChatMacro Core
//!
//! Shared building blocks for the ChatMacro workspace.
//!
//! ## Architecture
//! ```text
//! chatmacro-core
//!   ├── macros   — Macro record (unique by path) + MacroColumn
//!   ├── traits   — ChatServer (outbound channel), BusyFlag (external lock flag)
//!   ├── error    — MacroError / Result
//!   └── config   — MacroConfig (~/.chatmacro/config.toml)
//! ```

pub mod config;
pub mod error;
pub mod macros;
pub mod traits;

pub use config::{ExecutorConfig, MacroConfig, SchedulerConfig, SchedulerTriggerConfig, TickConfig};
pub use error::{MacroError, Result};
pub use macros::{Macro, MacroColumn};
pub use traits::{AtomicBusyFlag, BusyFlag, ChatServer};
