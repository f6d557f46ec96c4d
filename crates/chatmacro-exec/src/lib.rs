//! # ChatMacro Exec
//!
//! Runs macros against the single shared external command channel.
//!
//! ## Architecture
//! ```text
//! caller ─► args::ArgumentBinder (executable? render lines)
//!        ─► MacroExecutor::execute
//!             ├── SharedExecutionLock::acquire(ticket)  → busy flag = true
//!             ├── per line: render → ChatServer::send → wait / interval
//!             └── ticket released on every exit path    → busy flag = false
//!
//! tick source ─► SharedExecutionLock::reconcile (external flag cleared → LIFO release)
//! ```

pub mod args;
pub mod executor;
pub mod lock;

pub use args::{ArgumentBinder, MessageFormat};
pub use executor::{ExecutionHandle, MacroExecutor};
pub use lock::{SharedExecutionLock, TicketGuard, TicketId};
