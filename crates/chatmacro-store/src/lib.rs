//! # ChatMacro Store
//!
//! Durable macro storage plus the pieces that sit directly on top of it.
//!
//! ## Architecture
//! ```text
//! caller (UI / CLI thread)
//!   ├── MacroSet      — in-memory working set, unique by path
//!   └── MacroQueue    — one ordered stream of writes
//!         └── worker thread → MacroTable (SQLite FTS5, trigram)
//!                               └── on_change observers
//!
//! search::lookup(candidates, filter) — pure token ranking over any set
//! ```

pub mod queue;
pub mod search;
pub mod set;
pub mod table;

pub use queue::{MacroQueue, MutationHandle};
pub use search::lookup;
pub use set::MacroSet;
pub use table::{BatchOutcome, ChangeKind, MacroChange, MacroTable};
