//! Error types shared by every ChatMacro crate.

/// Errors surfaced by the macro store, queue, executor and scheduler.
#[derive(Debug, thiserror::Error)]
pub enum MacroError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Batch failed after attempting {attempted} row(s): {reason}")]
    BatchFailed { attempted: usize, reason: String },

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid cron expression '{expression}': {reason}")]
    InvalidSchedule { expression: String, reason: String },

    #[error("Invalid time zone '{0}'")]
    InvalidTimeZone(String),

    #[error("Macro needs {required} argument(s) but {given} were given")]
    ArgumentCount { required: usize, given: usize },

    #[error("A macro already exists at path '{0}'")]
    PathCollision(String),

    #[error("Command '{command}' is already used by '{path}'")]
    CommandCollision { command: String, path: String },

    #[error("Macro not found: {0}")]
    NotFound(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Mutation queue is closed")]
    QueueClosed,

    #[error("Queued mutation panicked")]
    QueuePanicked,
}

impl MacroError {
    /// Number of arguments still missing, for `ArgumentCount` errors.
    pub fn missing_arguments(&self) -> Option<usize> {
        match self {
            MacroError::ArgumentCount { required, given } => Some(required.saturating_sub(*given)),
            _ => None,
        }
    }

    /// Validation conditions are reported to the caller; the component stays usable.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            MacroError::InvalidSchedule { .. }
                | MacroError::InvalidTimeZone(_)
                | MacroError::ArgumentCount { .. }
                | MacroError::PathCollision(_)
                | MacroError::CommandCollision { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, MacroError>;
