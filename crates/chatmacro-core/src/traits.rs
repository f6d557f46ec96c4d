//! Collaborators the core calls into but does not own.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::Result;

/// Outbound command channel: delivers one rendered line to the outside world.
pub trait ChatServer: Send + Sync {
    /// Send a single message. Synchronous and fire-and-forget from the caller's view.
    fn send(&self, message: &str) -> Result<()>;
}

/// The external "busy" flag shared with a resource outside this process's control.
///
/// Only `SharedExecutionLock` writes it from inside ChatMacro, but the external
/// resource may clear it at any time.
pub trait BusyFlag: Send + Sync {
    fn get(&self) -> bool;
    fn set(&self, value: bool);
}

/// In-process flag backed by an `AtomicBool`. Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct AtomicBusyFlag {
    inner: Arc<AtomicBool>,
}

impl AtomicBusyFlag {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BusyFlag for AtomicBusyFlag {
    fn get(&self) -> bool {
        self.inner.load(Ordering::SeqCst)
    }

    fn set(&self, value: bool) {
        self.inner.store(value, Ordering::SeqCst);
    }
}

impl<T: ChatServer + ?Sized> ChatServer for Arc<T> {
    fn send(&self, message: &str) -> Result<()> {
        (**self).send(message)
    }
}

impl<T: BusyFlag + ?Sized> BusyFlag for Arc<T> {
    fn get(&self) -> bool {
        (**self).get()
    }

    fn set(&self, value: bool) {
        (**self).set(value)
    }
}
