//! Mutation queue: serializes every write to the macro table.
//!
//! One worker thread drains an unbounded channel, so writes run one at a
//! time in submission order no matter which thread enqueued them. Each
//! operation reports through its own [`MutationHandle`]; a failing or
//! panicking operation never stops the ones queued after it.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use chatmacro_core::error::{MacroError, Result};
use chatmacro_core::macros::{Macro, MacroColumn};
use tokio::sync::{mpsc, oneshot};

use crate::table::{BatchOutcome, MacroTable};

type Job = Box<dyn FnOnce(&MacroTable) + Send>;

/// Completion handle for one queued operation.
pub struct MutationHandle<T> {
    rx: oneshot::Receiver<Result<T>>,
}

impl<T> MutationHandle<T> {
    /// Wait for this operation from async code.
    pub async fn wait(self) -> Result<T> {
        self.rx.await.unwrap_or(Err(MacroError::QueueClosed))
    }

    /// Wait for this operation from a plain thread. Panics inside a tokio runtime.
    pub fn blocking_wait(self) -> Result<T> {
        self.rx.blocking_recv().unwrap_or(Err(MacroError::QueueClosed))
    }
}

/// Ordered write queue in front of a [`MacroTable`].
pub struct MacroQueue {
    tx: mpsc::UnboundedSender<Job>,
}

impl MacroQueue {
    /// Start the worker thread for `table`.
    pub fn new(table: Arc<MacroTable>) -> Result<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        std::thread::Builder::new()
            .name("macro-queue".into())
            .spawn(move || {
                while let Some(job) = rx.blocking_recv() {
                    job(&table);
                }
                tracing::debug!("📭 Macro queue worker stopped");
            })?;
        Ok(Self { tx })
    }

    /// Append `op` after every operation already queued.
    pub fn enqueue<T, F>(&self, op: F) -> MutationHandle<T>
    where
        T: Send + 'static,
        F: FnOnce(&MacroTable) -> Result<T> + Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel();
        let job: Job = Box::new(move |table| {
            let result = catch_unwind(AssertUnwindSafe(|| op(table)))
                .unwrap_or(Err(MacroError::QueuePanicked));
            if let Err(e) = &result {
                tracing::warn!("⚠️ Queued macro mutation failed: {e}");
            }
            let _ = done_tx.send(result);
        });

        if let Err(mpsc::error::SendError(_)) = self.tx.send(job) {
            // Worker is gone; the dropped sender resolves the handle as closed.
            tracing::warn!("⚠️ Macro queue closed, mutation dropped");
        }
        MutationHandle { rx: done_rx }
    }

    // Every helper clones its macros before queueing, so later edits by the
    // caller never race the pending write.

    pub fn insert(&self, m: &Macro) -> MutationHandle<BatchOutcome> {
        let m = m.clone();
        self.enqueue(move |t| t.insert(&m))
    }

    pub fn insert_all(&self, macros: &[Macro]) -> MutationHandle<BatchOutcome> {
        let macros = macros.to_vec();
        self.enqueue(move |t| t.insert_all(&macros))
    }

    pub fn update(&self, column: MacroColumn, m: &Macro) -> MutationHandle<BatchOutcome> {
        let m = m.clone();
        self.enqueue(move |t| t.update(column, &m, None))
    }

    /// Move the row keyed by `old_path` to `m.path`.
    pub fn rename(&self, m: &Macro, old_path: &str) -> MutationHandle<BatchOutcome> {
        let m = m.clone();
        let old_path = old_path.to_string();
        self.enqueue(move |t| t.update(MacroColumn::Path, &m, Some(&old_path)))
    }

    pub fn delete(&self, m: &Macro) -> MutationHandle<BatchOutcome> {
        let m = m.clone();
        self.enqueue(move |t| t.delete(&m))
    }

    pub fn delete_all_of(&self, macros: &[Macro]) -> MutationHandle<BatchOutcome> {
        let macros = macros.to_vec();
        self.enqueue(move |t| t.delete_all_of(&macros))
    }

    pub fn delete_all(&self) -> MutationHandle<BatchOutcome> {
        self.enqueue(|t| t.delete_all())
    }

    pub fn recreate_table(&self) -> MutationHandle<BatchOutcome> {
        self.enqueue(|t| t.recreate_table())
    }
}
