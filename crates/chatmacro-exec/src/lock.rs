//! Refcounted lock bridging macro tasks to one external busy flag.
//!
//! Each running macro holds a ticket. The flag is raised when the first
//! ticket is acquired and cleared when the last one is released. The
//! external resource may clear the flag on its own (e.g. a cancel key);
//! [`SharedExecutionLock::reconcile`] treats that as losing the most
//! recently acquired ticket.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chatmacro_core::traits::BusyFlag;
use indexmap::IndexMap;
use tokio_util::sync::CancellationToken;

/// Identifier of one in-flight macro execution.
pub type TicketId = u64;

pub struct SharedExecutionLock {
    /// Held tickets in acquisition order, each with its cancellation token.
    tickets: Mutex<IndexMap<TicketId, CancellationToken>>,
    flag: Arc<dyn BusyFlag>,
    next_id: AtomicU64,
}

impl SharedExecutionLock {
    pub fn new(flag: Arc<dyn BusyFlag>) -> Self {
        Self {
            tickets: Mutex::new(IndexMap::new()),
            flag,
            next_id: AtomicU64::new(1),
        }
    }

    fn tickets(&self) -> MutexGuard<'_, IndexMap<TicketId, CancellationToken>> {
        // Bookkeeping stays valid even if a holder panicked mid-update.
        self.tickets.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mint a fresh ticket id.
    pub fn next_ticket(&self) -> TicketId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Hold `id`. Raises the external flag when this is the first ticket.
    /// Returns the token cancelled when the ticket is released.
    pub fn acquire(&self, id: TicketId) -> CancellationToken {
        let mut tickets = self.tickets();
        if let Some(token) = tickets.get(&id) {
            return token.clone();
        }
        let was_empty = tickets.is_empty();
        let token = CancellationToken::new();
        tickets.insert(id, token.clone());
        if was_empty {
            self.flag.set(true);
        }
        tracing::debug!("🔒 Ticket {id} acquired ({} held)", tickets.len());
        token
    }

    /// Mint, acquire and wrap a ticket so it is released when dropped.
    pub fn acquire_guard(self: &Arc<Self>) -> TicketGuard {
        let id = self.next_ticket();
        let token = self.acquire(id);
        TicketGuard {
            lock: Arc::clone(self),
            id,
            token,
        }
    }

    /// Drop `id`. Clears the external flag when no ticket is left.
    pub fn release(&self, id: TicketId) -> bool {
        let mut tickets = self.tickets();
        let Some(token) = tickets.shift_remove(&id) else {
            return false;
        };
        token.cancel();
        if tickets.is_empty() {
            self.flag.set(false);
        }
        tracing::debug!("🔓 Ticket {id} released ({} held)", tickets.len());
        true
    }

    /// Drop every ticket and force the flag down. Returns how many were held.
    pub fn release_all(&self) -> usize {
        let mut tickets = self.tickets();
        let released = tickets.len();
        for (_, token) in tickets.drain(..) {
            token.cancel();
        }
        self.flag.set(false);
        if released > 0 {
            tracing::info!("🛑 Released all {released} ticket(s)");
        }
        released
    }

    pub fn is_acquired(&self, id: TicketId) -> bool {
        self.tickets().contains_key(&id)
    }

    /// Whether any ticket is held.
    pub fn is_any_acquired(&self) -> bool {
        !self.tickets().is_empty()
    }

    /// Held ticket ids, oldest first.
    pub fn held(&self) -> Vec<TicketId> {
        self.tickets().keys().copied().collect()
    }

    /// Run once per tick of the external resource.
    ///
    /// If the flag was cleared from outside while tickets are held, the most
    /// recently acquired ticket is released, then the flag is re-derived
    /// from whatever is left.
    pub fn reconcile(&self) -> Option<TicketId> {
        let mut tickets = self.tickets();
        if tickets.is_empty() || self.flag.get() {
            return None;
        }
        let (id, token) = tickets.pop()?;
        token.cancel();
        self.flag.set(!tickets.is_empty());
        tracing::info!("⏹️ Busy flag cleared externally, ticket {id} pre-empted");
        Some(id)
    }
}

/// Scoped ticket: released on drop, whatever the exit path.
pub struct TicketGuard {
    lock: Arc<SharedExecutionLock>,
    id: TicketId,
    token: CancellationToken,
}

impl TicketGuard {
    pub fn id(&self) -> TicketId {
        self.id
    }

    /// Cancelled as soon as the ticket is released (by anyone).
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_held(&self) -> bool {
        !self.token.is_cancelled() && self.lock.is_acquired(self.id)
    }
}

impl Drop for TicketGuard {
    fn drop(&mut self) {
        self.lock.release(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatmacro_core::traits::AtomicBusyFlag;

    fn lock() -> (AtomicBusyFlag, Arc<SharedExecutionLock>) {
        let flag = AtomicBusyFlag::new();
        let lock = Arc::new(SharedExecutionLock::new(Arc::new(flag.clone())));
        (flag, lock)
    }

    #[test]
    fn test_flag_tracks_ticket_count() {
        let (flag, lock) = lock();
        let ops: [(bool, TicketId); 7] =
            [(true, 1), (true, 2), (false, 1), (true, 3), (false, 2), (false, 3), (false, 3)];
        for (acquire, id) in ops {
            if acquire {
                lock.acquire(id);
            } else {
                lock.release(id);
            }
            assert_eq!(flag.get(), lock.is_any_acquired(), "after {acquire} {id}");
        }
        assert!(!flag.get());
    }

    #[test]
    fn test_release_cancels_token() {
        let (_, lock) = lock();
        let token = lock.acquire(7);
        assert!(!token.is_cancelled());
        assert!(lock.release(7));
        assert!(token.is_cancelled());
        assert!(!lock.release(7));
    }

    #[test]
    fn test_release_all() {
        let (flag, lock) = lock();
        let a = lock.acquire(1);
        let b = lock.acquire(2);
        assert_eq!(lock.release_all(), 2);
        assert!(a.is_cancelled() && b.is_cancelled());
        assert!(!flag.get());
        assert!(!lock.is_any_acquired());
    }

    #[test]
    fn test_reconcile_releases_most_recent() {
        let (flag, lock) = lock();
        lock.acquire(10);
        lock.acquire(20);
        let newest = lock.acquire(30);

        // Flag still up: nothing to reconcile.
        assert_eq!(lock.reconcile(), None);

        flag.set(false);
        assert_eq!(lock.reconcile(), Some(30));
        assert!(newest.is_cancelled());
        assert_eq!(lock.held(), vec![10, 20]);
        assert!(flag.get());

        // Release order is acquisition order reversed, not id order.
        lock.release(20);
        lock.acquire(5);
        flag.set(false);
        assert_eq!(lock.reconcile(), Some(5));
        assert_eq!(lock.held(), vec![10]);
    }

    #[test]
    fn test_reconcile_last_ticket_leaves_flag_down() {
        let (flag, lock) = lock();
        lock.acquire(1);
        flag.set(false);
        assert_eq!(lock.reconcile(), Some(1));
        assert!(!flag.get());
        assert!(!lock.is_any_acquired());
    }

    #[test]
    fn test_external_set_is_tolerated() {
        let (flag, lock) = lock();
        flag.set(true);
        assert_eq!(lock.reconcile(), None);
        assert!(flag.get());
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let (flag, lock) = lock();
        {
            let guard = lock.acquire_guard();
            assert!(guard.is_held());
            assert!(flag.get());
        }
        assert!(!flag.get());
        assert!(!lock.is_any_acquired());
    }

    #[test]
    fn test_guard_sees_external_release() {
        let (_, lock) = lock();
        let guard = lock.acquire_guard();
        lock.release_all();
        assert!(!guard.is_held());
    }
}
