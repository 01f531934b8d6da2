use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use log::debug;
use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::common::types::{Rid, TxnId};
use crate::transaction::concurrency::transaction::{
    AbortReason, IsolationLevel, Transaction, TransactionAbortError, TransactionState,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

struct LockRequest {
    txn_id: TxnId,
    mode: LockMode,
    granted: bool,
    // Kept so wound-wait can abort the holder without a global registry.
    txn: Arc<Transaction>,
}

/// Per-record FIFO of lock requests. The condvar is shared out via `Arc` so
/// waiters can keep a handle across map rehashes; every wait still goes
/// through the manager-wide mutex.
struct LockRequestQueue {
    requests: VecDeque<LockRequest>,
    upgrading: Option<TxnId>,
    cv: Arc<Condvar>,
}

impl Default for LockRequestQueue {
    fn default() -> Self {
        Self {
            requests: VecDeque::new(),
            upgrading: None,
            cv: Arc::new(Condvar::new()),
        }
    }
}

type LockTable = HashMap<Rid, LockRequestQueue>;

/// Two-phase locking with wound-wait deadlock prevention.
///
/// Transaction ids double as inverse priorities: lower id means older means
/// higher priority. A requester aborts ("wounds") every younger conflicting
/// transaction ahead of it in the record's queue and waits behind older
/// ones. Wounded waiters notice their `Aborted` state on wakeup and raise
/// [`AbortReason::Deadlock`].
///
/// The manager-wide mutex is a leaf: no page latch or pool latch is ever
/// taken while it is held.
pub struct LockManager {
    latch: Mutex<LockTable>,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LockManager {
    pub fn new() -> Self {
        Self {
            latch: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire a shared lock on `rid`.
    pub fn lock_shared(
        &self,
        txn: &Arc<Transaction>,
        rid: Rid,
    ) -> Result<bool, TransactionAbortError> {
        let mut table = self.latch.lock();

        match txn.state() {
            TransactionState::Aborted => return Ok(false),
            TransactionState::Shrinking => {
                return Err(Self::abort(txn, AbortReason::LockOnShrinking));
            }
            _ => {}
        }
        if txn.isolation_level() == IsolationLevel::ReadUncommitted {
            return Err(Self::abort(txn, AbortReason::LockSharedOnReadUncommitted));
        }
        if txn.is_shared_locked(rid) || txn.is_exclusive_locked(rid) {
            return Ok(true);
        }

        txn.set_state(TransactionState::Growing);
        self.enqueue_and_wait(&mut table, txn, rid, LockMode::Shared)?;
        txn.add_shared_lock(rid);
        Ok(true)
    }

    /// Acquire an exclusive lock on `rid`. Holding a shared lock already
    /// turns this into an upgrade.
    pub fn lock_exclusive(
        &self,
        txn: &Arc<Transaction>,
        rid: Rid,
    ) -> Result<bool, TransactionAbortError> {
        let mut table = self.latch.lock();

        match txn.state() {
            TransactionState::Aborted => return Ok(false),
            TransactionState::Shrinking => {
                return Err(Self::abort(txn, AbortReason::LockOnShrinking));
            }
            _ => {}
        }
        if txn.is_shared_locked(rid) {
            return self.upgrade_internal(&mut table, txn, rid);
        }
        if txn.is_exclusive_locked(rid) {
            return Ok(true);
        }

        txn.set_state(TransactionState::Growing);
        self.enqueue_and_wait(&mut table, txn, rid, LockMode::Exclusive)?;
        txn.add_exclusive_lock(rid);
        Ok(true)
    }

    /// Upgrade an already-held shared lock to exclusive. Only one upgrade
    /// may be in flight per record; a second upgrader is aborted.
    pub fn lock_upgrade(
        &self,
        txn: &Arc<Transaction>,
        rid: Rid,
    ) -> Result<bool, TransactionAbortError> {
        let mut table = self.latch.lock();

        match txn.state() {
            TransactionState::Aborted => return Ok(false),
            TransactionState::Shrinking => {
                return Err(Self::abort(txn, AbortReason::LockOnShrinking));
            }
            _ => {}
        }

        self.upgrade_internal(&mut table, txn, rid)
    }

    /// Release `txn`'s lock on `rid`. Under REPEATABLE_READ this is the
    /// point where the transaction leaves its growing phase. Returns
    /// whether a request was actually removed.
    pub fn unlock(&self, txn: &Arc<Transaction>, rid: Rid) -> bool {
        let mut table = self.latch.lock();

        if txn.state() == TransactionState::Growing
            && txn.isolation_level() == IsolationLevel::RepeatableRead
        {
            txn.set_state(TransactionState::Shrinking);
        }

        let removed = if let Some(queue) = table.get_mut(&rid) {
            let before = queue.requests.len();
            queue.requests.retain(|request| request.txn_id != txn.id());
            let removed = queue.requests.len() != before;
            if removed {
                queue.cv.notify_all();
            }
            removed
        } else {
            false
        };

        txn.remove_shared_lock(rid);
        txn.remove_exclusive_lock(rid);
        removed
    }

    /// Mark `txn` aborted and build the typed error for the caller
    fn abort(txn: &Arc<Transaction>, reason: AbortReason) -> TransactionAbortError {
        txn.set_state(TransactionState::Aborted);
        TransactionAbortError {
            txn_id: txn.id(),
            reason,
        }
    }

    fn upgrade_internal(
        &self,
        table: &mut MutexGuard<'_, LockTable>,
        txn: &Arc<Transaction>,
        rid: Rid,
    ) -> Result<bool, TransactionAbortError> {
        if txn.is_exclusive_locked(rid) {
            return Ok(true);
        }

        let queue = table.entry(rid).or_default();
        if queue.upgrading.is_some() {
            return Err(Self::abort(txn, AbortReason::UpgradeConflict));
        }
        queue.upgrading = Some(txn.id());

        // Drop the shared request, then compete for the exclusive one.
        queue.requests.retain(|request| request.txn_id != txn.id());
        txn.remove_shared_lock(rid);
        queue.cv.notify_all();

        let result = self.enqueue_and_wait(table, txn, rid, LockMode::Exclusive);

        if let Some(queue) = table.get_mut(&rid) {
            if queue.upgrading == Some(txn.id()) {
                queue.upgrading = None;
            }
        }

        result?;
        txn.add_exclusive_lock(rid);
        Ok(true)
    }

    /// Append a request and block until it is granted or the requester is
    /// wounded. Runs entirely under the manager mutex; the condvar releases
    /// it while parked.
    fn enqueue_and_wait(
        &self,
        table: &mut MutexGuard<'_, LockTable>,
        txn: &Arc<Transaction>,
        rid: Rid,
        mode: LockMode,
    ) -> Result<(), TransactionAbortError> {
        let txn_id = txn.id();
        let cv = {
            let queue = table.entry(rid).or_default();
            queue.requests.push_back(LockRequest {
                txn_id,
                mode,
                granted: false,
                txn: txn.clone(),
            });
            queue.cv.clone()
        };

        loop {
            let queue = match table.get_mut(&rid) {
                Some(queue) => queue,
                None => break,
            };
            if Self::try_grant(queue, rid, txn_id, mode) {
                break;
            }
            if txn.state() == TransactionState::Aborted {
                break;
            }
            cv.wait(table);
        }

        // Wounded while waiting: our request was already erased.
        if txn.state() == TransactionState::Aborted {
            return Err(TransactionAbortError {
                txn_id,
                reason: AbortReason::Deadlock,
            });
        }
        Ok(())
    }

    /// Walk the queue from the head. Conflicting younger transactions ahead
    /// of the requester are wounded; a conflicting older one means the
    /// requester must wait. Returns whether the request is now granted.
    fn try_grant(queue: &mut LockRequestQueue, rid: Rid, txn_id: TxnId, mode: LockMode) -> bool {
        let mut blocked = false;
        let mut i = 0;

        while i < queue.requests.len() {
            let request = &queue.requests[i];

            if request.txn_id == txn_id {
                let granted = !blocked;
                queue.requests[i].granted = granted;
                return granted;
            }

            let conflicts = match mode {
                LockMode::Shared => request.mode == LockMode::Exclusive,
                LockMode::Exclusive => true,
            };
            if !conflicts {
                i += 1;
                continue;
            }

            if request.txn_id > txn_id {
                // Wound the younger transaction; log before the erase so the
                // id cannot come from a dead entry.
                let victim_id = request.txn_id;
                debug!("txn {} wounds txn {} on {:?}", txn_id, victim_id, rid);
                let victim = queue.requests[i].txn.clone();
                victim.set_state(TransactionState::Aborted);
                victim.remove_shared_lock(rid);
                victim.remove_exclusive_lock(rid);
                queue.requests.remove(i);
                queue.cv.notify_all();
                // i now points at the next entry.
            } else if mode == LockMode::Exclusive {
                // An older transaction is ahead; wait our turn.
                return false;
            } else {
                blocked = true;
                i += 1;
            }
        }

        // Our request is gone: we were wounded. The caller notices the
        // aborted state.
        true
    }
}
