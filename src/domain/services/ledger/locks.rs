//--------------------------------------------------------------------------------------------------
// STRUCTS
//--------------------------------------------------------------------------------------------------
// | Name      | Description                                              | Key Methods           |
// |-----------|----------------------------------------------------------|----------------------|
// | UserLocks | Per-user lock registry with prompt-fail acquisition      | try_acquire           |
//--------------------------------------------------------------------------------------------------

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::domain::models::types::UserId;

/// Guard serializing ledger mutations for one user. Dropping it releases the
/// user's lock.
pub type UserGuard = OwnedMutexGuard<()>;

/// Registry of per-user locks.
///
/// Every balance- or lot-mutating operation acquires the owning user's lock for
/// its full read-modify-write sequence, so concurrent requests for the same
/// user never interleave. Operations on different users share nothing and run
/// in parallel. Acquisition never blocks: a held lock fails the request
/// immediately and the caller retries.
#[derive(Debug, Default)]
pub struct UserLocks {
    /// Maps user ids to their lock handles.
    locks: RwLock<HashMap<UserId, Arc<Mutex<()>>>>,
}

impl UserLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the lock handle for a user, creating it on first use.
    fn handle(&self, user_id: &UserId) -> Arc<Mutex<()>> {
        if let Some(lock) = self.locks.read().get(user_id) {
            return lock.clone();
        }
        self.locks
            .write()
            .entry(user_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Attempts to acquire the user's lock without waiting.
    ///
    /// Returns `None` when another operation holds it; the caller maps that to
    /// a `Busy` failure.
    pub fn try_acquire(&self, user_id: &UserId) -> Option<UserGuard> {
        self.handle(user_id).try_lock_owned().ok()
    }
}

//--------------------------------------------------------------------------------------------------
//  TESTS
//--------------------------------------------------------------------------------------------------
// | Name                          | Description                                        |
// |-------------------------------|----------------------------------------------------|
// | test_second_acquire_fails     | A held lock rejects a second acquisition.          |
// | test_release_on_drop          | Dropping the guard frees the lock.                 |
// | test_users_do_not_contend     | Locks for different users are independent.         |
//--------------------------------------------------------------------------------------------------
