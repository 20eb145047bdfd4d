//! Per-user state with serialized writers and snapshot readers.
//!
//! Each user has one async writer lock, held for the whole of a mutation
//! (ledger awaits included), and a short-lived `RwLock` around the committed
//! state. Writers work on a private copy and publish it with [`UserGuard::commit`],
//! so readers only ever see complete transitions.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::types::{UserId, UserProgress};

struct UserSlot {
    writer: Arc<Mutex<()>>,
    state: RwLock<UserProgress>,
}

impl UserSlot {
    fn new(progress: UserProgress) -> Self {
        Self {
            writer: Arc::new(Mutex::new(())),
            state: RwLock::new(progress),
        }
    }

    fn read(&self) -> UserProgress {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// In-memory store of every user's progress.
#[derive(Default)]
pub struct ProgressStore {
    users: RwLock<HashMap<UserId, Arc<UserSlot>>>,
}

impl ProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, user_id: &str) -> Arc<UserSlot> {
        if let Some(slot) = self
            .users
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(user_id)
        {
            return Arc::clone(slot);
        }
        let mut users = self.users.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            users
                .entry(user_id.to_string())
                .or_insert_with(|| Arc::new(UserSlot::new(UserProgress::new(user_id)))),
        )
    }

    /// Consistent copy of a user's committed state. Unknown users read as fresh.
    pub fn snapshot(&self, user_id: &str) -> UserProgress {
        let slot = self
            .users
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(user_id)
            .cloned();
        match slot {
            Some(slot) => slot.read(),
            None => UserProgress::new(user_id),
        }
    }

    /// Acquire the writer lock of a user, waiting for any mutation in flight.
    pub async fn lock(&self, user_id: &str) -> UserGuard {
        let slot = self.slot(user_id);
        let writer = Arc::clone(&slot.writer).lock_owned().await;
        UserGuard {
            _writer: writer,
            slot,
        }
    }

    pub fn user_ids(&self) -> Vec<UserId> {
        let mut ids: Vec<UserId> = self
            .users
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }
}

/// Exclusive write access to one user.
pub struct UserGuard {
    _writer: OwnedMutexGuard<()>,
    slot: Arc<UserSlot>,
}

impl UserGuard {
    /// Working copy of the committed state.
    pub fn read(&self) -> UserProgress {
        self.slot.read()
    }

    /// Publish a complete new state.
    pub fn commit(&self, progress: UserProgress) {
        *self
            .slot
            .state
            .write()
            .unwrap_or_else(PoisonError::into_inner) = progress;
    }
}
