use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use shared::types::ServiceIdentity;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

struct Slot {
    mutex: Arc<AsyncMutex<()>>,
    /// Guards holding or waiting on `mutex`
    users: usize,
}

type LockTable = Arc<Mutex<HashMap<ServiceIdentity, Slot>>>;

/// One async mutex per identity, created on demand.
///
/// Callers working on the same identity are serialized; different identities
/// never contend beyond the short table lookup. An entry is dropped once no
/// guard holds it and nobody is waiting on it, including waiters whose
/// `lock` future was cancelled.
#[derive(Clone, Default)]
pub struct IdentityLocks {
    table: LockTable,
}

/// Registered interest in one identity. Holds the lock once `lock` returns;
/// dropping it, or the pending `lock` future, releases the table slot.
pub struct IdentityGuard {
    identity: ServiceIdentity,
    table: LockTable,
    guard: Option<OwnedMutexGuard<()>>,
}

impl IdentityLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, identity: &ServiceIdentity) -> IdentityGuard {
        let mut pending = IdentityGuard {
            identity: identity.clone(),
            table: self.table.clone(),
            guard: None,
        };

        let mutex = {
            let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
            let slot = table.entry(identity.clone()).or_insert_with(|| Slot {
                mutex: Arc::default(),
                users: 0,
            });
            slot.users += 1;
            slot.mutex.clone()
        };

        pending.guard = Some(mutex.lock_owned().await);
        pending
    }

    /// Number of identities currently locked or awaited
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.table.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for IdentityGuard {
    fn drop(&mut self) {
        drop(self.guard.take());

        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(slot) = table.get_mut(&self.identity) {
            slot.users -= 1;
            if slot.users == 0 {
                table.remove(&self.identity);
            }
        }
    }
}
