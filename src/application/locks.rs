//! Per-key async locks used to serialize mutations of one account or user.

use std::collections::HashMap;
use std::fmt::Display;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::time::{Instant, timeout_at};
use tracing::{debug, warn};

use crate::domain::{AccountId, UserId};

use super::{LedgerError, LedgerResult};

type Slots<K> = Arc<Mutex<HashMap<K, Arc<AsyncMutex<()>>>>>;

/// Holds a lock for as long as it lives.
///
/// Dropping the last guard of a key with no waiters removes the key's slot,
/// so the registry only holds keys that are locked or contended.
pub struct KeyGuard<K: Eq + Hash> {
    key: K,
    guard: Option<OwnedMutexGuard<()>>,
    slots: Slots<K>,
}

impl<K: Eq + Hash> Drop for KeyGuard<K> {
    fn drop(&mut self) {
        if let Some(guard) = self.guard.take() {
            let slot = Arc::clone(OwnedMutexGuard::mutex(&guard));
            drop(guard);
            prune(&self.slots, &self.key, &slot);
        }
    }
}

/// Remove `key`'s slot if only the map and `slot` still reference it.
///
/// Callers clone a slot only while holding the map lock, so the count
/// cannot grow while it is checked here.
fn prune<K: Eq + Hash>(slots: &Slots<K>, key: &K, slot: &Arc<AsyncMutex<()>>) {
    let mut slots = slots.lock().unwrap_or_else(|e| e.into_inner());
    let unused = slots
        .get(key)
        .is_some_and(|current| Arc::ptr_eq(current, slot) && Arc::strong_count(slot) == 2);
    if unused {
        slots.remove(key);
    }
}

/// One async mutex per key, created on first use.
///
/// Keys are locked in ascending order whenever more than one is needed, so
/// two callers asking for overlapping sets can never wait on each other in
/// a cycle.
pub struct KeyedLocks<K> {
    label: &'static str,
    slots: Slots<K>,
}

impl<K> KeyedLocks<K>
where
    K: Copy + Eq + Hash + Ord + Display,
{
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            slots: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn slot(&self, key: K) -> Arc<AsyncMutex<()>> {
        // A poisoned map only means another task panicked while inserting;
        // the map itself is still usable.
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(slots.entry(key).or_default())
    }

    /// Lock one key, waiting at most `wait`.
    pub async fn acquire(&self, key: K, wait: Duration) -> LedgerResult<KeyGuard<K>> {
        self.acquire_until(key, Instant::now() + wait).await
    }

    /// Lock several keys in ascending order under one shared deadline.
    /// Duplicate keys are locked once.
    pub async fn acquire_many(&self, keys: &[K], wait: Duration) -> LedgerResult<Vec<KeyGuard<K>>> {
        let deadline = Instant::now() + wait;
        let mut ordered = keys.to_vec();
        ordered.sort();
        ordered.dedup();

        let mut guards = Vec::with_capacity(ordered.len());
        for key in ordered {
            // Guards already taken are released on the early return.
            guards.push(self.acquire_until(key, deadline).await?);
        }
        Ok(guards)
    }

    async fn acquire_until(&self, key: K, deadline: Instant) -> LedgerResult<KeyGuard<K>> {
        let slot = self.slot(key);
        let acquired = timeout_at(deadline, Arc::clone(&slot).lock_owned()).await;
        match acquired {
            Ok(guard) => {
                debug!(lock = self.label, %key, "lock acquired");
                Ok(KeyGuard {
                    key,
                    guard: Some(guard),
                    slots: Arc::clone(&self.slots),
                })
            }
            Err(_) => {
                prune(&self.slots, &key, &slot);
                warn!(lock = self.label, %key, "lock wait timed out");
                Err(LedgerError::Busy(format!("{} {}", self.label, key)))
            }
        }
    }

    /// Number of keys currently holding a slot.
    pub fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The locks shared by all services of one ledger.
///
/// Ordering rule: a user's lock is always taken before any account lock,
/// and account locks are taken in ascending id order.
pub struct LockRegistry {
    pub users: KeyedLocks<UserId>,
    pub accounts: KeyedLocks<AccountId>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self {
            users: KeyedLocks::new("user"),
            accounts: KeyedLocks::new("account"),
        }
    }
}

impl Default for LockRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    #[tokio::test]
    async fn test_second_acquire_times_out_while_held() {
        let locks: KeyedLocks<Uuid> = KeyedLocks::new("account");
        let key = Uuid::new_v4();

        let _held = locks.acquire(key, Duration::from_millis(50)).await.unwrap();
        let second = locks.acquire(key, Duration::from_millis(20)).await;

        assert!(matches!(second, Err(LedgerError::Busy(_))));
    }

    #[tokio::test]
    async fn test_released_lock_can_be_retaken() {
        let locks: KeyedLocks<Uuid> = KeyedLocks::new("account");
        let key = Uuid::new_v4();

        drop(locks.acquire(key, Duration::from_millis(50)).await.unwrap());
        assert!(locks.acquire(key, Duration::from_millis(50)).await.is_ok());
    }

    #[tokio::test]
    async fn test_acquire_many_dedups_keys() {
        let locks: KeyedLocks<Uuid> = KeyedLocks::new("account");
        let key = Uuid::new_v4();

        let guards = locks
            .acquire_many(&[key, key], Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(guards.len(), 1);
    }

    #[tokio::test]
    async fn test_acquire_many_releases_on_timeout() {
        let locks: KeyedLocks<Uuid> = KeyedLocks::new("account");
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let (low, high) = if a < b { (a, b) } else { (b, a) };

        let held = locks.acquire(high, Duration::from_millis(50)).await.unwrap();
        let result = locks
            .acquire_many(&[high, low], Duration::from_millis(20))
            .await;
        assert!(matches!(result, Err(LedgerError::Busy(_))));

        // `low` was taken first and must have been released with the error.
        assert!(locks.acquire(low, Duration::from_millis(20)).await.is_ok());
        drop(held);
    }

    #[tokio::test]
    async fn test_released_lock_removes_slot() {
        let locks: KeyedLocks<Uuid> = KeyedLocks::new("user");
        let key = Uuid::new_v4();

        let guard = locks.acquire(key, Duration::from_millis(50)).await.unwrap();
        assert_eq!(locks.len(), 1);
        drop(guard);
        assert!(locks.is_empty());

        let guards = locks
            .acquire_many(&[Uuid::new_v4(), Uuid::new_v4()], Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(locks.len(), 2);
        drop(guards);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_slot_survives_while_contended() {
        let locks: KeyedLocks<Uuid> = KeyedLocks::new("account");
        let key = Uuid::new_v4();

        let held = locks.acquire(key, Duration::from_millis(50)).await.unwrap();
        assert!(locks.acquire(key, Duration::from_millis(20)).await.is_err());

        // The timed-out waiter leaves the holder's slot in place.
        assert_eq!(locks.len(), 1);
        drop(held);
        assert!(locks.is_empty());
    }
}
