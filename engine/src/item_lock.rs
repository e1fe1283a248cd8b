//! Per-item exclusive execution.
//!
//! Every register, transfer and recall for one item runs under that item's
//! lock; different items never contend. Entries are created on demand and
//! dropped when the last holder or waiter lets go.

use pharmachain_types::ItemKey;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type LockMap = HashMap<ItemKey, Arc<AsyncMutex<()>>>;

#[derive(Clone, Default)]
pub struct ItemLocks {
    map: Arc<Mutex<LockMap>>,
}

/// Held while an orchestration owns its item.
pub struct ItemGuard {
    item: ItemKey,
    guard: Option<OwnedMutexGuard<()>>,
    map: Arc<Mutex<LockMap>>,
}

impl ItemLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, item: &ItemKey) -> Arc<AsyncMutex<()>> {
        let mut map = self.map.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(map.entry(*item).or_default())
    }

    fn guard(&self, item: ItemKey, guard: OwnedMutexGuard<()>) -> ItemGuard {
        ItemGuard {
            item,
            guard: Some(guard),
            map: Arc::clone(&self.map),
        }
    }

    /// Wait for exclusive access to `item`.
    ///
    /// The flag is `true` when another orchestration held the item first, so
    /// whatever the caller read before acquiring may already be stale.
    pub async fn acquire(&self, item: &ItemKey) -> (ItemGuard, bool) {
        let lock = self.entry(item);
        match Arc::clone(&lock).try_lock_owned() {
            Ok(g) => (self.guard(*item, g), false),
            Err(_) => {
                tracing::debug!(item = %item, "waiting for item lock");
                let g = lock.lock_owned().await;
                (self.guard(*item, g), true)
            }
        }
    }

    /// Take the lock only if nobody holds it.
    pub fn try_acquire(&self, item: &ItemKey) -> Option<ItemGuard> {
        let lock = self.entry(item);
        lock.try_lock_owned().ok().map(|g| self.guard(*item, g))
    }

    /// Number of items with a live lock entry.
    pub fn tracked(&self) -> usize {
        self.map.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

fn prune(map: &Mutex<LockMap>, item: &ItemKey) {
    let mut map = map.lock().unwrap_or_else(PoisonError::into_inner);
    if map.get(item).is_some_and(|l| Arc::strong_count(l) == 1) {
        map.remove(item);
    }
}

impl ItemGuard {
    pub fn item(&self) -> &ItemKey {
        &self.item
    }
}

impl Drop for ItemGuard {
    fn drop(&mut self) {
        self.guard.take();
        prune(&self.map, &self.item);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn key(b: u8) -> ItemKey {
        ItemKey::new([b; 32])
    }

    #[tokio::test]
    async fn uncontended_acquire_reports_no_contention() {
        let locks = ItemLocks::new();
        let (_g, contended) = locks.acquire(&key(1)).await;
        assert!(!contended);
    }

    #[tokio::test]
    async fn different_items_do_not_block() {
        let locks = ItemLocks::new();
        let (_a, _) = locks.acquire(&key(1)).await;
        let (_b, contended) = locks.acquire(&key(2)).await;
        assert!(!contended);
        assert_eq!(locks.tracked(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn second_acquirer_waits_and_sees_contention() {
        let locks = ItemLocks::new();
        let (first, _) = locks.acquire(&key(1)).await;

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let (_g, contended) = locks.acquire(&key(1)).await;
                contended
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());
        drop(first);
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn try_acquire_fails_while_held() {
        let locks = ItemLocks::new();
        let (g, _) = locks.acquire(&key(1)).await;
        assert!(locks.try_acquire(&key(1)).is_none());
        drop(g);
        assert!(locks.try_acquire(&key(1)).is_some());
    }

    #[tokio::test]
    async fn entries_are_released() {
        let locks = ItemLocks::new();
        {
            let (_g, _) = locks.acquire(&key(1)).await;
            assert_eq!(locks.tracked(), 1);
        }
        assert_eq!(locks.tracked(), 0);
        assert!(locks.try_acquire(&key(2)).is_some());
        assert_eq!(locks.tracked(), 0);
    }
}
