//! Per-tab serialization
//!
//! Every read-modify-write of a tab's state runs under that tab's lock.
//! Work on different tabs proceeds concurrently.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use psp_core::TabId;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Default)]
pub struct TabLocks {
    locks: StdMutex<HashMap<TabId, Arc<Mutex<()>>>>,
}

impl TabLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, tab_id: TabId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(tab_id).or_default().clone()
    }

    /// Wait for exclusive access to `tab_id`.
    pub async fn acquire(&self, tab_id: TabId) -> OwnedMutexGuard<()> {
        self.slot(tab_id).lock_owned().await
    }

    /// Forget the lock of a removed tab. Holders keep their guard.
    pub fn forget(&self, tab_id: TabId) {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.remove(&tab_id);
    }

    pub fn len(&self) -> usize {
        self.locks.lock().map(|l| l.len()).unwrap_or_else(|poisoned| poisoned.into_inner().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_tab_is_serialized() {
        let locks = Arc::new(TabLocks::new());
        let guard = locks.acquire(1).await;

        let other = Arc::clone(&locks);
        let waiter = tokio::spawn(async move {
            let _g = other.acquire(1).await;
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn test_different_tabs_do_not_block() {
        let locks = TabLocks::new();
        let _a = locks.acquire(1).await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.acquire(2)).await;
        assert!(b.is_ok());
        assert_eq!(locks.len(), 2);

        locks.forget(1);
        assert_eq!(locks.len(), 1);
    }
}
