use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

/// Per-session keyed locks, resolving the concurrent-mutation Open Question
/// in favor of a lock registry over optimistic versioning: callers serialize
/// on a session id instead of retrying on a stale row.
pub struct SessionLocks {
    table: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Default for SessionLocks {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionLocks {
    pub fn new() -> Self {
        Self { table: Mutex::new(HashMap::new()) }
    }

    async fn entry(&self, session_id: &str) -> Arc<Mutex<()>> {
        let mut table = self.table.lock().await;
        table
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub async fn lock(&self, session_id: &str) -> OwnedMutexGuard<()> {
        let mutex = self.entry(session_id).await;
        mutex.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_session_serializes() {
        let locks = SessionLocks::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let l1 = locks.entry("s1").await;
        let l2 = locks.entry("s1").await;
        assert!(Arc::ptr_eq(&l1, &l2));

        let _g = locks.lock("s1").await;
        let order2 = order.clone();
        let locks_handle = Arc::new(locks);
        let lh = locks_handle.clone();
        let handle = tokio::spawn(async move {
            let _g2 = lh.lock("s1").await;
            order2.lock().await.push(2);
        });
        order.lock().await.push(1);
        drop(_g);
        handle.await.unwrap();
        assert_eq!(*order.lock().await, vec![1, 2]);
    }
}
