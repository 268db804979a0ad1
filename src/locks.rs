use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Serializes portfolio read-modify-write cycles per user within this
/// process. Writers in other processes are not covered.
#[derive(Clone, Default)]
pub struct UserLocks {
    inner: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl UserLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, user_id: &str) -> OwnedMutexGuard<()> {
        let mutex = self
            .inner
            .entry(user_id.to_string())
            .or_default()
            .value()
            .clone();
        mutex.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_user_waits() {
        let locks = UserLocks::new();
        let guard = locks.lock("u1").await;

        let other = locks.clone();
        let waiter = tokio::spawn(async move {
            let _guard = other.lock("u1").await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn different_users_do_not_block() {
        let locks = UserLocks::new();
        let _a = locks.lock("u1").await;
        let _b = tokio::time::timeout(Duration::from_millis(50), locks.lock("u2"))
            .await
            .unwrap();
    }
}
