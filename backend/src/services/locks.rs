//! Per-entity transition locks
//!
//! Lifecycle operations lock every tray and system they touch before reading
//! the snapshot they work on. Keys are taken in sorted order, so two
//! operations over overlapping entities cannot deadlock.

use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

#[derive(Clone, Default)]
pub struct TransitionLocks {
    entries: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

/// Holds every acquired lock until dropped
///
/// On drop the locks are released and entries nobody else is waiting on are
/// removed, so the table only holds keys that are in use.
pub struct TransitionGuard {
    guards: Vec<OwnedMutexGuard<()>>,
    keys: Vec<String>,
    entries: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl Drop for TransitionGuard {
    fn drop(&mut self) {
        self.guards.clear();
        for key in &self.keys {
            self.entries
                .remove_if(key, |_, mutex| Arc::strong_count(mutex) == 1);
        }
    }
}

impl TransitionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tray_key(farm_id: Uuid, tray_id: &str) -> String {
        format!("tray:{}:{}", farm_id, tray_id)
    }

    pub fn system_key(system_id: Uuid) -> String {
        format!("system:{}", system_id)
    }

    /// Serializes instance allocation for one tray id prefix
    pub fn prefix_key(farm_id: Uuid, prefix: &str) -> String {
        format!("prefix:{}:{}", farm_id, prefix)
    }

    pub async fn acquire(&self, keys: impl IntoIterator<Item = String>) -> TransitionGuard {
        let ordered: BTreeSet<String> = keys.into_iter().collect();
        let mut guard = TransitionGuard {
            guards: Vec::with_capacity(ordered.len()),
            keys: Vec::with_capacity(ordered.len()),
            entries: self.entries.clone(),
        };
        for key in ordered {
            let mutex = self
                .entries
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone();
            guard.keys.push(key);
            guard.guards.push(mutex.lock_owned().await);
        }
        guard
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_overlapping_keys_are_serialized() {
        let locks = TransitionLocks::new();
        let system = TransitionLocks::system_key(Uuid::nil());

        let guard = locks.acquire([system.clone(), "tray:a".to_string()]).await;
        let contender = {
            let locks = locks.clone();
            let system = system.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire([system]).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());
        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), contender)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_disjoint_keys_do_not_block() {
        let locks = TransitionLocks::new();
        let _first = locks.acquire(["tray:a".to_string()]).await;
        let second = tokio::time::timeout(
            Duration::from_millis(100),
            locks.acquire(["tray:b".to_string()]),
        )
        .await;
        assert!(second.is_ok());
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn test_released_keys_are_removed() {
        let locks = TransitionLocks::new();
        for n in 0..1000 {
            let _guard = locks
                .acquire([TransitionLocks::tray_key(Uuid::nil(), &n.to_string())])
                .await;
        }
        assert_eq!(locks.len(), 0);
    }

    #[tokio::test]
    async fn test_waiting_key_survives_release() {
        let locks = TransitionLocks::new();
        let key = "tray:a".to_string();

        let guard = locks.acquire([key.clone()]).await;
        let waiter = {
            let locks = locks.clone();
            let key = key.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire([key]).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(guard);
        assert_eq!(locks.len(), 1);

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(locks.len(), 0);
    }

    #[tokio::test]
    async fn test_opposite_order_does_not_deadlock() {
        let locks = TransitionLocks::new();
        let a = "system:a".to_string();
        let b = "system:b".to_string();

        let mut tasks = Vec::new();
        for i in 0..20 {
            let locks = locks.clone();
            let keys = if i % 2 == 0 {
                vec![a.clone(), b.clone()]
            } else {
                vec![b.clone(), a.clone()]
            };
            tasks.push(tokio::spawn(async move {
                let _guard = locks.acquire(keys).await;
                tokio::task::yield_now().await;
            }));
        }
        for task in tasks {
            tokio::time::timeout(Duration::from_secs(2), task)
                .await
                .unwrap()
                .unwrap();
        }
    }
}
