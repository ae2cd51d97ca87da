use super::{Grant, GrantStoreBackend, GrantStoreError};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;

/// Grants held in a sharded concurrent map.
///
/// Consumed grants stay in the map, flagged, until they expire so a second
/// redemption is reported as `AlreadyConsumed` rather than `NotFound`.
#[derive(Clone, Default)]
pub struct InMemoryGrantStore {
    grants: Arc<DashMap<String, Grant>>,
}

impl InMemoryGrantStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.grants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }
}

#[async_trait]
impl GrantStoreBackend for InMemoryGrantStore {
    async fn put(&self, grant: &Grant) -> Result<(), GrantStoreError> {
        self.grants.insert(grant.handle.clone(), grant.clone());
        Ok(())
    }

    async fn get(&self, handle: &str) -> Result<Option<Grant>, GrantStoreError> {
        let now = Utc::now().timestamp();
        Ok(self
            .grants
            .get(handle)
            .filter(|grant| !grant.is_expired_at(now))
            .map(|grant| grant.value().clone()))
    }

    async fn consume(&self, handle: &str) -> Result<Grant, GrantStoreError> {
        let now = Utc::now().timestamp();
        // The entry guard holds the shard write lock for this key only
        let mut entry = self
            .grants
            .get_mut(handle)
            .ok_or(GrantStoreError::NotFound)?;
        if entry.consumed {
            return Err(GrantStoreError::AlreadyConsumed);
        }
        if entry.is_expired_at(now) {
            return Err(GrantStoreError::Expired);
        }
        entry.consumed = true;
        Ok(entry.value().clone())
    }

    async fn remove(&self, handle: &str) -> Result<(), GrantStoreError> {
        self.grants.remove(handle);
        Ok(())
    }

    async fn sweep_expired(&self) -> Result<usize, GrantStoreError> {
        let now = Utc::now().timestamp();
        let before = self.grants.len();
        self.grants.retain(|_, grant| !grant.is_expired_at(now));
        Ok(before.saturating_sub(self.grants.len()))
    }

    async fn health_check(&self) -> Result<(), String> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grants::GrantKind;

    fn grant(handle: &str, lifetime: u64) -> Grant {
        Grant::new(
            handle,
            GrantKind::RefreshToken,
            "client",
            vec!["offline_access".to_string()],
            lifetime,
        )
    }

    #[tokio::test]
    async fn test_put_get_remove() {
        let store = InMemoryGrantStore::new();
        store.put(&grant("h1", 60)).await.unwrap();
        assert_eq!(store.get("h1").await.unwrap().unwrap().client_id, "client");
        assert!(store.get("h2").await.unwrap().is_none());

        store.remove("h1").await.unwrap();
        assert!(store.get("h1").await.unwrap().is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_consume_once() {
        let store = InMemoryGrantStore::new();
        store.put(&grant("h1", 60)).await.unwrap();

        let consumed = store.consume("h1").await.unwrap();
        assert!(consumed.consumed);
        assert!(matches!(
            store.consume("h1").await,
            Err(GrantStoreError::AlreadyConsumed)
        ));
        assert!(matches!(
            store.consume("missing").await,
            Err(GrantStoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_consume_expired() {
        let store = InMemoryGrantStore::new();
        let mut expired = grant("h1", 60);
        expired.expires_at = expired.created_at - 1;
        store.put(&expired).await.unwrap();

        assert!(store.get("h1").await.unwrap().is_none());
        assert!(matches!(
            store.consume("h1").await,
            Err(GrantStoreError::Expired)
        ));
    }

    #[tokio::test]
    async fn test_sweep_expired() {
        let store = InMemoryGrantStore::new();
        let mut expired = grant("old", 60);
        expired.expires_at = expired.created_at - 1;
        store.put(&expired).await.unwrap();
        store.put(&grant("live", 60)).await.unwrap();

        assert_eq!(store.sweep_expired().await.unwrap(), 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.sweep_expired().await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_consume_hands_out_one_grant() {
        let store = InMemoryGrantStore::new();
        store.put(&grant("contested", 60)).await.unwrap();

        let tasks: Vec<_> = (0..32)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.consume("contested").await })
            })
            .collect();

        let mut winners = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => winners += 1,
                Err(GrantStoreError::AlreadyConsumed) => {}
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(winners, 1);
    }
}
