use super::{Grant, GrantStoreBackend, GrantStoreError};
use async_trait::async_trait;
use log::error;
use redis::{aio::ConnectionManager, AsyncCommands, Client};

/// Grants stored as JSON strings with a TTL matching their expiry.
///
/// Consumption is guarded by a `SET NX` marker key: only the caller that
/// creates the marker gets the grant.
#[derive(Clone)]
pub struct RedisGrantStore {
    conn_manager: ConnectionManager,
}

fn grant_key(handle: &str) -> String {
    format!("grant:{}", handle)
}

fn consumed_key(handle: &str) -> String {
    format!("grant-consumed:{}", handle)
}

fn storage_error(action: &str, handle: &str, err: redis::RedisError) -> GrantStoreError {
    error!("Redis error while {} grant {}: {}", action, handle, err);
    GrantStoreError::Storage(err.to_string())
}

impl RedisGrantStore {
    pub async fn new(redis_url: &str) -> Result<Self, String> {
        let client = match Client::open(redis_url) {
            Ok(client) => client,
            Err(err) => {
                return Err(format!("Failed to connect to Redis: {}", err));
            }
        };

        let conn_manager = match ConnectionManager::new(client).await {
            Ok(manager) => manager,
            Err(err) => {
                return Err(format!(
                    "Failed to create Redis connection manager: {}",
                    err
                ));
            }
        };

        let mut conn = conn_manager.clone();
        if let Err(err) = redis::cmd("PING").query_async::<String>(&mut conn).await {
            return Err(format!("Failed to ping Redis: {}", err));
        }

        Ok(Self { conn_manager })
    }

    async fn is_consumed(&self, handle: &str) -> Result<bool, GrantStoreError> {
        let mut conn = self.conn_manager.clone();
        conn.exists(consumed_key(handle))
            .await
            .map_err(|e| storage_error("checking", handle, e))
    }
}

#[async_trait]
impl GrantStoreBackend for RedisGrantStore {
    async fn put(&self, grant: &Grant) -> Result<(), GrantStoreError> {
        let serialized = serde_json::to_string(grant)?;
        let mut conn = self.conn_manager.clone();
        conn.set_ex::<_, _, ()>(grant_key(&grant.handle), serialized, grant.remaining_secs())
            .await
            .map_err(|e| storage_error("storing", &grant.handle, e))
    }

    async fn get(&self, handle: &str) -> Result<Option<Grant>, GrantStoreError> {
        let mut conn = self.conn_manager.clone();
        let value: Option<String> = conn
            .get(grant_key(handle))
            .await
            .map_err(|e| storage_error("reading", handle, e))?;
        match value {
            Some(value) => {
                let grant: Grant = serde_json::from_str(&value)?;
                Ok((!grant.is_expired()).then_some(grant))
            }
            None => Ok(None),
        }
    }

    async fn consume(&self, handle: &str) -> Result<Grant, GrantStoreError> {
        if self.is_consumed(handle).await? {
            return Err(GrantStoreError::AlreadyConsumed);
        }

        let mut conn = self.conn_manager.clone();
        let value: Option<String> = conn
            .get(grant_key(handle))
            .await
            .map_err(|e| storage_error("reading", handle, e))?;
        let Some(value) = value else {
            // Another caller may have consumed and deleted it in between
            if self.is_consumed(handle).await? {
                return Err(GrantStoreError::AlreadyConsumed);
            }
            return Err(GrantStoreError::NotFound);
        };

        let mut grant: Grant = serde_json::from_str(&value)?;
        if grant.is_expired() {
            return Err(GrantStoreError::Expired);
        }

        let marker: Option<String> = redis::cmd("SET")
            .arg(consumed_key(handle))
            .arg(1)
            .arg("NX")
            .arg("EX")
            .arg(grant.remaining_secs())
            .query_async(&mut conn)
            .await
            .map_err(|e| storage_error("consuming", handle, e))?;
        if marker.is_none() {
            return Err(GrantStoreError::AlreadyConsumed);
        }

        conn.del::<_, ()>(grant_key(handle))
            .await
            .map_err(|e| storage_error("deleting", handle, e))?;
        grant.consumed = true;
        Ok(grant)
    }

    async fn remove(&self, handle: &str) -> Result<(), GrantStoreError> {
        let mut conn = self.conn_manager.clone();
        conn.del::<_, ()>(grant_key(handle))
            .await
            .map_err(|e| storage_error("deleting", handle, e))
    }

    /// Redis expires keys on its own
    async fn sweep_expired(&self) -> Result<usize, GrantStoreError> {
        Ok(0)
    }

    async fn health_check(&self) -> Result<(), String> {
        let mut conn = self.conn_manager.clone();
        match redis::cmd("PING").query_async::<String>(&mut conn).await {
            Ok(_) => Ok(()),
            Err(err) => Err(format!("Redis health check failed: {}", err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grants::GrantKind;
    use redis_test::server::RedisServer;

    fn get_redis_url(server: &RedisServer) -> String {
        match &server.addr {
            redis::ConnectionAddr::Tcp(host, port) => {
                format!("redis://{}:{}/", host, port)
            }
            _ => "redis://127.0.0.1:6379/".to_string(),
        }
    }

    fn grant(handle: &str) -> Grant {
        Grant::new(
            handle,
            GrantKind::AuthorizationCode,
            "client",
            vec!["openid".to_string()],
            60,
        )
    }

    #[test]
    fn test_keys() {
        assert_eq!(grant_key("abc"), "grant:abc");
        assert_eq!(consumed_key("abc"), "grant-consumed:abc");
    }

    #[tokio::test]
    #[ignore]
    async fn test_redis_consume_once() {
        let server = RedisServer::new();
        let store = RedisGrantStore::new(&get_redis_url(&server)).await.unwrap();

        store.put(&grant("code")).await.unwrap();
        assert!(store.get("code").await.unwrap().is_some());

        let consumed = store.consume("code").await.unwrap();
        assert!(consumed.consumed);
        assert!(matches!(
            store.consume("code").await,
            Err(GrantStoreError::AlreadyConsumed)
        ));
        assert!(matches!(
            store.consume("unknown").await,
            Err(GrantStoreError::NotFound)
        ));
    }

    #[tokio::test]
    #[ignore]
    async fn test_redis_health_check() {
        let server = RedisServer::new();
        let store = RedisGrantStore::new(&get_redis_url(&server)).await.unwrap();
        let result = store.health_check().await;
        assert!(result.is_ok(), "health check failed: {:?}", result);
    }
}
