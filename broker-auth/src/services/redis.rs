//! Revocation denylist and ephemeral public keys, kept in Redis.

use async_trait::async_trait;
use redis::{aio::ConnectionManager, Client};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize)]
struct RevocationRecord {
    revoked: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct PublicKeyRecord {
    public_key: String,
}

fn revocation_key(jti: &Uuid) -> String {
    format!("revoked:{}", jti)
}

fn public_key_key(identity_id: &Uuid) -> String {
    format!("public_key:{}", identity_id)
}

/// Negative cache of revoked token ids. Absence of a key means "not known to
/// be revoked", never "allowed".
#[async_trait]
pub trait RevocationStore: Send + Sync {
    /// Records `jti` as revoked unless it already is. Returns `true` only for
    /// the caller that wrote the record, so a single-use token can be claimed
    /// exactly once.
    ///
    /// `ttl_seconds = None` keeps the record forever (token without `exp`).
    /// TTLs are clamped to one second: a token in its last second still
    /// verifies and must still be denied.
    async fn revoke(&self, jti: &Uuid, ttl_seconds: Option<i64>) -> Result<bool, anyhow::Error>;

    async fn is_revoked(&self, jti: &Uuid) -> Result<bool, anyhow::Error>;

    async fn store_public_key(
        &self,
        identity_id: &Uuid,
        public_key: &str,
        ttl_seconds: i64,
    ) -> Result<(), anyhow::Error>;

    async fn public_key(&self, identity_id: &Uuid) -> Result<Option<String>, anyhow::Error>;

    async fn health_check(&self) -> Result<(), anyhow::Error>;
}

#[derive(Clone)]
pub struct RedisRevocationStore {
    _client: Client,
    manager: ConnectionManager,
}

impl RedisRevocationStore {
    pub async fn new(config: &crate::config::RedisConfig) -> Result<Self, anyhow::Error> {
        tracing::info!("Connecting to Redis");
        let client = Client::open(config.url.clone())?;

        // Use ConnectionManager for automatic reconnection
        let manager = client.get_connection_manager().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to get Redis connection manager");
            anyhow::anyhow!("Failed to connect to Redis: {}", e)
        })?;

        tracing::info!("Successfully connected to Redis");

        Ok(Self {
            _client: client,
            manager,
        })
    }

    async fn set_json(
        &self,
        key: &str,
        value: String,
        ttl_seconds: Option<i64>,
    ) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl_seconds {
            cmd.arg("EX").arg(ttl);
        }
        cmd.query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to write {}: {}", key, e))
    }

    /// `SET NX`: `true` when the key was absent and is now written.
    async fn set_json_if_absent(
        &self,
        key: &str,
        value: String,
        ttl_seconds: Option<i64>,
    ) -> Result<bool, anyhow::Error> {
        let mut conn = self.manager.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value).arg("NX");
        if let Some(ttl) = ttl_seconds {
            cmd.arg("EX").arg(ttl);
        }
        let reply: Option<String> = cmd
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to write {}: {}", key, e))?;
        Ok(reply.is_some())
    }

    async fn get_json(&self, key: &str) -> Result<Option<String>, anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", key, e))
    }
}

#[async_trait]
impl RevocationStore for RedisRevocationStore {
    async fn revoke(&self, jti: &Uuid, ttl_seconds: Option<i64>) -> Result<bool, anyhow::Error> {
        let value = serde_json::to_string(&RevocationRecord { revoked: true })?;
        self.set_json_if_absent(&revocation_key(jti), value, ttl_seconds.map(|ttl| ttl.max(1)))
            .await
    }

    async fn is_revoked(&self, jti: &Uuid) -> Result<bool, anyhow::Error> {
        match self.get_json(&revocation_key(jti)).await? {
            Some(raw) => Ok(serde_json::from_str::<RevocationRecord>(&raw)
                .map(|r| r.revoked)
                .unwrap_or(true)),
            None => Ok(false),
        }
    }

    async fn store_public_key(
        &self,
        identity_id: &Uuid,
        public_key: &str,
        ttl_seconds: i64,
    ) -> Result<(), anyhow::Error> {
        let value = serde_json::to_string(&PublicKeyRecord {
            public_key: public_key.to_string(),
        })?;
        self.set_json(&public_key_key(identity_id), value, Some(ttl_seconds.max(1)))
            .await
    }

    async fn public_key(&self, identity_id: &Uuid) -> Result<Option<String>, anyhow::Error> {
        match self.get_json(&public_key_key(identity_id)).await? {
            Some(raw) => Ok(Some(serde_json::from_str::<PublicKeyRecord>(&raw)?.public_key)),
            None => Ok(None),
        }
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Redis health check failed: {}", e))
    }
}

/// In-process store honouring TTLs, for tests and local runs.
#[derive(Default)]
pub struct MemoryRevocationStore {
    entries: Mutex<HashMap<String, (String, Option<Instant>)>>,
}

impl MemoryRevocationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn set(&self, key: String, value: String, ttl_seconds: Option<i64>) -> Result<(), anyhow::Error> {
        let deadline = ttl_seconds.map(|ttl| Instant::now() + Duration::from_secs(ttl.max(0) as u64));
        self.entries
            .lock()
            .map_err(|e| anyhow::anyhow!("Revocation store mutex poisoned: {}", e))?
            .insert(key, (value, deadline));
        Ok(())
    }

    fn set_if_absent(
        &self,
        key: String,
        value: String,
        ttl_seconds: Option<i64>,
    ) -> Result<bool, anyhow::Error> {
        let now = Instant::now();
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| anyhow::anyhow!("Revocation store mutex poisoned: {}", e))?;
        let live = match entries.get(&key) {
            Some((_, Some(deadline))) => *deadline > now,
            Some((_, None)) => true,
            None => false,
        };
        if live {
            return Ok(false);
        }
        let deadline = ttl_seconds.map(|ttl| now + Duration::from_secs(ttl.max(1) as u64));
        entries.insert(key, (value, deadline));
        Ok(true)
    }

    fn get(&self, key: &str) -> Result<Option<String>, anyhow::Error> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| anyhow::anyhow!("Revocation store mutex poisoned: {}", e))?;
        let expired = matches!(
            entries.get(key),
            Some((_, Some(deadline))) if *deadline <= Instant::now()
        );
        if expired {
            entries.remove(key);
            return Ok(None);
        }
        Ok(entries.get(key).map(|(value, _)| value.clone()))
    }
}

#[async_trait]
impl RevocationStore for MemoryRevocationStore {
    async fn revoke(&self, jti: &Uuid, ttl_seconds: Option<i64>) -> Result<bool, anyhow::Error> {
        let value = serde_json::to_string(&RevocationRecord { revoked: true })?;
        self.set_if_absent(revocation_key(jti), value, ttl_seconds)
    }

    async fn is_revoked(&self, jti: &Uuid) -> Result<bool, anyhow::Error> {
        Ok(self.get(&revocation_key(jti))?.is_some())
    }

    async fn store_public_key(
        &self,
        identity_id: &Uuid,
        public_key: &str,
        ttl_seconds: i64,
    ) -> Result<(), anyhow::Error> {
        let value = serde_json::to_string(&PublicKeyRecord {
            public_key: public_key.to_string(),
        })?;
        self.set(public_key_key(identity_id), value, Some(ttl_seconds.max(1)))
    }

    async fn public_key(&self, identity_id: &Uuid) -> Result<Option<String>, anyhow::Error> {
        match self.get(&public_key_key(identity_id))? {
            Some(raw) => Ok(Some(serde_json::from_str::<PublicKeyRecord>(&raw)?.public_key)),
            None => Ok(None),
        }
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        Ok(())
    }
}
