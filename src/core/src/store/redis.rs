//! Redis-backed role store.
//!
//! An assignment key is a redis hash whose fields are resource ids and
//! whose values are a constant marker. HSCAN backs the cursor contract
//! directly, including the count-as-hint behavior, and redis drops a hash
//! when its last field is deleted, which keeps key scans clean.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use super::{RoleStore, ScanPage};
use crate::error::{Error, Result};

const MEMBER_MARKER: &str = "T";

/// Discrete connection parameters, for deployments that configure the
/// store from the environment instead of injecting a client.
#[derive(Debug, Clone, Default)]
pub struct RedisParams {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub db: i64,
    pub password: Option<String>,
}

/// [`RoleStore`] over a shared auto-reconnecting redis connection.
pub struct RedisRoleStore {
    conn: ConnectionManager,
}

impl std::fmt::Debug for RedisRoleStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // ConnectionManager is not Debug; identify the store without it.
        f.debug_struct("RedisRoleStore").finish_non_exhaustive()
    }
}

impl RedisRoleStore {
    /// Connects from discrete parameters. Missing host or port is a
    /// configuration fault; an unreachable server is a store fault.
    pub async fn connect(params: RedisParams) -> Result<Self> {
        let (host, port) = match (params.host, params.port) {
            (Some(host), Some(port)) => (host, port),
            _ => {
                return Err(Error::Configuration(
                    "redis host and port are required when no client is injected".into(),
                ))
            }
        };
        let info = redis::ConnectionInfo {
            addr: redis::ConnectionAddr::Tcp(host, port),
            redis: redis::RedisConnectionInfo {
                db: params.db,
                username: None,
                password: params.password,
            },
        };
        let client = redis::Client::open(info).map_err(store_err)?;
        Self::from_client(client).await
    }

    /// Wraps an existing client. Pings once so a bad target fails at
    /// construction rather than on first use.
    pub async fn from_client(client: redis::Client) -> Result<Self> {
        let mut conn = ConnectionManager::new(client).await.map_err(store_err)?;
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .map_err(store_err)?;
        Ok(Self { conn })
    }
}

fn store_err(err: redis::RedisError) -> Error {
    Error::StoreUnavailable(err.to_string())
}

#[async_trait]
impl RoleStore for RedisRoleStore {
    async fn add_member(&self, key: &str, member: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.hset::<_, _, _, ()>(key, member, MEMBER_MARKER)
            .await
            .map_err(store_err)
    }

    async fn remove_member(&self, key: &str, member: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.hdel::<_, _, ()>(key, member).await.map_err(store_err)
    }

    async fn is_member(&self, key: &str, member: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        conn.hexists(key, member).await.map_err(store_err)
    }

    async fn members(&self, key: &str, limit: Option<usize>) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let mut members: Vec<String> = conn.hkeys(key).await.map_err(store_err)?;
        if let Some(cap) = limit {
            members.truncate(cap);
        }
        Ok(members)
    }

    async fn scan_members(&self, key: &str, cursor: u64, count: usize) -> Result<ScanPage> {
        let mut conn = self.conn.clone();
        // HSCAN replies with [cursor, [field, value, field, value, ..]];
        // fields are the resource ids.
        let (cursor, flat): (u64, Vec<String>) = redis::cmd("HSCAN")
            .arg(key)
            .arg(cursor)
            .arg("COUNT")
            .arg(count.max(1))
            .query_async(&mut conn)
            .await
            .map_err(store_err)?;
        let members = flat.into_iter().step_by(2).collect();
        Ok(ScanPage { cursor, members })
    }

    async fn keys_matching(&self, prefix: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let pattern = format!("{prefix}*");
        let mut keys = Vec::new();
        let mut iter: redis::AsyncIter<'_, String> =
            conn.scan_match(&pattern).await.map_err(store_err)?;
        while let Some(key) = iter.next_item().await {
            keys.push(key);
        }
        Ok(keys)
    }
}
