//! Role store abstraction.
//!
//! Assignments live in namespaced keys, one set of resource ids per
//! `{namespace}:{principal}:{role}` key. Backends only provide set-style
//! membership operations plus a cursor scan; everything role-shaped is
//! layered above in [`crate::client`].

use async_trait::async_trait;

use crate::error::Result;

/// One page of a cursor walk over a key's members.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanPage {
    /// Cursor to pass to the next call. Zero means the walk is complete.
    pub cursor: u64,
    pub members: Vec<String>,
}

/// Backend holding role-assignment sets.
///
/// `count` arguments are hints: a backend may return more or fewer members
/// per page, but a walk to cursor zero yields every member exactly once as
/// long as the set is not mutated concurrently.
#[async_trait]
pub trait RoleStore: Send + Sync {
    /// Idempotently adds `member` to the set at `key`.
    async fn add_member(&self, key: &str, member: &str) -> Result<()>;

    /// Idempotently removes `member` from the set at `key`.
    async fn remove_member(&self, key: &str, member: &str) -> Result<()>;

    async fn is_member(&self, key: &str, member: &str) -> Result<bool>;

    /// All members of `key`, optionally capped at `limit`.
    async fn members(&self, key: &str, limit: Option<usize>) -> Result<Vec<String>>;

    /// One page of members starting at `cursor`.
    async fn scan_members(&self, key: &str, cursor: u64, count: usize) -> Result<ScanPage>;

    /// Assignment keys beginning with `prefix`.
    async fn keys_matching(&self, prefix: &str) -> Result<Vec<String>>;
}

pub mod memory;
#[cfg(feature = "redis-store")]
pub mod redis;

pub use memory::MemoryRoleStore;
#[cfg(feature = "redis-store")]
pub use self::redis::{RedisParams, RedisRoleStore};
