//! In-memory role store for tests and local development.

use std::collections::BTreeSet;

use async_trait::async_trait;
use dashmap::DashMap;

use super::{RoleStore, ScanPage};
use crate::error::Result;

/// Process-local [`RoleStore`] backed by a concurrent map of ordered sets.
///
/// Cursors are offsets into the ordered membership, so scans are
/// deterministic and honor the count hint exactly. Like the production
/// backend, a key vanishes when its last member is removed.
#[derive(Debug, Default)]
pub struct MemoryRoleStore {
    sets: DashMap<String, BTreeSet<String>>,
}

impl MemoryRoleStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RoleStore for MemoryRoleStore {
    async fn add_member(&self, key: &str, member: &str) -> Result<()> {
        self.sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn remove_member(&self, key: &str, member: &str) -> Result<()> {
        let emptied = match self.sets.get_mut(key) {
            Some(mut set) => {
                set.remove(member);
                set.is_empty()
            }
            None => false,
        };
        if emptied {
            self.sets.remove_if(key, |_, set| set.is_empty());
        }
        Ok(())
    }

    async fn is_member(&self, key: &str, member: &str) -> Result<bool> {
        Ok(self
            .sets
            .get(key)
            .map(|set| set.contains(member))
            .unwrap_or(false))
    }

    async fn members(&self, key: &str, limit: Option<usize>) -> Result<Vec<String>> {
        let members = self
            .sets
            .get(key)
            .map(|set| {
                let iter = set.iter().cloned();
                match limit {
                    Some(cap) => iter.take(cap).collect(),
                    None => iter.collect(),
                }
            })
            .unwrap_or_default();
        Ok(members)
    }

    async fn scan_members(&self, key: &str, cursor: u64, count: usize) -> Result<ScanPage> {
        let Some(set) = self.sets.get(key) else {
            return Ok(ScanPage {
                cursor: 0,
                members: Vec::new(),
            });
        };
        let offset = cursor as usize;
        let members: Vec<String> = set.iter().skip(offset).take(count.max(1)).cloned().collect();
        let consumed = offset + members.len();
        let cursor = if consumed >= set.len() {
            0
        } else {
            consumed as u64
        };
        Ok(ScanPage { cursor, members })
    }

    async fn keys_matching(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self
            .sets
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}
