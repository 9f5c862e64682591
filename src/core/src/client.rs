//! Namespace-bound authorization client.
//!
//! One client serves one namespace: a service name, optionally qualified
//! by a resource type for services that protect several kinds of thing.
//! All role state flows through the [`RoleStore`] the client was built
//! with.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use futures::stream::{self, Stream};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::identity::Principal;
#[cfg(feature = "redis-store")]
use crate::store::{RedisParams, RedisRoleStore};
use crate::store::RoleStore;

fn validate_component(kind: &str, value: &str) -> Result<()> {
    // The `_` namespace join and the `:` key separator must not be
    // forgeable through component names.
    if value.is_empty() || !value.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err(Error::Configuration(format!(
            "invalid {kind} {value:?}: expected ASCII alphanumerics or '-'"
        )));
    }
    Ok(())
}

/// Builder for [`AuthzClient`]. Exactly one store source must be
/// configured: an injected backend, redis connection parameters, or an
/// existing redis client.
pub struct AuthzClientBuilder {
    service: String,
    resource_type: Option<String>,
    store: Option<Arc<dyn RoleStore>>,
    #[cfg(feature = "redis-store")]
    redis_params: Option<RedisParams>,
    #[cfg(feature = "redis-store")]
    redis_client: Option<redis::Client>,
}

impl AuthzClientBuilder {
    /// Qualifies the namespace with a resource type:
    /// `{service}_{resource_type}`.
    pub fn resource_type(mut self, resource_type: impl Into<String>) -> Self {
        self.resource_type = Some(resource_type.into());
        self
    }

    /// Injects a pre-built store backend.
    pub fn store(mut self, store: Arc<dyn RoleStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Connects the redis backend from discrete parameters at build time.
    #[cfg(feature = "redis-store")]
    pub fn redis_params(mut self, params: RedisParams) -> Self {
        self.redis_params = Some(params);
        self
    }

    /// Runs the redis backend over a client the caller already holds.
    #[cfg(feature = "redis-store")]
    pub fn redis_client(mut self, client: redis::Client) -> Self {
        self.redis_client = Some(client);
        self
    }

    pub async fn build(self) -> Result<AuthzClient> {
        validate_component("service name", &self.service)?;
        if let Some(resource_type) = &self.resource_type {
            validate_component("resource type", resource_type)?;
        }
        let namespace = match &self.resource_type {
            Some(resource_type) => format!("{}_{}", self.service, resource_type),
            None => self.service.clone(),
        };

        #[cfg(feature = "redis-store")]
        let store = match (self.store, self.redis_params, self.redis_client) {
            (Some(store), None, None) => store,
            (None, Some(params), None) => {
                Arc::new(RedisRoleStore::connect(params).await?) as Arc<dyn RoleStore>
            }
            (None, None, Some(client)) => {
                Arc::new(RedisRoleStore::from_client(client).await?) as Arc<dyn RoleStore>
            }
            (None, None, None) => {
                return Err(Error::Configuration("no role store configured".into()))
            }
            _ => {
                return Err(Error::Configuration(
                    "configure exactly one store source".into(),
                ))
            }
        };
        #[cfg(not(feature = "redis-store"))]
        let store = self
            .store
            .ok_or_else(|| Error::Configuration("no role store configured".into()))?;

        Ok(AuthzClient { namespace, store })
    }
}

/// Role-assignment client bound to one namespace.
///
/// Cheap to clone; clones share the backend.
#[derive(Clone)]
pub struct AuthzClient {
    namespace: String,
    store: Arc<dyn RoleStore>,
}

impl fmt::Debug for AuthzClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthzClient")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

impl AuthzClient {
    pub fn builder(service: impl Into<String>) -> AuthzClientBuilder {
        AuthzClientBuilder {
            service: service.into(),
            resource_type: None,
            store: None,
            #[cfg(feature = "redis-store")]
            redis_params: None,
            #[cfg(feature = "redis-store")]
            redis_client: None,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn assignment_key(&self, principal: &Principal, role: &str) -> String {
        format!("{}:{}:{}", self.namespace, principal.as_str(), role)
    }

    fn role_key_prefix(&self, principal: &Principal) -> String {
        format!("{}:{}:", self.namespace, principal.as_str())
    }

    fn require_authenticated(principal: &Principal) -> Result<()> {
        if principal.is_authenticated() {
            Ok(())
        } else {
            Err(Error::UnauthenticatedPrincipal)
        }
    }

    /// Idempotently grants `role` on `resource_id` to `principal`.
    pub async fn assign_role(
        &self,
        principal: &Principal,
        role: &str,
        resource_id: &str,
    ) -> Result<()> {
        Self::require_authenticated(principal)?;
        self.store
            .add_member(&self.assignment_key(principal, role), resource_id)
            .await?;
        info!(
            namespace = %self.namespace,
            user = %principal,
            role,
            resource_id,
            "role assigned"
        );
        Ok(())
    }

    /// Idempotently removes `role` on `resource_id` from `principal`.
    pub async fn revoke_role(
        &self,
        principal: &Principal,
        role: &str,
        resource_id: &str,
    ) -> Result<()> {
        Self::require_authenticated(principal)?;
        self.store
            .remove_member(&self.assignment_key(principal, role), resource_id)
            .await?;
        info!(
            namespace = %self.namespace,
            user = %principal,
            role,
            resource_id,
            "role revoked"
        );
        Ok(())
    }

    /// Membership test. The sentinel holds no roles and short-circuits to
    /// false without touching the store; a store failure is an error,
    /// never a denial.
    pub async fn check_role(
        &self,
        principal: &Principal,
        role: &str,
        resource_id: &str,
    ) -> Result<bool> {
        if !principal.is_authenticated() {
            return Ok(false);
        }
        let held = self
            .store
            .is_member(&self.assignment_key(principal, role), resource_id)
            .await?;
        debug!(
            namespace = %self.namespace,
            user = %principal,
            role,
            resource_id,
            held,
            "role checked"
        );
        Ok(held)
    }

    /// Resource ids `principal` holds `role` on, optionally capped.
    pub async fn resources_for(
        &self,
        principal: &Principal,
        role: &str,
        limit: Option<usize>,
    ) -> Result<Vec<String>> {
        if !principal.is_authenticated() {
            return Ok(Vec::new());
        }
        self.store
            .members(&self.assignment_key(principal, role), limit)
            .await
    }

    /// Pager over the resources `principal` holds `role` on, about
    /// `page_size` ids per page (backend hint).
    pub fn resource_pages(
        &self,
        principal: &Principal,
        role: &str,
        page_size: usize,
    ) -> ResourcePages {
        ResourcePages {
            store: self.store.clone(),
            key: self.assignment_key(principal, role),
            page_size,
            cursor: 0,
            done: !principal.is_authenticated(),
        }
    }

    /// Every role `principal` holds in this namespace, mapped to the
    /// resource ids it is held on.
    pub async fn roles_for(&self, principal: &Principal) -> Result<BTreeMap<String, Vec<String>>> {
        if !principal.is_authenticated() {
            return Ok(BTreeMap::new());
        }
        let prefix = self.role_key_prefix(principal);
        let mut by_role = BTreeMap::new();
        for key in self.store.keys_matching(&prefix).await? {
            let Some(role) = key.strip_prefix(&prefix) else {
                continue;
            };
            let ids = self.store.members(&key, None).await?;
            by_role.insert(role.to_string(), ids);
        }
        Ok(by_role)
    }
}

/// Forward-only pager over one assignment key. Restartable by asking the
/// client for a fresh pager.
pub struct ResourcePages {
    store: Arc<dyn RoleStore>,
    key: String,
    page_size: usize,
    cursor: u64,
    done: bool,
}

impl ResourcePages {
    /// Next batch of resource ids, `None` once exhausted. Batch sizes
    /// follow the backend's count hint and may vary.
    pub async fn next_page(&mut self) -> Result<Option<Vec<String>>> {
        if self.done {
            return Ok(None);
        }
        let page = self
            .store
            .scan_members(&self.key, self.cursor, self.page_size)
            .await?;
        self.cursor = page.cursor;
        self.done = page.cursor == 0;
        Ok(Some(page.members))
    }

    /// Adapts the pager to a stream of batches.
    pub fn into_stream(self) -> impl Stream<Item = Result<Vec<String>>> {
        stream::try_unfold(self, |mut pages| async move {
            Ok(pages.next_page().await?.map(|batch| (batch, pages)))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryRoleStore;

    async fn client() -> AuthzClient {
        AuthzClient::builder("svc")
            .resource_type("doc")
            .store(Arc::new(MemoryRoleStore::new()))
            .build()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn namespace_joins_service_and_resource_type() {
        assert_eq!(client().await.namespace(), "svc_doc");
        let bare = AuthzClient::builder("svc")
            .store(Arc::new(MemoryRoleStore::new()))
            .build()
            .await
            .unwrap();
        assert_eq!(bare.namespace(), "svc");
    }

    #[tokio::test]
    async fn namespace_components_are_validated() {
        for bad in ["", "with_underscore", "with:colon", "with space"] {
            let err = AuthzClient::builder(bad)
                .store(Arc::new(MemoryRoleStore::new()))
                .build()
                .await
                .unwrap_err();
            assert!(matches!(err, Error::Configuration(_)), "accepted {bad:?}");
        }
    }

    #[tokio::test]
    async fn build_requires_exactly_one_store_source() {
        let err = AuthzClient::builder("svc").build().await.unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[cfg(feature = "redis-store")]
    #[tokio::test]
    async fn build_refuses_competing_store_sources() {
        let err = AuthzClient::builder("svc")
            .store(Arc::new(MemoryRoleStore::new()))
            .redis_params(RedisParams::default())
            .build()
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }
}
