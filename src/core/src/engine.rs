//! Decision engine: policy flags, guarded execution, role mutation flows.

use std::future::Future;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::client::AuthzClient;
use crate::context::AuthContext;
use crate::error::{Error, Result};
use crate::identity::Principal;

/// Engine-wide policy defaults.
///
/// `enabled` is the master switch: disabled short-circuits every decision
/// to allow. `strict` controls anonymous traffic on guarded endpoints:
/// when false, unauthenticated callers bypass checks instead of being
/// denied, for services that serve anonymous reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyFlags {
    pub enabled: bool,
    pub strict: bool,
}

impl Default for PolicyFlags {
    fn default() -> Self {
        Self {
            enabled: true,
            strict: true,
        }
    }
}

/// Per-call overrides of the engine defaults. `dont_wait` overrides the
/// request-derived wait mode and is consumed by the framework binding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallOptions {
    pub enabled: Option<bool>,
    pub strict: Option<bool>,
    pub dont_wait: Option<bool>,
}

/// How a role-guarded operation is ordered against its check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaitMode {
    /// Check first; run the operation only when authorized.
    #[default]
    Wait,
    /// Run the operation and the check concurrently, join both, and
    /// discard the operation's result on denial. For read-only or
    /// idempotent operations only.
    DontWait,
}

/// Auto-assignment for creation endpoints: which field of the operation's
/// serialized output names the new resource, and which roles the creator
/// receives on it.
#[derive(Debug, Clone)]
pub struct AutoAssign {
    pub id_field: String,
    pub roles: Vec<String>,
}

impl AutoAssign {
    pub fn new<I, S>(id_field: impl Into<String>, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id_field: id_field.into(),
            roles: roles.into_iter().map(Into::into).collect(),
        }
    }
}

/// Wraps operations with authorization decisions.
#[derive(Debug, Clone)]
pub struct DecisionEngine {
    client: AuthzClient,
    defaults: PolicyFlags,
    check_timeout: Option<Duration>,
}

impl DecisionEngine {
    /// Engine with the default flags (enabled, strict).
    pub fn new(client: AuthzClient) -> Self {
        Self::with_flags(client, PolicyFlags::default())
    }

    pub fn with_flags(client: AuthzClient, defaults: PolicyFlags) -> Self {
        Self {
            client,
            defaults,
            check_timeout: None,
        }
    }

    /// Bounds the store check; expiry surfaces as a store failure, never
    /// a denial. Unbounded by default.
    pub fn with_check_timeout(mut self, timeout: Duration) -> Self {
        self.check_timeout = Some(timeout);
        self
    }

    pub fn client(&self) -> &AuthzClient {
        &self.client
    }

    pub fn flags(&self) -> PolicyFlags {
        self.defaults
    }

    fn effective_flags(&self, options: CallOptions) -> PolicyFlags {
        PolicyFlags {
            enabled: options.enabled.unwrap_or(self.defaults.enabled),
            strict: options.strict.unwrap_or(self.defaults.strict),
        }
    }

    /// A check is required unless the engine is disabled, or the caller is
    /// anonymous and strictness is relaxed.
    fn auth_required(&self, principal: &Principal, flags: PolicyFlags) -> bool {
        flags.enabled && (flags.strict || principal.is_authenticated())
    }

    async fn checked_role(
        &self,
        principal: &Principal,
        role: &str,
        resource_id: &str,
    ) -> Result<bool> {
        match self.check_timeout {
            Some(limit) => {
                tokio::time::timeout(limit, self.client.check_role(principal, role, resource_id))
                    .await
                    .map_err(|_| {
                        Error::StoreUnavailable(format!("role check timed out after {limit:?}"))
                    })?
            }
            None => self.client.check_role(principal, role, resource_id).await,
        }
    }

    /// Runs `op` if `principal` holds `role` on `resource_id`.
    ///
    /// In [`WaitMode::DontWait`] the operation and the check run
    /// concurrently and both complete before a decision is made; a denial
    /// discards the operation's finished result. A store failure also
    /// discards it and propagates as [`Error::StoreUnavailable`].
    pub async fn execute_if_authorized<T, F, Fut>(
        &self,
        principal: &Principal,
        role: &str,
        resource_id: &str,
        options: CallOptions,
        mode: WaitMode,
        op: F,
    ) -> Result<T>
    where
        F: FnOnce(AuthContext) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let flags = self.effective_flags(options);
        if !self.auth_required(principal, flags) {
            debug!(user = %principal, role, resource_id, "authorization bypassed");
            return op(AuthContext::anonymous()).await;
        }
        match mode {
            WaitMode::Wait => {
                if !self.checked_role(principal, role, resource_id).await? {
                    debug!(user = %principal, role, resource_id, "authorization denied");
                    return Err(Error::NotAuthorized);
                }
                op(AuthContext::verified(principal.clone())).await
            }
            WaitMode::DontWait => {
                let ctx = AuthContext::verified(principal.clone());
                let (outcome, held) =
                    tokio::join!(op(ctx), self.checked_role(principal, role, resource_id));
                if held? {
                    outcome
                } else {
                    debug!(
                        user = %principal,
                        role,
                        resource_id,
                        "authorization denied; speculative result discarded"
                    );
                    Err(Error::NotAuthorized)
                }
            }
        }
    }

    /// Authentication-only decision. Touches no store state.
    pub fn authenticate(&self, principal: &Principal, options: CallOptions) -> Result<AuthContext> {
        let flags = self.effective_flags(options);
        if !self.auth_required(principal, flags) {
            return Ok(AuthContext::anonymous());
        }
        if !principal.is_authenticated() {
            debug!("authentication denied: no verified identity");
            return Err(Error::NotAuthorized);
        }
        Ok(AuthContext::verified(principal.clone()))
    }

    /// Runs `op` if the caller is authenticated (or the policy bypasses).
    pub async fn execute_if_authenticated<T, F, Fut>(
        &self,
        principal: &Principal,
        options: CallOptions,
        op: F,
    ) -> Result<T>
    where
        F: FnOnce(AuthContext) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let ctx = self.authenticate(principal, options)?;
        op(ctx).await
    }

    /// [`Self::execute_if_authenticated`], then creator-role assignment
    /// from the operation's serialized output.
    pub async fn execute_if_authenticated_assigning<T, F, Fut>(
        &self,
        principal: &Principal,
        options: CallOptions,
        auto: &AutoAssign,
        op: F,
    ) -> Result<T>
    where
        T: Serialize,
        F: FnOnce(AuthContext) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let ctx = self.authenticate(principal, options)?;
        let out = op(ctx.clone()).await?;
        let value = serde_json::to_value(&out).map_err(|e| {
            Error::Configuration(format!("auto-assign output not serializable: {e}"))
        })?;
        self.auto_assign_from_value(&ctx, &value, auto).await?;
        Ok(out)
    }

    /// Applies `auto` against the resource id named in `value`. Public for
    /// adapters that post-process serialized response bodies.
    pub async fn auto_assign_from_value(
        &self,
        ctx: &AuthContext,
        value: &Value,
        auto: &AutoAssign,
    ) -> Result<()> {
        let resource_id = value
            .get(&auto.id_field)
            .and_then(Value::as_str)
            .ok_or_else(|| {
                Error::Configuration(format!(
                    "auto-assign field {:?} missing from operation output",
                    auto.id_field
                ))
            })?;
        self.assign_roles(ctx, resource_id, &auto.roles).await
    }

    /// Resolves the resource ids `principal` holds `role` on and injects
    /// them into the returned context, for listing endpoints. The
    /// operation is responsible for filtering by that list.
    pub async fn resolve_accessible(
        &self,
        principal: &Principal,
        role: &str,
        limit: Option<usize>,
        options: CallOptions,
    ) -> Result<AuthContext> {
        let ctx = self.authenticate(principal, options)?;
        let ids = self.client.resources_for(principal, role, limit).await?;
        Ok(ctx.with_accessible_ids(ids))
    }

    /// Runs `op` with the accessible-id list resolved for `principal`.
    pub async fn execute_with_accessible<T, F, Fut>(
        &self,
        principal: &Principal,
        role: &str,
        limit: Option<usize>,
        options: CallOptions,
        op: F,
    ) -> Result<T>
    where
        F: FnOnce(AuthContext) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let ctx = self.resolve_accessible(principal, role, limit, options).await?;
        op(ctx).await
    }

    /// Guarded assignment applied to the context's acting principal.
    ///
    /// Without a verified caller (bypassed endpoints) the call is logged
    /// and ignored so fail-open configurations never mutate role state.
    pub async fn assign_roles(
        &self,
        ctx: &AuthContext,
        resource_id: &str,
        roles: &[String],
    ) -> Result<()> {
        let Some(target) = Self::mutation_target(ctx, "assign") else {
            return Ok(());
        };
        for role in roles {
            self.client.assign_role(&target, role, resource_id).await?;
        }
        Ok(())
    }

    /// Guarded revocation; same rules as [`Self::assign_roles`].
    pub async fn revoke_roles(
        &self,
        ctx: &AuthContext,
        resource_id: &str,
        roles: &[String],
    ) -> Result<()> {
        let Some(target) = Self::mutation_target(ctx, "revoke") else {
            return Ok(());
        };
        for role in roles {
            self.client.revoke_role(&target, role, resource_id).await?;
        }
        Ok(())
    }

    fn mutation_target(ctx: &AuthContext, action: &str) -> Option<Principal> {
        if !ctx.is_verified() {
            warn!(action, "role mutation skipped: no verified calling principal");
            return None;
        }
        ctx.acting_principal().cloned()
    }
}
