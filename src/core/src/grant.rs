//! Grant hierarchy and the grant endpoint's decision sequence.
//!
//! Users share roles with other users through a named grant endpoint.
//! What may be shared is explicit, additive configuration: holders of a
//! `requires` role may grant exactly the roles registered for it, and
//! nothing is ever inferred. Receiving a role through a grant does not
//! make that role grantable by its recipient.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::context::AuthContext;
use crate::engine::DecisionEngine;
use crate::error::{Error, Result};
use crate::identity::Principal;

/// Which roles holders of a given role may grant or revoke.
#[derive(Debug, Clone, Default)]
pub struct GrantHierarchy {
    grantable: BTreeMap<String, BTreeSet<String>>,
}

impl GrantHierarchy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Permits holders of `requires` to grant each role in `grants`.
    /// Repeated calls extend the set.
    pub fn allow_grant<I, S>(&mut self, requires: impl Into<String>, grants: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.grantable
            .entry(requires.into())
            .or_default()
            .extend(grants.into_iter().map(Into::into));
    }

    /// Exact-match lookup; no transitivity.
    pub fn can_grant(&self, requires: &str, role: &str) -> bool {
        self.grantable
            .get(requires)
            .map_or(false, |set| set.contains(role))
    }
}

/// Wire shape of a grant call, echoed back on success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantRequest {
    /// Resource the grant applies to.
    pub id: String,
    /// Target user receiving (or losing) the roles.
    pub user: String,
    /// Role the caller must hold on `id`.
    pub requires: String,
    /// Roles to grant or revoke.
    pub grants: Vec<String>,
    /// Revoke instead of grant.
    #[serde(default)]
    pub revoke: bool,
}

/// Named grant endpoint bound to an engine and a hierarchy.
pub struct GrantEndpoint {
    engine: Arc<DecisionEngine>,
    hierarchy: GrantHierarchy,
    name: String,
}

impl GrantEndpoint {
    pub fn new(engine: Arc<DecisionEngine>, name: impl Into<String>) -> Self {
        Self {
            engine,
            hierarchy: GrantHierarchy::new(),
            name: name.into(),
        }
    }

    /// Permits holders of `requires` to grant each role in `grants`.
    pub fn allow_grant<I, S>(&mut self, requires: impl Into<String>, grants: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hierarchy.allow_grant(requires, grants);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Applies one grant request on behalf of the context's caller.
    ///
    /// The caller must hold `requires` on the resource and every requested
    /// role must be grantable under it. An empty grant list is a no-op
    /// that still exercises both checks. The applied record is echoed
    /// back. An anonymous context fails the first check with the
    /// sentinel, so grants stay refused even when the engine is globally
    /// disabled.
    pub async fn apply(&self, ctx: &AuthContext, request: &GrantRequest) -> Result<GrantRequest> {
        let anonymous = Principal::unauthenticated();
        let caller = ctx.calling_principal().unwrap_or(&anonymous);
        if !self
            .engine
            .client()
            .check_role(caller, &request.requires, &request.id)
            .await?
        {
            return Err(Error::GrantNotPermitted(format!(
                "caller does not hold {:?} on {:?}",
                request.requires, request.id
            )));
        }
        for role in &request.grants {
            if !self.hierarchy.can_grant(&request.requires, role) {
                return Err(Error::GrantNotPermitted(format!(
                    "{:?} holders may not grant {:?}",
                    request.requires, role
                )));
            }
        }
        let target_ctx = ctx.acting_as(Principal::new(request.user.as_str()));
        if request.revoke {
            self.engine
                .revoke_roles(&target_ctx, &request.id, &request.grants)
                .await?;
        } else {
            self.engine
                .assign_roles(&target_ctx, &request.id, &request.grants)
                .await?;
        }
        info!(
            endpoint = %self.name,
            caller = %caller,
            target = %request.user,
            resource_id = %request.id,
            revoke = request.revoke,
            roles = ?request.grants,
            "grant applied"
        );
        Ok(request.clone())
    }
}
