//! Drop-in router for user-to-user role management.

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::post;
use axum::{Json, Router};
use latchkey_core::{
    principal_from_header, CallOptions, DecisionEngine, GrantEndpoint, GrantRequest,
    IDENTITY_HEADER,
};

use crate::response::AuthFailure;

/// Builds the POST route a service mounts to let users share roles.
///
/// The caller's identity always comes from the gateway envelope and the
/// route demands a verified caller regardless of how relaxed the engine's
/// defaults are; what may be shared is the endpoint's [`allow_grant`]
/// configuration.
///
/// [`allow_grant`]: Self::allow_grant
pub struct AuthEndpoint {
    engine: Arc<DecisionEngine>,
    grant: GrantEndpoint,
    path: String,
}

impl AuthEndpoint {
    /// Endpoint mounted at `/{name}` (a leading slash in `name` is kept).
    pub fn new(engine: Arc<DecisionEngine>, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            grant: GrantEndpoint::new(engine.clone(), name.clone()),
            engine,
            path: name,
        }
    }

    /// Permits holders of `requires` to grant each role in `grants`.
    /// Repeated calls extend the set.
    pub fn allow_grant<I, S>(mut self, requires: impl Into<String>, grants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.grant.allow_grant(requires, grants);
        self
    }

    pub fn into_router(self) -> Router {
        let path = if self.path.starts_with('/') {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        };
        Router::new()
            .route(&path, post(apply_grant))
            .with_state(Arc::new(self))
    }
}

async fn apply_grant(
    State(endpoint): State<Arc<AuthEndpoint>>,
    headers: HeaderMap,
    Json(request): Json<GrantRequest>,
) -> Result<Json<GrantRequest>, AuthFailure> {
    let raw = headers.get(IDENTITY_HEADER).and_then(|v| v.to_str().ok());
    let principal = principal_from_header(raw)?;
    // strict here even when the engine default is relaxed: anonymous
    // callers must never reach the grant sequence
    let ctx = endpoint.engine.authenticate(
        &principal,
        CallOptions {
            strict: Some(true),
            ..CallOptions::default()
        },
    )?;
    let record = endpoint.grant.apply(&ctx, &request).await?;
    Ok(Json(record))
}
