//! Route guards: tower middleware wrapping handlers with authorization
//! decisions.
//!
//! Guards attach with [`axum::Router::route_layer`] so path parameters
//! are already captured when they run. The decision itself lives in
//! [`DecisionEngine`]; the guards extract request facts, hand the inner
//! service to the engine as the guarded operation, and map failures to
//! HTTP responses. In speculative mode that means the handler's response
//! future and the role check genuinely run concurrently, and a denial
//! discards the finished response.

use std::collections::HashMap;
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::{to_bytes, Body};
use axum::extract::{Query, Request};
use axum::http::Uri;
use axum::response::{IntoResponse, Response};
use latchkey_core::{
    principal_from_request, AuthContext, AutoAssign, CallOptions, DecisionEngine, Error,
    RequestAdapter, WaitMode,
};
use serde_json::Value;
use tower::{Layer, Service};

use crate::request::{ExtractedRequest, BODY_LIMIT};
use crate::response::AuthFailure;

enum GuardKind {
    Role { role: String, id_field: String },
    Authn { auto: Option<AutoAssign> },
    Accessible { role: String, limit: Option<usize> },
}

struct GuardConfig {
    engine: Arc<DecisionEngine>,
    options: CallOptions,
    kind: GuardKind,
}

/// Role guard: the wrapped route requires `role` on the resource named by
/// a request field (path parameter or JSON body field, default `"id"`).
///
/// GET routes run speculatively by default; override with
/// [`CallOptions::dont_wait`].
pub struct RoleGuard {
    engine: Arc<DecisionEngine>,
    role: String,
    id_field: String,
    options: CallOptions,
}

impl RoleGuard {
    pub fn new(engine: Arc<DecisionEngine>, role: impl Into<String>) -> Self {
        Self {
            engine,
            role: role.into(),
            id_field: "id".into(),
            options: CallOptions::default(),
        }
    }

    /// Request field naming the resource. Defaults to `"id"`.
    pub fn id_field(mut self, field: impl Into<String>) -> Self {
        self.id_field = field.into();
        self
    }

    pub fn options(mut self, options: CallOptions) -> Self {
        self.options = options;
        self
    }

    pub fn layer(self) -> GuardLayer {
        GuardLayer::new(GuardConfig {
            engine: self.engine,
            options: self.options,
            kind: GuardKind::Role {
                role: self.role,
                id_field: self.id_field,
            },
        })
    }
}

/// Authentication guard with optional creator auto-assignment.
///
/// With auto-assignment configured, a successful JSON response is
/// buffered, the configured field names the new resource, and the caller
/// receives the configured roles on it.
pub struct AuthnGuard {
    engine: Arc<DecisionEngine>,
    options: CallOptions,
    auto: Option<AutoAssign>,
}

impl AuthnGuard {
    pub fn new(engine: Arc<DecisionEngine>) -> Self {
        Self {
            engine,
            options: CallOptions::default(),
            auto: None,
        }
    }

    pub fn options(mut self, options: CallOptions) -> Self {
        self.options = options;
        self
    }

    pub fn auto_assign(mut self, auto: AutoAssign) -> Self {
        self.auto = Some(auto);
        self
    }

    pub fn layer(self) -> GuardLayer {
        GuardLayer::new(GuardConfig {
            engine: self.engine,
            options: self.options,
            kind: GuardKind::Authn { auto: self.auto },
        })
    }
}

/// Listing guard: resolves the resource ids the caller holds `role` on
/// and injects them into the request context. A `limit` query parameter
/// caps the resolution, falling back to the configured default.
pub struct AccessibleGuard {
    engine: Arc<DecisionEngine>,
    role: String,
    limit: Option<usize>,
    options: CallOptions,
}

impl AccessibleGuard {
    pub fn new(engine: Arc<DecisionEngine>, role: impl Into<String>) -> Self {
        Self {
            engine,
            role: role.into(),
            limit: None,
            options: CallOptions::default(),
        }
    }

    /// Default cap on resolved ids when the request does not send one.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn options(mut self, options: CallOptions) -> Self {
        self.options = options;
        self
    }

    pub fn layer(self) -> GuardLayer {
        GuardLayer::new(GuardConfig {
            engine: self.engine,
            options: self.options,
            kind: GuardKind::Accessible {
                role: self.role,
                limit: self.limit,
            },
        })
    }
}

/// The middleware produced by a guard builder.
#[derive(Clone)]
pub struct GuardLayer {
    config: Arc<GuardConfig>,
}

impl GuardLayer {
    fn new(config: GuardConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

impl<S> Layer<S> for GuardLayer {
    type Service = Guard<S>;

    fn layer(&self, inner: S) -> Guard<S> {
        Guard {
            inner,
            config: self.config.clone(),
        }
    }
}

/// Guarded route service; see [`GuardLayer`].
#[derive(Clone)]
pub struct Guard<S> {
    inner: S,
    config: Arc<GuardConfig>,
}

impl<S> Service<Request> for Guard<S>
where
    S: Service<Request, Response = Response, Error = Infallible> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Response, Infallible>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Infallible>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let config = self.config.clone();
        let clone = self.inner.clone();
        // take the service that was polled ready; leave the clone behind
        let inner = std::mem::replace(&mut self.inner, clone);
        Box::pin(async move {
            let response = match dispatch(config, req, inner).await {
                Ok(response) => response,
                Err(err) => AuthFailure(err).into_response(),
            };
            Ok(response)
        })
    }
}

async fn dispatch<S>(
    config: Arc<GuardConfig>,
    req: Request,
    inner: S,
) -> latchkey_core::Result<Response>
where
    S: Service<Request, Response = Response, Error = Infallible> + Send + 'static,
    S::Future: Send,
{
    let body_field = match &config.kind {
        GuardKind::Role { id_field, .. } => Some(id_field.as_str()),
        _ => None,
    };
    let (facts, mut req) = ExtractedRequest::extract(req, body_field).await?;
    let principal = principal_from_request(&facts)?;

    match &config.kind {
        GuardKind::Role { role, id_field } => {
            let resource_id = facts.resource_id(id_field)?;
            let mode = match config.options.dont_wait.unwrap_or_else(|| facts.dont_wait()) {
                true => WaitMode::DontWait,
                false => WaitMode::Wait,
            };
            config
                .engine
                .execute_if_authorized(
                    &principal,
                    role,
                    &resource_id,
                    config.options,
                    mode,
                    |ctx| async move {
                        req.extensions_mut().insert(ctx);
                        Ok(run_inner(inner, req).await)
                    },
                )
                .await
        }
        GuardKind::Authn { auto } => {
            let ctx = config.engine.authenticate(&principal, config.options)?;
            req.extensions_mut().insert(ctx.clone());
            let response = run_inner(inner, req).await;
            match auto {
                Some(auto) if response.status().is_success() => {
                    apply_auto_assign(&config.engine, &ctx, response, auto).await
                }
                _ => Ok(response),
            }
        }
        GuardKind::Accessible { role, limit } => {
            let limit = limit_from_uri(req.uri()).or(*limit);
            let ctx = config
                .engine
                .resolve_accessible(&principal, role, limit, config.options)
                .await?;
            req.extensions_mut().insert(ctx);
            Ok(run_inner(inner, req).await)
        }
    }
}

async fn run_inner<S>(mut inner: S, req: Request) -> Response
where
    S: Service<Request, Response = Response, Error = Infallible>,
{
    match inner.call(req).await {
        Ok(response) => response,
        Err(infallible) => match infallible {},
    }
}

/// Buffers the JSON response body, assigns the configured roles against
/// the id it names, and re-emits the body unchanged.
async fn apply_auto_assign(
    engine: &DecisionEngine,
    ctx: &AuthContext,
    response: Response,
    auto: &AutoAssign,
) -> latchkey_core::Result<Response> {
    let (parts, body) = response.into_parts();
    let bytes = to_bytes(body, BODY_LIMIT).await.map_err(|e| {
        Error::Configuration(format!("auto-assign could not buffer response body: {e}"))
    })?;
    let value: Value = serde_json::from_slice(&bytes).map_err(|e| {
        Error::Configuration(format!("auto-assign response body is not JSON: {e}"))
    })?;
    engine.auto_assign_from_value(ctx, &value, auto).await?;
    Ok(Response::from_parts(parts, Body::from(bytes)))
}

fn limit_from_uri(uri: &Uri) -> Option<usize> {
    Query::<HashMap<String, String>>::try_from_uri(uri)
        .ok()
        .and_then(|Query(params)| params.get("limit").and_then(|v| v.parse().ok()))
}
