//! Axum binding for latchkey.
//!
//! Routes opt in to authorization with a guard layer; handlers read the
//! resulting decision through the [`Identity`] extractor; failures map to
//! the wire as `{"message": ...}` with 401 for denials and 503 when the
//! role store is down. [`AuthEndpoint`] builds the POST route users call
//! to share roles with each other.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use axum::routing::get;
//! use axum::{Json, Router};
//! use latchkey_axum::{AuthEndpoint, Identity, RoleGuard};
//! use latchkey_core::{AuthzClient, DecisionEngine, MemoryRoleStore};
//! use serde_json::json;
//!
//! # async fn demo() -> latchkey_core::Result<()> {
//! let client = AuthzClient::builder("recipes")
//!     .store(Arc::new(MemoryRoleStore::new()))
//!     .build()
//!     .await?;
//! let engine = Arc::new(DecisionEngine::new(client));
//!
//! let app: Router = Router::new()
//!     .route(
//!         "/recipe/:id",
//!         get(|Identity(ctx): Identity| async move {
//!             Json(json!({ "caller": ctx.calling_principal().map(|p| p.to_string()) }))
//!         }),
//!     )
//!     .route_layer(RoleGuard::new(engine.clone(), "view").layer())
//!     .merge(
//!         AuthEndpoint::new(engine, "auth")
//!             .allow_grant("own", ["own", "edit", "view"])
//!             .into_router(),
//!     );
//! # Ok(())
//! # }
//! ```

pub mod endpoint;
pub mod extract;
pub mod guard;
pub mod request;
pub mod response;

pub use endpoint::AuthEndpoint;
pub use extract::Identity;
pub use guard::{AccessibleGuard, AuthnGuard, Guard, GuardLayer, RoleGuard};
pub use request::ExtractedRequest;
pub use response::AuthFailure;
