//! Latchkey: role-based authorization for services behind a trusted
//! gateway.
//!
//! A service declares, per endpoint, the flat string role a caller must
//! hold on the specific resource being touched. Identity arrives as a
//! gateway-verified header claim; assignments live in namespaced store
//! keys (redis in production, in-memory for tests); a decision engine
//! wraps endpoint operations with waiting or speculative checks and
//! drives the mutation flows around them: creator auto-assignment and
//! constrained grants between users.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use latchkey_core::{
//!     AuthzClient, CallOptions, DecisionEngine, MemoryRoleStore, Principal, WaitMode,
//! };
//!
//! # async fn demo() -> latchkey_core::Result<()> {
//! let client = AuthzClient::builder("recipes")
//!     .store(Arc::new(MemoryRoleStore::new()))
//!     .build()
//!     .await?;
//! let engine = DecisionEngine::new(client);
//!
//! let michael = Principal::new("michael");
//! engine.client().assign_role(&michael, "own", "r1").await?;
//!
//! let body = engine
//!     .execute_if_authorized(
//!         &michael,
//!         "own",
//!         "r1",
//!         CallOptions::default(),
//!         WaitMode::Wait,
//!         |_ctx| async { Ok("the recipe") },
//!     )
//!     .await?;
//! assert_eq!(body, "the recipe");
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod client;
pub mod context;
pub mod engine;
pub mod error;
pub mod grant;
pub mod identity;
pub mod store;

pub use adapter::{principal_from_request, RequestAdapter};
pub use client::{AuthzClient, AuthzClientBuilder, ResourcePages};
pub use context::AuthContext;
pub use engine::{AutoAssign, CallOptions, DecisionEngine, PolicyFlags, WaitMode};
pub use error::{Error, Result};
pub use grant::{GrantEndpoint, GrantHierarchy, GrantRequest};
pub use identity::{principal_from_header, Principal, IDENTITY_HEADER, UNAUTHENTICATED};
pub use store::{MemoryRoleStore, RoleStore, ScanPage};
#[cfg(feature = "redis-store")]
pub use store::{RedisParams, RedisRoleStore};
