//! Handler-side extractor for the decision a guard made.

use std::convert::Infallible;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use latchkey_core::AuthContext;

/// Extracts the [`AuthContext`] the route's guard injected.
///
/// Infallible: on unguarded routes it yields the anonymous context, so
/// handlers can share code between guarded and open routes.
#[derive(Debug, Clone)]
pub struct Identity(pub AuthContext);

#[axum::async_trait]
impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Infallible> {
        Ok(Self(
            parts
                .extensions
                .get::<AuthContext>()
                .cloned()
                .unwrap_or_else(AuthContext::anonymous),
        ))
    }
}
