//! Principal identity and gateway envelope decoding.
//!
//! Identity verification happens upstream at the API gateway; services
//! behind it receive the verified claims as a base64-encoded JSON object
//! in the `X-Endpoint-Api-Userinfo` header, and decoding that envelope is
//! the only identity work done here. A missing envelope is ordinary
//! anonymous traffic and yields the sentinel principal. A present but
//! undecodable envelope is an error, never a silent downgrade to
//! anonymous.

use std::fmt;

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Request header carrying the gateway-verified identity envelope.
pub const IDENTITY_HEADER: &str = "X-Endpoint-Api-Userinfo";

/// Literal identity of unauthenticated callers.
pub const UNAUTHENTICATED: &str = "Unauthenticated";

/// An opaque caller identity, in practice an email claim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Principal(String);

impl Principal {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The sentinel principal representing anonymous traffic.
    pub fn unauthenticated() -> Self {
        Self(UNAUTHENTICATED.to_string())
    }

    /// True unless this is the sentinel.
    pub fn is_authenticated(&self) -> bool {
        self.0 != UNAUTHENTICATED
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Principal {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for Principal {
    fn from(id: String) -> Self {
        Self(id)
    }
}

#[derive(Debug, Deserialize)]
struct IdentityClaims {
    email: String,
}

/// Decodes a gateway identity envelope into a [`Principal`].
///
/// Accepts both standard and URL-safe base64, since gateways emit both.
/// A valid envelope can never produce the sentinel: the reserved literal
/// and the empty string are rejected as malformed.
pub fn principal_from_header(raw: Option<&str>) -> Result<Principal> {
    let value = match raw {
        None => return Ok(Principal::unauthenticated()),
        Some(v) if v.is_empty() => return Ok(Principal::unauthenticated()),
        Some(v) => v,
    };
    let bytes = STANDARD
        .decode(value)
        .or_else(|_| URL_SAFE_NO_PAD.decode(value))
        .map_err(|e| Error::MalformedIdentity(format!("invalid base64: {e}")))?;
    let claims: IdentityClaims = serde_json::from_slice(&bytes)
        .map_err(|e| Error::MalformedIdentity(format!("invalid claims object: {e}")))?;
    if claims.email.is_empty() || claims.email == UNAUTHENTICATED {
        return Err(Error::MalformedIdentity(format!(
            "reserved or empty email claim {:?}",
            claims.email
        )));
    }
    Ok(Principal::new(claims.email))
}
