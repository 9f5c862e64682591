//! Owned request view implementing the core extraction seam.

use std::collections::HashMap;

use axum::body::{to_bytes, Body};
use axum::extract::{FromRequestParts, RawPathParams, Request};
use axum::http::Method;
use latchkey_core::{Error, RequestAdapter, Result, IDENTITY_HEADER};
use serde_json::Value;

/// Largest request or response body the guards will buffer for field
/// extraction.
pub(crate) const BODY_LIMIT: usize = 1 << 20;

/// The request facts an authorization decision needs.
///
/// Built from the request's parts; the JSON body is buffered only when a
/// resource id has to be read from it, and the request is handed back
/// intact either way.
pub struct ExtractedRequest {
    identity: Option<String>,
    method: Method,
    path_params: HashMap<String, String>,
    body_json: Option<Value>,
}

impl ExtractedRequest {
    /// Splits `req` into extraction facts and the request to forward.
    ///
    /// `body_field` names a resource-id field that may live in the JSON
    /// body; the body is buffered only when that field is not already a
    /// path parameter.
    pub(crate) async fn extract(
        req: Request,
        body_field: Option<&str>,
    ) -> Result<(Self, Request)> {
        let (mut parts, body) = req.into_parts();

        let mut path_params = HashMap::new();
        if let Ok(raw) = RawPathParams::from_request_parts(&mut parts, &()).await {
            for (name, value) in &raw {
                path_params.insert(name.to_string(), value.to_string());
            }
        }

        let identity = parts
            .headers
            .get(IDENTITY_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let needs_body = parts.method != Method::GET
            && body_field.is_some_and(|field| !path_params.contains_key(field));
        let (body_json, body) = if needs_body {
            let bytes = to_bytes(body, BODY_LIMIT).await.map_err(|e| {
                Error::Configuration(format!("could not buffer request body: {e}"))
            })?;
            let json = serde_json::from_slice(&bytes).ok();
            (json, Body::from(bytes))
        } else {
            (None, body)
        };

        let facts = Self {
            identity,
            method: parts.method.clone(),
            path_params,
            body_json,
        };
        Ok((facts, Request::from_parts(parts, body)))
    }
}

impl RequestAdapter for ExtractedRequest {
    fn identity_header(&self) -> Option<String> {
        self.identity.clone()
    }

    fn resource_id(&self, field: &str) -> Result<String> {
        if let Some(value) = self.path_params.get(field) {
            return Ok(value.clone());
        }
        if let Some(value) = self
            .body_json
            .as_ref()
            .and_then(|body| body.get(field))
            .and_then(Value::as_str)
        {
            return Ok(value.to_string());
        }
        Err(Error::Configuration(format!(
            "resource id field {field:?} not present in request"
        )))
    }

    fn dont_wait(&self) -> bool {
        self.method == Method::GET
    }
}
