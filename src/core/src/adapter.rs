//! Seam between the decision engine and a web framework.

use crate::error::Result;
use crate::identity::{principal_from_header, Principal};

/// The three request-extraction operations a framework binding supplies.
///
/// Everything else about a guarded route (role, id field, policy
/// overrides) is route configuration; these three are the only facts that
/// come from the request itself.
pub trait RequestAdapter {
    /// Raw gateway identity envelope, if the request carried one.
    fn identity_header(&self) -> Option<String>;

    /// Value of the request field naming the resource: path parameter
    /// first, then a JSON body field. Absence is a configuration error.
    fn resource_id(&self, field: &str) -> Result<String>;

    /// Request-derived wait-mode default: true for read-only requests
    /// (GET). Per-route options may override it.
    fn dont_wait(&self) -> bool;
}

/// Decodes the adapter's identity envelope into a principal.
pub fn principal_from_request<A: RequestAdapter>(adapter: &A) -> Result<Principal> {
    principal_from_header(adapter.identity_header().as_deref())
}
