//! Typed authorization context handed to guarded operations.

use crate::identity::Principal;

/// Outcome of an authentication or authorization decision, passed by
/// reference (or as a request extension) into the guarded operation.
///
/// `calling` is the verified request principal, when there is one.
/// `acting` is the principal interface-level mutations apply to: it equals
/// `calling` except in delegated flows, where the grant endpoint acts on
/// the grant target. `accessible_ids` is populated only by the
/// accessible-listing path.
#[derive(Debug, Clone, Default)]
pub struct AuthContext {
    calling: Option<Principal>,
    acting: Option<Principal>,
    accessible_ids: Option<Vec<String>>,
}

impl AuthContext {
    /// Context for bypassed calls: nothing verified, nothing injected.
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Context for a verified principal acting on their own behalf.
    pub fn verified(principal: Principal) -> Self {
        Self {
            calling: Some(principal.clone()),
            acting: Some(principal),
            accessible_ids: None,
        }
    }

    /// Same verified caller, with mutations redirected to `target`.
    pub fn acting_as(&self, target: Principal) -> Self {
        Self {
            calling: self.calling.clone(),
            acting: Some(target),
            accessible_ids: self.accessible_ids.clone(),
        }
    }

    pub(crate) fn with_accessible_ids(mut self, ids: Vec<String>) -> Self {
        self.accessible_ids = Some(ids);
        self
    }

    /// The verified caller, if the request carried a valid identity and
    /// the policy verified it.
    pub fn calling_principal(&self) -> Option<&Principal> {
        self.calling.as_ref()
    }

    /// The principal interface-level mutations act on.
    pub fn acting_principal(&self) -> Option<&Principal> {
        self.acting.as_ref().or(self.calling.as_ref())
    }

    /// Resource ids pre-resolved for listing endpoints.
    pub fn accessible_ids(&self) -> Option<&[String]> {
        self.accessible_ids.as_deref()
    }

    pub fn is_verified(&self) -> bool {
        self.calling.is_some()
    }
}
