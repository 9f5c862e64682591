//! Error types for the latchkey authorization layer.

use thiserror::Error;

/// Errors produced by identity extraction, the role store, and the
/// decision engine.
///
/// Denials and infrastructure failures are distinct variants on purpose:
/// a failed check is [`Error::NotAuthorized`], an unreachable store is
/// [`Error::StoreUnavailable`], and HTTP layers must map them to 401 and
/// 503 respectively.
#[derive(Debug, Error)]
pub enum Error {
    /// The sentinel principal was used where a real principal is required,
    /// such as the target of an assign or revoke.
    #[error("Unauthenticated user attempted access")]
    UnauthenticatedPrincipal,

    /// An identity envelope was present on the request but could not be
    /// decoded. Absence of an envelope is not an error; garbling is.
    #[error("Malformed identity envelope: {0}")]
    MalformedIdentity(String),

    /// An authorization or authentication check failed.
    #[error("Not authorized")]
    NotAuthorized,

    /// A grant was refused: the caller does not hold the required role on
    /// the resource, or asked for a role outside the grantable set.
    #[error("Not authorized to grant: {0}")]
    GrantNotPermitted(String),

    /// The role store could not be reached or answered abnormally.
    #[error("Role store unavailable: {0}")]
    StoreUnavailable(String),

    /// Invalid construction or wiring: bad namespace component, missing
    /// store parameters, or a configured request/output field that is not
    /// actually there.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A guarded application operation failed.
    #[error(transparent)]
    Operation(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
