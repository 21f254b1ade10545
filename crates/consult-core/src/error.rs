//! Business-rule error taxonomy.
//!
//! Every failure in the core is one of these kinds, detected synchronously
//! and reported to the caller with a human-readable message. None are
//! retried internally and none are swallowed; a failed operation leaves the
//! records it touched unchanged.

use crate::types::{AdvisorId, RequestStatus};

/// Result type for domain operations
pub type Result<T> = std::result::Result<T, ConsultError>;

/// Errors raised by consultation and advisor operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConsultError {
    /// Unknown request or advisor id
    #[error("not found: {0}")]
    NotFound(String),

    /// Status change outside the allowed transition graph (and not forced)
    #[error("invalid status transition from {from} to {to}")]
    InvalidTransition {
        from: RequestStatus,
        to: RequestStatus,
    },

    /// Operation attempted on a request in a status that does not permit it
    #[error("operation not permitted while request is {0}")]
    InvalidState(RequestStatus),

    /// Assignment target advisor is disabled
    #[error("advisor {0} is inactive")]
    Inactive(AdvisorId),

    /// Advisor's workload rejects new cases under the capacity policy
    #[error("advisor {0} cannot accept another case")]
    Overloaded(AdvisorId),

    /// Automatic assignment needs a region on the request
    #[error("request has no region; automatic assignment requires one")]
    MissingRegion,

    /// Request is already linked to an advisor (or another writer just won)
    #[error("request is already assigned to an advisor")]
    AlreadyAssigned,

    /// No candidate survived region/specialty/capacity filtering
    #[error("no available advisor matches this request")]
    NoAvailableAdvisor,

    /// Advisor email collides with another advisor
    #[error("email address is already in use by another advisor")]
    DuplicateContact,

    /// Delete attempted on an advisor with unresolved assignments
    #[error("advisor still holds {count} active assignment(s)")]
    HasActiveAssignments { count: u64 },

    /// Field-level validation failure at the intake boundary
    #[error("validation failed: {0}")]
    Validation(String),
}
