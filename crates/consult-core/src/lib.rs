//! # Consult-Core
//!
//! Domain model for the laborline consultation platform.
//!
//! This crate provides:
//! - Consultation request and advisor records with closed enumerations
//! - The request lifecycle state machine with once-only timing metrics
//! - Workload classification and the configurable capacity policy
//! - Typed, append-only audit events (assignment and status history)
//! - Field validation for advisor and request intake
//!
//! ## Architecture
//!
//! Consult-core owns the data model and the pure business rules; it knows
//! nothing about storage or transport. The consult-engine crate layers
//! repositories, assignment orchestration and statistics on top of it.

pub mod error;
pub mod lifecycle;
pub mod types;
pub mod validation;
pub mod workload;

pub use error::{ConsultError, Result};
pub use types::{
    Advisor, AdvisorFilter, AdvisorId, AdvisorSummary, AuditEvent, AuditEventKind,
    ConsultationRequest, ContactMethod, NewAdvisor, NewConsultationRequest, Region, RequestFilter,
    RequestId, RequestStatus, ServiceCategory, UpdateAdvisor,
};
pub use workload::{CapacityPolicy, WorkloadTier};
