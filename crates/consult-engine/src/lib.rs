//! # Consult-Engine
//!
//! Consultation lifecycle and advisor-assignment engine for laborline.
//!
//! This crate provides:
//! - Storage traits with in-memory and SQLite implementations
//! - The advisor registry (validated CRUD, activation, guarded deletion)
//! - The assignment engine (manual and automatic best-match assignment
//!   with race-safe linkage)
//! - Lifecycle orchestration with timing metrics and advisor counters
//! - The statistics aggregator (status, region, workload, efficiency and
//!   monthly views)
//! - Role-scoped API facades and a server wrapper with a monitoring loop
//!
//! ## Architecture
//!
//! Consult-engine layers storage and orchestration on top of the
//! laborline-consult-core domain model. Every assignment attempt resolves
//! through a single store-level compare-and-swap, so concurrent operators
//! get exactly one winner per request.

pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod registry;
pub mod server;
pub mod stats;
pub mod store;

pub use api::{AdminApi, SupervisorApi};
pub use config::{AssignmentConfig, ConsultCenterConfig, DatabaseConfig, GeneralConfig};
pub use engine::{AssignmentHistory, ConsultEngine, RequestPage};
pub use error::{EngineError, Result};
pub use registry::AdvisorRegistry;
pub use server::{ConsultCenterServer, ConsultCenterServerBuilder};
pub use stats::{
    EfficiencyEntry, MonthlyAssignmentEntry, RegionStats, StatisticsAggregator, StatsOverview,
    WorkloadBucket,
};
pub use store::{AdvisorStore, MemoryStore, RequestStore, SqliteStore, StatusCounts};

/// Initialize tracing output for binaries and demos. Respects `RUST_LOG`,
/// defaulting to `info`. Safe to call more than once.
pub fn init_logging() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Commonly used types for consumers of the engine
pub mod prelude {
    pub use crate::api::{AdminApi, SupervisorApi};
    pub use crate::config::ConsultCenterConfig;
    pub use crate::engine::ConsultEngine;
    pub use crate::error::{EngineError, Result};
    pub use crate::server::{ConsultCenterServer, ConsultCenterServerBuilder};
    pub use laborline_consult_core::{
        Advisor, AdvisorFilter, AdvisorId, ConsultError, ConsultationRequest, NewAdvisor,
        NewConsultationRequest, Region, RequestFilter, RequestId, RequestStatus, ServiceCategory,
    };
}
