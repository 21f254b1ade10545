//! Engine configuration.
//!
//! Plain deserializable sections with sensible defaults, so an engine can
//! be constructed from a config file or from `Default::default()` in tests.

use laborline_consult_core::CapacityPolicy;
use serde::Deserialize;

/// Top-level configuration for the consultation engine
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConsultCenterConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub assignment: AssignmentConfig,
}

/// General service settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Service name used in logs
    pub service_name: String,
    /// Seconds between monitoring summaries
    pub monitor_interval_secs: u64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            service_name: "laborline".to_string(),
            monitor_interval_secs: 10,
        }
    }
}

/// Storage settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite database path; `None` selects the in-memory store
    pub database_path: Option<String>,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            max_connections: 5,
        }
    }
}

/// Assignment and listing policy
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AssignmentConfig {
    /// Rule behind `can_accept_new_case`; a policy, not a hard-coded cutoff
    pub capacity: CapacityPolicy,
    /// Page size applied when a listing filter does not set one
    pub default_page_size: u32,
    /// Default N for ranking views
    pub ranking_top_n: usize,
}

impl Default for AssignmentConfig {
    fn default() -> Self {
        Self {
            capacity: CapacityPolicy::default(),
            default_page_size: 20,
            ranking_top_n: 10,
        }
    }
}
