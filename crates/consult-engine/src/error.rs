//! Engine error type: the domain taxonomy plus storage and configuration
//! failures.

use laborline_consult_core::ConsultError;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors surfaced by the consultation engine
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Business-rule failure from the domain core
    #[error(transparent)]
    Domain(#[from] ConsultError),

    /// Storage-layer failure
    #[error("database error: {0}")]
    Database(String),

    /// Invalid or missing configuration
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl EngineError {
    pub fn database(err: impl std::fmt::Display) -> Self {
        EngineError::Database(err.to_string())
    }

    /// The domain error kind, when this is a business-rule failure
    pub fn as_domain(&self) -> Option<&ConsultError> {
        match self {
            EngineError::Domain(err) => Some(err),
            _ => None,
        }
    }
}
