//! Orchestrator error types.

use domain::DomainError;
use thiserror::Error;

/// Errors surfaced by the orchestrators to their callers.
///
/// Store and service failures never leak through; they are logged where
/// they happen and reported as [`OrchestratorError::Failed`].
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// A natural key is already used by another root.
    #[error("{field} '{value}' is already in use")]
    Conflict { field: &'static str, value: String },

    /// A referenced record does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// The request breaks a business rule.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The write was rolled back or never started.
    #[error("The {0} could not be completed")]
    Failed(&'static str),
}

impl OrchestratorError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        OrchestratorError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        OrchestratorError::Validation(message.into())
    }

    /// Logs an unexpected failure and hides it behind [`OrchestratorError::Failed`].
    pub(crate) fn internal(operation: &'static str, error: impl std::fmt::Display) -> Self {
        tracing::error!(operation, %error, "unexpected failure");
        OrchestratorError::Failed(operation)
    }
}

impl From<DomainError> for OrchestratorError {
    fn from(e: DomainError) -> Self {
        OrchestratorError::Validation(e.to_string())
    }
}

/// Errors from external collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    /// Blob storage error.
    #[error("Blob store error: {0}")]
    BlobStore(String),

    /// Cache error.
    #[error("Cache error: {0}")]
    Cache(String),

    /// Payment gateway error.
    #[error("Payment gateway error: {0}")]
    PaymentGateway(String),

    /// Gift card service error.
    #[error("Gift card service error: {0}")]
    GiftCard(String),

    #[error("Order number generator error: {0}")]
    OrderNumber(String),
}

/// Convenience type alias for orchestrator results.
pub type Result<T> = std::result::Result<T, OrchestratorError>;
