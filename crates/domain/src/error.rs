//! Domain error types.

use thiserror::Error;

/// Business-rule violations detected while validating a command.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    /// A required text field is empty.
    #[error("{field} is required")]
    Required { field: &'static str },

    /// The name could not produce a usable slug.
    #[error("Cannot derive a slug from {0:?}")]
    InvalidSlug(String),

    /// Invalid price.
    #[error("Invalid price for {field}: {cents} (must not be negative)")]
    NegativePrice { field: &'static str, cents: i64 },

    #[error("Invalid stock quantity: {0} (must not be negative)")]
    NegativeStock(i32),

    /// Invalid quantity.
    #[error("Invalid quantity: {quantity} (must be greater than 0)")]
    InvalidQuantity { quantity: u32 },

    /// Order has no lines.
    #[error("Order has no lines")]
    NoLines,

    /// A stored status string did not match any known variant.
    #[error("Unknown status: {0}")]
    UnknownStatus(String),
}
