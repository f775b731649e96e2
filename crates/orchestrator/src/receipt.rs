//! Outcomes returned by the orchestrators.

use common::AggregateId;
use domain::{ChildKind, Money, PaymentStatus};
use serde::Serialize;

/// What happened to the response after a committed write.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", content = "data", rename_all = "snake_case")]
pub enum ResponseState<T> {
    /// The aggregate was re-read and mapped.
    Ready(T),
    /// The write is durable but the aggregate could not be read back.
    ReadBackMissing,
    /// The write is durable but mapping the aggregate failed.
    MappingFailed(String),
}

impl<T> ResponseState<T> {
    pub fn ready(&self) -> Option<&T> {
        match self {
            ResponseState::Ready(value) => Some(value),
            _ => None,
        }
    }

    pub fn into_ready(self) -> Option<T> {
        match self {
            ResponseState::Ready(value) => Some(value),
            _ => None,
        }
    }
}

/// A child the writer dropped without failing the aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedChild {
    pub kind: ChildKind,
    /// Position in the caller's input.
    pub index: usize,
    pub reason: String,
}

impl SkippedChild {
    pub fn new(kind: ChildKind, index: usize, reason: impl Into<String>) -> Self {
        Self {
            kind,
            index,
            reason: reason.into(),
        }
    }
}

/// Result of a committed product write.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WriteReceipt<T> {
    pub id: AggregateId,
    pub response: ResponseState<T>,
    pub skipped: Vec<SkippedChild>,
}

impl<T> WriteReceipt<T> {
    pub fn skipped_of(&self, kind: ChildKind) -> usize {
        self.skipped.iter().filter(|s| s.kind == kind).count()
    }
}

/// Result of a committed checkout.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckoutReceipt<T> {
    pub order_id: AggregateId,
    pub order_number: String,
    pub total: Money,
    /// `None` when no gift card was used. `Some(false)` means the order
    /// stands with the discount applied but the card was not debited.
    pub discount_redeemed: Option<bool>,
    pub payment_status: PaymentStatus,
    pub response: ResponseState<T>,
}
