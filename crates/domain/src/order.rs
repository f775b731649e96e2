//! Order aggregate: an order root, its lines, and payment records.

use chrono::{DateTime, Utc};
use common::{AggregateId, RecordId};
use serde::{Deserialize, Serialize};

use crate::catalog::AuditStamp;
use crate::error::DomainError;
use crate::value_objects::{CustomerId, Money};

/// Status of an order.
///
/// ```text
/// Pending ──► Confirmed
///    └──────► Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum OrderStatus {
    /// Awaiting payment.
    #[default]
    Pending,
    /// Fully paid (or nothing was left to pay).
    Confirmed,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "Pending",
            OrderStatus::Confirmed => "Confirmed",
            OrderStatus::Cancelled => "Cancelled",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(OrderStatus::Pending),
            "Confirmed" => Ok(OrderStatus::Confirmed),
            "Cancelled" => Ok(OrderStatus::Cancelled),
            other => Err(DomainError::UnknownStatus(other.to_string())),
        }
    }
}

/// How the customer pays for an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentMethod {
    CashOnDelivery,
    BankTransfer,
    Card,
    EWallet,
}

impl PaymentMethod {
    /// Returns true if payment is initiated through the external gateway.
    pub fn requires_gateway(&self) -> bool {
        matches!(self, PaymentMethod::Card | PaymentMethod::EWallet)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::CashOnDelivery => "CashOnDelivery",
            PaymentMethod::BankTransfer => "BankTransfer",
            PaymentMethod::Card => "Card",
            PaymentMethod::EWallet => "EWallet",
        }
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PaymentMethod {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CashOnDelivery" => Ok(PaymentMethod::CashOnDelivery),
            "BankTransfer" => Ok(PaymentMethod::BankTransfer),
            "Card" => Ok(PaymentMethod::Card),
            "EWallet" => Ok(PaymentMethod::EWallet),
            other => Err(DomainError::UnknownStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "Pending",
            PaymentStatus::Completed => "Completed",
            PaymentStatus::Failed => "Failed",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(PaymentStatus::Pending),
            "Completed" => Ok(PaymentStatus::Completed),
            "Failed" => Ok(PaymentStatus::Failed),
            other => Err(DomainError::UnknownStatus(other.to_string())),
        }
    }
}

/// The order aggregate root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: AggregateId,
    /// Human-facing order number, unique across orders.
    pub order_number: String,
    pub customer_id: CustomerId,
    pub status: OrderStatus,
    pub payment_method: PaymentMethod,
    pub shipping_address: String,
    pub subtotal: Money,
    pub tax: Money,
    pub shipping_fee: Money,
    pub discount: Money,
    /// `subtotal + tax + shipping_fee - discount`, never below zero.
    pub total: Money,
    pub gift_card_code: Option<String>,
    pub audit: AuditStamp,
}

/// A line of an order.
///
/// Name and SKU are copied from the catalog at write time; the line keeps
/// no foreign key into the catalog tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub id: RecordId,
    pub order_id: AggregateId,
    pub product_id: AggregateId,
    pub variant_id: Option<RecordId>,
    pub product_name: String,
    pub sku: String,
    pub quantity: u32,
    pub unit_price: Money,
    pub line_total: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: RecordId,
    pub order_id: AggregateId,
    pub amount: Money,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub transaction_id: Option<String>,
    pub payment_url: Option<String>,
    pub qr_url: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// An order read back together with its lines and payments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderAggregate {
    pub order: Order,
    pub lines: Vec<OrderLine>,
    pub payments: Vec<Payment>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_methods() {
        assert!(PaymentMethod::Card.requires_gateway());
        assert!(PaymentMethod::EWallet.requires_gateway());
        assert!(!PaymentMethod::CashOnDelivery.requires_gateway());
        assert!(!PaymentMethod::BankTransfer.requires_gateway());
    }

    #[test]
    fn statuses_parse_their_own_names() {
        assert_eq!(
            "Confirmed".parse::<OrderStatus>().unwrap(),
            OrderStatus::Confirmed
        );
        assert_eq!(
            "Failed".parse::<PaymentStatus>().unwrap(),
            PaymentStatus::Failed
        );
        assert_eq!(
            "EWallet".parse::<PaymentMethod>().unwrap(),
            PaymentMethod::EWallet
        );
        assert!("Shipped".parse::<OrderStatus>().is_err());
    }
}
