//! Payment gateway trait and in-memory implementation.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use common::AggregateId;
use domain::{CustomerId, Money, PaymentMethod};

use super::{read, write};
use crate::error::ServiceError;

/// A request to open a payment with the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRequest {
    pub order_id: AggregateId,
    pub order_number: String,
    pub customer_id: CustomerId,
    pub amount: Money,
    pub method: PaymentMethod,
}

/// What the gateway hands back for the customer to complete payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentSession {
    pub transaction_id: String,
    pub payment_url: String,
    pub qr_url: Option<String>,
}

/// External payment gateway.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_payment(&self, request: &PaymentRequest)
    -> Result<PaymentSession, ServiceError>;
}

#[derive(Debug, Default)]
struct InMemoryGatewayState {
    requests: Vec<PaymentRequest>,
    next_id: u32,
    fail_on_create: bool,
}

/// In-memory payment gateway for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentGateway {
    state: Arc<RwLock<InMemoryGatewayState>>,
}

impl InMemoryPaymentGateway {
    /// Creates a new in-memory payment gateway.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the gateway to decline every payment.
    pub fn set_fail_on_create(&self, fail: bool) {
        write(&self.state).fail_on_create = fail;
    }

    /// Returns the number of requests the gateway received.
    pub fn request_count(&self) -> usize {
        read(&self.state).requests.len()
    }

    pub fn last_request(&self) -> Option<PaymentRequest> {
        read(&self.state).requests.last().cloned()
    }
}

#[async_trait]
impl PaymentGateway for InMemoryPaymentGateway {
    async fn create_payment(
        &self,
        request: &PaymentRequest,
    ) -> Result<PaymentSession, ServiceError> {
        let mut state = write(&self.state);
        state.requests.push(request.clone());

        if state.fail_on_create {
            return Err(ServiceError::PaymentGateway("Payment declined".to_string()));
        }

        state.next_id += 1;
        let transaction_id = format!("PAY-{:04}", state.next_id);
        let qr_url = (request.method == PaymentMethod::EWallet)
            .then(|| format!("https://pay.test/qr/{}", transaction_id));
        Ok(PaymentSession {
            payment_url: format!("https://pay.test/checkout/{}", transaction_id),
            qr_url,
            transaction_id,
        })
    }
}
