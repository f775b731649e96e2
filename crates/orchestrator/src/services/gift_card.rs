//! Gift card service trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::Money;

use super::{read, write};
use crate::error::ServiceError;

/// Store of gift cards that can discount an order.
#[async_trait]
pub trait GiftCardService: Send + Sync {
    /// Returns true if the card exists, is active and has not expired.
    async fn validate(&self, code: &str) -> Result<bool, ServiceError>;

    /// Remaining balance on the card.
    async fn balance(&self, code: &str) -> Result<Money, ServiceError>;

    /// Debits the card. Returns false if the balance no longer covers it.
    async fn redeem(&self, code: &str, amount: Money) -> Result<bool, ServiceError>;
}

#[derive(Debug, Clone)]
struct GiftCard {
    balance: Money,
    active: bool,
    expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct InMemoryGiftCardState {
    cards: HashMap<String, GiftCard>,
    fail_on_redeem: bool,
}

/// In-memory gift card service for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryGiftCardService {
    state: Arc<RwLock<InMemoryGiftCardState>>,
}

impl InMemoryGiftCardService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issues an active card with no expiry.
    pub fn issue(&self, code: impl Into<String>, balance: Money) {
        write(&self.state).cards.insert(
            code.into(),
            GiftCard {
                balance,
                active: true,
                expires_at: None,
            },
        );
    }

    pub fn expire(&self, code: &str, at: DateTime<Utc>) {
        if let Some(card) = write(&self.state).cards.get_mut(code) {
            card.expires_at = Some(at);
        }
    }

    pub fn deactivate(&self, code: &str) {
        if let Some(card) = write(&self.state).cards.get_mut(code) {
            card.active = false;
        }
    }

    /// Configures every redemption to fail.
    pub fn set_fail_on_redeem(&self, fail: bool) {
        write(&self.state).fail_on_redeem = fail;
    }

    pub fn balance_of(&self, code: &str) -> Option<Money> {
        read(&self.state).cards.get(code).map(|c| c.balance)
    }
}

#[async_trait]
impl GiftCardService for InMemoryGiftCardService {
    async fn validate(&self, code: &str) -> Result<bool, ServiceError> {
        let now = Utc::now();
        Ok(read(&self.state)
            .cards
            .get(code)
            .is_some_and(|card| card.active && card.expires_at.is_none_or(|at| at > now)))
    }

    async fn balance(&self, code: &str) -> Result<Money, ServiceError> {
        read(&self.state)
            .cards
            .get(code)
            .map(|card| card.balance)
            .ok_or_else(|| ServiceError::GiftCard(format!("Unknown gift card {}", code)))
    }

    async fn redeem(&self, code: &str, amount: Money) -> Result<bool, ServiceError> {
        let mut state = write(&self.state);
        if state.fail_on_redeem {
            return Err(ServiceError::GiftCard("Redemption unavailable".to_string()));
        }
        let card = state
            .cards
            .get_mut(code)
            .ok_or_else(|| ServiceError::GiftCard(format!("Unknown gift card {}", code)))?;
        if card.balance < amount {
            return Ok(false);
        }
        card.balance = card.balance - amount;
        Ok(true)
    }
}
