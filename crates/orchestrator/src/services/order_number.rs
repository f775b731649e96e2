//! Order number generation.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use store::OrderRepository;

use crate::error::ServiceError;

fn day_prefix(now: DateTime<Utc>) -> String {
    format!("ORD-{}-", now.format("%Y%m%d"))
}

/// Source of human-facing order numbers.
#[async_trait]
pub trait OrderNumberGenerator: Send + Sync {
    async fn next_order_number(&self) -> Result<String, ServiceError>;
}

/// Process-local generator producing `ORD-YYYYMMDD-NNNNNN`.
///
/// The counter is not persisted. Use [`SequentialOrderNumbers::resume`] at
/// startup so a restarted process continues after the numbers already
/// stored today.
#[derive(Debug, Clone, Default)]
pub struct SequentialOrderNumbers {
    counter: Arc<AtomicU64>,
}

impl SequentialOrderNumbers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts counting after `last`.
    pub fn starting_after(last: u64) -> Self {
        Self {
            counter: Arc::new(AtomicU64::new(last)),
        }
    }

    /// Starts counting after the highest number stored for today.
    pub async fn resume<C: OrderRepository>(conn: &mut C) -> store::Result<Self> {
        let prefix = day_prefix(Utc::now());
        let last = conn
            .last_order_number(&prefix)
            .await?
            .and_then(|number| number.strip_prefix(&prefix)?.parse::<u64>().ok())
            .unwrap_or(0);
        tracing::info!(last, "order numbers resumed");
        Ok(Self::starting_after(last))
    }
}

#[async_trait]
impl OrderNumberGenerator for SequentialOrderNumbers {
    async fn next_order_number(&self) -> Result<String, ServiceError> {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(format!("{}{:06}", day_prefix(Utc::now()), n))
    }
}
