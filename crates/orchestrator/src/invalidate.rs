//! Post-commit cache invalidation.

use common::AggregateId;
use domain::CustomerId;

use crate::services::CacheService;

/// Removes cache entries touched by a committed write.
///
/// Patterns are deliberately coarse: every listing and search page is
/// dropped rather than working out which pages held the aggregate.
/// Failures are logged and never reach the caller.
pub struct CacheInvalidator<C: CacheService> {
    cache: C,
}

impl<C: CacheService> CacheInvalidator<C> {
    pub fn new(cache: C) -> Self {
        Self { cache }
    }

    pub fn product_key(id: AggregateId) -> String {
        format!("product:{}", id)
    }

    pub fn product_slug_key(slug: &str) -> String {
        format!("product:slug:{}", slug)
    }

    pub fn order_key(id: AggregateId) -> String {
        format!("order:{}", id)
    }

    #[tracing::instrument(skip(self, slugs))]
    pub async fn invalidate_product(&self, id: AggregateId, slugs: &[&str]) {
        self.remove(&Self::product_key(id)).await;
        for slug in slugs {
            self.remove(&Self::product_slug_key(slug)).await;
        }
        self.remove_pattern("products:list:*").await;
        self.remove_pattern("products:search:*").await;
    }

    #[tracing::instrument(skip(self))]
    pub async fn invalidate_order(&self, id: AggregateId, customer_id: CustomerId) {
        self.remove(&Self::order_key(id)).await;
        self.remove_pattern(&format!("orders:customer:{}:*", customer_id))
            .await;
        self.remove_pattern("orders:list:*").await;
    }

    async fn remove(&self, key: &str) {
        if let Err(e) = self.cache.remove(key).await {
            tracing::warn!(%key, error = %e, "cache invalidation failed");
        }
    }

    async fn remove_pattern(&self, pattern: &str) {
        match self.cache.remove_by_pattern(pattern).await {
            Ok(removed) => tracing::trace!(%pattern, removed, "cache pattern invalidated"),
            Err(e) => tracing::warn!(%pattern, error = %e, "cache invalidation failed"),
        }
    }
}
