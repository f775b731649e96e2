//! HTTP entry point for the aggregate write orchestrators.
//!
//! Translates JSON requests into product writer and checkout commands,
//! with structured logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use orchestrator::{
    CheckoutOrchestrator, InMemoryBlobStore, InMemoryCache, InMemoryGiftCardService,
    InMemoryPaymentGateway, ProductWriter, SequentialOrderNumbers,
};
use store::Store;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;

pub type AppProductWriter<S> = ProductWriter<S, InMemoryBlobStore, InMemoryCache>;

pub type AppCheckout<S> = CheckoutOrchestrator<
    S,
    InMemoryPaymentGateway,
    InMemoryGiftCardService,
    SequentialOrderNumbers,
    InMemoryCache,
>;

/// Shared application state accessible from all handlers.
pub struct AppState<S: Store> {
    pub products: AppProductWriter<S>,
    pub checkout: AppCheckout<S>,
    pub gift_cards: InMemoryGiftCardService,
    pub blobs: InMemoryBlobStore,
    /// Request body limit; base64 inflates uploads by a third.
    pub body_limit: usize,
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: Store>(state: Arc<AppState<S>>, metrics_handle: PrometheusHandle) -> Router {
    let body_limit = state.body_limit;

    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/products", post(routes::products::create::<S>))
        .route(
            "/products/{id}",
            get(routes::products::get::<S>)
                .put(routes::products::update::<S>)
                .delete(routes::products::delete::<S>),
        )
        .route("/orders", post(routes::orders::create::<S>))
        .route("/orders/{id}", get(routes::orders::get::<S>))
        .with_state(state)
        .merge(metrics_router)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates application state over `store` with in-memory collaborators.
///
/// Order numbering resumes after the numbers already stored today.
pub async fn create_default_state<S: Store>(
    store: S,
    config: &Config,
) -> store::Result<Arc<AppState<S>>> {
    let order_numbers = {
        let mut conn = store.connect().await?;
        SequentialOrderNumbers::resume(&mut conn).await?
    };
    let blobs = InMemoryBlobStore::new(config.blob_base_url.clone());
    let cache = InMemoryCache::new();
    let gift_cards = InMemoryGiftCardService::new();

    let products = ProductWriter::new(
        store.clone(),
        blobs.clone(),
        cache.clone(),
        config.writer_config(),
    );
    let checkout = CheckoutOrchestrator::new(
        store,
        InMemoryPaymentGateway::new(),
        gift_cards.clone(),
        order_numbers,
        cache,
        config.checkout_config(),
    );

    Ok(Arc::new(AppState {
        products,
        checkout,
        gift_cards,
        blobs,
        body_limit: config.max_upload_bytes.saturating_mul(2).max(2 * 1024 * 1024),
    }))
}
