//! Aggregate write orchestration.
//!
//! Two flows share the same shape: validate natural keys, run external side
//! effects that cannot be rolled back, persist a root and its children in
//! one transaction, then invalidate caches and re-read the committed
//! aggregate for the response.
//!
//! - [`ProductWriter`] creates, updates and deletes products with images,
//!   variants, attribute values and tags.
//! - [`CheckoutOrchestrator`] places an order with an optional gift card
//!   discount and a payment through an external gateway.

pub mod assemble;
pub mod checkout;
pub mod config;
pub mod error;
pub mod invalidate;
pub mod product_writer;
pub mod receipt;
pub mod services;
pub mod sku;
pub mod upload;

pub use assemble::{
    AssembleError, OrderView, OrderViewAssembler, ProductView, ProductViewAssembler,
    ResponseAssembler,
};
pub use checkout::CheckoutOrchestrator;
pub use config::{CheckoutConfig, UploadPolicy, WriterConfig};
pub use error::{OrchestratorError, ServiceError};
pub use invalidate::CacheInvalidator;
pub use product_writer::ProductWriter;
pub use receipt::{CheckoutReceipt, ResponseState, SkippedChild, WriteReceipt};
pub use services::{
    BlobStore, CacheService, GiftCardService, InMemoryBlobStore, InMemoryCache,
    InMemoryGiftCardService, InMemoryPaymentGateway, OrderNumberGenerator, PaymentGateway,
    PaymentRequest, PaymentSession, SequentialOrderNumbers,
};
pub use sku::{ClaimedKeys, KeyProbe, ResolveError, SkuResolver};
pub use upload::{ImageUploader, UploadError, UploadLedger};
