//! External collaborator traits and in-memory implementations.

pub mod blob;
pub mod cache;
pub mod gift_card;
pub mod order_number;
pub mod payment;

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub use blob::{BlobStore, InMemoryBlobStore};
pub use cache::{CacheService, InMemoryCache};
pub use gift_card::{GiftCardService, InMemoryGiftCardService};
pub use order_number::{OrderNumberGenerator, SequentialOrderNumbers};
pub use payment::{InMemoryPaymentGateway, PaymentGateway, PaymentRequest, PaymentSession};

// In-memory state stays consistent across a panicking writer, so a
// poisoned lock is still safe to use.
fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
