//! Persistence layer for the commerce write path.
//!
//! Repositories are implemented by a connection handle that the caller owns
//! and passes explicitly; there is no ambient unit of work. A
//! [`TransactionScope`] wraps one connection with depth-counted
//! begin/commit and unconditional rollback.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod scope;
pub mod store;

pub use error::{Result, StoreError};
pub use memory::{FaultKind, FaultPoint, InMemoryConnection, InMemoryStore};
pub use postgres::{PostgresConnection, PostgresStore};
pub use scope::TransactionScope;
pub use store::{
    Connection, ConnectionExt, OrderRepository, PaymentRepository, ProductChildRepository,
    ProductRepository, Store, Transactional,
};
