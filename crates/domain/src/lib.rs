//! Domain layer for the commerce write path.
//!
//! This crate holds the records the orchestrators persist and the commands
//! they accept:
//! - Catalog aggregate: products with images, variants, attribute values and tags
//! - Order aggregate: orders with lines and payment records
//! - Value objects such as [`Money`] and [`CustomerId`]

pub mod catalog;
pub mod commands;
pub mod error;
pub mod order;
pub mod value_objects;

pub use catalog::{
    AuditStamp, ChildKind, Product, ProductAggregate, ProductAttributeValue, ProductImage,
    ProductStatus, ProductTag, ProductVariant,
};
pub use commands::{
    AttributeInput, CreateProduct, ImageInput, ImageSource, OrderLineRequest, PlaceOrder,
    UpdateProduct, VariantInput,
};
pub use error::DomainError;
pub use order::{
    Order, OrderAggregate, OrderLine, OrderStatus, Payment, PaymentMethod, PaymentStatus,
};
pub use value_objects::{CustomerId, Money, slugify};
