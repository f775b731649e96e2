use async_trait::async_trait;
use common::{AggregateId, RecordId};
use domain::{
    ChildKind, Order, OrderAggregate, OrderLine, Payment, Product, ProductAggregate,
    ProductAttributeValue, ProductImage, ProductTag, ProductVariant,
};

use crate::Result;

/// Physical transaction control on a single connection.
///
/// These calls are not nestable; [`crate::TransactionScope`] layers depth
/// counting on top of them.
#[async_trait]
pub trait Transactional: Send {
    /// Opens a physical transaction.
    ///
    /// Fails with `TransactionAlreadyOpen` if one is already open.
    async fn begin(&mut self) -> Result<()>;

    /// Commits the open transaction.
    ///
    /// The transaction is closed whether or not the commit succeeds.
    async fn commit(&mut self) -> Result<()>;

    /// Rolls back the open transaction.
    async fn rollback(&mut self) -> Result<()>;

    /// Discards the open transaction without awaiting the backend.
    ///
    /// Called from `Drop`, so it must not block or fail.
    fn abort(&mut self);

    /// Returns true while a physical transaction is open.
    fn in_transaction(&self) -> bool;
}

/// Product root persistence.
///
/// Lookups that find nothing return `Ok(None)`; updates and deletes report
/// whether a row was touched. Neither is an error.
#[async_trait]
pub trait ProductRepository: Send {
    async fn product_by_id(&mut self, id: AggregateId) -> Result<Option<Product>>;

    async fn product_by_sku(&mut self, sku: &str) -> Result<Option<Product>>;

    async fn product_by_slug(&mut self, slug: &str) -> Result<Option<Product>>;

    async fn insert_product(&mut self, product: &Product) -> Result<()>;

    /// Overwrites the stored product. Returns false if it does not exist.
    async fn update_product(&mut self, product: &Product) -> Result<bool>;

    /// Deletes the product and, by cascade, every child it owns.
    async fn delete_product(&mut self, id: AggregateId) -> Result<bool>;
}

/// Persistence for the children a product owns.
#[async_trait]
pub trait ProductChildRepository: Send {
    /// Images ordered by `sort_order`.
    async fn images_for_product(&mut self, product_id: AggregateId)
    -> Result<Vec<ProductImage>>;

    async fn variants_for_product(
        &mut self,
        product_id: AggregateId,
    ) -> Result<Vec<ProductVariant>>;

    async fn attribute_values_for_product(
        &mut self,
        product_id: AggregateId,
    ) -> Result<Vec<ProductAttributeValue>>;

    async fn tags_for_product(&mut self, product_id: AggregateId) -> Result<Vec<ProductTag>>;

    async fn variant_by_id(&mut self, id: RecordId) -> Result<Option<ProductVariant>>;

    async fn variant_by_sku(&mut self, sku: &str) -> Result<Option<ProductVariant>>;

    async fn insert_image(&mut self, image: &ProductImage) -> Result<()>;

    async fn insert_variant(&mut self, variant: &ProductVariant) -> Result<()>;

    async fn insert_attribute_value(&mut self, value: &ProductAttributeValue) -> Result<()>;

    async fn insert_tag(&mut self, tag: &ProductTag) -> Result<()>;

    /// Deletes every child of `kind` owned by the product, returning how many
    /// rows were removed.
    async fn delete_children(&mut self, product_id: AggregateId, kind: ChildKind) -> Result<u64>;
}

/// Order root and line persistence.
#[async_trait]
pub trait OrderRepository: Send {
    async fn order_by_id(&mut self, id: AggregateId) -> Result<Option<Order>>;

    async fn order_by_number(&mut self, order_number: &str) -> Result<Option<Order>>;

    /// Highest order number starting with `prefix`. Longer numbers rank
    /// above shorter ones so that counters past their padding still sort.
    async fn last_order_number(&mut self, prefix: &str) -> Result<Option<String>>;

    async fn insert_order(&mut self, order: &Order) -> Result<()>;

    async fn lines_for_order(&mut self, order_id: AggregateId) -> Result<Vec<OrderLine>>;

    async fn insert_order_line(&mut self, line: &OrderLine) -> Result<()>;
}

#[async_trait]
pub trait PaymentRepository: Send {
    async fn insert_payment(&mut self, payment: &Payment) -> Result<()>;

    /// Payments ordered by creation time.
    async fn payments_for_order(&mut self, order_id: AggregateId) -> Result<Vec<Payment>>;
}

/// A connection handle exposing every repository.
pub trait Connection:
    Transactional + ProductRepository + ProductChildRepository + OrderRepository + PaymentRepository
{
}

impl<T> Connection for T where
    T: Transactional
        + ProductRepository
        + ProductChildRepository
        + OrderRepository
        + PaymentRepository
{
}

/// A source of connections.
///
/// Each call to [`Store::connect`] hands out a handle owned exclusively by
/// the caller; handles are never shared across requests.
#[async_trait]
pub trait Store: Clone + Send + Sync + 'static {
    type Conn: Connection + 'static;

    async fn connect(&self) -> Result<Self::Conn>;
}

/// Extension trait loading whole aggregates.
#[async_trait]
pub trait ConnectionExt: Connection {
    /// Loads a product with all of its children.
    async fn load_product_aggregate(
        &mut self,
        id: AggregateId,
    ) -> Result<Option<ProductAggregate>> {
        let Some(product) = self.product_by_id(id).await? else {
            return Ok(None);
        };
        let images = self.images_for_product(id).await?;
        let variants = self.variants_for_product(id).await?;
        let attributes = self.attribute_values_for_product(id).await?;
        let tags = self.tags_for_product(id).await?;
        Ok(Some(ProductAggregate {
            product,
            images,
            variants,
            attributes,
            tags,
        }))
    }

    /// Loads an order with its lines and payments.
    async fn load_order_aggregate(&mut self, id: AggregateId) -> Result<Option<OrderAggregate>> {
        let Some(order) = self.order_by_id(id).await? else {
            return Ok(None);
        };
        let lines = self.lines_for_order(id).await?;
        let payments = self.payments_for_order(id).await?;
        Ok(Some(OrderAggregate {
            order,
            lines,
            payments,
        }))
    }
}

// Blanket implementation for all connections
impl<T: Connection + ?Sized> ConnectionExt for T {}
