//! In-memory store for tests and local runs.
//!
//! Tables enforce the same unique and foreign-key constraints as the
//! PostgreSQL schema. A transaction works on a private copy of the tables
//! and records a journal of mutations; commit replays the journal against
//! the shared tables under the write lock, so a concurrent commit that
//! claimed the same unique key makes this one fail instead of silently
//! overwriting it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use common::{AggregateId, RecordId};
use domain::{
    ChildKind, Order, OrderLine, Payment, Product, ProductAttributeValue, ProductImage,
    ProductTag, ProductVariant,
};
use tokio::sync::RwLock;

use crate::{
    OrderRepository, PaymentRepository, ProductChildRepository, ProductRepository, Result, Store,
    StoreError, Transactional,
};

/// Operation at which a fault can be injected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultPoint {
    InsertProduct,
    UpdateProduct,
    InsertImage,
    InsertVariant,
    InsertAttributeValue,
    InsertTag,
    DeleteChildren,
    InsertOrder,
    InsertOrderLine,
    InsertPayment,
    Commit,
    ProductById,
    OrderById,
}

/// The error an injected fault produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// The backend goes away; aborts the unit of work.
    Unavailable,
    /// A constraint rejects the row; confined to that row.
    Constraint,
}

impl FaultKind {
    fn error(self, point: FaultPoint) -> StoreError {
        match self {
            FaultKind::Unavailable => {
                StoreError::Unavailable(format!("injected fault at {:?}", point))
            }
            FaultKind::Constraint => StoreError::CheckViolation {
                constraint: format!("injected_{:?}", point).to_lowercase(),
            },
        }
    }
}

#[derive(Debug, Clone)]
enum Mutation {
    InsertProduct(Product),
    UpdateProduct(Product),
    DeleteProduct(AggregateId),
    InsertImage(ProductImage),
    InsertVariant(ProductVariant),
    InsertAttributeValue(ProductAttributeValue),
    InsertTag(ProductTag),
    DeleteChildren(AggregateId, ChildKind),
    InsertOrder(Order),
    InsertOrderLine(OrderLine),
    InsertPayment(Payment),
}

fn unique(constraint: &str) -> StoreError {
    StoreError::UniqueViolation {
        constraint: constraint.to_string(),
    }
}

fn foreign_key(constraint: &str) -> StoreError {
    StoreError::ForeignKeyViolation {
        constraint: constraint.to_string(),
    }
}

#[derive(Debug, Clone, Default)]
struct Tables {
    products: Vec<Product>,
    images: Vec<ProductImage>,
    variants: Vec<ProductVariant>,
    attribute_values: Vec<ProductAttributeValue>,
    tags: Vec<ProductTag>,
    orders: Vec<Order>,
    order_lines: Vec<OrderLine>,
    payments: Vec<Payment>,
}

impl Tables {
    fn has_product(&self, id: AggregateId) -> bool {
        self.products.iter().any(|p| p.id == id)
    }

    fn has_order(&self, id: AggregateId) -> bool {
        self.orders.iter().any(|o| o.id == id)
    }

    fn check_product_keys(&self, product: &Product) -> Result<()> {
        let others = self.products.iter().filter(|p| p.id != product.id);
        for other in others {
            if other.sku == product.sku {
                return Err(unique("products_sku_key"));
            }
            if other.slug == product.slug {
                return Err(unique("products_slug_key"));
            }
        }
        Ok(())
    }

    /// Applies one mutation, returning the number of rows it touched.
    fn apply(&mut self, mutation: &Mutation) -> Result<u64> {
        match mutation {
            Mutation::InsertProduct(product) => {
                if self.has_product(product.id) {
                    return Err(unique("products_pkey"));
                }
                self.check_product_keys(product)?;
                self.products.push(product.clone());
                Ok(1)
            }
            Mutation::UpdateProduct(product) => {
                self.check_product_keys(product)?;
                match self.products.iter_mut().find(|p| p.id == product.id) {
                    Some(stored) => {
                        *stored = product.clone();
                        Ok(1)
                    }
                    None => Ok(0),
                }
            }
            Mutation::DeleteProduct(id) => {
                let before = self.products.len();
                self.products.retain(|p| p.id != *id);
                if self.products.len() == before {
                    return Ok(0);
                }
                for kind in ChildKind::ALL {
                    self.delete_children(*id, kind);
                }
                Ok(1)
            }
            Mutation::InsertImage(image) => {
                if !self.has_product(image.product_id) {
                    return Err(foreign_key("product_images_product_id_fkey"));
                }
                if self.images.iter().any(|i| i.id == image.id) {
                    return Err(unique("product_images_pkey"));
                }
                self.images.push(image.clone());
                Ok(1)
            }
            Mutation::InsertVariant(variant) => {
                if !self.has_product(variant.product_id) {
                    return Err(foreign_key("product_variants_product_id_fkey"));
                }
                if self.variants.iter().any(|v| v.id == variant.id) {
                    return Err(unique("product_variants_pkey"));
                }
                if self.variants.iter().any(|v| v.sku == variant.sku) {
                    return Err(unique("product_variants_sku_key"));
                }
                self.variants.push(variant.clone());
                Ok(1)
            }
            Mutation::InsertAttributeValue(value) => {
                if !self.has_product(value.product_id) {
                    return Err(foreign_key("product_attribute_values_product_id_fkey"));
                }
                if self.attribute_values.iter().any(|a| a.id == value.id) {
                    return Err(unique("product_attribute_values_pkey"));
                }
                self.attribute_values.push(value.clone());
                Ok(1)
            }
            Mutation::InsertTag(tag) => {
                if !self.has_product(tag.product_id) {
                    return Err(foreign_key("product_tags_product_id_fkey"));
                }
                if self
                    .tags
                    .iter()
                    .any(|t| t.product_id == tag.product_id && t.tag_id == tag.tag_id)
                {
                    return Err(unique("product_tags_product_id_tag_id_key"));
                }
                self.tags.push(tag.clone());
                Ok(1)
            }
            Mutation::DeleteChildren(product_id, kind) => {
                Ok(self.delete_children(*product_id, *kind))
            }
            Mutation::InsertOrder(order) => {
                if self.has_order(order.id) {
                    return Err(unique("orders_pkey"));
                }
                if self
                    .orders
                    .iter()
                    .any(|o| o.order_number == order.order_number)
                {
                    return Err(unique("orders_order_number_key"));
                }
                self.orders.push(order.clone());
                Ok(1)
            }
            Mutation::InsertOrderLine(line) => {
                if !self.has_order(line.order_id) {
                    return Err(foreign_key("order_lines_order_id_fkey"));
                }
                self.order_lines.push(line.clone());
                Ok(1)
            }
            Mutation::InsertPayment(payment) => {
                if !self.has_order(payment.order_id) {
                    return Err(foreign_key("payments_order_id_fkey"));
                }
                self.payments.push(payment.clone());
                Ok(1)
            }
        }
    }

    fn delete_children(&mut self, product_id: AggregateId, kind: ChildKind) -> u64 {
        fn purge<T>(rows: &mut Vec<T>, owned: impl Fn(&T) -> bool) -> u64 {
            let before = rows.len();
            rows.retain(|r| !owned(r));
            (before - rows.len()) as u64
        }
        match kind {
            ChildKind::Image => purge(&mut self.images, |r| r.product_id == product_id),
            ChildKind::Variant => purge(&mut self.variants, |r| r.product_id == product_id),
            ChildKind::AttributeValue => {
                purge(&mut self.attribute_values, |r| r.product_id == product_id)
            }
            ChildKind::Tag => purge(&mut self.tags, |r| r.product_id == product_id),
        }
    }
}

#[derive(Debug, Default)]
struct Shared {
    tables: RwLock<Tables>,
    faults: Mutex<HashMap<FaultPoint, FaultKind>>,
}

/// In-memory store.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    shared: Arc<Shared>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every call at `point` fail with `kind` until cleared.
    pub fn set_fault(&self, point: FaultPoint, kind: FaultKind) {
        if let Ok(mut faults) = self.shared.faults.lock() {
            faults.insert(point, kind);
        }
    }

    pub fn clear_fault(&self, point: FaultPoint) {
        if let Ok(mut faults) = self.shared.faults.lock() {
            faults.remove(&point);
        }
    }

    pub async fn product_count(&self) -> usize {
        self.shared.tables.read().await.products.len()
    }

    /// Number of committed children of `kind` across all products.
    pub async fn child_count(&self, kind: ChildKind) -> usize {
        let tables = self.shared.tables.read().await;
        match kind {
            ChildKind::Image => tables.images.len(),
            ChildKind::Variant => tables.variants.len(),
            ChildKind::AttributeValue => tables.attribute_values.len(),
            ChildKind::Tag => tables.tags.len(),
        }
    }

    pub async fn order_count(&self) -> usize {
        self.shared.tables.read().await.orders.len()
    }

    pub async fn order_line_count(&self) -> usize {
        self.shared.tables.read().await.order_lines.len()
    }

    pub async fn payment_count(&self) -> usize {
        self.shared.tables.read().await.payments.len()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    type Conn = InMemoryConnection;

    async fn connect(&self) -> Result<Self::Conn> {
        Ok(InMemoryConnection {
            shared: self.shared.clone(),
            staged: None,
        })
    }
}

#[derive(Debug)]
struct Staged {
    view: Tables,
    journal: Vec<Mutation>,
}

/// Connection handle onto an [`InMemoryStore`].
#[derive(Debug)]
pub struct InMemoryConnection {
    shared: Arc<Shared>,
    staged: Option<Staged>,
}

impl InMemoryConnection {
    fn check_fault(&self, point: FaultPoint) -> Result<()> {
        let kind = self
            .shared
            .faults
            .lock()
            .ok()
            .and_then(|faults| faults.get(&point).copied());
        match kind {
            Some(kind) => Err(kind.error(point)),
            None => Ok(()),
        }
    }

    async fn write(&mut self, mutation: Mutation) -> Result<u64> {
        match self.staged.as_mut() {
            Some(staged) => {
                let touched = staged.view.apply(&mutation)?;
                staged.journal.push(mutation);
                Ok(touched)
            }
            None => self.shared.tables.write().await.apply(&mutation),
        }
    }

    async fn read<T>(&self, f: impl FnOnce(&Tables) -> T) -> T {
        match &self.staged {
            Some(staged) => f(&staged.view),
            None => f(&*self.shared.tables.read().await),
        }
    }
}

#[async_trait]
impl Transactional for InMemoryConnection {
    async fn begin(&mut self) -> Result<()> {
        if self.staged.is_some() {
            return Err(StoreError::TransactionAlreadyOpen);
        }
        let view = self.shared.tables.read().await.clone();
        self.staged = Some(Staged {
            view,
            journal: Vec::new(),
        });
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        let staged = self.staged.take().ok_or(StoreError::NoTransaction)?;
        self.check_fault(FaultPoint::Commit)?;

        let mut tables = self.shared.tables.write().await;
        let mut next = tables.clone();
        for mutation in &staged.journal {
            next.apply(mutation)?;
        }
        *tables = next;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.staged
            .take()
            .map(|_| ())
            .ok_or(StoreError::NoTransaction)
    }

    fn abort(&mut self) {
        self.staged = None;
    }

    fn in_transaction(&self) -> bool {
        self.staged.is_some()
    }
}

#[async_trait]
impl ProductRepository for InMemoryConnection {
    async fn product_by_id(&mut self, id: AggregateId) -> Result<Option<Product>> {
        self.check_fault(FaultPoint::ProductById)?;
        Ok(self
            .read(|t| t.products.iter().find(|p| p.id == id).cloned())
            .await)
    }

    async fn product_by_sku(&mut self, sku: &str) -> Result<Option<Product>> {
        Ok(self
            .read(|t| t.products.iter().find(|p| p.sku == sku).cloned())
            .await)
    }

    async fn product_by_slug(&mut self, slug: &str) -> Result<Option<Product>> {
        Ok(self
            .read(|t| t.products.iter().find(|p| p.slug == slug).cloned())
            .await)
    }

    async fn insert_product(&mut self, product: &Product) -> Result<()> {
        self.check_fault(FaultPoint::InsertProduct)?;
        self.write(Mutation::InsertProduct(product.clone())).await?;
        Ok(())
    }

    async fn update_product(&mut self, product: &Product) -> Result<bool> {
        self.check_fault(FaultPoint::UpdateProduct)?;
        let touched = self.write(Mutation::UpdateProduct(product.clone())).await?;
        Ok(touched > 0)
    }

    async fn delete_product(&mut self, id: AggregateId) -> Result<bool> {
        let touched = self.write(Mutation::DeleteProduct(id)).await?;
        Ok(touched > 0)
    }
}

#[async_trait]
impl ProductChildRepository for InMemoryConnection {
    async fn images_for_product(
        &mut self,
        product_id: AggregateId,
    ) -> Result<Vec<ProductImage>> {
        let mut images: Vec<ProductImage> = self
            .read(|t| {
                t.images
                    .iter()
                    .filter(|i| i.product_id == product_id)
                    .cloned()
                    .collect()
            })
            .await;
        images.sort_by_key(|i| i.sort_order);
        Ok(images)
    }

    async fn variants_for_product(
        &mut self,
        product_id: AggregateId,
    ) -> Result<Vec<ProductVariant>> {
        Ok(self
            .read(|t| {
                t.variants
                    .iter()
                    .filter(|v| v.product_id == product_id)
                    .cloned()
                    .collect()
            })
            .await)
    }

    async fn attribute_values_for_product(
        &mut self,
        product_id: AggregateId,
    ) -> Result<Vec<ProductAttributeValue>> {
        Ok(self
            .read(|t| {
                t.attribute_values
                    .iter()
                    .filter(|a| a.product_id == product_id)
                    .cloned()
                    .collect()
            })
            .await)
    }

    async fn tags_for_product(&mut self, product_id: AggregateId) -> Result<Vec<ProductTag>> {
        Ok(self
            .read(|t| {
                t.tags
                    .iter()
                    .filter(|tag| tag.product_id == product_id)
                    .cloned()
                    .collect()
            })
            .await)
    }

    async fn variant_by_id(&mut self, id: RecordId) -> Result<Option<ProductVariant>> {
        Ok(self
            .read(|t| t.variants.iter().find(|v| v.id == id).cloned())
            .await)
    }

    async fn variant_by_sku(&mut self, sku: &str) -> Result<Option<ProductVariant>> {
        Ok(self
            .read(|t| t.variants.iter().find(|v| v.sku == sku).cloned())
            .await)
    }

    async fn insert_image(&mut self, image: &ProductImage) -> Result<()> {
        self.check_fault(FaultPoint::InsertImage)?;
        self.write(Mutation::InsertImage(image.clone())).await?;
        Ok(())
    }

    async fn insert_variant(&mut self, variant: &ProductVariant) -> Result<()> {
        self.check_fault(FaultPoint::InsertVariant)?;
        self.write(Mutation::InsertVariant(variant.clone())).await?;
        Ok(())
    }

    async fn insert_attribute_value(&mut self, value: &ProductAttributeValue) -> Result<()> {
        self.check_fault(FaultPoint::InsertAttributeValue)?;
        self.write(Mutation::InsertAttributeValue(value.clone()))
            .await?;
        Ok(())
    }

    async fn insert_tag(&mut self, tag: &ProductTag) -> Result<()> {
        self.check_fault(FaultPoint::InsertTag)?;
        self.write(Mutation::InsertTag(tag.clone())).await?;
        Ok(())
    }

    async fn delete_children(&mut self, product_id: AggregateId, kind: ChildKind) -> Result<u64> {
        self.check_fault(FaultPoint::DeleteChildren)?;
        self.write(Mutation::DeleteChildren(product_id, kind)).await
    }
}

#[async_trait]
impl OrderRepository for InMemoryConnection {
    async fn order_by_id(&mut self, id: AggregateId) -> Result<Option<Order>> {
        self.check_fault(FaultPoint::OrderById)?;
        Ok(self
            .read(|t| t.orders.iter().find(|o| o.id == id).cloned())
            .await)
    }

    async fn order_by_number(&mut self, order_number: &str) -> Result<Option<Order>> {
        Ok(self
            .read(|t| {
                t.orders
                    .iter()
                    .find(|o| o.order_number == order_number)
                    .cloned()
            })
            .await)
    }

    async fn last_order_number(&mut self, prefix: &str) -> Result<Option<String>> {
        Ok(self
            .read(|t| {
                t.orders
                    .iter()
                    .map(|o| &o.order_number)
                    .filter(|n| n.starts_with(prefix))
                    .max_by(|a, b| a.len().cmp(&b.len()).then_with(|| a.cmp(b)))
                    .cloned()
            })
            .await)
    }

    async fn insert_order(&mut self, order: &Order) -> Result<()> {
        self.check_fault(FaultPoint::InsertOrder)?;
        self.write(Mutation::InsertOrder(order.clone())).await?;
        Ok(())
    }

    async fn lines_for_order(&mut self, order_id: AggregateId) -> Result<Vec<OrderLine>> {
        Ok(self
            .read(|t| {
                t.order_lines
                    .iter()
                    .filter(|l| l.order_id == order_id)
                    .cloned()
                    .collect()
            })
            .await)
    }

    async fn insert_order_line(&mut self, line: &OrderLine) -> Result<()> {
        self.check_fault(FaultPoint::InsertOrderLine)?;
        self.write(Mutation::InsertOrderLine(line.clone())).await?;
        Ok(())
    }
}

#[async_trait]
impl PaymentRepository for InMemoryConnection {
    async fn insert_payment(&mut self, payment: &Payment) -> Result<()> {
        self.check_fault(FaultPoint::InsertPayment)?;
        self.write(Mutation::InsertPayment(payment.clone())).await?;
        Ok(())
    }

    async fn payments_for_order(&mut self, order_id: AggregateId) -> Result<Vec<Payment>> {
        let mut payments: Vec<Payment> = self
            .read(|t| {
                t.payments
                    .iter()
                    .filter(|p| p.order_id == order_id)
                    .cloned()
                    .collect()
            })
            .await;
        payments.sort_by_key(|p| p.created_at);
        Ok(payments)
    }
}
