//! Mapping committed aggregates to caller-facing views.

use std::panic::{AssertUnwindSafe, catch_unwind};

use chrono::{DateTime, Utc};
use common::{AggregateId, RecordId};
use domain::{
    CustomerId, Money, OrderAggregate, OrderStatus, PaymentMethod, PaymentStatus,
    ProductAggregate, ProductStatus,
};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::receipt::ResponseState;

#[derive(Debug, Error)]
#[error("{0}")]
pub struct AssembleError(pub String);

/// Maps a committed aggregate to its response.
pub trait ResponseAssembler: Send + Sync {
    type Source;
    type Output;

    fn assemble(&self, source: &Self::Source) -> Result<Self::Output, AssembleError>;
}

/// Runs an assembler, turning errors and panics into
/// [`ResponseState::MappingFailed`].
pub fn assemble_guarded<A>(assembler: &A, source: &A::Source) -> ResponseState<A::Output>
where
    A: ResponseAssembler + ?Sized,
{
    match catch_unwind(AssertUnwindSafe(|| assembler.assemble(source))) {
        Ok(Ok(view)) => ResponseState::Ready(view),
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "response mapping failed after commit");
            ResponseState::MappingFailed(e.to_string())
        }
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "assembler panicked".to_string());
            tracing::error!(%message, "response mapping panicked after commit");
            ResponseState::MappingFailed(message)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageView {
    pub id: RecordId,
    pub url: String,
    pub alt_text: Option<String>,
    pub sort_order: i32,
    pub is_primary: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VariantView {
    pub id: RecordId,
    pub sku: String,
    pub name: String,
    pub price: Money,
    pub stock_quantity: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttributeView {
    pub attribute_id: Uuid,
    pub value: String,
}

/// A product as returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductView {
    pub id: AggregateId,
    pub name: String,
    pub slug: String,
    pub sku: String,
    pub description: Option<String>,
    pub price: Money,
    pub price_display: String,
    pub status: ProductStatus,
    /// Summed over variants when the product has any.
    pub available_stock: i64,
    pub primary_image_url: Option<String>,
    pub images: Vec<ImageView>,
    pub variants: Vec<VariantView>,
    pub attributes: Vec<AttributeView>,
    pub tag_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ProductViewAssembler;

impl ResponseAssembler for ProductViewAssembler {
    type Source = ProductAggregate;
    type Output = ProductView;

    fn assemble(&self, aggregate: &ProductAggregate) -> Result<ProductView, AssembleError> {
        let product = &aggregate.product;
        let owned_elsewhere = aggregate
            .images
            .iter()
            .map(|i| i.product_id)
            .chain(aggregate.variants.iter().map(|v| v.product_id))
            .chain(aggregate.attributes.iter().map(|a| a.product_id))
            .chain(aggregate.tags.iter().map(|t| t.product_id))
            .find(|owner| *owner != product.id);
        if let Some(owner) = owned_elsewhere {
            return Err(AssembleError(format!(
                "child of product {} found under product {}",
                owner, product.id
            )));
        }

        Ok(ProductView {
            id: product.id,
            name: product.name.clone(),
            slug: product.slug.clone(),
            sku: product.sku.clone(),
            description: product.description.clone(),
            price: product.price,
            price_display: product.price.to_string(),
            status: product.status,
            available_stock: aggregate.available_stock(),
            primary_image_url: aggregate.primary_image().map(|i| i.url.clone()),
            images: aggregate
                .images
                .iter()
                .map(|i| ImageView {
                    id: i.id,
                    url: i.url.clone(),
                    alt_text: i.alt_text.clone(),
                    sort_order: i.sort_order,
                    is_primary: i.is_primary,
                })
                .collect(),
            variants: aggregate
                .variants
                .iter()
                .map(|v| VariantView {
                    id: v.id,
                    sku: v.sku.clone(),
                    name: v.name.clone(),
                    price: v.price,
                    stock_quantity: v.stock_quantity,
                })
                .collect(),
            attributes: aggregate
                .attributes
                .iter()
                .map(|a| AttributeView {
                    attribute_id: a.attribute_id,
                    value: a.value.clone(),
                })
                .collect(),
            tag_ids: aggregate.tags.iter().map(|t| t.tag_id).collect(),
            created_at: product.audit.created_at,
            updated_at: product.audit.updated_at,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderLineView {
    pub product_id: AggregateId,
    pub variant_id: Option<RecordId>,
    pub product_name: String,
    pub sku: String,
    pub quantity: u32,
    pub unit_price: Money,
    pub line_total: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentView {
    pub status: PaymentStatus,
    pub amount: Money,
    pub transaction_id: Option<String>,
    pub payment_url: Option<String>,
    pub qr_url: Option<String>,
    pub failure_reason: Option<String>,
}

/// An order as returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderView {
    pub id: AggregateId,
    pub order_number: String,
    pub customer_id: CustomerId,
    pub status: OrderStatus,
    pub payment_method: PaymentMethod,
    pub shipping_address: String,
    pub subtotal: Money,
    pub tax: Money,
    pub shipping_fee: Money,
    pub discount: Money,
    pub total: Money,
    pub total_display: String,
    pub lines: Vec<OrderLineView>,
    /// The most recent payment attempt.
    pub payment: Option<PaymentView>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OrderViewAssembler;

impl ResponseAssembler for OrderViewAssembler {
    type Source = OrderAggregate;
    type Output = OrderView;

    fn assemble(&self, aggregate: &OrderAggregate) -> Result<OrderView, AssembleError> {
        let order = &aggregate.order;
        let line_sum: Money = aggregate.lines.iter().map(|l| l.line_total).sum();
        if line_sum != order.subtotal {
            return Err(AssembleError(format!(
                "order {} lines sum to {} but subtotal is {}",
                order.order_number, line_sum, order.subtotal
            )));
        }

        Ok(OrderView {
            id: order.id,
            order_number: order.order_number.clone(),
            customer_id: order.customer_id,
            status: order.status,
            payment_method: order.payment_method,
            shipping_address: order.shipping_address.clone(),
            subtotal: order.subtotal,
            tax: order.tax,
            shipping_fee: order.shipping_fee,
            discount: order.discount,
            total: order.total,
            total_display: order.total.to_string(),
            lines: aggregate
                .lines
                .iter()
                .map(|l| OrderLineView {
                    product_id: l.product_id,
                    variant_id: l.variant_id,
                    product_name: l.product_name.clone(),
                    sku: l.sku.clone(),
                    quantity: l.quantity,
                    unit_price: l.unit_price,
                    line_total: l.line_total,
                })
                .collect(),
            payment: aggregate.payments.last().map(|p| PaymentView {
                status: p.status,
                amount: p.amount,
                transaction_id: p.transaction_id.clone(),
                payment_url: p.payment_url.clone(),
                qr_url: p.qr_url.clone(),
                failure_reason: p.failure_reason.clone(),
            }),
            created_at: order.audit.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::ActorId;
    use domain::{AuditStamp, Product, ProductImage};

    fn aggregate() -> ProductAggregate {
        let now = Utc::now();
        let id = AggregateId::new();
        ProductAggregate {
            product: Product {
                id,
                name: "Mug".into(),
                slug: "mug".into(),
                sku: "MUG".into(),
                description: None,
                price: Money::from_cents(1250),
                stock_quantity: 4,
                status: ProductStatus::Active,
                audit: AuditStamp::created(ActorId::system(), now),
            },
            images: vec![ProductImage {
                id: RecordId::new(),
                product_id: id,
                url: "https://img.test/mug.png".into(),
                alt_text: None,
                sort_order: 0,
                is_primary: true,
                created_at: now,
            }],
            variants: vec![],
            attributes: vec![],
            tags: vec![],
        }
    }

    struct Panicking;

    impl ResponseAssembler for Panicking {
        type Source = ProductAggregate;
        type Output = ProductView;

        fn assemble(&self, _: &ProductAggregate) -> Result<ProductView, AssembleError> {
            panic!("boom")
        }
    }

    #[test]
    fn test_product_view() {
        let view = assemble_guarded(&ProductViewAssembler, &aggregate())
            .into_ready()
            .unwrap();

        assert_eq!(view.price_display, "$12.50");
        assert_eq!(view.available_stock, 4);
        assert_eq!(
            view.primary_image_url.as_deref(),
            Some("https://img.test/mug.png")
        );
    }

    #[test]
    fn test_foreign_child_fails_mapping() {
        let mut agg = aggregate();
        agg.images[0].product_id = AggregateId::new();

        let state = assemble_guarded(&ProductViewAssembler, &agg);
        assert!(matches!(state, ResponseState::MappingFailed(_)));
    }

    #[test]
    fn test_panic_is_contained() {
        let state = assemble_guarded(&Panicking, &aggregate());
        assert_eq!(state, ResponseState::MappingFailed("boom".to_string()));
    }
}
