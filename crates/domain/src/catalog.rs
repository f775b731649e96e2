//! Catalog aggregate: a product root and the child records it owns.

use chrono::{DateTime, Utc};
use common::{ActorId, AggregateId, RecordId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;
use crate::value_objects::Money;

/// Audit columns carried by every aggregate root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditStamp {
    pub created_at: DateTime<Utc>,
    pub created_by: Option<ActorId>,
    pub updated_at: Option<DateTime<Utc>>,
    pub updated_by: Option<ActorId>,
}

impl AuditStamp {
    /// Stamp for a root written for the first time.
    pub fn created(actor: ActorId, now: DateTime<Utc>) -> Self {
        Self {
            created_at: now,
            created_by: Some(actor),
            updated_at: None,
            updated_by: None,
        }
    }

    /// Records a subsequent write. Creation fields are never touched.
    pub fn touch(&mut self, actor: ActorId, now: DateTime<Utc>) {
        self.updated_at = Some(now);
        self.updated_by = Some(actor);
    }
}

/// Lifecycle status of a product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ProductStatus {
    #[default]
    Draft,
    Active,
    Archived,
}

impl ProductStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductStatus::Draft => "Draft",
            ProductStatus::Active => "Active",
            ProductStatus::Archived => "Archived",
        }
    }

    /// Returns true if the product can be ordered.
    pub fn is_sellable(&self) -> bool {
        matches!(self, ProductStatus::Active)
    }
}

impl std::fmt::Display for ProductStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProductStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Draft" => Ok(ProductStatus::Draft),
            "Active" => Ok(ProductStatus::Active),
            "Archived" => Ok(ProductStatus::Archived),
            other => Err(DomainError::UnknownStatus(other.to_string())),
        }
    }
}

/// The product aggregate root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: AggregateId,
    pub name: String,
    /// URL slug, unique across products.
    pub slug: String,
    /// Stock keeping unit, unique across products.
    pub sku: String,
    pub description: Option<String>,
    pub price: Money,
    pub stock_quantity: i32,
    pub status: ProductStatus,
    pub audit: AuditStamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductImage {
    pub id: RecordId,
    pub product_id: AggregateId,
    /// Durable blob reference.
    pub url: String,
    pub alt_text: Option<String>,
    pub sort_order: i32,
    pub is_primary: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductVariant {
    pub id: RecordId,
    pub product_id: AggregateId,
    /// Unique store-wide, across all products' variants.
    pub sku: String,
    pub name: String,
    pub price: Money,
    pub stock_quantity: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductAttributeValue {
    pub id: RecordId,
    pub product_id: AggregateId,
    pub attribute_id: Uuid,
    pub value: String,
    pub created_at: DateTime<Utc>,
}

/// Assignment of a tag to a product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductTag {
    pub id: RecordId,
    pub product_id: AggregateId,
    pub tag_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// The kinds of child record a product owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChildKind {
    Image,
    Variant,
    AttributeValue,
    Tag,
}

impl ChildKind {
    pub const ALL: [ChildKind; 4] = [
        ChildKind::Image,
        ChildKind::Variant,
        ChildKind::AttributeValue,
        ChildKind::Tag,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChildKind::Image => "image",
            ChildKind::Variant => "variant",
            ChildKind::AttributeValue => "attribute_value",
            ChildKind::Tag => "tag",
        }
    }
}

impl std::fmt::Display for ChildKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A product read back together with all of its children.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductAggregate {
    pub product: Product,
    pub images: Vec<ProductImage>,
    pub variants: Vec<ProductVariant>,
    pub attributes: Vec<ProductAttributeValue>,
    pub tags: Vec<ProductTag>,
}

impl ProductAggregate {
    /// The primary image, or the first one by sort order.
    pub fn primary_image(&self) -> Option<&ProductImage> {
        self.images
            .iter()
            .find(|i| i.is_primary)
            .or_else(|| self.images.iter().min_by_key(|i| i.sort_order))
    }

    /// Total stock over variants, or the product's own stock when it has none.
    pub fn available_stock(&self) -> i64 {
        if self.variants.is_empty() {
            i64::from(self.product.stock_quantity)
        } else {
            self.variants
                .iter()
                .map(|v| i64::from(v.stock_quantity))
                .sum()
        }
    }
}
