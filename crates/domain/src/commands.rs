//! Commands accepted by the product writer and the checkout orchestrator.

use common::{ActorId, AggregateId, RecordId};
use uuid::Uuid;

use crate::catalog::ProductStatus;
use crate::error::DomainError;
use crate::order::PaymentMethod;
use crate::value_objects::{CustomerId, Money, slugify};

/// Where an image's bytes come from.
#[derive(Clone, PartialEq, Eq)]
pub enum ImageSource {
    /// Reuse a URL the caller already holds.
    Url(String),
    /// Upload the bytes to blob storage before the write.
    Upload {
        file_name: String,
        content_type: String,
        bytes: Vec<u8>,
    },
}

impl std::fmt::Debug for ImageSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImageSource::Url(url) => f.debug_tuple("Url").field(url).finish(),
            ImageSource::Upload {
                file_name,
                content_type,
                bytes,
            } => f
                .debug_struct("Upload")
                .field("file_name", file_name)
                .field("content_type", content_type)
                .field("len", &bytes.len())
                .finish(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInput {
    pub source: ImageSource,
    pub alt_text: Option<String>,
    pub is_primary: bool,
}

impl ImageInput {
    pub fn url(url: impl Into<String>) -> Self {
        Self {
            source: ImageSource::Url(url.into()),
            alt_text: None,
            is_primary: false,
        }
    }

    pub fn upload(
        file_name: impl Into<String>,
        content_type: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Self {
        Self {
            source: ImageSource::Upload {
                file_name: file_name.into(),
                content_type: content_type.into(),
                bytes,
            },
            alt_text: None,
            is_primary: false,
        }
    }

    pub fn primary(mut self) -> Self {
        self.is_primary = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantInput {
    /// Requested SKU. Empty means "derive one from the product SKU".
    pub sku: String,
    pub name: String,
    /// Falls back to the product price when absent.
    pub price: Option<Money>,
    pub stock_quantity: i32,
}

impl VariantInput {
    pub fn new(sku: impl Into<String>, name: impl Into<String>, stock_quantity: i32) -> Self {
        Self {
            sku: sku.into(),
            name: name.into(),
            price: None,
            stock_quantity,
        }
    }

    pub fn priced(mut self, price: Money) -> Self {
        self.price = Some(price);
        self
    }

    fn validate(&self) -> Result<(), DomainError> {
        if self.name.trim().is_empty() {
            return Err(DomainError::Required {
                field: "variant name",
            });
        }
        if let Some(price) = self.price
            && price.is_negative()
        {
            return Err(DomainError::NegativePrice {
                field: "variant price",
                cents: price.cents(),
            });
        }
        if self.stock_quantity < 0 {
            return Err(DomainError::NegativeStock(self.stock_quantity));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeInput {
    pub attribute_id: Uuid,
    pub value: String,
}

/// Command to create a product together with its children.
#[derive(Debug, Clone)]
pub struct CreateProduct {
    /// Assigned by the caller before the first write.
    pub product_id: AggregateId,
    pub name: String,
    /// Derived from the name when absent.
    pub slug: Option<String>,
    pub sku: String,
    pub description: Option<String>,
    pub price: Money,
    pub stock_quantity: i32,
    pub status: ProductStatus,
    pub images: Vec<ImageInput>,
    pub variants: Vec<VariantInput>,
    pub attributes: Vec<AttributeInput>,
    pub tag_ids: Vec<Uuid>,
    pub actor: ActorId,
}

impl CreateProduct {
    /// Creates a command with a generated product ID and no children.
    pub fn new(name: impl Into<String>, sku: impl Into<String>, price: Money) -> Self {
        Self {
            product_id: AggregateId::new(),
            name: name.into(),
            slug: None,
            sku: sku.into(),
            description: None,
            price,
            stock_quantity: 0,
            status: ProductStatus::Draft,
            images: Vec::new(),
            variants: Vec::new(),
            attributes: Vec::new(),
            tag_ids: Vec::new(),
            actor: ActorId::system(),
        }
    }

    pub fn with_image(mut self, image: ImageInput) -> Self {
        self.images.push(image);
        self
    }

    pub fn with_variant(mut self, variant: VariantInput) -> Self {
        self.variants.push(variant);
        self
    }

    /// The slug this command resolves to.
    pub fn resolved_slug(&self) -> String {
        match &self.slug {
            Some(slug) if !slug.trim().is_empty() => slugify(slug),
            _ => slugify(&self.name),
        }
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        if self.name.trim().is_empty() {
            return Err(DomainError::Required { field: "name" });
        }
        if self.sku.trim().is_empty() {
            return Err(DomainError::Required { field: "sku" });
        }
        if self.resolved_slug().is_empty() {
            return Err(DomainError::InvalidSlug(self.name.clone()));
        }
        if self.price.is_negative() {
            return Err(DomainError::NegativePrice {
                field: "price",
                cents: self.price.cents(),
            });
        }
        if self.stock_quantity < 0 {
            return Err(DomainError::NegativeStock(self.stock_quantity));
        }
        self.variants.iter().try_for_each(VariantInput::validate)
    }
}

/// Command to update a product.
///
/// Scalar fields left as `None` keep their stored value. A child collection
/// set to `Some` replaces every existing child of that kind; `None` leaves
/// the collection untouched.
#[derive(Debug, Clone)]
pub struct UpdateProduct {
    pub product_id: AggregateId,
    pub name: Option<String>,
    pub slug: Option<String>,
    pub sku: Option<String>,
    pub description: Option<String>,
    pub price: Option<Money>,
    pub stock_quantity: Option<i32>,
    pub status: Option<ProductStatus>,
    pub images: Option<Vec<ImageInput>>,
    pub variants: Option<Vec<VariantInput>>,
    pub attributes: Option<Vec<AttributeInput>>,
    pub tag_ids: Option<Vec<Uuid>>,
    pub actor: ActorId,
}

impl UpdateProduct {
    /// An update that changes nothing yet.
    pub fn new(product_id: AggregateId) -> Self {
        Self {
            product_id,
            name: None,
            slug: None,
            sku: None,
            description: None,
            price: None,
            stock_quantity: None,
            status: None,
            images: None,
            variants: None,
            attributes: None,
            tag_ids: None,
            actor: ActorId::system(),
        }
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        if let Some(name) = &self.name
            && name.trim().is_empty()
        {
            return Err(DomainError::Required { field: "name" });
        }
        if let Some(sku) = &self.sku
            && sku.trim().is_empty()
        {
            return Err(DomainError::Required { field: "sku" });
        }
        if let Some(slug) = &self.slug
            && slugify(slug).is_empty()
        {
            return Err(DomainError::InvalidSlug(slug.clone()));
        }
        if let Some(price) = self.price
            && price.is_negative()
        {
            return Err(DomainError::NegativePrice {
                field: "price",
                cents: price.cents(),
            });
        }
        if let Some(stock) = self.stock_quantity
            && stock < 0
        {
            return Err(DomainError::NegativeStock(stock));
        }
        match &self.variants {
            Some(variants) => variants.iter().try_for_each(VariantInput::validate),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderLineRequest {
    pub product_id: AggregateId,
    pub variant_id: Option<RecordId>,
    pub quantity: u32,
}

/// Command to place an order.
#[derive(Debug, Clone)]
pub struct PlaceOrder {
    pub order_id: AggregateId,
    pub customer_id: CustomerId,
    pub lines: Vec<OrderLineRequest>,
    pub payment_method: PaymentMethod,
    pub shipping_address: String,
    pub shipping_fee: Money,
    pub gift_card_code: Option<String>,
    pub actor: ActorId,
}

impl PlaceOrder {
    /// Creates a command with a generated order ID.
    pub fn for_customer(customer_id: CustomerId, payment_method: PaymentMethod) -> Self {
        Self {
            order_id: AggregateId::new(),
            customer_id,
            lines: Vec::new(),
            payment_method,
            shipping_address: String::new(),
            shipping_fee: Money::zero(),
            gift_card_code: None,
            actor: ActorId::new(customer_id.to_string()),
        }
    }

    pub fn with_line(
        mut self,
        product_id: AggregateId,
        variant_id: Option<RecordId>,
        quantity: u32,
    ) -> Self {
        self.lines.push(OrderLineRequest {
            product_id,
            variant_id,
            quantity,
        });
        self
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        if self.lines.is_empty() {
            return Err(DomainError::NoLines);
        }
        if let Some(line) = self.lines.iter().find(|l| l.quantity == 0) {
            return Err(DomainError::InvalidQuantity {
                quantity: line.quantity,
            });
        }
        if self.shipping_address.trim().is_empty() {
            return Err(DomainError::Required {
                field: "shipping address",
            });
        }
        if self.shipping_fee.is_negative() {
            return Err(DomainError::NegativePrice {
                field: "shipping fee",
                cents: self.shipping_fee.cents(),
            });
        }
        Ok(())
    }
}
