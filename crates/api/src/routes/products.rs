//! Product write and read endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use common::AggregateId;
use domain::{
    AttributeInput, CreateProduct, ImageInput, Money, ProductStatus, UpdateProduct, VariantInput,
};
use orchestrator::{ProductView, WriteReceipt};
use serde::Deserialize;
use store::Store;
use uuid::Uuid;

use super::{actor, parse_aggregate_id};
use crate::AppState;
use crate::error::ApiError;

// -- Request types --

/// An image given either by URL or as base64 bytes to upload.
#[derive(Debug, Deserialize)]
pub struct ImageRequest {
    pub url: Option<String>,
    pub data_base64: Option<String>,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub alt_text: Option<String>,
    #[serde(default)]
    pub is_primary: bool,
}

#[derive(Debug, Deserialize)]
pub struct VariantRequest {
    /// Blank derives a SKU from the product's.
    #[serde(default)]
    pub sku: String,
    pub name: String,
    pub price_cents: Option<i64>,
    #[serde(default)]
    pub stock_quantity: i32,
}

#[derive(Debug, Deserialize)]
pub struct AttributeRequest {
    pub attribute_id: Uuid,
    pub value: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateProductRequest {
    pub id: Option<Uuid>,
    pub name: String,
    pub slug: Option<String>,
    pub sku: String,
    pub description: Option<String>,
    pub price_cents: i64,
    #[serde(default)]
    pub stock_quantity: i32,
    pub status: Option<String>,
    #[serde(default)]
    pub images: Vec<ImageRequest>,
    #[serde(default)]
    pub variants: Vec<VariantRequest>,
    #[serde(default)]
    pub attributes: Vec<AttributeRequest>,
    #[serde(default)]
    pub tag_ids: Vec<Uuid>,
}

/// Absent fields are left as stored; present collections replace the
/// stored ones.
#[derive(Debug, Deserialize)]
pub struct UpdateProductRequest {
    pub name: Option<String>,
    pub slug: Option<String>,
    pub sku: Option<String>,
    pub description: Option<String>,
    pub price_cents: Option<i64>,
    pub stock_quantity: Option<i32>,
    pub status: Option<String>,
    pub images: Option<Vec<ImageRequest>>,
    pub variants: Option<Vec<VariantRequest>>,
    pub attributes: Option<Vec<AttributeRequest>>,
    pub tag_ids: Option<Vec<Uuid>>,
}

// -- Conversions --

fn image_input(req: ImageRequest) -> Result<ImageInput, ApiError> {
    let mut input = match (req.data_base64, req.url) {
        (Some(data), _) => {
            let bytes = STANDARD
                .decode(data.trim())
                .map_err(|e| ApiError::BadRequest(format!("Invalid image data: {e}")))?;
            ImageInput::upload(
                req.file_name.unwrap_or_else(|| "upload".to_string()),
                req.content_type
                    .unwrap_or_else(|| "application/octet-stream".to_string()),
                bytes,
            )
        }
        (None, Some(url)) => ImageInput::url(url),
        (None, None) => {
            return Err(ApiError::BadRequest(
                "Image needs either url or data_base64".to_string(),
            ));
        }
    };
    input.alt_text = req.alt_text;
    input.is_primary = req.is_primary;
    Ok(input)
}

fn image_inputs(reqs: Vec<ImageRequest>) -> Result<Vec<ImageInput>, ApiError> {
    reqs.into_iter().map(image_input).collect()
}

fn variant_inputs(reqs: Vec<VariantRequest>) -> Vec<VariantInput> {
    reqs.into_iter()
        .map(|v| VariantInput {
            sku: v.sku,
            name: v.name,
            price: v.price_cents.map(Money::from_cents),
            stock_quantity: v.stock_quantity,
        })
        .collect()
}

fn attribute_inputs(reqs: Vec<AttributeRequest>) -> Vec<AttributeInput> {
    reqs.into_iter()
        .map(|a| AttributeInput {
            attribute_id: a.attribute_id,
            value: a.value,
        })
        .collect()
}

fn parse_status(status: &str) -> Result<ProductStatus, ApiError> {
    status
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("Unknown product status: {status}")))
}

// -- Handlers --

/// POST /products — create a product with its children.
#[tracing::instrument(skip(state, headers, req), fields(sku = %req.sku))]
pub async fn create<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    Json(req): Json<CreateProductRequest>,
) -> Result<(StatusCode, Json<WriteReceipt<ProductView>>), ApiError> {
    let status = match req.status.as_deref() {
        Some(status) => parse_status(status)?,
        None => ProductStatus::default(),
    };

    let cmd = CreateProduct {
        product_id: req.id.map(AggregateId::from).unwrap_or_default(),
        name: req.name,
        slug: req.slug,
        sku: req.sku,
        description: req.description,
        price: Money::from_cents(req.price_cents),
        stock_quantity: req.stock_quantity,
        status,
        images: image_inputs(req.images)?,
        variants: variant_inputs(req.variants),
        attributes: attribute_inputs(req.attributes),
        tag_ids: req.tag_ids,
        actor: actor(&headers),
    };

    let receipt = state.products.create(cmd).await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

/// GET /products/{id} — load a product with its children.
#[tracing::instrument(skip(state))]
pub async fn get<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<ProductView>, ApiError> {
    let product_id = parse_aggregate_id(&id)?;
    Ok(Json(state.products.get(product_id).await?))
}

/// PUT /products/{id} — update a product, replacing supplied collections.
#[tracing::instrument(skip(state, headers, req))]
pub async fn update<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<UpdateProductRequest>,
) -> Result<Json<WriteReceipt<ProductView>>, ApiError> {
    let product_id = parse_aggregate_id(&id)?;

    let cmd = UpdateProduct {
        product_id,
        name: req.name,
        slug: req.slug,
        sku: req.sku,
        description: req.description,
        price: req.price_cents.map(Money::from_cents),
        stock_quantity: req.stock_quantity,
        status: req.status.as_deref().map(parse_status).transpose()?,
        images: req.images.map(image_inputs).transpose()?,
        variants: req.variants.map(variant_inputs),
        attributes: req.attributes.map(attribute_inputs),
        tag_ids: req.tag_ids,
        actor: actor(&headers),
    };

    Ok(Json(state.products.update(cmd).await?))
}

/// DELETE /products/{id} — delete a product and everything it owns.
#[tracing::instrument(skip(state, headers))]
pub async fn delete<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<WriteReceipt<ProductView>>, ApiError> {
    let product_id = parse_aggregate_id(&id)?;
    Ok(Json(
        state.products.delete(product_id, actor(&headers)).await?,
    ))
}
