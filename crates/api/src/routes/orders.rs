//! Checkout and order read endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use common::{AggregateId, RecordId};
use domain::{CustomerId, Money, OrderLineRequest, PaymentMethod, PlaceOrder};
use orchestrator::{CheckoutReceipt, OrderView};
use serde::Deserialize;
use store::Store;
use uuid::Uuid;

use super::{actor, parse_aggregate_id};
use crate::AppState;
use crate::error::ApiError;

// -- Request types --

#[derive(Debug, Deserialize)]
pub struct PlaceOrderRequest {
    pub id: Option<Uuid>,
    pub customer_id: Uuid,
    pub lines: Vec<OrderLineBody>,
    /// One of `CashOnDelivery`, `BankTransfer`, `Card`, `EWallet`.
    pub payment_method: String,
    pub shipping_address: String,
    #[serde(default)]
    pub shipping_fee_cents: i64,
    pub gift_card_code: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OrderLineBody {
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub quantity: u32,
}

// -- Handlers --

/// POST /orders — place an order.
#[tracing::instrument(skip(state, headers, req), fields(customer_id = %req.customer_id))]
pub async fn create<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    Json(req): Json<PlaceOrderRequest>,
) -> Result<(StatusCode, Json<CheckoutReceipt<OrderView>>), ApiError> {
    let payment_method: PaymentMethod = req.payment_method.parse().map_err(|_| {
        ApiError::BadRequest(format!("Unknown payment method: {}", req.payment_method))
    })?;

    let cmd = PlaceOrder {
        order_id: req.id.map(AggregateId::from).unwrap_or_default(),
        customer_id: CustomerId::from_uuid(req.customer_id),
        lines: req
            .lines
            .into_iter()
            .map(|line| OrderLineRequest {
                product_id: AggregateId::from(line.product_id),
                variant_id: line.variant_id.map(RecordId::from),
                quantity: line.quantity,
            })
            .collect(),
        payment_method,
        shipping_address: req.shipping_address,
        shipping_fee: Money::from_cents(req.shipping_fee_cents),
        gift_card_code: req.gift_card_code,
        actor: actor(&headers),
    };

    let receipt = state.checkout.place_order(cmd).await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

/// GET /orders/{id} — load an order with its lines and latest payment.
#[tracing::instrument(skip(state))]
pub async fn get<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<OrderView>, ApiError> {
    let order_id = parse_aggregate_id(&id)?;
    Ok(Json(state.checkout.get(order_id).await?))
}
