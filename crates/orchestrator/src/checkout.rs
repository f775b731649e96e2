//! Order placement.
//!
//! ```text
//! Validating ─► Pricing ─► PersistingOrder ─► Redeeming ─► Paying ─► Refreshing ─► Done
//!      │           │              │
//!      └───────────┴──────────────┴──► Aborted
//! ```
//!
//! Only the order root and its lines are transactional. Redemption and
//! payment run after the commit and never undo it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use common::{AggregateId, RecordId};
use domain::{
    AuditStamp, Money, Order, OrderAggregate, OrderLine, OrderLineRequest, OrderStatus, Payment,
    PaymentStatus, PlaceOrder,
};
use store::{
    Connection, ConnectionExt, PaymentRepository, ProductChildRepository, ProductRepository,
    Store, StoreError, TransactionScope,
};

use crate::assemble::{OrderView, OrderViewAssembler, ResponseAssembler, assemble_guarded};
use crate::config::CheckoutConfig;
use crate::error::{OrchestratorError, Result};
use crate::invalidate::CacheInvalidator;
use crate::receipt::{CheckoutReceipt, ResponseState};
use crate::services::{
    CacheService, GiftCardService, OrderNumberGenerator, PaymentGateway, PaymentRequest,
};

type OrderAssembler = dyn ResponseAssembler<Source = OrderAggregate, Output = OrderView>;

const CHECKOUT: &str = "checkout";
const READ: &str = "order read";

const ORDER_NUMBER_KEY: &str = "orders_order_number_key";
const ORDER_NUMBER_ATTEMPTS: u32 = 5;

/// Units requested per product or variant across every line of an order.
type Demand = HashMap<(AggregateId, Option<RecordId>), u32>;

fn demand(lines: &[OrderLineRequest]) -> Demand {
    let mut demand = Demand::new();
    for line in lines {
        let units = demand.entry((line.product_id, line.variant_id)).or_default();
        *units = units.saturating_add(line.quantity);
    }
    demand
}

/// A line priced and denormalized from the catalog.
struct PricedLine {
    request: OrderLineRequest,
    product_name: String,
    sku: String,
    unit_price: Money,
}

impl PricedLine {
    fn line_total(&self) -> Money {
        self.unit_price.times(self.request.quantity)
    }
}

async fn persist_order<C: Connection>(
    conn: &mut C,
    order: Order,
    lines: Vec<OrderLine>,
) -> std::result::Result<(), StoreError> {
    conn.insert_order(&order).await?;
    for line in &lines {
        conn.insert_order_line(line).await?;
    }
    Ok(())
}

/// Places orders with an optional gift card and an external payment.
pub struct CheckoutOrchestrator<S, G, D, N, C>
where
    S: Store,
    G: PaymentGateway,
    D: GiftCardService,
    N: OrderNumberGenerator,
    C: CacheService,
{
    store: S,
    gateway: G,
    gift_cards: D,
    order_numbers: N,
    invalidator: CacheInvalidator<C>,
    config: CheckoutConfig,
    assembler: Arc<OrderAssembler>,
}

impl<S, G, D, N, C> CheckoutOrchestrator<S, G, D, N, C>
where
    S: Store,
    G: PaymentGateway,
    D: GiftCardService,
    N: OrderNumberGenerator,
    C: CacheService,
{
    pub fn new(
        store: S,
        gateway: G,
        gift_cards: D,
        order_numbers: N,
        cache: C,
        config: CheckoutConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            gift_cards,
            order_numbers,
            invalidator: CacheInvalidator::new(cache),
            config,
            assembler: Arc::new(OrderViewAssembler),
        }
    }

    /// Replaces the assembler used to build responses.
    pub fn with_assembler<A>(mut self, assembler: A) -> Self
    where
        A: ResponseAssembler<Source = OrderAggregate, Output = OrderView> + 'static,
    {
        self.assembler = Arc::new(assembler);
        self
    }

    #[tracing::instrument(
        skip(self, cmd),
        fields(order_id = %cmd.order_id, customer_id = %cmd.customer_id)
    )]
    pub async fn place_order(&self, cmd: PlaceOrder) -> Result<CheckoutReceipt<OrderView>> {
        let started = Instant::now();
        cmd.validate()?;

        let mut conn = self
            .store
            .connect()
            .await
            .map_err(|e| OrchestratorError::internal(CHECKOUT, e))?;

        let demand = demand(&cmd.lines);
        let mut priced = Vec::with_capacity(cmd.lines.len());
        for request in &cmd.lines {
            let units = demand
                .get(&(request.product_id, request.variant_id))
                .copied()
                .unwrap_or(request.quantity);
            priced.push(self.price_line(&mut conn, request, units).await?);
        }

        let subtotal: Money = priced.iter().map(PricedLine::line_total).sum();
        let tax = subtotal.basis_points(self.config.tax_rate_bps);
        let gross = subtotal + tax + cmd.shipping_fee;

        let gift_card_code = cmd
            .gift_card_code
            .as_deref()
            .map(str::trim)
            .filter(|code| !code.is_empty())
            .map(String::from);
        let discount = match &gift_card_code {
            Some(code) => self.discount_for(code, gross).await?,
            None => Money::zero(),
        };
        let total = gross.saturating_sub_floor(discount);
        tracing::debug!(%subtotal, %tax, %discount, %total, "order priced");

        let now = Utc::now();
        let order_id = cmd.order_id;
        let status = if total.is_zero() {
            OrderStatus::Confirmed
        } else {
            OrderStatus::Pending
        };
        let order = Order {
            id: order_id,
            order_number: String::new(),
            customer_id: cmd.customer_id,
            status,
            payment_method: cmd.payment_method,
            shipping_address: cmd.shipping_address.trim().to_string(),
            subtotal,
            tax,
            shipping_fee: cmd.shipping_fee,
            discount,
            total,
            gift_card_code: gift_card_code.clone(),
            audit: AuditStamp::created(cmd.actor.clone(), now),
        };
        let lines: Vec<OrderLine> = priced
            .into_iter()
            .map(|line| OrderLine {
                id: RecordId::new(),
                order_id,
                product_id: line.request.product_id,
                variant_id: line.request.variant_id,
                line_total: line.line_total(),
                product_name: line.product_name,
                sku: line.sku,
                quantity: line.request.quantity,
                unit_price: line.unit_price,
            })
            .collect();

        let mut scope = TransactionScope::new(conn);
        let order_number = self.commit_order(&mut scope, order, lines).await?;
        tracing::info!(%order_number, %total, "order committed");

        let discount_redeemed = match &gift_card_code {
            Some(code) if discount.cents() > 0 => Some(self.redeem(code, discount).await),
            _ => None,
        };

        let payment = self.take_payment(&cmd, &order_number, total).await;
        let payment_status = payment.status;
        if let Err(e) = scope.connection().insert_payment(&payment).await {
            tracing::error!(%order_number, error = %e, "payment record could not be stored");
        }

        self.invalidator
            .invalidate_order(order_id, cmd.customer_id)
            .await;
        let response = self.refresh(scope.connection(), order_id).await;

        metrics::counter!("checkout_orders_total", "payment_status" => payment_status.as_str())
            .increment(1);
        metrics::histogram!("checkout_duration_seconds").record(started.elapsed().as_secs_f64());

        Ok(CheckoutReceipt {
            order_id,
            order_number,
            total,
            discount_redeemed,
            payment_status,
            response,
        })
    }

    /// Loads and maps an order.
    pub async fn get(&self, order_id: AggregateId) -> Result<OrderView> {
        let mut conn = self
            .store
            .connect()
            .await
            .map_err(|e| OrchestratorError::internal(READ, e))?;
        let aggregate = conn
            .load_order_aggregate(order_id)
            .await
            .map_err(|e| OrchestratorError::internal(READ, e))?
            .ok_or_else(|| OrchestratorError::not_found("order", order_id))?;
        match assemble_guarded(&*self.assembler, &aggregate) {
            ResponseState::Ready(view) => Ok(view),
            _ => Err(OrchestratorError::Failed(READ)),
        }
    }

    /// Writes the order and its lines under a freshly drawn order number.
    /// A number already taken by another order is replaced by the next one,
    /// a bounded number of times.
    async fn commit_order(
        &self,
        scope: &mut TransactionScope<S::Conn>,
        mut order: Order,
        lines: Vec<OrderLine>,
    ) -> Result<String> {
        let mut attempt = 1;
        loop {
            order.order_number = self
                .order_numbers
                .next_order_number()
                .await
                .map_err(|e| OrchestratorError::internal(CHECKOUT, e))?;

            let (root, children) = (order.clone(), lines.clone());
            let committed = scope
                .run_in_transaction(move |conn| Box::pin(persist_order(conn, root, children)))
                .await;
            match committed {
                Ok(()) => return Ok(order.order_number),
                Err(StoreError::UniqueViolation { ref constraint })
                    if constraint == ORDER_NUMBER_KEY && attempt < ORDER_NUMBER_ATTEMPTS =>
                {
                    tracing::warn!(
                        order_number = %order.order_number,
                        attempt,
                        "order number already taken"
                    );
                    attempt += 1;
                }
                Err(e) => {
                    metrics::counter!("aggregate_write_aborted_total", "aggregate" => "order")
                        .increment(1);
                    if e.is_unique_violation() {
                        tracing::error!(
                            order_number = %order.order_number,
                            error = %e,
                            "order rejected by unique constraint"
                        );
                    }
                    return Err(OrchestratorError::internal(CHECKOUT, e));
                }
            }
        }
    }

    /// Resolves a requested line against the catalog. `units` is the
    /// quantity the whole order asks of the same product or variant.
    async fn price_line(
        &self,
        conn: &mut S::Conn,
        request: &OrderLineRequest,
        units: u32,
    ) -> Result<PricedLine> {
        let product = conn
            .product_by_id(request.product_id)
            .await
            .map_err(|e| OrchestratorError::internal(CHECKOUT, e))?
            .ok_or_else(|| OrchestratorError::not_found("product", request.product_id))?;
        if !product.status.is_sellable() {
            return Err(OrchestratorError::validation(format!(
                "product {} is not available for sale",
                product.sku
            )));
        }

        let Some(variant_id) = request.variant_id else {
            if i64::from(product.stock_quantity) < i64::from(units) {
                return Err(OrchestratorError::validation(format!(
                    "insufficient stock for {}: requested {}, available {}",
                    product.sku, units, product.stock_quantity
                )));
            }
            return Ok(PricedLine {
                request: request.clone(),
                product_name: product.name,
                sku: product.sku,
                unit_price: product.price,
            });
        };

        let variant = conn
            .variant_by_id(variant_id)
            .await
            .map_err(|e| OrchestratorError::internal(CHECKOUT, e))?
            .ok_or_else(|| OrchestratorError::not_found("variant", variant_id))?;
        if variant.product_id != product.id {
            return Err(OrchestratorError::validation(format!(
                "variant {} does not belong to product {}",
                variant.sku, product.sku
            )));
        }
        if i64::from(variant.stock_quantity) < i64::from(units) {
            return Err(OrchestratorError::validation(format!(
                "insufficient stock for {}: requested {}, available {}",
                variant.sku, units, variant.stock_quantity
            )));
        }

        Ok(PricedLine {
            request: request.clone(),
            product_name: format!("{} ({})", product.name, variant.name),
            sku: variant.sku,
            unit_price: variant.price,
        })
    }

    /// Checks a gift card and returns the discount it covers.
    async fn discount_for(&self, code: &str, gross: Money) -> Result<Money> {
        let valid = self
            .gift_cards
            .validate(code)
            .await
            .map_err(|e| OrchestratorError::internal(CHECKOUT, e))?;
        if !valid {
            return Err(OrchestratorError::validation(format!(
                "gift card {} is not valid",
                code
            )));
        }

        let balance = self
            .gift_cards
            .balance(code)
            .await
            .map_err(|e| OrchestratorError::internal(CHECKOUT, e))?;
        if balance.cents() <= 0 {
            return Err(OrchestratorError::validation(format!(
                "gift card {} has no remaining balance",
                code
            )));
        }

        Ok(balance.min(gross).non_negative())
    }

    /// Debits the gift card. The order already carries the discount, so a
    /// failure here is only reported.
    async fn redeem(&self, code: &str, amount: Money) -> bool {
        match self.gift_cards.redeem(code, amount).await {
            Ok(true) => {
                tracing::info!(%amount, "gift card redeemed");
                true
            }
            Ok(false) => {
                tracing::error!(%amount, "gift card redemption refused after commit");
                metrics::counter!("checkout_redemption_failures_total").increment(1);
                false
            }
            Err(e) => {
                tracing::error!(%amount, error = %e, "gift card redemption failed after commit");
                metrics::counter!("checkout_redemption_failures_total").increment(1);
                false
            }
        }
    }

    /// Builds the payment record, calling the gateway when the method and
    /// amount need it.
    async fn take_payment(&self, cmd: &PlaceOrder, order_number: &str, total: Money) -> Payment {
        let mut payment = Payment {
            id: RecordId::new(),
            order_id: cmd.order_id,
            amount: total,
            method: cmd.payment_method,
            status: PaymentStatus::Pending,
            transaction_id: None,
            payment_url: None,
            qr_url: None,
            failure_reason: None,
            created_at: Utc::now(),
        };

        if total.is_zero() {
            payment.status = PaymentStatus::Completed;
            return payment;
        }
        if !cmd.payment_method.requires_gateway() {
            return payment;
        }

        let request = PaymentRequest {
            order_id: cmd.order_id,
            order_number: order_number.to_string(),
            customer_id: cmd.customer_id,
            amount: total,
            method: cmd.payment_method,
        };
        match self.gateway.create_payment(&request).await {
            Ok(session) => {
                tracing::info!(transaction_id = %session.transaction_id, "payment session created");
                payment.transaction_id = Some(session.transaction_id);
                payment.payment_url = Some(session.payment_url);
                payment.qr_url = session.qr_url;
            }
            Err(e) => {
                tracing::warn!(%order_number, error = %e, "payment gateway call failed");
                payment.status = PaymentStatus::Failed;
                payment.failure_reason = Some(e.to_string());
            }
        }
        payment
    }

    async fn refresh(&self, conn: &mut S::Conn, order_id: AggregateId) -> ResponseState<OrderView> {
        match conn.load_order_aggregate(order_id).await {
            Ok(Some(aggregate)) => assemble_guarded(&*self.assembler, &aggregate),
            Ok(None) => {
                tracing::warn!(%order_id, "committed order not found on read-back");
                ResponseState::ReadBackMissing
            }
            Err(e) => {
                tracing::warn!(%order_id, error = %e, "read-back after commit failed");
                ResponseState::ReadBackMissing
            }
        }
    }
}
