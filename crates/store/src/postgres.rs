use async_trait::async_trait;
use common::{ActorId, AggregateId, RecordId};
use domain::{
    AuditStamp, ChildKind, CustomerId, Money, Order, OrderLine, Payment, Product,
    ProductAttributeValue, ProductImage, ProductTag, ProductVariant,
};
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use uuid::Uuid;

use crate::{
    OrderRepository, PaymentRepository, ProductChildRepository, ProductRepository, Result, Store,
    StoreError, Transactional,
};

/// Runs a query on the open transaction if there is one, otherwise on the
/// pool in autocommit mode.
macro_rules! on_conn {
    ($conn:ident, $query:expr, $method:ident) => {
        match $conn.tx.as_mut() {
            Some(tx) => $query.$method(&mut **tx).await,
            None => $query.$method(&$conn.pool).await,
        }
    };
}

/// PostgreSQL-backed store.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a new PostgreSQL store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Opens a pool against `database_url`.
    pub async fn connect_url(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }
}

#[async_trait]
impl Store for PostgresStore {
    type Conn = PostgresConnection;

    async fn connect(&self) -> Result<Self::Conn> {
        Ok(PostgresConnection {
            pool: self.pool.clone(),
            tx: None,
        })
    }
}

/// Connection handle onto a [`PostgresStore`].
///
/// Outside a transaction every statement runs in autocommit mode on a pooled
/// connection. Inside one, statements run on the transaction's connection
/// and each child insert is wrapped in a savepoint, so a constraint failure
/// on one child leaves the transaction usable for the rest.
pub struct PostgresConnection {
    pool: PgPool,
    tx: Option<Transaction<'static, Postgres>>,
}

impl PostgresConnection {
    async fn savepoint(&mut self) -> Result<()> {
        if let Some(tx) = self.tx.as_mut() {
            sqlx::query("SAVEPOINT child_row").execute(&mut **tx).await?;
        }
        Ok(())
    }

    async fn settle(&mut self, outcome: Result<()>) -> Result<()> {
        let Some(tx) = self.tx.as_mut() else {
            return outcome;
        };
        match outcome {
            Ok(()) => {
                sqlx::query("RELEASE SAVEPOINT child_row")
                    .execute(&mut **tx)
                    .await?;
                Ok(())
            }
            Err(e) => {
                if let Err(restore) = sqlx::query("ROLLBACK TO SAVEPOINT child_row")
                    .execute(&mut **tx)
                    .await
                {
                    tracing::debug!(error = %restore, "could not restore savepoint");
                }
                Err(e)
            }
        }
    }

    fn row_to_audit(row: &PgRow) -> Result<AuditStamp> {
        Ok(AuditStamp {
            created_at: row.try_get("created_at")?,
            created_by: row
                .try_get::<Option<String>, _>("created_by")?
                .map(ActorId::new),
            updated_at: row.try_get("updated_at")?,
            updated_by: row
                .try_get::<Option<String>, _>("updated_by")?
                .map(ActorId::new),
        })
    }

    fn row_to_product(row: PgRow) -> Result<Product> {
        Ok(Product {
            id: AggregateId::from_uuid(row.try_get::<Uuid, _>("id")?),
            name: row.try_get("name")?,
            slug: row.try_get("slug")?,
            sku: row.try_get("sku")?,
            description: row.try_get("description")?,
            price: Money::from_cents(row.try_get("price_cents")?),
            stock_quantity: row.try_get("stock_quantity")?,
            status: row.try_get::<String, _>("status")?.parse()?,
            audit: Self::row_to_audit(&row)?,
        })
    }

    fn row_to_image(row: PgRow) -> Result<ProductImage> {
        Ok(ProductImage {
            id: RecordId::from_uuid(row.try_get::<Uuid, _>("id")?),
            product_id: AggregateId::from_uuid(row.try_get::<Uuid, _>("product_id")?),
            url: row.try_get("url")?,
            alt_text: row.try_get("alt_text")?,
            sort_order: row.try_get("sort_order")?,
            is_primary: row.try_get("is_primary")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn row_to_variant(row: PgRow) -> Result<ProductVariant> {
        Ok(ProductVariant {
            id: RecordId::from_uuid(row.try_get::<Uuid, _>("id")?),
            product_id: AggregateId::from_uuid(row.try_get::<Uuid, _>("product_id")?),
            sku: row.try_get("sku")?,
            name: row.try_get("name")?,
            price: Money::from_cents(row.try_get("price_cents")?),
            stock_quantity: row.try_get("stock_quantity")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn row_to_attribute_value(row: PgRow) -> Result<ProductAttributeValue> {
        Ok(ProductAttributeValue {
            id: RecordId::from_uuid(row.try_get::<Uuid, _>("id")?),
            product_id: AggregateId::from_uuid(row.try_get::<Uuid, _>("product_id")?),
            attribute_id: row.try_get("attribute_id")?,
            value: row.try_get("value")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn row_to_tag(row: PgRow) -> Result<ProductTag> {
        Ok(ProductTag {
            id: RecordId::from_uuid(row.try_get::<Uuid, _>("id")?),
            product_id: AggregateId::from_uuid(row.try_get::<Uuid, _>("product_id")?),
            tag_id: row.try_get("tag_id")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn row_to_order(row: PgRow) -> Result<Order> {
        Ok(Order {
            id: AggregateId::from_uuid(row.try_get::<Uuid, _>("id")?),
            order_number: row.try_get("order_number")?,
            customer_id: CustomerId::from_uuid(row.try_get::<Uuid, _>("customer_id")?),
            status: row.try_get::<String, _>("status")?.parse()?,
            payment_method: row.try_get::<String, _>("payment_method")?.parse()?,
            shipping_address: row.try_get("shipping_address")?,
            subtotal: Money::from_cents(row.try_get("subtotal_cents")?),
            tax: Money::from_cents(row.try_get("tax_cents")?),
            shipping_fee: Money::from_cents(row.try_get("shipping_fee_cents")?),
            discount: Money::from_cents(row.try_get("discount_cents")?),
            total: Money::from_cents(row.try_get("total_cents")?),
            gift_card_code: row.try_get("gift_card_code")?,
            audit: Self::row_to_audit(&row)?,
        })
    }

    fn row_to_order_line(row: PgRow) -> Result<OrderLine> {
        let quantity: i32 = row.try_get("quantity")?;
        Ok(OrderLine {
            id: RecordId::from_uuid(row.try_get::<Uuid, _>("id")?),
            order_id: AggregateId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
            product_id: AggregateId::from_uuid(row.try_get::<Uuid, _>("product_id")?),
            variant_id: row
                .try_get::<Option<Uuid>, _>("variant_id")?
                .map(RecordId::from_uuid),
            product_name: row.try_get("product_name")?,
            sku: row.try_get("sku")?,
            quantity: u32::try_from(quantity)
                .map_err(|_| StoreError::Decode(format!("negative quantity {}", quantity)))?,
            unit_price: Money::from_cents(row.try_get("unit_price_cents")?),
            line_total: Money::from_cents(row.try_get("line_total_cents")?),
        })
    }

    fn row_to_payment(row: PgRow) -> Result<Payment> {
        Ok(Payment {
            id: RecordId::from_uuid(row.try_get::<Uuid, _>("id")?),
            order_id: AggregateId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
            amount: Money::from_cents(row.try_get("amount_cents")?),
            method: row.try_get::<String, _>("method")?.parse()?,
            status: row.try_get::<String, _>("status")?.parse()?,
            transaction_id: row.try_get("transaction_id")?,
            payment_url: row.try_get("payment_url")?,
            qr_url: row.try_get("qr_url")?,
            failure_reason: row.try_get("failure_reason")?,
            created_at: row.try_get("created_at")?,
        })
    }

    async fn fetch_product(&mut self, column: &str, value: Uuid) -> Result<Option<Product>> {
        let sql = format!("SELECT * FROM products WHERE {} = $1", column);
        let row = on_conn!(self, sqlx::query(&sql).bind(value), fetch_optional)?;
        row.map(Self::row_to_product).transpose()
    }

    async fn fetch_product_by_text(&mut self, column: &str, value: &str) -> Result<Option<Product>> {
        let sql = format!("SELECT * FROM products WHERE {} = $1", column);
        let row = on_conn!(self, sqlx::query(&sql).bind(value), fetch_optional)?;
        row.map(Self::row_to_product).transpose()
    }
}

#[async_trait]
impl Transactional for PostgresConnection {
    async fn begin(&mut self) -> Result<()> {
        if self.tx.is_some() {
            return Err(StoreError::TransactionAlreadyOpen);
        }
        self.tx = Some(self.pool.begin().await?);
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        let tx = self.tx.take().ok_or(StoreError::NoTransaction)?;
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        let tx = self.tx.take().ok_or(StoreError::NoTransaction)?;
        tx.rollback().await?;
        Ok(())
    }

    fn abort(&mut self) {
        // Dropping a sqlx transaction queues a rollback on its connection.
        self.tx = None;
    }

    fn in_transaction(&self) -> bool {
        self.tx.is_some()
    }
}

#[async_trait]
impl ProductRepository for PostgresConnection {
    async fn product_by_id(&mut self, id: AggregateId) -> Result<Option<Product>> {
        self.fetch_product("id", id.as_uuid()).await
    }

    async fn product_by_sku(&mut self, sku: &str) -> Result<Option<Product>> {
        self.fetch_product_by_text("sku", sku).await
    }

    async fn product_by_slug(&mut self, slug: &str) -> Result<Option<Product>> {
        self.fetch_product_by_text("slug", slug).await
    }

    async fn insert_product(&mut self, product: &Product) -> Result<()> {
        on_conn!(
            self,
            sqlx::query(
                r#"
                INSERT INTO products (id, name, slug, sku, description, price_cents,
                                      stock_quantity, status, created_at, created_by)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                "#,
            )
            .bind(product.id.as_uuid())
            .bind(&product.name)
            .bind(&product.slug)
            .bind(&product.sku)
            .bind(&product.description)
            .bind(product.price.cents())
            .bind(product.stock_quantity)
            .bind(product.status.as_str())
            .bind(product.audit.created_at)
            .bind(product.audit.created_by.as_ref().map(|a| a.as_str())),
            execute
        )?;
        Ok(())
    }

    async fn update_product(&mut self, product: &Product) -> Result<bool> {
        let result = on_conn!(
            self,
            sqlx::query(
                r#"
                UPDATE products
                SET name = $2, slug = $3, sku = $4, description = $5, price_cents = $6,
                    stock_quantity = $7, status = $8, updated_at = $9, updated_by = $10
                WHERE id = $1
                "#,
            )
            .bind(product.id.as_uuid())
            .bind(&product.name)
            .bind(&product.slug)
            .bind(&product.sku)
            .bind(&product.description)
            .bind(product.price.cents())
            .bind(product.stock_quantity)
            .bind(product.status.as_str())
            .bind(product.audit.updated_at)
            .bind(product.audit.updated_by.as_ref().map(|a| a.as_str())),
            execute
        )?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_product(&mut self, id: AggregateId) -> Result<bool> {
        let result = on_conn!(
            self,
            sqlx::query("DELETE FROM products WHERE id = $1").bind(id.as_uuid()),
            execute
        )?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl ProductChildRepository for PostgresConnection {
    async fn images_for_product(
        &mut self,
        product_id: AggregateId,
    ) -> Result<Vec<ProductImage>> {
        let rows = on_conn!(
            self,
            sqlx::query(
                "SELECT * FROM product_images WHERE product_id = $1 ORDER BY sort_order, created_at",
            )
            .bind(product_id.as_uuid()),
            fetch_all
        )?;
        rows.into_iter().map(Self::row_to_image).collect()
    }

    async fn variants_for_product(
        &mut self,
        product_id: AggregateId,
    ) -> Result<Vec<ProductVariant>> {
        let rows = on_conn!(
            self,
            sqlx::query(
                "SELECT * FROM product_variants WHERE product_id = $1 ORDER BY created_at, sku",
            )
            .bind(product_id.as_uuid()),
            fetch_all
        )?;
        rows.into_iter().map(Self::row_to_variant).collect()
    }

    async fn attribute_values_for_product(
        &mut self,
        product_id: AggregateId,
    ) -> Result<Vec<ProductAttributeValue>> {
        let rows = on_conn!(
            self,
            sqlx::query(
                "SELECT * FROM product_attribute_values WHERE product_id = $1 ORDER BY created_at",
            )
            .bind(product_id.as_uuid()),
            fetch_all
        )?;
        rows.into_iter().map(Self::row_to_attribute_value).collect()
    }

    async fn tags_for_product(&mut self, product_id: AggregateId) -> Result<Vec<ProductTag>> {
        let rows = on_conn!(
            self,
            sqlx::query("SELECT * FROM product_tags WHERE product_id = $1 ORDER BY created_at")
                .bind(product_id.as_uuid()),
            fetch_all
        )?;
        rows.into_iter().map(Self::row_to_tag).collect()
    }

    async fn variant_by_id(&mut self, id: RecordId) -> Result<Option<ProductVariant>> {
        let row = on_conn!(
            self,
            sqlx::query("SELECT * FROM product_variants WHERE id = $1").bind(id.as_uuid()),
            fetch_optional
        )?;
        row.map(Self::row_to_variant).transpose()
    }

    async fn variant_by_sku(&mut self, sku: &str) -> Result<Option<ProductVariant>> {
        let row = on_conn!(
            self,
            sqlx::query("SELECT * FROM product_variants WHERE sku = $1").bind(sku),
            fetch_optional
        )?;
        row.map(Self::row_to_variant).transpose()
    }

    async fn insert_image(&mut self, image: &ProductImage) -> Result<()> {
        self.savepoint().await?;
        let outcome = on_conn!(
            self,
            sqlx::query(
                r#"
                INSERT INTO product_images (id, product_id, url, alt_text, sort_order,
                                            is_primary, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(image.id.as_uuid())
            .bind(image.product_id.as_uuid())
            .bind(&image.url)
            .bind(&image.alt_text)
            .bind(image.sort_order)
            .bind(image.is_primary)
            .bind(image.created_at),
            execute
        );
        self.settle(outcome.map(|_| ()).map_err(StoreError::from))
            .await
    }

    async fn insert_variant(&mut self, variant: &ProductVariant) -> Result<()> {
        self.savepoint().await?;
        let outcome = on_conn!(
            self,
            sqlx::query(
                r#"
                INSERT INTO product_variants (id, product_id, sku, name, price_cents,
                                              stock_quantity, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(variant.id.as_uuid())
            .bind(variant.product_id.as_uuid())
            .bind(&variant.sku)
            .bind(&variant.name)
            .bind(variant.price.cents())
            .bind(variant.stock_quantity)
            .bind(variant.created_at),
            execute
        );
        self.settle(outcome.map(|_| ()).map_err(StoreError::from))
            .await
    }

    async fn insert_attribute_value(&mut self, value: &ProductAttributeValue) -> Result<()> {
        self.savepoint().await?;
        let outcome = on_conn!(
            self,
            sqlx::query(
                r#"
                INSERT INTO product_attribute_values (id, product_id, attribute_id, value,
                                                      created_at)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(value.id.as_uuid())
            .bind(value.product_id.as_uuid())
            .bind(value.attribute_id)
            .bind(&value.value)
            .bind(value.created_at),
            execute
        );
        self.settle(outcome.map(|_| ()).map_err(StoreError::from))
            .await
    }

    async fn insert_tag(&mut self, tag: &ProductTag) -> Result<()> {
        self.savepoint().await?;
        let outcome = on_conn!(
            self,
            sqlx::query(
                r#"
                INSERT INTO product_tags (id, product_id, tag_id, created_at)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(tag.id.as_uuid())
            .bind(tag.product_id.as_uuid())
            .bind(tag.tag_id)
            .bind(tag.created_at),
            execute
        );
        self.settle(outcome.map(|_| ()).map_err(StoreError::from))
            .await
    }

    async fn delete_children(&mut self, product_id: AggregateId, kind: ChildKind) -> Result<u64> {
        let table = match kind {
            ChildKind::Image => "product_images",
            ChildKind::Variant => "product_variants",
            ChildKind::AttributeValue => "product_attribute_values",
            ChildKind::Tag => "product_tags",
        };
        let sql = format!("DELETE FROM {} WHERE product_id = $1", table);
        let result = on_conn!(
            self,
            sqlx::query(&sql).bind(product_id.as_uuid()),
            execute
        )?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl OrderRepository for PostgresConnection {
    async fn order_by_id(&mut self, id: AggregateId) -> Result<Option<Order>> {
        let row = on_conn!(
            self,
            sqlx::query("SELECT * FROM orders WHERE id = $1").bind(id.as_uuid()),
            fetch_optional
        )?;
        row.map(Self::row_to_order).transpose()
    }

    async fn order_by_number(&mut self, order_number: &str) -> Result<Option<Order>> {
        let row = on_conn!(
            self,
            sqlx::query("SELECT * FROM orders WHERE order_number = $1").bind(order_number),
            fetch_optional
        )?;
        row.map(Self::row_to_order).transpose()
    }

    async fn last_order_number(&mut self, prefix: &str) -> Result<Option<String>> {
        let row = on_conn!(
            self,
            sqlx::query(
                r#"
                SELECT order_number FROM orders
                WHERE starts_with(order_number, $1)
                ORDER BY length(order_number) DESC, order_number DESC
                LIMIT 1
                "#,
            )
            .bind(prefix),
            fetch_optional
        )?;
        Ok(row
            .map(|row| row.try_get::<String, _>("order_number"))
            .transpose()?)
    }

    async fn insert_order(&mut self, order: &Order) -> Result<()> {
        on_conn!(
            self,
            sqlx::query(
                r#"
                INSERT INTO orders (id, order_number, customer_id, status, payment_method,
                                    shipping_address, subtotal_cents, tax_cents,
                                    shipping_fee_cents, discount_cents, total_cents,
                                    gift_card_code, created_at, created_by)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
                "#,
            )
            .bind(order.id.as_uuid())
            .bind(&order.order_number)
            .bind(order.customer_id.as_uuid())
            .bind(order.status.as_str())
            .bind(order.payment_method.as_str())
            .bind(&order.shipping_address)
            .bind(order.subtotal.cents())
            .bind(order.tax.cents())
            .bind(order.shipping_fee.cents())
            .bind(order.discount.cents())
            .bind(order.total.cents())
            .bind(&order.gift_card_code)
            .bind(order.audit.created_at)
            .bind(order.audit.created_by.as_ref().map(|a| a.as_str())),
            execute
        )?;
        Ok(())
    }

    async fn lines_for_order(&mut self, order_id: AggregateId) -> Result<Vec<OrderLine>> {
        let rows = on_conn!(
            self,
            sqlx::query("SELECT * FROM order_lines WHERE order_id = $1 ORDER BY position")
                .bind(order_id.as_uuid()),
            fetch_all
        )?;
        rows.into_iter().map(Self::row_to_order_line).collect()
    }

    async fn insert_order_line(&mut self, line: &OrderLine) -> Result<()> {
        let quantity = i32::try_from(line.quantity).map_err(|_| StoreError::CheckViolation {
            constraint: "order_lines_quantity_check".to_string(),
        })?;
        on_conn!(
            self,
            sqlx::query(
                r#"
                INSERT INTO order_lines (id, order_id, product_id, variant_id, product_name,
                                         sku, quantity, unit_price_cents, line_total_cents)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(line.id.as_uuid())
            .bind(line.order_id.as_uuid())
            .bind(line.product_id.as_uuid())
            .bind(line.variant_id.map(|v| v.as_uuid()))
            .bind(&line.product_name)
            .bind(&line.sku)
            .bind(quantity)
            .bind(line.unit_price.cents())
            .bind(line.line_total.cents()),
            execute
        )?;
        Ok(())
    }
}

#[async_trait]
impl PaymentRepository for PostgresConnection {
    async fn insert_payment(&mut self, payment: &Payment) -> Result<()> {
        on_conn!(
            self,
            sqlx::query(
                r#"
                INSERT INTO payments (id, order_id, amount_cents, method, status,
                                      transaction_id, payment_url, qr_url, failure_reason,
                                      created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                "#,
            )
            .bind(payment.id.as_uuid())
            .bind(payment.order_id.as_uuid())
            .bind(payment.amount.cents())
            .bind(payment.method.as_str())
            .bind(payment.status.as_str())
            .bind(&payment.transaction_id)
            .bind(&payment.payment_url)
            .bind(&payment.qr_url)
            .bind(&payment.failure_reason)
            .bind(payment.created_at),
            execute
        )?;
        Ok(())
    }

    async fn payments_for_order(&mut self, order_id: AggregateId) -> Result<Vec<Payment>> {
        let rows = on_conn!(
            self,
            sqlx::query("SELECT * FROM payments WHERE order_id = $1 ORDER BY created_at")
                .bind(order_id.as_uuid()),
            fetch_all
        )?;
        rows.into_iter().map(Self::row_to_payment).collect()
    }
}
