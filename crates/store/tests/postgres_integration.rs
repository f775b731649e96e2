//! PostgreSQL integration tests
//!
//! These tests use a shared PostgreSQL container for efficiency.
//! Run with:
//!
//! ```bash
//! cargo test -p store --test postgres_integration -- --test-threads=1
//! ```

use std::sync::Arc;

use chrono::Utc;
use common::{ActorId, AggregateId, RecordId};
use domain::{
    AuditStamp, ChildKind, CustomerId, Money, Order, OrderLine, OrderStatus, Payment,
    PaymentMethod, PaymentStatus, Product, ProductStatus, ProductVariant,
};
use serial_test::serial;
use sqlx::PgPool;
use store::{
    ConnectionExt, OrderRepository, PaymentRepository, PostgresStore, ProductChildRepository,
    ProductRepository, Store, StoreError, TransactionScope, Transactional,
};
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

/// Global shared container
static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();

            for migration in [
                include_str!("../../../migrations/001_create_catalog_tables.sql"),
                include_str!("../../../migrations/002_create_order_tables.sql"),
            ] {
                sqlx::raw_sql(migration).execute(&temp_pool).await.unwrap();
            }

            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Get a fresh store with its own pool and cleared tables
async fn get_test_store() -> PostgresStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE products, orders CASCADE")
        .execute(&pool)
        .await
        .unwrap();

    PostgresStore::new(pool)
}

fn product(sku: &str) -> Product {
    Product {
        id: AggregateId::new(),
        name: format!("Product {}", sku),
        slug: sku.to_lowercase(),
        sku: sku.to_string(),
        description: Some("integration".to_string()),
        price: Money::from_cents(2500),
        stock_quantity: 10,
        status: ProductStatus::Active,
        audit: AuditStamp::created(ActorId::system(), Utc::now()),
    }
}

fn variant(product_id: AggregateId, sku: &str) -> ProductVariant {
    ProductVariant {
        id: RecordId::new(),
        product_id,
        sku: sku.to_string(),
        name: sku.to_string(),
        price: Money::from_cents(2500),
        stock_quantity: 3,
        created_at: Utc::now(),
    }
}

#[tokio::test]
#[serial]
async fn insert_and_load_product_aggregate() {
    let store = get_test_store().await;
    let mut conn = store.connect().await.unwrap();
    let p = product("PG-1");

    conn.insert_product(&p).await.unwrap();
    conn.insert_variant(&variant(p.id, "PG-1-RED")).await.unwrap();

    let loaded = conn.load_product_aggregate(p.id).await.unwrap().unwrap();
    assert_eq!(loaded.product.sku, "PG-1");
    assert_eq!(loaded.product.status, ProductStatus::Active);
    assert_eq!(loaded.variants.len(), 1);
    assert_eq!(loaded.variants[0].sku, "PG-1-RED");
}

#[tokio::test]
#[serial]
async fn unique_violation_is_classified() {
    let store = get_test_store().await;
    let mut conn = store.connect().await.unwrap();

    conn.insert_product(&product("PG-DUP")).await.unwrap();
    let mut clash = product("PG-DUP");
    clash.slug = "another-slug".to_string();

    let err = conn.insert_product(&clash).await.unwrap_err();
    match err {
        StoreError::UniqueViolation { constraint } => assert_eq!(constraint, "products_sku_key"),
        other => panic!("expected unique violation, got {:?}", other),
    }
}

#[tokio::test]
#[serial]
async fn child_failure_inside_transaction_keeps_transaction_usable() {
    let store = get_test_store().await;
    let mut conn = store.connect().await.unwrap();
    let p = product("PG-SP");

    conn.begin().await.unwrap();
    conn.insert_product(&p).await.unwrap();
    conn.insert_variant(&variant(p.id, "PG-SP-1")).await.unwrap();

    let err = conn
        .insert_variant(&variant(p.id, "PG-SP-1"))
        .await
        .unwrap_err();
    assert!(err.is_item_level());

    conn.insert_variant(&variant(p.id, "PG-SP-2")).await.unwrap();
    conn.commit().await.unwrap();

    let variants = conn.variants_for_product(p.id).await.unwrap();
    assert_eq!(variants.len(), 2);
}

#[tokio::test]
#[serial]
async fn scope_rollback_leaves_no_rows() {
    let store = get_test_store().await;
    let p = product("PG-RB");
    let id = p.id;

    let mut scope = TransactionScope::new(store.connect().await.unwrap());
    let result: Result<(), StoreError> = scope
        .run_in_transaction(move |conn| {
            Box::pin(async move {
                conn.insert_product(&p).await?;
                conn.insert_variant(&variant(p.id, "PG-RB-1")).await?;
                Err(StoreError::Unavailable("simulated".into()))
            })
        })
        .await;
    assert!(result.is_err());

    let mut conn = store.connect().await.unwrap();
    assert!(conn.product_by_id(id).await.unwrap().is_none());
    assert!(conn.variant_by_sku("PG-RB-1").await.unwrap().is_none());
}

#[tokio::test]
#[serial]
async fn delete_children_by_kind() {
    let store = get_test_store().await;
    let mut conn = store.connect().await.unwrap();
    let p = product("PG-DEL");

    conn.insert_product(&p).await.unwrap();
    conn.insert_variant(&variant(p.id, "PG-DEL-1")).await.unwrap();
    conn.insert_variant(&variant(p.id, "PG-DEL-2")).await.unwrap();

    let removed = conn.delete_children(p.id, ChildKind::Variant).await.unwrap();
    assert_eq!(removed, 2);
    assert!(conn.delete_product(p.id).await.unwrap());
    assert!(!conn.delete_product(p.id).await.unwrap());
}

#[tokio::test]
#[serial]
async fn order_with_lines_and_payment_round_trip() {
    let store = get_test_store().await;
    let mut conn = store.connect().await.unwrap();
    let customer = CustomerId::new();
    let order = Order {
        id: AggregateId::new(),
        order_number: "ORD-20260101-000001".to_string(),
        customer_id: customer,
        status: OrderStatus::Pending,
        payment_method: PaymentMethod::Card,
        shipping_address: "1 Main St".to_string(),
        subtotal: Money::from_cents(5000),
        tax: Money::from_cents(500),
        shipping_fee: Money::from_cents(300),
        discount: Money::zero(),
        total: Money::from_cents(5800),
        gift_card_code: None,
        audit: AuditStamp::created(ActorId::new(customer.to_string()), Utc::now()),
    };
    conn.insert_order(&order).await.unwrap();

    for (i, sku) in ["A", "B"].iter().enumerate() {
        conn.insert_order_line(&OrderLine {
            id: RecordId::new(),
            order_id: order.id,
            product_id: AggregateId::new(),
            variant_id: None,
            product_name: format!("Item {}", sku),
            sku: sku.to_string(),
            quantity: i as u32 + 1,
            unit_price: Money::from_cents(2500),
            line_total: Money::from_cents(2500).times(i as u32 + 1),
        })
        .await
        .unwrap();
    }

    conn.insert_payment(&Payment {
        id: RecordId::new(),
        order_id: order.id,
        amount: order.total,
        method: PaymentMethod::Card,
        status: PaymentStatus::Pending,
        transaction_id: Some("PAY-0001".to_string()),
        payment_url: Some("https://pay.example/PAY-0001".to_string()),
        qr_url: None,
        failure_reason: None,
        created_at: Utc::now(),
    })
    .await
    .unwrap();

    let loaded = conn.load_order_aggregate(order.id).await.unwrap().unwrap();
    assert_eq!(loaded.order.order_number, order.order_number);
    assert_eq!(loaded.order.total, Money::from_cents(5800));
    assert_eq!(loaded.order.payment_method, PaymentMethod::Card);
    assert_eq!(loaded.lines.len(), 2);
    assert_eq!(loaded.lines[0].sku, "A");
    assert_eq!(loaded.payments.len(), 1);

    let by_number = conn
        .order_by_number("ORD-20260101-000001")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(by_number.id, order.id);
}
