//! Integration tests for the API server.

use std::sync::{Arc, OnceLock};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use domain::Money;
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::{Value, json};
use store::InMemoryStore;
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            builder
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

async fn setup_with_state() -> (axum::Router, Arc<api::AppState<InMemoryStore>>) {
    let state = api::create_default_state(InMemoryStore::new(), &api::config::Config::default())
        .await
        .unwrap();
    let app = api::create_app(state.clone(), get_metrics_handle());
    (app, state)
}

async fn setup() -> axum::Router {
    setup_with_state().await.0
}

async fn send(
    app: &axum::Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .header("x-actor-id", "tester")
            .body(Body::from(serde_json::to_string(&body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

fn product_body(sku: &str) -> Value {
    json!({
        "name": format!("Product {sku}"),
        "sku": sku,
        "price_cents": 1000,
        "stock_quantity": 10,
        "status": "Active",
        "images": [
            { "data_base64": "iVBORw==", "file_name": "a.png", "content_type": "image/png" },
            { "data_base64": "JVBERg==", "file_name": "a.pdf", "content_type": "application/pdf" }
        ],
        "variants": [
            { "name": "Small", "stock_quantity": 3 },
            { "sku": "CUSTOM", "name": "Large", "price_cents": 1200, "stock_quantity": 2 }
        ]
    })
}

#[tokio::test]
async fn test_health_check() {
    let (status, json) = send(&setup().await, "GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert!(json["version"].as_str().is_some());
}

#[tokio::test]
async fn test_create_and_get_product() {
    let (app, state) = setup_with_state().await;

    let (status, created) = send(&app, "POST", "/products", Some(product_body("MUG"))).await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["response"]["state"], "ready");
    assert_eq!(created["skipped"].as_array().unwrap().len(), 1);
    assert_eq!(created["skipped"][0]["kind"], "Image");
    assert_eq!(created["skipped"][0]["index"], 1);
    assert_eq!(state.blobs.blob_count(), 1);

    let id = created["id"].as_str().unwrap();
    let (status, product) = send(&app, "GET", &format!("/products/{id}"), None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(product["slug"], "product-mug");
    assert_eq!(product["status"], "Active");
    assert_eq!(product["variants"][0]["sku"], "MUG-VAR-1");
    assert_eq!(product["variants"][1]["price"], 1200);
    assert_eq!(product["available_stock"], 5);
    assert_eq!(product["images"][0]["is_primary"], true);
}

#[tokio::test]
async fn test_duplicate_sku_is_conflict() {
    let app = setup().await;
    send(&app, "POST", "/products", Some(product_body("MUG"))).await;

    let mut body = product_body("MUG");
    body["name"] = json!("Different Name");
    let (status, json) = send(&app, "POST", "/products", Some(body)).await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert!(json["error"].as_str().unwrap().contains("sku"));
}

#[tokio::test]
async fn test_invalid_product_is_bad_request() {
    let app = setup().await;
    let mut body = product_body("MUG");
    body["price_cents"] = json!(-1);

    let (status, _) = send(&app, "POST", "/products", Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let mut body = product_body("MUG");
    body["images"] = json!([{ "alt_text": "nothing to show" }]);
    let (status, _) = send(&app, "POST", "/products", Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_update_and_delete_product() {
    let (app, state) = setup_with_state().await;
    let (_, created) = send(&app, "POST", "/products", Some(product_body("MUG"))).await;
    let id = created["id"].as_str().unwrap().to_string();

    let (status, updated) = send(
        &app,
        "PUT",
        &format!("/products/{id}"),
        Some(json!({ "price_cents": 1500, "variants": [] })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let view = &updated["response"]["data"];
    assert_eq!(view["price"], 1500);
    assert_eq!(view["variants"].as_array().unwrap().len(), 0);
    assert_eq!(view["images"].as_array().unwrap().len(), 1);

    let (status, deleted) = send(&app, "DELETE", &format!("/products/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(deleted["response"]["data"]["sku"], "MUG");
    assert_eq!(state.blobs.blob_count(), 0);

    let (status, _) = send(&app, "GET", &format!("/products/{id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_get_nonexistent_product() {
    let fake_id = uuid::Uuid::new_v4();
    let (status, _) = send(&setup().await, "GET", &format!("/products/{fake_id}"), None).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_invalid_id_format() {
    let (status, _) = send(&setup().await, "GET", "/orders/not-a-uuid", None).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_place_and_get_order() {
    let (app, state) = setup_with_state().await;
    let (_, created) = send(&app, "POST", "/products", Some(product_body("MUG"))).await;
    let product_id = created["id"].as_str().unwrap();
    state.gift_cards.issue("GIFT", Money::from_cents(500));

    let (status, receipt) = send(
        &app,
        "POST",
        "/orders",
        Some(json!({
            "customer_id": uuid::Uuid::new_v4(),
            "lines": [{ "product_id": product_id, "quantity": 2 }],
            "payment_method": "Card",
            "shipping_address": "1 Main St",
            "shipping_fee_cents": 300,
            "gift_card_code": "GIFT"
        })),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(receipt["total"], 1800);
    assert_eq!(receipt["discount_redeemed"], true);
    assert_eq!(receipt["payment_status"], "Pending");
    assert_eq!(receipt["response"]["data"]["discount"], 500);

    let order_id = receipt["order_id"].as_str().unwrap();
    let (status, order) = send(&app, "GET", &format!("/orders/{order_id}"), None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(order["order_number"], receipt["order_number"]);
    assert_eq!(order["lines"][0]["quantity"], 2);
    assert!(order["payment"]["transaction_id"].as_str().is_some());
}

#[tokio::test]
async fn test_order_validation_errors() {
    let app = setup().await;
    let (_, created) = send(&app, "POST", "/products", Some(product_body("MUG"))).await;
    let product_id = created["id"].as_str().unwrap();

    let order = |quantity: u32, method: &str| {
        json!({
            "customer_id": uuid::Uuid::new_v4(),
            "lines": [{ "product_id": product_id, "quantity": quantity }],
            "payment_method": method,
            "shipping_address": "1 Main St"
        })
    };

    let (status, json) = send(&app, "POST", "/orders", Some(order(11, "Card"))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("insufficient stock"));

    let (status, _) = send(&app, "POST", "/orders", Some(order(1, "Barter"))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let app = setup().await;
    send(&app, "POST", "/products", Some(product_body("METRIC"))).await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("product_writes_total"));
}
