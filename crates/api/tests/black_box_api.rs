use std::sync::Arc;

use reqwest::StatusCode;
use serde_json::json;

use rxledger_core::UserId;
use rxledger_infra::{LedgerConfig, LedgerService};

struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        // Same router as prod over in-memory stores, bound to an ephemeral port.
        let ledger = Arc::new(LedgerService::in_memory(LedgerConfig::default()));
        let app = rxledger_api::app::build_app(ledger);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { base_url, handle }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// A request builder carrying a fresh staff identity with `role`.
fn as_role(builder: reqwest::RequestBuilder, role: &str) -> reqwest::RequestBuilder {
    builder
        .header("x-actor-id", UserId::new().to_string())
        .header("x-actor-role", role)
}

async fn create_stocked_product(
    client: &reqwest::Client,
    srv: &TestServer,
    code: &str,
    unit_price: i64,
    stock: i64,
) -> String {
    let res = as_role(client.post(srv.url("/products")), "manager")
        .json(&json!({
            "code": code,
            "name": format!("{code} capsules"),
            "unit_price": unit_price,
            "reorder_threshold": 5,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let product: serde_json::Value = res.json().await.unwrap();
    let id = product["id"].as_str().unwrap().to_string();

    let res = as_role(client.post(srv.url(&format!("/products/{id}/receive"))), "pharmacist")
        .json(&json!({
            "quantity": stock,
            "reference_type": "purchase_order",
            "reference_id": "PO-77",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    id
}

#[tokio::test]
async fn health_is_open_but_ledger_routes_need_an_identity() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client.get(srv.url("/health")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = client.get(srv.url("/products")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = client
        .post(srv.url("/transactions"))
        .header("x-actor-id", UserId::new().to_string())
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn whoami_echoes_the_identity_headers() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let user = UserId::new();

    let res = client
        .get(srv.url("/whoami"))
        .header("x-actor-id", user.to_string())
        .header("x-actor-role", "cashier")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["user_id"].as_str().unwrap(), user.to_string());
    assert_eq!(body["role"], "cashier");
    assert_eq!(body["privileged"], false);
}

#[tokio::test]
async fn settle_then_void_round_trips_stock() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let id = create_stocked_product(&client, &srv, "AMX-500", 500, 12).await;

    let res = as_role(client.post(srv.url("/transactions")), "cashier")
        .json(&json!({
            "lines": [{ "product_id": id, "quantity": 2 }],
            "payment_method": "cash",
            "discount": { "type": "percentage", "value": 1000 },
            "amount_paid": 1000,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let tx: serde_json::Value = res.json().await.unwrap();
    assert_eq!(tx["total_amount"], 900);
    assert_eq!(tx["change_amount"], 100);
    let tx_id = tx["id"].as_str().unwrap().to_string();
    let code = tx["code"].as_str().unwrap().to_string();

    let res = as_role(client.get(srv.url(&format!("/products/{id}/stock"))), "cashier")
        .send()
        .await
        .unwrap();
    let stock: serde_json::Value = res.json().await.unwrap();
    assert_eq!(stock["stock_quantity"], 10);

    let res = as_role(client.get(srv.url(&format!("/transactions/{code}"))), "cashier")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = as_role(client.post(srv.url(&format!("/transactions/{tx_id}/void"))), "manager")
        .json(&json!({ "reason": "customer returned it" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let voided: serde_json::Value = res.json().await.unwrap();
    assert_eq!(voided["is_voided"], true);

    let res = as_role(client.post(srv.url(&format!("/transactions/{tx_id}/void"))), "manager")
        .json(&json!({ "reason": "again" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let res = as_role(client.get(srv.url(&format!("/products/{id}/history"))), "cashier")
        .send()
        .await
        .unwrap();
    let history: serde_json::Value = res.json().await.unwrap();
    let items = history["items"].as_array().unwrap();
    assert_eq!(items.len(), 3);
    assert_eq!(items[0]["reference_type"], "void_reversal");
    assert_eq!(items[0]["new_quantity"], 12);

    let res = as_role(client.get(srv.url("/ledger/verify")), "admin")
        .send()
        .await
        .unwrap();
    let report: serde_json::Value = res.json().await.unwrap();
    assert_eq!(report["consistent"], true);
}

#[tokio::test]
async fn business_and_validation_failures_map_to_distinct_statuses() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let id = create_stocked_product(&client, &srv, "IBU-400", 300, 1).await;

    let res = as_role(client.post(srv.url("/transactions")), "cashier")
        .json(&json!({
            "lines": [{ "product_id": id, "quantity": 5 }],
            "payment_method": "card",
            "amount_paid": 10_000,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let res = as_role(client.post(srv.url(&format!("/products/{id}/adjust"))), "pharmacist")
        .json(&json!({ "quantity": 0, "reason": "recount" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = as_role(client.get(srv.url("/products/not-an-id")), "cashier")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = as_role(
        client.get(srv.url(&format!("/products/{}", UserId::new()))),
        "cashier",
    )
    .send()
    .await
    .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = as_role(client.delete(srv.url(&format!("/products/{id}"))), "admin")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn low_stock_alert_can_be_resolved_by_staff() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let id = create_stocked_product(&client, &srv, "CTZ-10", 100, 3).await;

    let res = as_role(
        client.get(srv.url(&format!("/alerts?product_id={id}&resolved=false"))),
        "pharmacist",
    )
    .send()
    .await
    .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let alerts: serde_json::Value = res.json().await.unwrap();
    let items = alerts["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["alert_type"], "low_stock");
    let alert_id = items[0]["id"].as_str().unwrap().to_string();

    let res = as_role(client.post(srv.url(&format!("/alerts/{alert_id}/resolve"))), "pharmacist")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let resolved: serde_json::Value = res.json().await.unwrap();
    assert_eq!(resolved["is_resolved"], true);

    let res = as_role(client.post(srv.url(&format!("/alerts/{alert_id}/resolve"))), "pharmacist")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let res = as_role(client.post(srv.url("/alerts/sweep")), "admin")
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let report: serde_json::Value = res.json().await.unwrap();
    assert_eq!(report["products_evaluated"], 1);
}
