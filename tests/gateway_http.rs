//! HTTP API end to end, over in-memory stores

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use futures::StreamExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use kc_bank::config::{QueueConfig, TransferConfig};
use kc_bank::gateway::{self, AppState};
use kc_bank::ledger::{AccountService, IbanGenerator, InMemoryLedgerStore};
use kc_bank::queue::{InMemoryQueue, Settlement, TransferConsumer, TransferQueue};
use kc_bank::transfer::{InMemoryIdempotencyGuard, OutcomeStatus, TransferCoordinator};

struct Api {
    app: Router,
    queue: Arc<InMemoryQueue>,
    consumer: TransferConsumer,
}

fn api() -> Api {
    let ledger = Arc::new(InMemoryLedgerStore::new());
    let coordinator = Arc::new(TransferCoordinator::new(
        ledger.clone(),
        Arc::new(InMemoryIdempotencyGuard::new()),
        &TransferConfig {
            base_backoff_ms: 1,
            max_backoff_ms: 5,
            ..TransferConfig::default()
        },
    ));
    let accounts = Arc::new(AccountService::with_generator(
        ledger,
        IbanGenerator::with_seed(99),
    ));
    let queue = Arc::new(InMemoryQueue::new(3));
    let consumer = TransferConsumer::new(queue.clone(), coordinator.clone(), &QueueConfig::default());
    let state = AppState::new(coordinator, accounts, queue.clone());
    Api {
        app: gateway::router(Arc::new(state)),
        queue,
        consumer,
    }
}

async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

async fn open(app: &Router, balance: &str) -> Value {
    let (status, body) = call(
        app,
        Method::POST,
        "/api/v1/accounts",
        Some(json!({"currency": "TRY", "owner_user_id": "u-1", "initial_balance": balance})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body["data"].clone()
}

async fn balance(app: &Router, account: &Value) -> String {
    let uri = format!("/api/v1/accounts/{}", account["id"].as_str().unwrap());
    let (_, body) = call(app, Method::GET, &uri, None).await;
    body["data"]["balance"].as_str().unwrap().to_string()
}

fn transfer(from: &Value, to: &Value, amount: &str) -> Value {
    json!({"from_iban": from["iban"], "to_iban": to["iban"], "amount": amount})
}

#[tokio::test]
async fn health_reports_ok() {
    let api = api();
    let (status, body) = call(&api.app, Method::GET, "/api/v1/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["code"], 0);
    assert_eq!(body["data"]["queue"], "memory");
}

#[tokio::test]
async fn open_get_and_list_accounts() {
    let api = api();
    let account = open(&api.app, "100.00").await;
    assert_eq!(account["currency"], "TRY");
    assert_eq!(account["balance"], "100.00");
    assert_eq!(account["version"], 0);
    assert!(account["iban"].as_str().unwrap().starts_with("TR"));

    open(&api.app, "0").await;
    let (status, body) = call(&api.app, Method::GET, "/api/v1/accounts", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 2);

    assert_eq!(balance(&api.app, &account).await, "100.00");
}

#[tokio::test]
async fn account_lookup_errors() {
    let api = api();
    let (status, body) = call(&api.app, Method::GET, "/api/v1/accounts/not-a-uuid", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], 1001);

    let uri = format!("/api/v1/accounts/{}", uuid::Uuid::new_v4());
    let (status, body) = call(&api.app, Method::GET, &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], 4001);
    assert!(body.get("data").is_none());
}

#[tokio::test]
async fn open_account_validates_input() {
    let api = api();
    for body in [
        json!({"currency": "TL", "owner_user_id": "u"}),
        json!({"currency": "TRY", "owner_user_id": ""}),
        json!({"currency": "TRY", "owner_user_id": "u", "initial_balance": "-5"}),
        json!({"currency": "TRY", "owner_user_id": "u", "initial_balance": 5}),
    ] {
        let (status, resp) = call(&api.app, Method::POST, "/api/v1/accounts", Some(body.clone())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
        assert_eq!(resp["code"], 1001);
    }
}

#[tokio::test]
async fn sync_transfer_moves_funds() {
    let api = api();
    let from = open(&api.app, "100.00").await;
    let to = open(&api.app, "0").await;

    let (status, body) = call(
        &api.app,
        Method::POST,
        "/api/v1/transfers",
        Some(transfer(&from, &to, "25.50")),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["status"], "applied");

    assert_eq!(balance(&api.app, &from).await, "74.50");
    assert_eq!(balance(&api.app, &to).await, "25.50");

    let key = body["data"]["idempotency_key"].as_str().unwrap();
    let (status, body) = call(&api.app, Method::GET, &format!("/api/v1/transfers/{key}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["state"], "COMMITTED");
    assert_eq!(body["data"]["status"], "applied");
    assert_eq!(body["data"]["amount"], "25.50");
}

#[tokio::test]
async fn sync_transfer_rejections_map_to_codes() {
    let api = api();
    let from = open(&api.app, "10").await;
    let to = open(&api.app, "0").await;
    let ghost = json!({"iban": "TR000000000000000000000000"});

    let cases = [
        (transfer(&from, &to, "11"), StatusCode::UNPROCESSABLE_ENTITY, 1002),
        (transfer(&from, &from, "1"), StatusCode::BAD_REQUEST, 1003),
        (transfer(&from, &to, "0"), StatusCode::BAD_REQUEST, 1004),
        (transfer(&from, &ghost, "1"), StatusCode::NOT_FOUND, 4001),
        (transfer(&ghost, &to, "1"), StatusCode::NOT_FOUND, 4001),
    ];
    for (body, status, code) in cases {
        let (got, resp) = call(&api.app, Method::POST, "/api/v1/transfers", Some(body.clone())).await;
        assert_eq!(got, status, "{body} -> {resp}");
        assert_eq!(resp["code"], code, "{body} -> {resp}");
    }

    assert_eq!(balance(&api.app, &from).await, "10");
    assert_eq!(balance(&api.app, &to).await, "0");
}

#[tokio::test]
async fn client_token_makes_retries_safe() {
    let api = api();
    let from = open(&api.app, "100").await;
    let to = open(&api.app, "0").await;
    let mut body = transfer(&from, &to, "40");
    body["cid"] = json!("retry-me");

    let (_, first) = call(&api.app, Method::POST, "/api/v1/transfers", Some(body.clone())).await;
    let (status, second) = call(&api.app, Method::POST, "/api/v1/transfers", Some(body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        first["data"]["idempotency_key"],
        second["data"]["idempotency_key"]
    );

    assert_eq!(balance(&api.app, &from).await, "60");
    assert_eq!(balance(&api.app, &to).await, "40");
}

#[tokio::test]
async fn malformed_transfer_body_is_rejected() {
    let api = api();
    for body in [
        json!({"from_iban": "TR1", "to_iban": "TR2", "amount": 10}),
        json!({"from_iban": "TR1", "to_iban": "TR2", "amount": ".5"}),
        json!({"from_iban": "TR1", "to_iban": "TR2", "amount": "0.000000001"}),
        json!({"from_iban": "", "to_iban": "TR2", "amount": "1"}),
        json!({"to_iban": "TR2", "amount": "1"}),
    ] {
        let (status, resp) = call(&api.app, Method::POST, "/api/v1/transfers", Some(body.clone())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
        assert_eq!(resp["code"], 1001);
    }
}

#[tokio::test]
async fn async_transfer_is_queued_then_applied() {
    let api = api();
    let from = open(&api.app, "50").await;
    let to = open(&api.app, "0").await;

    let (status, body) = call(
        &api.app,
        Method::POST,
        "/api/v1/transfers/async",
        Some(transfer(&from, &to, "20")),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["data"]["status"], "queued");
    let key = body["data"]["idempotency_key"].as_str().unwrap().to_string();
    let uri = format!("/api/v1/transfers/{key}");

    // Nothing claimed it yet
    let (status, body) = call(&api.app, Method::GET, &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], 4002);

    let mut deliveries = api.queue.consume();
    let delivery = tokio::time::timeout(Duration::from_secs(1), deliveries.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(
        api.consumer.handle(delivery).await,
        Settlement::Acked(OutcomeStatus::Applied)
    );

    let (status, body) = call(&api.app, Method::GET, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["state"], "COMMITTED");
    assert_eq!(balance(&api.app, &to).await, "20");
}

#[tokio::test]
async fn transfer_status_rejects_bad_key() {
    let api = api();
    let (status, body) = call(&api.app, Method::GET, "/api/v1/transfers/%20", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], 1001);
}

#[tokio::test]
async fn swagger_document_is_served() {
    let api = api();
    let (status, body) = call(&api.app, Method::GET, "/api-docs/openapi.json", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["paths"]["/api/v1/transfers"].is_object());
    assert_eq!(api.queue.name(), "memory");
}
