use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
    response::Response,
};
use http_body_util::BodyExt;

use clob_engine::{api::router, engine::EngineConfig, state::AppState};
use serde_json::{Value, json};
use tower::ServiceExt;

fn test_app() -> Router {
    let state = AppState::new(EngineConfig {
        quote: "BRL".parse().unwrap(),
        assets: vec!["BTC".parse().unwrap(), "ETH".parse().unwrap()],
    })
    .unwrap();
    router(state)
}

async fn body_json(res: Response) -> Value {
    let bytes = res.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn get(app: &Router, uri: &str) -> Response {
    app.clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

async fn post(app: &Router, uri: &str, body: Value) -> Response {
    app.clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap()
}

async fn create_account(app: &Router, name: &str) -> String {
    let res = post(app, "/v1/accounts", json!({ "name": name })).await;
    assert_eq!(res.status(), StatusCode::CREATED);
    let v = body_json(res).await;
    v["id"].as_str().unwrap().to_string()
}

async fn charge(app: &Router, id: &str, asset: &str, amount: Value) {
    let res = post(
        app,
        &format!("/v1/accounts/{id}/charge"),
        json!({ "amount": amount, "asset_code": asset }),
    )
    .await;
    assert_eq!(res.status(), StatusCode::OK);
}

async fn order(app: &Router, id: &str, side: &str, quantity: Value, price: Value) -> Response {
    post(
        app,
        "/v1/order_book",
        json!({
            "account_id": id,
            "asset_code": "BTC",
            "quantity": quantity,
            "price": price,
            "order_type": side,
        }),
    )
    .await
}

fn balance_of(account: &Value, asset: &str) -> Option<String> {
    account["balances"]
        .as_array()?
        .iter()
        .find(|b| b["asset_code"] == asset)
        .map(|b| b["balance"].as_str().unwrap().to_string())
}

#[tokio::test]
async fn create_account_echoes_new_account() {
    let app = test_app();
    let res = post(&app, "/v1/accounts", json!({ "name": "Account 1" })).await;
    assert_eq!(res.status(), StatusCode::CREATED);
    let v = body_json(res).await;
    assert_eq!(v["name"], "Account 1");
    assert!(v["balances"].as_array().unwrap().is_empty());

    let id = v["id"].as_str().unwrap();
    let res = get(&app, &format!("/v1/accounts/{id}")).await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body_json(res).await["name"], "Account 1");
}

#[tokio::test]
async fn blank_name_is_rejected() {
    let app = test_app();
    let res = post(&app, "/v1/accounts", json!({ "name": "   " })).await;
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body_json(res).await["error"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn charge_accepts_numbers_and_strings() {
    let app = test_app();
    let id = create_account(&app, "A").await;
    charge(&app, &id, "BTC", json!(1.5)).await;
    charge(&app, &id, "btc", json!("0.25")).await;

    let v = body_json(get(&app, &format!("/v1/accounts/{id}")).await).await;
    assert_eq!(balance_of(&v, "BTC").as_deref(), Some("1.75"));
}

#[tokio::test]
async fn charge_rejects_unknown_asset_and_account() {
    let app = test_app();
    let id = create_account(&app, "A").await;

    let res = post(
        &app,
        &format!("/v1/accounts/{id}/charge"),
        json!({ "amount": 1, "asset_code": "DOGE" }),
    )
    .await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(res).await["error"], "UNKNOWN_ASSET");

    let missing = uuid::Uuid::new_v4();
    let res = post(
        &app,
        &format!("/v1/accounts/{missing}/charge"),
        json!({ "amount": 1, "asset_code": "BTC" }),
    )
    .await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(res).await["error"], "UNKNOWN_ACCOUNT");
}

#[tokio::test]
async fn non_positive_amounts_are_422() {
    let app = test_app();
    let id = create_account(&app, "A").await;
    for amount in [json!(0), json!(-5)] {
        let res = post(
            &app,
            &format!("/v1/accounts/{id}/charge"),
            json!({ "amount": amount, "asset_code": "BRL" }),
        )
        .await;
        assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body_json(res).await["error"], "INVALID_AMOUNT");
    }
}

#[tokio::test]
async fn malformed_account_id_is_400() {
    let app = test_app();
    let res = get(&app, "/v1/accounts/not-a-uuid").await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(res).await["error"], "BAD_REQUEST");
}

#[tokio::test]
async fn unknown_order_type_is_rejected_by_body_extractor() {
    let app = test_app();
    let id = create_account(&app, "A").await;
    let res = order(&app, &id, "hold", json!(1), json!(100)).await;
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body_json(res).await["error"], "INVALID_BODY");
}

#[tokio::test]
async fn missing_content_type_is_415() {
    let app = test_app();
    let res = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/accounts")
                .body(Body::from(r#"{"name":"A"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
}

#[tokio::test]
async fn order_without_funds_is_402_and_leaves_no_trace() {
    let app = test_app();
    let id = create_account(&app, "A").await;
    charge(&app, &id, "BRL", json!(50)).await;

    let res = order(&app, &id, "buy", json!(1), json!(100)).await;
    assert_eq!(res.status(), StatusCode::PAYMENT_REQUIRED);
    assert_eq!(body_json(res).await["error"], "INSUFFICIENT_FUNDS");

    let snap = body_json(get(&app, "/v1/order_book/BTC").await).await;
    assert!(snap["bids"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn order_on_unknown_asset_is_404() {
    let app = test_app();
    let id = create_account(&app, "A").await;
    charge(&app, &id, "BRL", json!(1000)).await;
    let res = post(
        &app,
        "/v1/order_book",
        json!({
            "account_id": id,
            "asset_code": "BRL",
            "quantity": 1,
            "price": 1,
            "order_type": "buy",
        }),
    )
    .await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn matched_orders_move_balances() {
    let app = test_app();
    let a = create_account(&app, "Account 1").await;
    let b = create_account(&app, "Account 2").await;
    charge(&app, &a, "BTC", json!(100)).await;
    charge(&app, &b, "BRL", json!(500000)).await;

    let res = order(&app, &a, "sell", json!(1), json!(100)).await;
    assert_eq!(res.status(), StatusCode::NO_CONTENT);
    let res = order(&app, &b, "buy", json!(1), json!(100)).await;
    assert_eq!(res.status(), StatusCode::NO_CONTENT);

    let va = body_json(get(&app, &format!("/v1/accounts/{a}")).await).await;
    let vb = body_json(get(&app, &format!("/v1/accounts/{b}")).await).await;
    assert_eq!(balance_of(&va, "BTC").as_deref(), Some("99"));
    assert_eq!(balance_of(&va, "BRL").as_deref(), Some("100"));
    assert_eq!(balance_of(&vb, "BTC").as_deref(), Some("1"));
    assert_eq!(balance_of(&vb, "BRL").as_deref(), Some("499900"));
}

#[tokio::test]
async fn remove_respects_reserved_funds() {
    let app = test_app();
    let a = create_account(&app, "A").await;
    charge(&app, &a, "BTC", json!(10)).await;
    let res = order(&app, &a, "sell", json!(8), json!(100)).await;
    assert_eq!(res.status(), StatusCode::NO_CONTENT);

    let res = post(
        &app,
        &format!("/v1/accounts/{a}/remove"),
        json!({ "amount": 3, "asset_code": "BTC" }),
    )
    .await;
    assert_eq!(res.status(), StatusCode::PAYMENT_REQUIRED);

    let res = post(
        &app,
        &format!("/v1/accounts/{a}/remove"),
        json!({ "amount": 2, "asset_code": "BTC" }),
    )
    .await;
    assert_eq!(res.status(), StatusCode::OK);

    // The 8 BTC held by the resting sell still count towards the balance.
    let v = body_json(get(&app, &format!("/v1/accounts/{a}")).await).await;
    assert_eq!(balance_of(&v, "BTC").as_deref(), Some("8"));
}

#[tokio::test]
async fn list_accounts_pages_in_creation_order() {
    let app = test_app();
    for i in 0..5 {
        create_account(&app, &format!("acct-{i}")).await;
    }

    let v = body_json(get(&app, "/v1/accounts?page=2&size=2").await).await;
    assert_eq!(v["page"], 2);
    assert_eq!(v["size"], 2);
    assert_eq!(v["total"], 5);
    let names: Vec<_> = v["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a["name"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(names, ["acct-2", "acct-3"]);

    let v = body_json(get(&app, "/v1/accounts?size=1000").await).await;
    assert_eq!(v["size"], 100);
    assert_eq!(v["items"].as_array().unwrap().len(), 5);
}

#[tokio::test]
async fn order_book_snapshot_clamps_depth() {
    let app = test_app();
    let a = create_account(&app, "A").await;
    charge(&app, &a, "BRL", json!(10000)).await;
    for price in [97, 98, 99] {
        let res = order(&app, &a, "buy", json!("0.5"), json!(price)).await;
        assert_eq!(res.status(), StatusCode::NO_CONTENT);
    }

    let res = get(&app, "/v1/order_book/btc?depth=2").await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers().get("x-effective-depth").unwrap(), "2");
    let snap = body_json(res).await;
    assert_eq!(snap["asset_code"], "BTC");
    assert_eq!(snap["quote"], "BRL");
    assert_eq!(snap["bids"], json!([["99", "0.5"], ["98", "0.5"]]));
    assert!(snap["asks"].as_array().unwrap().is_empty());

    let res = get(&app, "/v1/order_book/BTC?depth=5000").await;
    assert_eq!(res.headers().get("x-effective-depth").unwrap(), "100");
}

#[tokio::test]
async fn order_book_for_unlisted_asset_is_404() {
    let app = test_app();
    let res = get(&app, "/v1/order_book/DOGE").await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(res).await["error"], "UNKNOWN_ASSET");
}

#[tokio::test]
async fn orders_list_with_status_and_filters() {
    let app = test_app();
    let a = create_account(&app, "A").await;
    let b = create_account(&app, "B").await;
    charge(&app, &a, "BTC", json!(3)).await;
    charge(&app, &b, "BRL", json!(1000)).await;
    order(&app, &a, "sell", json!(3), json!(100)).await;
    order(&app, &b, "buy", json!(1), json!(100)).await;

    let v = body_json(get(&app, "/v1/order_book").await).await;
    assert_eq!(v["total"], 2);
    let ask = &v["items"][0];
    assert_eq!(ask["type"], "sell");
    assert_eq!(ask["status"], "partially_filled");
    assert_eq!(ask["total_quantity"], "3");
    assert_eq!(ask["filled_quantity"], "1");
    assert_eq!(v["items"][1]["status"], "full_filled");

    let v = body_json(get(&app, &format!("/v1/order_book?account_id={b}")).await).await;
    assert_eq!(v["total"], 1);
    assert_eq!(v["items"][0]["account_id"], b.as_str());

    let v = body_json(get(&app, "/v1/order_book?asset_code=ETH").await).await;
    assert_eq!(v["total"], 0);
    let v = body_json(get(&app, "/v1/order_book?status=open").await).await;
    assert_eq!(v["total"], 0);

    let res = get(&app, "/v1/order_book?account_id=nope").await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn single_order_lookup() {
    let app = test_app();
    let a = create_account(&app, "A").await;
    charge(&app, &a, "BTC", json!(1)).await;
    order(&app, &a, "sell", json!(1), json!(100)).await;

    let v = body_json(get(&app, "/v1/order_book").await).await;
    let id = v["items"][0]["id"].as_str().unwrap().to_string();

    let res = get(&app, &format!("/v1/order_book/btc/{id}")).await;
    assert_eq!(res.status(), StatusCode::OK);
    let o = body_json(res).await;
    assert_eq!(o["status"], "open");
    assert_eq!(o["asset_code"], "BTC");
    assert_eq!(o["price"], "100");

    let res = get(&app, &format!("/v1/order_book/ETH/{id}")).await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(res).await["error"], "UNKNOWN_ORDER");

    let res = get(&app, "/v1/order_book/BTC/not-a-uuid").await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn order_too_large_for_the_ledger_is_422_and_not_booked() {
    let app = test_app();
    let a = create_account(&app, "A").await;
    charge(&app, &a, "BRL", json!(1000)).await;

    let res = order(&app, &a, "buy", json!("80000000000000000"), json!(1)).await;
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body_json(res).await["error"], "INVALID_AMOUNT");

    let v = body_json(get(&app, "/v1/order_book").await).await;
    assert_eq!(v["total"], 0);
    let v = body_json(get(&app, &format!("/v1/accounts/{a}")).await).await;
    assert_eq!(balance_of(&v, "BRL").as_deref(), Some("1000"));
}
