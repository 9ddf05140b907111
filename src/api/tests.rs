use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use tower::ServiceExt;

use crate::database::AppState;
use crate::models::{Cents, User};
use crate::request_state::{DEVICE_ID_HEADER, QR_SECRET_HEADER};
use crate::server::app;
use crate::test_utils::{memory_state, FixedPaymentSimulator};

struct TestRequest {
    method: Method,
    uri: String,
    token: Option<String>,
    secret: Option<String>,
    device: Option<String>,
    body: Option<Value>,
    raw: Option<&'static str>,
}

impl TestRequest {
    fn get(uri: &str) -> Self {
        Self::new(Method::GET, uri)
    }

    fn post(uri: &str, body: Value) -> Self {
        let mut req = Self::new(Method::POST, uri);
        req.body = Some(body);
        req
    }

    fn new(method: Method, uri: &str) -> Self {
        TestRequest {
            method,
            uri: format!("/api/v1{uri}"),
            token: None,
            secret: None,
            device: None,
            body: None,
            raw: None,
        }
    }

    /// Send `raw` as the body without a content type
    fn raw(mut self, raw: &'static str) -> Self {
        self.raw = Some(raw);
        self
    }

    fn token(mut self, token: &str) -> Self {
        self.token = Some(token.to_owned());
        self
    }

    fn secret(mut self, secret: &str) -> Self {
        self.secret = Some(secret.to_owned());
        self
    }

    fn device(mut self, device: &str) -> Self {
        self.device = Some(device.to_owned());
        self
    }

    async fn send(self, app: &Router) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(self.method).uri(self.uri);
        if let Some(token) = self.token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        if let Some(secret) = self.secret {
            builder = builder.header(QR_SECRET_HEADER, secret);
        }
        if let Some(device) = self.device {
            builder = builder.header(DEVICE_ID_HEADER, device);
        }
        let body = match self.body {
            Some(body) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(body.to_string())
            }
            None => self.raw.map(Body::from).unwrap_or_else(Body::empty),
        };

        let response = app
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }
}

/// A user with two products in the cart, 11.25 + 16.25
async fn shopper(state: &AppState, name: &str) -> (User, String) {
    let user = state
        .identities
        .create_user(name, "0500000009", None)
        .await
        .unwrap();
    let bread = state
        .ledger
        .insert_product("Bread", Cents(1125))
        .await
        .unwrap();
    let cheese = state
        .ledger
        .insert_product("Cheese", Cents(1625))
        .await
        .unwrap();
    state.ledger.put_cart_item(user.id, bread.id, 1).await.unwrap();
    state.ledger.put_cart_item(user.id, cheese.id, 1).await.unwrap();

    let token = state.tokens.mint(user.id);
    (user, token)
}

fn assert_error(body: &Value, code: &str) {
    assert_eq!(body["success"], json!(false));
    assert_eq!(body["code"], json!(code), "unexpected body {body}");
}

#[tokio::test]
async fn test_qr_login_flow() {
    let (_, state) = memory_state(FixedPaymentSimulator::approve());
    let (user, phone_token) = shopper(&state, "Layla").await;
    let app = app(state);

    let (status, body) = TestRequest::post("/auth/qr/session", json!({"deviceInfo": "cart-7"}))
        .send(&app)
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["success"], json!(true));
    let session_id = body["data"]["sessionId"].as_str().unwrap().to_owned();
    let secret = body["data"]["secret"].as_str().unwrap().to_owned();
    assert_ne!(session_id, secret);
    assert!(body["data"]["qrData"]
        .as_str()
        .unwrap()
        .ends_with(&format!("/authorize-cart?session={session_id}")));

    let status_uri = format!("/auth/qr/status/{session_id}");
    let (status, body) = TestRequest::get(&status_uri).send(&app).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_error(&body, "SECRET_REQUIRED");

    let (status, body) = TestRequest::get(&status_uri)
        .secret("not-the-secret")
        .send(&app)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_error(&body, "INVALID_SECRET");

    let (status, body) = TestRequest::get(&status_uri)
        .secret(&secret)
        .send(&app)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], json!("pending"));
    assert!(body["data"].get("token").is_none());

    let info_uri = format!("/auth/qr/info/{session_id}");
    let (status, _) = TestRequest::get(&info_uri).send(&app).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = TestRequest::get(&info_uri)
        .token(&phone_token)
        .send(&app)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["deviceInfo"], json!("cart-7"));
    assert_eq!(body["data"]["status"], json!("pending"));
    assert!(body["data"].get("secret").is_none());

    let (status, body) =
        TestRequest::post("/auth/qr/authorize", json!({ "sessionId": session_id }))
            .token(&phone_token)
            .send(&app)
            .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], json!("authorized"));
    assert_eq!(body["data"]["user"]["name"], json!("Layla"));

    let (status, body) =
        TestRequest::post("/auth/qr/authorize", json!({ "sessionId": session_id }))
            .token(&phone_token)
            .send(&app)
            .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_error(&body, "SESSION_INVALID_STATUS");

    let (status, body) = TestRequest::get(&status_uri)
        .secret(&secret)
        .send(&app)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], json!("authorized"));
    assert_eq!(body["data"]["user"]["id"], json!(user.id));
    let cart_token = body["data"]["token"].as_str().unwrap().to_owned();

    let (status, body) = TestRequest::get("/auth/me")
        .token(&cart_token)
        .send(&app)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["id"], json!(user.id));

    let (status, body) = TestRequest::get(&status_uri)
        .secret(&secret)
        .send(&app)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], json!("used"));
    assert!(body["data"].get("token").is_none());
}

#[tokio::test]
async fn test_qr_session_without_body() {
    let (_, state) = memory_state(FixedPaymentSimulator::approve());
    let app = app(state);

    let (status, body) = TestRequest::new(Method::POST, "/auth/qr/session")
        .send(&app)
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(body["data"]["expiresAt"].is_string());
}

#[tokio::test]
async fn test_qr_session_with_malformed_body() {
    let (_, state) = memory_state(FixedPaymentSimulator::approve());
    let app = app(state);

    let (status, body) = TestRequest::new(Method::POST, "/auth/qr/session")
        .raw("  \n")
        .send(&app)
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(body["data"]["sessionId"].is_string());

    let (status, body) = TestRequest::new(Method::POST, "/auth/qr/session")
        .raw("{\"deviceInfo\": ")
        .send(&app)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_error(&body, "INVALID_BODY");

    let (status, body) = TestRequest::post("/auth/qr/session", json!({"deviceInfo": 7}))
        .send(&app)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_error(&body, "INVALID_BODY");
}

#[tokio::test]
async fn test_qr_unknown_session() {
    let (_, state) = memory_state(FixedPaymentSimulator::approve());
    let (_, token) = shopper(&state, "Layla").await;
    let app = app(state);

    let (status, body) = TestRequest::get("/auth/qr/status/does-not-exist")
        .secret("whatever")
        .send(&app)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_error(&body, "SESSION_NOT_FOUND");

    let (status, body) = TestRequest::post("/auth/qr/authorize", json!({}))
        .token(&token)
        .send(&app)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_error(&body, "SESSION_ID_REQUIRED");
}

#[tokio::test]
async fn test_token_errors() {
    let (_, state) = memory_state(FixedPaymentSimulator::approve());
    let (user, _) = shopper(&state, "Layla").await;
    let expired = state
        .tokens
        .mint_at(user.id, Utc::now() - Duration::days(30));
    let app = app(state);

    let (status, body) = TestRequest::get("/auth/me").send(&app).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_error(&body, "UNAUTHORIZED");

    let (status, body) = TestRequest::get("/auth/me")
        .token("garbage")
        .send(&app)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_error(&body, "TOKEN_INVALID");

    let (status, body) = TestRequest::get("/auth/me")
        .token(&expired)
        .send(&app)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_error(&body, "TOKEN_EXPIRED");
}

#[tokio::test]
async fn test_nfc_link_and_unlink() {
    let (_, state) = memory_state(FixedPaymentSimulator::approve());
    let (_, layla) = shopper(&state, "Layla").await;
    let (_, omar) = shopper(&state, "Omar").await;
    let app = app(state);

    let (status, body) = TestRequest::get("/auth/nfc/status")
        .token(&layla)
        .send(&app)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["isLinked"], json!(false));

    let (status, body) = TestRequest::new(Method::DELETE, "/auth/nfc/unlink")
        .token(&layla)
        .send(&app)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_error(&body, "NO_NFC_LINKED");

    let (status, body) = TestRequest::post("/auth/nfc/link", json!({"nfcUid": "  "}))
        .token(&layla)
        .send(&app)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_error(&body, "NFC_UID_REQUIRED");

    let (status, body) = TestRequest::post("/auth/nfc/link", json!({"nfcUid": "04C0FFEE"}))
        .token(&layla)
        .send(&app)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["nfcUid"], json!("04C0FFEE"));

    let (status, body) = TestRequest::post("/auth/nfc/link", json!({"nfcUid": "04C0FFEE"}))
        .token(&omar)
        .send(&app)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["success"], json!(false));

    let (status, body) = TestRequest::get("/auth/nfc/status")
        .token(&layla)
        .send(&app)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["isLinked"], json!(true));
    assert_eq!(body["data"]["nfcUid"], json!("04C0FFEE"));

    let (status, _) = TestRequest::new(Method::DELETE, "/auth/nfc/unlink")
        .token(&layla)
        .send(&app)
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = TestRequest::post("/auth/nfc/link", json!({"nfcUid": "04C0FFEE"}))
        .token(&omar)
        .send(&app)
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_nfc_payment_approved() {
    let (_, state) = memory_state(FixedPaymentSimulator::approve());
    let (user, token) = shopper(&state, "Layla").await;
    state.identities.link(user.id, "04AA").await.unwrap();
    let app = app(state);

    let (status, body) = TestRequest::post("/nfc/payment", json!({"uid": "04AA"}))
        .send(&app)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["userId"], json!(user.id));
    assert_eq!(body["data"]["userName"], json!("Layla"));
    assert_eq!(body["data"]["total"], json!(27.5));
    assert_eq!(body["data"]["itemCount"], json!(2));
    assert_eq!(body["data"]["status"], json!("completed"));
    let transaction_id = body["data"]["transactionId"].as_u64().unwrap();

    // The cart was emptied by the payment
    let (status, body) = TestRequest::post("/nfc/payment", json!({"nfc_uid": "04AA"}))
        .send(&app)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_error(&body, "CART_EMPTY");

    let (status, body) = TestRequest::get("/nfc/events?unprocessed=true")
        .send(&app)
        .await;
    assert_eq!(status, StatusCode::OK);
    let events = body["data"].as_array().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["event"], json!("payment_success"));
    assert_eq!(events[0]["transactionId"], json!(transaction_id));

    let (status, body) = TestRequest::get(&format!("/checkout/history/{transaction_id}"))
        .token(&token)
        .send(&app)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["nfcUid"], json!("04AA"));
    assert_eq!(body["data"]["items"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_nfc_payment_declined() {
    let (_, state) = memory_state(FixedPaymentSimulator::decline());
    let (user, token) = shopper(&state, "Layla").await;
    state.identities.link(user.id, "04AA").await.unwrap();
    let app = app(state);

    let (status, body) = TestRequest::post("/nfc/payment", json!({"uid": "04AA"}))
        .send(&app)
        .await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_error(&body, "PAYMENT_DECLINED");
    assert_eq!(body["data"]["status"], json!("failed"));
    assert_eq!(body["data"]["total"], json!(27.5));

    let (status, body) = TestRequest::get("/checkout/stats")
        .token(&token)
        .send(&app)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["totalTransactions"], json!(1));
    assert_eq!(body["data"]["failedCount"], json!(1));
    assert_eq!(body["data"]["totalSpent"], json!(0.0));
}

#[tokio::test]
async fn test_nfc_payment_unknown_card() {
    let (_, state) = memory_state(FixedPaymentSimulator::approve());
    let app = app(state);

    let (status, body) = TestRequest::post("/nfc/payment", json!({"uid": "FFFF"}))
        .send(&app)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_error(&body, "NFC_NOT_LINKED");

    let (status, body) = TestRequest::post("/nfc/payment", json!({}))
        .send(&app)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_error(&body, "NFC_UID_REQUIRED");
}

#[tokio::test]
async fn test_rejected_json_bodies_use_error_envelope() {
    let (_, state) = memory_state(FixedPaymentSimulator::approve());
    let (_, token) = shopper(&state, "Ines").await;
    let app = app(state);

    let (status, body) = TestRequest::new(Method::POST, "/nfc/events")
        .raw("uid=04A1B2")
        .send(&app)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], json!(false));
    assert_error(&body, "JSON_BODY_REQUIRED");

    let (status, body) = TestRequest::post("/nfc/payment", json!({"uid": 4660}))
        .send(&app)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], json!(false));
    assert_error(&body, "INVALID_BODY");

    let (status, body) = TestRequest::new(Method::POST, "/checkout")
        .token(&token)
        .send(&app)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_error(&body, "JSON_BODY_REQUIRED");

    let (status, body) = TestRequest::post("/nfc/mark-processed", json!({"total": "lots"}))
        .send(&app)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_error(&body, "INVALID_BODY");
}

#[tokio::test]
async fn test_nfc_events_feed() {
    let (_, state) = memory_state(FixedPaymentSimulator::approve());
    let app = app(state);

    let (status, body) = TestRequest::post("/nfc/events", json!({}))
        .send(&app)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_error(&body, "NFC_UID_REQUIRED");

    let (status, body) = TestRequest::post("/nfc/events", json!({"uid": "04AA", "event": "nope"}))
        .send(&app)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_error(&body, "INVALID_EVENT");

    let (status, body) = TestRequest::post("/nfc/events", json!({"uid": "04AA"}))
        .device("reader-3")
        .send(&app)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["event"], json!("detected"));
    assert_eq!(body["data"]["deviceId"], json!("reader-3"));
    assert_eq!(body["data"]["processed"], json!(false));
    let event_id = body["data"]["id"].as_u64().unwrap();

    let (status, body) = TestRequest::post("/nfc/mark-processed", json!({"eventId": 999_999}))
        .send(&app)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_error(&body, "NFC_EVENT_NOT_FOUND");

    let (status, body) = TestRequest::post("/nfc/mark-processed", json!({"uid": "04AA"}))
        .send(&app)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_error(&body, "EVENT_ID_REQUIRED");

    for _ in 0..2 {
        let (status, _) = TestRequest::post(
            "/nfc/mark-processed",
            json!({"eventId": event_id, "userName": "Layla", "total": 12.5}),
        )
        .send(&app)
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (_, body) = TestRequest::get("/nfc/events?unprocessed=true")
        .send(&app)
        .await;
    assert!(body["data"].as_array().unwrap().is_empty());

    let (_, body) = TestRequest::get("/nfc/events").send(&app).await;
    let events = body["data"].as_array().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["processed"], json!(true));
    assert_eq!(events[0]["total"], json!(12.5));
}

#[tokio::test]
async fn test_checkout_and_history() {
    let (store, state) = memory_state(FixedPaymentSimulator::approve());
    let (_, layla) = shopper(&state, "Layla").await;
    let (_, omar) = shopper(&state, "Omar").await;
    store.set_payment_method_enabled(4, false).await;
    let app = app(state);

    let (status, body) = TestRequest::get("/checkout/payment-methods").send(&app).await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["Mada Pay", "Apple Pay", "Google Pay"]);

    let (status, body) = TestRequest::post("/checkout", json!({"paymentMethodId": 4}))
        .token(&layla)
        .send(&app)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_error(&body, "INVALID_PAYMENT_METHOD");

    let (status, body) = TestRequest::post("/checkout", json!({}))
        .token(&layla)
        .send(&app)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_error(&body, "PAYMENT_METHOD_REQUIRED");

    let (status, body) = TestRequest::post("/checkout", json!({"paymentMethodId": 1}))
        .token(&layla)
        .send(&app)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], json!("completed"));
    assert_eq!(body["data"]["total"], json!(27.5));
    assert!(body["data"]["completedAt"].is_string());
    let transaction_id = body["data"]["id"].as_u64().unwrap();

    let (status, body) = TestRequest::get("/checkout/history?status=completed")
        .token(&layla)
        .send(&app)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    let (status, body) = TestRequest::get("/checkout/history?status=bogus")
        .token(&layla)
        .send(&app)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_error(&body, "INVALID_STATUS");

    // Someone else's transaction and a missing one look the same
    let uri = format!("/checkout/history/{transaction_id}");
    let (status, body) = TestRequest::get(&uri).token(&omar).send(&app).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_error(&body, "FORBIDDEN");

    let (status, body) = TestRequest::get("/checkout/history/999999")
        .token(&layla)
        .send(&app)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_error(&body, "FORBIDDEN");

    let (status, body) = TestRequest::get("/checkout/history")
        .token(&omar)
        .send(&app)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"].as_array().unwrap().is_empty());

    let (status, _) = TestRequest::get("/checkout/history").send(&app).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_api_documentation() {
    let (_, state) = memory_state(FixedPaymentSimulator::approve());
    let app = app(state);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/docs/api.json")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let docs: Value = serde_json::from_slice(&bytes).unwrap();
    assert!(docs["paths"]["/api/v1/auth/qr/session"].is_object());
    assert!(docs["paths"]["/api/v1/nfc/payment"].is_object());
}
