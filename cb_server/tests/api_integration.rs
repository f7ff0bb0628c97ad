//! HTTP tests for the settlement server, run against the in-memory store.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use cb_server::api::{AppState, create_router};
use chrono::{Duration, Utc};
use courtbook::auth::TokenVerifier;
use courtbook::db::{InMemoryStore, InviteRepository, ReservationRepository};
use courtbook::invites::NewInvite;
use courtbook::money::Amount;
use courtbook::notifications::NotificationQueue;
use courtbook::payments::{
    ChargeRequest, GatewayResponse, GatewayResult, PaymentGateway, PaymentRecordStatus,
};
use courtbook::reservation::{
    AccountId, NewParticipant, NewReservation, Participant, ParticipantOrigin, PaymentStatus,
    Reservation,
};
use courtbook::security::SecurityEventKind;
use courtbook::{ContextConfig, SettlementContext};
use http_body_util::BodyExt;
use rust_decimal::Decimal;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tower::ServiceExt; // For `oneshot` method
use uuid::Uuid;

const WEBHOOK_SECRET: &str = "whsec_http_test_secret";
const CRON_SECRET: &str = "cron_http_test_secret";
const JWT_SECRET: &str = "jwt_http_test_secret_with_32_chars!!";

/// Gateway that leaves every charge pending
struct PendingGateway {
    issued: AtomicUsize,
}

impl PendingGateway {
    fn answer(&self) -> GatewayResult<GatewayResponse> {
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(GatewayResponse {
            external_id: format!("pay_{n}"),
            status: PaymentRecordStatus::Pending,
        })
    }
}

#[async_trait]
impl PaymentGateway for PendingGateway {
    fn name(&self) -> &str {
        "fake"
    }

    async fn charge(&self, _request: &ChargeRequest) -> GatewayResult<GatewayResponse> {
        self.answer()
    }

    async fn pre_authorize(&self, _request: &ChargeRequest) -> GatewayResult<GatewayResponse> {
        self.answer()
    }

    async fn capture(&self, _external_id: &str, _amount: Amount) -> GatewayResult<GatewayResponse> {
        self.answer()
    }

    async fn refund(
        &self,
        _external_id: &str,
        _amount: Option<Amount>,
    ) -> GatewayResult<GatewayResponse> {
        self.answer()
    }
}

struct TestServer {
    app: axum::Router,
    context: SettlementContext,
    store: Arc<InMemoryStore>,
    tokens: TokenVerifier,
}

fn create_test_server() -> TestServer {
    let store = Arc::new(InMemoryStore::new());
    let gateway = Arc::new(PendingGateway {
        issued: AtomicUsize::new(0),
    });
    let context = SettlementContext::new(
        store.clone(),
        gateway,
        NotificationQueue::disabled(),
        ContextConfig::new(WEBHOOK_SECRET),
    );
    let state = AppState::new(
        context.clone(),
        TokenVerifier::new(JWT_SECRET.to_string()).unwrap(),
        CRON_SECRET.to_string(),
        None,
    );

    TestServer {
        app: create_router(state),
        context,
        store,
        tokens: TokenVerifier::new(JWT_SECRET.to_string()).unwrap(),
    }
}

fn money(cents: i64) -> Amount {
    Decimal::new(cents, 2)
}

async fn reservation(server: &TestServer, total: Amount, hours_ahead: i64) -> Reservation {
    server
        .store
        .create_reservation(NewReservation {
            organizer_id: Uuid::new_v4(),
            court_id: Uuid::new_v4(),
            starts_at: Utc::now() + Duration::hours(hours_ahead),
            total_price: total,
        })
        .await
        .unwrap()
}

async fn participant(
    server: &TestServer,
    reservation: &Reservation,
    account_id: AccountId,
    amount_due: Amount,
) -> Participant {
    server
        .store
        .add_participant(NewParticipant {
            reservation_id: reservation.id,
            account_id: Some(account_id),
            name: "Player".to_string(),
            email: None,
            phone: None,
            origin: ParticipantOrigin::Roster,
            amount_due: Some(amount_due),
            payment_status: PaymentStatus::Pending,
        })
        .await
        .unwrap()
}

fn post_json(uri: &str, bearer: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(token) = bearer {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn signed_webhook(request_id: &str, event: &str, external_id: &str) -> Request<Body> {
    let body = serde_json::to_vec(&json!({
        "event": event,
        "payment": { "id": external_id },
    }))
    .unwrap();
    let signature = courtbook::payments::signature::sign(WEBHOOK_SECRET, &body);

    Request::builder()
        .method("POST")
        .uri("/webhooks/fake")
        .header("x-request-id", request_id)
        .header("x-gateway-signature", signature)
        .body(Body::from(body))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

// ============================================================================
// Health Check Tests
// ============================================================================

#[tokio::test]
async fn test_health_check_endpoint() {
    let server = create_test_server();

    let request = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let response = server.app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
    let body = body_json(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["gateway"], "fake");
}

// ============================================================================
// Settlement Trigger Tests
// ============================================================================

#[tokio::test]
async fn test_settlement_run_requires_cron_secret() {
    let server = create_test_server();

    let missing = server
        .app
        .clone()
        .oneshot(post_json("/api/v1/settlement/run", None, json!({})))
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

    let wrong = server
        .app
        .clone()
        .oneshot(post_json(
            "/api/v1/settlement/run",
            Some("cron_http_test_secreT"),
            json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);

    let events = server.context.security.recent(10).await;
    assert_eq!(events.len(), 2);
    assert!(events
        .iter()
        .all(|e| e.kind == SecurityEventKind::InvalidCronSecret));
}

#[tokio::test]
async fn test_settlement_run_closes_due_reservations() {
    let server = create_test_server();
    let due = reservation(&server, money(5000), 1).await;
    let later = reservation(&server, money(5000), 48).await;
    server
        .context
        .wallets
        .top_up(due.organizer_id, money(5000), "top-up-1".to_string())
        .await
        .unwrap();

    let response = server
        .app
        .clone()
        .oneshot(post_json("/api/v1/settlement/run", Some(CRON_SECRET), json!({})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body, json!({"processed": 1, "errors": 0, "total": 1}));

    let confirmed = server.store.get_reservation(due.id).await.unwrap().unwrap();
    assert_eq!(
        confirmed.status,
        courtbook::reservation::ReservationStatus::Confirmed
    );
    let untouched = server.store.get_reservation(later.id).await.unwrap().unwrap();
    assert_eq!(
        untouched.status,
        courtbook::reservation::ReservationStatus::Pending
    );

    // A second run finds nothing left to close
    let again = server
        .app
        .oneshot(post_json("/api/v1/settlement/run", Some(CRON_SECRET), json!({})))
        .await
        .unwrap();
    assert_eq!(
        body_json(again).await,
        json!({"processed": 0, "errors": 0, "total": 0})
    );
}

#[tokio::test]
async fn test_settlement_run_reports_unfunded_organizer() {
    let server = create_test_server();
    reservation(&server, money(8000), 1).await;

    let response = server
        .app
        .oneshot(post_json("/api/v1/settlement/run", Some(CRON_SECRET), json!({})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_json(response).await,
        json!({"processed": 0, "errors": 1, "total": 1})
    );
}

#[tokio::test]
async fn test_security_events_endpoint() {
    let server = create_test_server();

    // Generates one invalid_cron_secret event
    server
        .app
        .clone()
        .oneshot(post_json("/api/v1/settlement/run", Some("nope"), json!({})))
        .await
        .unwrap();

    let request = Request::builder()
        .uri("/api/v1/security/events?limit=5")
        .header("authorization", format!("Bearer {CRON_SECRET}"))
        .body(Body::empty())
        .unwrap();
    let response = server.app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["capacity"], 500);
    assert_eq!(body["events"].as_array().unwrap().len(), 1);
    assert_eq!(body["events"][0]["kind"], "invalid_cron_secret");
}

// ============================================================================
// Webhook Tests
// ============================================================================

#[tokio::test]
async fn test_webhook_unknown_gateway_is_not_found() {
    let server = create_test_server();

    let request = Request::builder()
        .method("POST")
        .uri("/webhooks/other")
        .body(Body::from("{}"))
        .unwrap();
    let response = server.app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_webhook_bad_signature_is_unauthorized() {
    let server = create_test_server();

    let request = Request::builder()
        .method("POST")
        .uri("/webhooks/fake")
        .header("x-request-id", "evt-forged")
        .header("x-gateway-signature", "deadbeef")
        .body(Body::from(r#"{"event":"PAYMENT_RECEIVED","payment":{"id":"pay_1"}}"#))
        .unwrap();
    let response = server.app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let events = server.context.security.recent(1).await;
    assert_eq!(events[0].kind, SecurityEventKind::InvalidWebhookSignature);
}

#[tokio::test]
async fn test_webhook_confirms_pix_payment_once() {
    let server = create_test_server();
    let reservation = reservation(&server, money(7000), 6).await;
    let account = Uuid::new_v4();
    let player = participant(&server, &reservation, account, money(3500)).await;
    let token = server.tokens.issue_access_token(account).unwrap();

    let started = server
        .app
        .clone()
        .oneshot(post_json(
            "/api/v1/payments/process",
            Some(&token),
            json!({
                "reservation_id": reservation.id,
                "participant_id": player.id,
                "amount": "35.00",
                "method": "pix",
            }),
        ))
        .await
        .unwrap();
    assert_eq!(started.status(), StatusCode::OK);
    let outcome = body_json(started).await;
    assert_eq!(outcome["payment"]["status"], "pending");
    let external_id = outcome["payment"]["external_id"].as_str().unwrap().to_string();

    let first = server
        .app
        .clone()
        .oneshot(signed_webhook("evt-http-1", "PAYMENT_RECEIVED", &external_id))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(first.headers()["x-request-id"], "evt-http-1");
    let ack = body_json(first).await;
    assert_eq!(ack["outcome"], "processed");
    assert_eq!(ack["ok"], true);

    let replay = server
        .app
        .clone()
        .oneshot(signed_webhook("evt-http-1", "PAYMENT_RECEIVED", &external_id))
        .await
        .unwrap();
    assert_eq!(replay.status(), StatusCode::OK);
    assert_eq!(body_json(replay).await["outcome"], "replayed");

    let paid = server.store.get_participant(player.id).await.unwrap().unwrap();
    assert_eq!(paid.payment_status, PaymentStatus::Paid);
    assert_eq!(paid.amount_paid, money(3500));
}

#[tokio::test]
async fn test_webhook_processing_failure_still_answers_ok() {
    let server = create_test_server();

    let response = server
        .app
        .oneshot(signed_webhook("evt-orphan", "PAYMENT_RECEIVED", "pay_missing"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let ack = body_json(response).await;
    assert_eq!(ack["outcome"], "processed");
    assert_eq!(ack["ok"], false);
}

// ============================================================================
// Payment Tests
// ============================================================================

#[tokio::test]
async fn test_payment_requires_authentication() {
    let server = create_test_server();
    let body = json!({
        "reservation_id": Uuid::new_v4(),
        "amount": "10.00",
        "method": "pix",
    });

    let anonymous = server
        .app
        .clone()
        .oneshot(post_json("/api/v1/payments/process", None, body.clone()))
        .await
        .unwrap();
    assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);

    let garbage = server
        .app
        .oneshot(post_json("/api/v1/payments/process", Some("not.a.jwt"), body))
        .await
        .unwrap();
    assert_eq!(garbage.status(), StatusCode::UNAUTHORIZED);
    let events = server.context.security.recent(1).await;
    assert_eq!(events[0].kind, SecurityEventKind::InvalidAccessToken);
}

#[tokio::test]
async fn test_payment_by_stranger_is_forbidden() {
    let server = create_test_server();
    let reservation = reservation(&server, money(7000), 6).await;
    let player = participant(&server, &reservation, Uuid::new_v4(), money(3500)).await;
    let token = server.tokens.issue_access_token(Uuid::new_v4()).unwrap();

    let response = server
        .app
        .oneshot(post_json(
            "/api/v1/payments/process",
            Some(&token),
            json!({
                "reservation_id": reservation.id,
                "participant_id": player.id,
                "amount": "35.00",
                "method": "pix",
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_json(response).await["code"], "forbidden");
}

#[tokio::test]
async fn test_balance_payment_and_amount_mismatch() {
    let server = create_test_server();
    let reservation = reservation(&server, money(7000), 6).await;
    let account = Uuid::new_v4();
    let player = participant(&server, &reservation, account, money(3500)).await;
    server
        .context
        .wallets
        .top_up(account, money(5000), "top-up-1".to_string())
        .await
        .unwrap();
    let token = server.tokens.issue_access_token(account).unwrap();

    let mismatch = server
        .app
        .clone()
        .oneshot(post_json(
            "/api/v1/payments/process",
            Some(&token),
            json!({
                "reservation_id": reservation.id,
                "participant_id": player.id,
                "amount": "30.00",
                "method": "balance",
            }),
        ))
        .await
        .unwrap();
    assert_eq!(mismatch.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body_json(mismatch).await["code"], "amount_mismatch");

    let paid = server
        .app
        .oneshot(post_json(
            "/api/v1/payments/process",
            Some(&token),
            json!({
                "reservation_id": reservation.id,
                "participant_id": player.id,
                "amount": "35.00",
                "method": "balance",
            }),
        ))
        .await
        .unwrap();
    assert_eq!(paid.status(), StatusCode::OK);
    let outcome = body_json(paid).await;
    assert_eq!(outcome["participant"]["payment_status"], "paid");
    assert_eq!(outcome["payment"]["status"], "paid");
}

// ============================================================================
// Invite Tests
// ============================================================================

async fn invite(server: &TestServer, reservation: &Reservation, price: Amount) -> String {
    server
        .store
        .create_invite(NewInvite {
            token: format!("inv-{}", Uuid::new_v4().simple()),
            reservation_id: reservation.id,
            price_per_person: price,
            max_uses: Some(1),
            expires_at: Some(Utc::now() + Duration::days(1)),
        })
        .await
        .unwrap()
        .token
}

#[tokio::test]
async fn test_anonymous_invite_acceptance() {
    let server = create_test_server();
    let reservation = reservation(&server, money(9000), 24).await;
    let token = invite(&server, &reservation, money(1500)).await;
    let uri = format!("/api/v1/invites/{token}/accept");

    let accepted = server
        .app
        .clone()
        .oneshot(post_json(&uri, None, json!({"name": "Carla"})))
        .await
        .unwrap();
    assert_eq!(accepted.status(), StatusCode::CREATED);
    let body = body_json(accepted).await;
    assert_eq!(body["participant"]["payment_status"], "pending");
    assert_eq!(body["participant"]["origin"], "invite");

    let exhausted = server
        .app
        .oneshot(post_json(&uri, None, json!({"name": "Davi"})))
        .await
        .unwrap();
    assert_eq!(exhausted.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(exhausted).await["code"], "invite_exhausted");
}

#[tokio::test]
async fn test_invite_errors() {
    let server = create_test_server();
    let reservation = reservation(&server, money(9000), 24).await;
    let token = invite(&server, &reservation, money(0)).await;

    let unknown = server
        .app
        .clone()
        .oneshot(post_json(
            "/api/v1/invites/no-such-token/accept",
            None,
            json!({"name": "Eva"}),
        ))
        .await
        .unwrap();
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);

    let bad_token = server
        .app
        .clone()
        .oneshot(post_json(
            &format!("/api/v1/invites/{token}/accept"),
            Some("expired.or.forged"),
            json!({"name": "Eva"}),
        ))
        .await
        .unwrap();
    assert_eq!(bad_token.status(), StatusCode::UNAUTHORIZED);

    let blank = server
        .app
        .oneshot(post_json(
            &format!("/api/v1/invites/{token}/accept"),
            None,
            json!({"name": "  "}),
        ))
        .await
        .unwrap();
    assert_eq!(blank.status(), StatusCode::UNPROCESSABLE_ENTITY);
}
