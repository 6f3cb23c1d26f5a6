use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt;

use intake_api::API_PREFIX;
use intake_api::state::{AppState, AppStateInner, PaymentSettings};
use intake_api::storage::DocumentStorage;
use intake_db::Database;
use intake_payments::{OrderRequest, OrderResponse, PaymentError, PaymentGateway, TransactionStatus};
use intake_types::models::DocumentKind;
use intake_wizard::FileDraftStore;

const SECRET: &str = "test-secret-0123456789";

// -- Harness --

#[derive(Default)]
struct FakeGateway {
    fail_orders: bool,
    status: Mutex<String>,
    orders: Mutex<Vec<OrderRequest>>,
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn submit_order(&self, order: &OrderRequest) -> Result<OrderResponse, PaymentError> {
        if self.fail_orders {
            return Err(PaymentError::Status {
                status: 500,
                body: "upstream down".into(),
            });
        }
        self.orders.lock().unwrap().push(order.clone());
        Ok(OrderResponse {
            order_tracking_id: format!("track-{}", order.id),
            merchant_reference: order.id.clone(),
            redirect_url: "https://pay.example/checkout".into(),
        })
    }

    async fn transaction_status(
        &self,
        _order_tracking_id: &str,
    ) -> Result<TransactionStatus, PaymentError> {
        Ok(TransactionStatus {
            status_description: self.status.lock().unwrap().clone(),
            payment_method: Some("Visa".into()),
            confirmation_code: Some("CONF-1".into()),
        })
    }
}

struct TestApp {
    router: Router,
    state: AppState,
    gateway: Arc<FakeGateway>,
    _dir: TempDir,
}

fn app_with(gateway: FakeGateway) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let gateway = Arc::new(gateway);
    let state = AppStateInner::new(
        Database::open_in_memory().unwrap(),
        SECRET.into(),
        Box::new(FileDraftStore::new(dir.path().join("drafts")).unwrap()),
        DocumentStorage::new(dir.path().join("uploads")).unwrap(),
        gateway.clone(),
        PaymentSettings {
            public_url: "https://apply.example".into(),
            notification_id: Some("ipn-test".into()),
        },
    );
    TestApp {
        router: intake_api::router(state.clone(), None),
        state,
        gateway,
        _dir: dir,
    }
}

fn app() -> TestApp {
    app_with(FakeGateway::default())
}

impl TestApp {
    async fn call(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method(method)
            .uri(format!("{API_PREFIX}{uri}"));
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let body = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        self.finish(builder.body(body).unwrap()).await
    }

    async fn upload(&self, token: &str, kind: DocumentKind, bytes: &'static [u8]) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(Method::POST)
            .uri(format!("{API_PREFIX}/applications/current/documents/{}", kind.as_str()))
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .header(header::CONTENT_TYPE, "application/pdf")
            .header("x-file-name", format!("{}.pdf", kind.as_str()))
            .body(Body::from(bytes))
            .unwrap();
        self.finish(request).await
    }

    async fn finish(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    /// Sign up a client and return (token, user id).
    async fn signup(&self, email: &str, name: &str) -> (String, String) {
        let (status, body) = self
            .call(
                Method::POST,
                "/auth/signup",
                None,
                Some(json!({ "email": email, "password": "correct-horse", "name": name })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        (
            body["token"].as_str().unwrap().to_string(),
            body["user"]["id"].as_str().unwrap().to_string(),
        )
    }

    /// Create an account with a staff role and log in as it.
    async fn staff(&self, email: &str, role: &str) -> (String, String) {
        let (_, id) = self.signup(email, "Staff Member").await;
        assert!(self.state.db.set_user_role(&id, role).unwrap());
        let (status, body) = self
            .call(
                Method::POST,
                "/auth/login",
                None,
                Some(json!({ "email": email, "password": "correct-horse" })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        (body["token"].as_str().unwrap().to_string(), id)
    }

    async fn patch_fields(&self, token: &str, fields: Value) -> (StatusCode, Value) {
        self.call(
            Method::PATCH,
            "/applications/current",
            Some(token),
            Some(json!({ "fields": fields })),
        )
        .await
    }

    async fn advance(&self, token: &str) -> (StatusCode, Value) {
        self.call(Method::POST, "/applications/current/advance", Some(token), None)
            .await
    }
}

fn form_fields() -> Value {
    json!({
        "firstName": "Amina",
        "lastName": "Otieno",
        "email": "amina@example.com",
        "phone": "+254700000001",
        "companyName": "Savanna Solar Ltd",
        "registrationNumber": "PVT-2019-4411",
        "officialAddress": "14 Riverside Drive, Nairobi",
        "contactPerson": "Amina Otieno",
        "contactEmail": "finance@savanna.example",
        "foundingYear": "2019",
        "officeLocations": "Nairobi, Kisumu",
        "industry": "energy",
        "employees": "11-50",
        "foreignMarkets": "no",
        "previousFinancing": "yes",
        "businessModel": "Pay-as-you-go solar home systems",
        "competitiveAdvantage": "Local assembly and servicing network",
        "competitors": "SunKing, d.light",
        "shovelReady": "yes",
        "financingAmount": "250000",
        "interestRate": "9",
        "loanTerm": "36",
        "date": "2025-09-01"
    })
}

fn error_fields(body: &Value) -> Vec<String> {
    body["errors"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["field"].as_str().unwrap().to_string())
        .collect()
}

fn completed(body: &Value) -> Vec<u64> {
    body["completed_steps"]
        .as_array()
        .unwrap()
        .iter()
        .map(|n| n.as_u64().unwrap())
        .collect()
}

async fn fetch_text(router: &Router, uri: &str) -> (StatusCode, String) {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

fn stored_draft(app: &TestApp, application_id: &str) -> String {
    app.state
        .db
        .get_application(application_id)
        .unwrap()
        .unwrap()
        .draft
}

// -- Auth --

#[tokio::test]
async fn signup_validates_and_rejects_duplicates() {
    let app = app();

    let (status, body) = app
        .call(
            Method::POST,
            "/auth/signup",
            None,
            Some(json!({ "email": "not-an-email", "password": "short", "name": "A" })),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(error_fields(&body), vec!["email", "name", "password"]);

    app.signup("amina@example.com", "Amina Otieno").await;
    let (status, body) = app
        .call(
            Method::POST,
            "/auth/signup",
            None,
            Some(json!({ "email": "AMINA@example.com", "password": "another-pass", "name": "Amina" })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "CONFLICT");
}

#[tokio::test]
async fn login_redirects_by_role() {
    let app = app();
    app.signup("client@example.com", "Client Person").await;

    let (status, body) = app
        .call(
            Method::POST,
            "/auth/login",
            None,
            Some(json!({ "email": "client@example.com", "password": "correct-horse" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["redirect"], "/dashboard");
    assert_eq!(body["user"]["role"], "client");

    let (status, _) = app
        .call(
            Method::POST,
            "/auth/login",
            None,
            Some(json!({ "email": "client@example.com", "password": "wrong-horse" })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (reviewer, _) = app.staff("reviewer@example.com", "reviewer").await;
    let (_, me) = app.call(Method::GET, "/me", Some(&reviewer), None).await;
    assert_eq!(me["role"], "reviewer");

    let (_, body) = app
        .call(
            Method::POST,
            "/auth/login",
            None,
            Some(json!({ "email": "reviewer@example.com", "password": "correct-horse" })),
        )
        .await;
    assert_eq!(body["redirect"], "/reviewer");
}

#[tokio::test]
async fn protected_routes_need_a_valid_token() {
    let app = app();
    let (status, body) = app
        .call(Method::GET, "/applications/current", None, None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHORIZED");

    let (status, _) = app
        .call(Method::GET, "/applications/current", Some("not.a.jwt"), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = app.call(Method::GET, "/no/such/route", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn front_end_routes_are_not_shadowed_by_the_api() {
    let app = app();
    let site = tempfile::tempdir().unwrap();
    std::fs::write(site.path().join("index.html"), "<html>spa</html>").unwrap();
    let router = intake_api::router(app.state.clone(), Some(site.path().to_path_buf()));

    for route in [
        "/",
        "/application",
        "/dashboard",
        "/admin",
        "/payment-callback?OrderTrackingId=abc",
    ] {
        let (status, body) = fetch_text(&router, route).await;
        assert_eq!(status, StatusCode::OK, "{route}");
        assert_eq!(body, "<html>spa</html>", "{route}");
    }

    let (status, body) = fetch_text(&router, "/api/dashboard").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body.contains("UNAUTHORIZED"));

    let (status, body) = fetch_text(&router, "/api/no/such/route").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body.contains("NOT_FOUND"));
}

#[tokio::test]
async fn profile_update_and_role_guards() {
    let app = app();
    let (client, client_id) = app.signup("client@example.com", "Client Person").await;

    let (status, body) = app
        .call(Method::PATCH, "/me", Some(&client), Some(json!({ "name": "Client P." })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "Client P.");

    let (status, _) = app.call(Method::GET, "/admin/stats", Some(&client), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (admin, _) = app.staff("admin@example.com", "admin").await;
    let (status, body) = app
        .call(
            Method::PUT,
            &format!("/admin/users/{client_id}/role"),
            Some(&admin),
            Some(json!({ "role": "reviewer" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["role"], "reviewer");
}

// -- Wizard --

#[tokio::test]
async fn failing_step_keeps_the_pointer() {
    let app = app();
    let (token, _) = app.signup("amina@example.com", "Amina Otieno").await;

    let (status, state) = app
        .call(Method::GET, "/applications/current", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(state["step"], 1);
    assert_eq!(state["step_name"], "Personal Details");
    assert_eq!(state["total_steps"], 9);
    assert!(state["application_id"].is_null());

    app.patch_fields(
        &token,
        json!({ "firstName": "J", "lastName": "Otieno", "email": "amina@example.com", "phone": "+254700000001" }),
    )
    .await;
    let (status, body) = app.advance(&token).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["errors"][0]["field"], "firstName");
    assert_eq!(body["errors"][0]["message"], "First name is required");

    let (_, state) = app
        .call(Method::GET, "/applications/current", Some(&token), None)
        .await;
    assert_eq!(state["step"], 1);

    let (_, state) = app.patch_fields(&token, json!({ "firstName": "Jo" })).await;
    assert!(!state["application_id"].is_null());
    let (status, state) = app.advance(&token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(state["step"], 2);
    assert_eq!(completed(&state), vec![1]);
}

#[tokio::test]
async fn unknown_and_server_owned_fields_are_rejected() {
    let app = app();
    let (token, _) = app.signup("amina@example.com", "Amina Otieno").await;

    let (status, _) = app.patch_fields(&token, json!({ "favouriteColour": "blue" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app.patch_fields(&token, json!({ "paymentStatus": "completed" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .patch_fields(&token, json!({ "document.cr12": "forged" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn session_restores_from_storage() {
    let app = app();
    let (token, user_id) = app.signup("amina@example.com", "Amina Otieno").await;

    app.patch_fields(&token, form_fields()).await;
    for _ in 0..3 {
        assert_eq!(app.advance(&token).await.0, StatusCode::OK);
    }
    let (status, state) = app
        .call(
            Method::POST,
            "/applications/current/jump",
            Some(&token),
            Some(json!({ "step": 2 })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(state["step"], 2);

    let (status, _) = app
        .call(
            Method::POST,
            "/applications/current/jump",
            Some(&token),
            Some(json!({ "step": 7 })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    // Drop the in-memory session; the next request rebuilds it from the row
    app.state.sessions.evict(user_id.parse().unwrap());
    let (_, restored) = app
        .call(Method::GET, "/applications/current", Some(&token), None)
        .await;
    assert_eq!(restored["step"], 2);
    assert_eq!(completed(&restored), vec![1, 2, 3, 4, 5, 6]);
    assert_eq!(restored["draft"]["companyName"], "Savanna Solar Ltd");
    assert_eq!(restored["saved"], true);

    let (_, state) = app
        .call(Method::POST, "/applications/current/retreat", Some(&token), None)
        .await;
    assert_eq!(state["step"], 1);
}

#[tokio::test]
async fn failed_save_is_reported_and_retried() {
    let app = app();
    let (token, _) = app.signup("amina@example.com", "Amina Otieno").await;
    let (_, state) = app.patch_fields(&token, form_fields()).await;
    assert_eq!(state["saved"], true);
    let application_id = state["application_id"].as_str().unwrap().to_string();

    // Lock the row behind the cached session's back so the next write fails
    assert!(
        app.state
            .db
            .transition_status(&application_id, "draft", "submitted")
            .unwrap()
    );
    let (status, state) = app.patch_fields(&token, json!({ "firstName": "Amira" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(state["saved"], false);
    assert_eq!(state["draft"]["firstName"], "Amira");
    assert!(!stored_draft(&app, &application_id).contains("Amira"));

    assert!(
        app.state
            .db
            .transition_status(&application_id, "submitted", "draft")
            .unwrap()
    );
    let (status, state) = app.advance(&token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(state["saved"], true);
    assert_eq!(state["step"], 2);

    let row = app.state.db.get_application(&application_id).unwrap().unwrap();
    assert!(row.draft.contains("Amira"));
    assert_eq!(row.current_step, 2);
}

#[tokio::test]
async fn nda_signature_keeps_the_first_timestamp() {
    let app = app();
    let (token, _) = app.signup("amina@example.com", "Amina Otieno").await;

    let (status, first) = app
        .call(Method::POST, "/applications/current/nda", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK, "{first}");
    assert_eq!(first["signed"], true);
    assert!(first["signed_at"].is_string());

    // Signing created the application row
    let (_, state) = app
        .call(Method::GET, "/applications/current", Some(&token), None)
        .await;
    assert!(!state["application_id"].is_null());

    let (status, second) = app
        .call(Method::POST, "/applications/current/nda", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["signed_at"], first["signed_at"]);

    let (_, dashboard) = app.call(Method::GET, "/dashboard", Some(&token), None).await;
    assert_eq!(dashboard["nda"]["signed"], true);
    assert_eq!(dashboard["nda"]["signed_at"], first["signed_at"]);
}

#[tokio::test]
async fn undecodable_stored_draft_is_never_overwritten() {
    let app = app();
    let (token, user_id) = app.signup("amina@example.com", "Amina Otieno").await;
    let (_, state) = app.patch_fields(&token, form_fields()).await;
    let application_id = state["application_id"].as_str().unwrap().to_string();

    app.state
        .db
        .with_conn(|conn| {
            conn.execute(
                "UPDATE applications SET draft = '{\"companyName\": broken' WHERE id = ?1",
                [&application_id],
            )?;
            Ok(())
        })
        .unwrap();
    app.state.sessions.evict(user_id.parse().unwrap());

    let (status, _) = app.patch_fields(&token, json!({ "firstName": "Amira" })).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let (status, _) = app.advance(&token).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        stored_draft(&app, &application_id),
        "{\"companyName\": broken"
    );

    // Listings still show the application
    let (admin, _) = app.staff("admin@example.com", "admin").await;
    let (status, listed) = app
        .call(Method::GET, "/admin/applications", Some(&admin), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed[0]["id"], application_id.as_str());
    assert!(listed[0]["company_name"].is_null());
}

// -- Documents, payment, submission --

#[tokio::test]
async fn submit_requires_documents_and_payment() {
    let app = app();
    let (token, _) = app.signup("amina@example.com", "Amina Otieno").await;

    app.patch_fields(&token, form_fields()).await;
    for _ in 0..6 {
        assert_eq!(app.advance(&token).await.0, StatusCode::OK);
    }

    let (status, body) = app
        .call(Method::POST, "/applications/current/submit", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    let missing = error_fields(&body);
    assert!(missing.contains(&"document.projectSummary".to_string()));
    assert!(missing.contains(&"paymentStatus".to_string()));
    assert_eq!(missing.len(), DocumentKind::REQUIRED.len() + 1);

    let (status, body) = app.upload(&token, DocumentKind::Cr12, b"").await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");

    for kind in DocumentKind::REQUIRED {
        let (status, body) = app.upload(&token, kind, b"%PDF-1.7 test").await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        assert_eq!(body["status"], "pending");
        assert_eq!(body["size"], 13);
    }

    let (_, listing) = app
        .call(Method::GET, "/applications/current/documents", Some(&token), None)
        .await;
    assert_eq!(listing["documents"].as_array().unwrap().len(), 11);
    assert!(
        listing["required"]
            .as_array()
            .unwrap()
            .iter()
            .all(|d| d["uploaded"] == true)
    );

    let (status, state) = app.advance(&token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(state["step"], 8);

    let (status, body) = app
        .call(Method::POST, "/applications/current/submit", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(error_fields(&body), vec!["paymentStatus"]);

    // Pay the fee
    let (status, payment) = app
        .call(Method::POST, "/applications/current/payment", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::CREATED, "{payment}");
    assert_eq!(payment["redirect_url"], "https://pay.example/checkout");
    {
        let orders = app.gateway.orders.lock().unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].amount, 300);
        assert_eq!(orders[0].billing_address.first_name, "Amina");
        assert_eq!(orders[0].callback_url, "https://apply.example/payment-callback");
    }

    *app.gateway.status.lock().unwrap() = "COMPLETED".into();
    let tracking = payment["order_tracking_id"].as_str().unwrap();
    let (status, outcome) = app
        .call(
            Method::GET,
            &format!("/payment-callback?OrderTrackingId={tracking}"),
            None,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["status"], "success");
    assert_eq!(outcome["next"], "/dashboard");
    assert_eq!(outcome["payment_method"], "Visa");

    let (_, state) = app
        .call(Method::GET, "/applications/current", Some(&token), None)
        .await;
    assert_eq!(state["draft"]["paymentStatus"], "completed");
    assert_eq!(completed(&state), vec![1, 2, 3, 4, 5, 6, 7, 8]);

    let (status, state) = app
        .call(Method::POST, "/applications/current/submit", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK, "{state}");
    assert_eq!(state["status"], "submitted");

    let (status, _) = app.patch_fields(&token, json!({ "firstName": "Changed" })).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, dashboard) = app.call(Method::GET, "/dashboard", Some(&token), None).await;
    assert_eq!(dashboard["application"]["status"], "submitted");
    assert_eq!(dashboard["application"]["percent"], 100);
    assert_eq!(dashboard["payment"]["status"], "completed");
    assert_eq!(dashboard["payment"]["confirmation_code"], "CONF-1");
    assert_eq!(dashboard["documents"].as_array().unwrap().len(), 11);
}

#[tokio::test]
async fn callback_without_tracking_id_reports_failure() {
    let app = app();
    let (status, body) = app.call(Method::GET, "/payment-callback", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "failed");
    assert_eq!(body["next"], "/application");
    assert_eq!(body["message"], "Missing order tracking ID");
}

#[tokio::test]
async fn callback_for_an_unknown_order_reports_failure() {
    let app = app();
    *app.gateway.status.lock().unwrap() = "COMPLETED".into();

    let (status, body) = app
        .call(
            Method::GET,
            "/payment-callback?OrderTrackingId=never-issued",
            None,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "failed");
    assert_eq!(body["next"], "/application");
    assert_eq!(body["message"], "Could not verify payment status");
}

#[tokio::test]
async fn pending_callback_leaves_the_draft_unpaid() {
    let app = app();
    let (token, _) = app.signup("amina@example.com", "Amina Otieno").await;
    app.patch_fields(&token, form_fields()).await;

    let (_, payment) = app
        .call(Method::POST, "/applications/current/payment", Some(&token), None)
        .await;
    *app.gateway.status.lock().unwrap() = "INVALID".into();
    let tracking = payment["order_tracking_id"].as_str().unwrap();
    let (_, outcome) = app
        .call(
            Method::GET,
            &format!("/payment-callback?OrderTrackingId={tracking}"),
            None,
            None,
        )
        .await;
    assert_eq!(outcome["status"], "pending");
    assert_eq!(outcome["next"], "/application");

    let (_, state) = app
        .call(Method::GET, "/applications/current", Some(&token), None)
        .await;
    assert!(state["draft"]["paymentStatus"].is_null());
}

#[tokio::test]
async fn gateway_failure_is_a_bad_gateway() {
    let app = app_with(FakeGateway {
        fail_orders: true,
        ..FakeGateway::default()
    });
    let (token, _) = app.signup("amina@example.com", "Amina Otieno").await;

    let (status, _) = app
        .call(Method::POST, "/applications/current/payment", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    app.patch_fields(&token, form_fields()).await;
    let (status, body) = app
        .call(Method::POST, "/applications/current/payment", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"], "Could not initiate payment");
}

#[tokio::test]
async fn documents_are_private_to_owner_and_staff() {
    let app = app();
    let (owner, _) = app.signup("amina@example.com", "Amina Otieno").await;
    let (other, _) = app.signup("other@example.com", "Other Client").await;
    let (reviewer, _) = app.staff("reviewer@example.com", "reviewer").await;

    let (_, doc) = app.upload(&owner, DocumentKind::TaxCompliance, b"certificate").await;
    let uri = format!("/documents/{}", doc["id"].as_str().unwrap());

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("{API_PREFIX}{uri}"))
                .header(header::AUTHORIZATION, format!("Bearer {owner}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "application/pdf");
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"certificate");

    let (status, _) = app.call(Method::GET, &uri, Some(&other), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = app
        .call(
            Method::PUT,
            &format!("{uri}/status"),
            Some(&reviewer),
            Some(json!({ "status": "approved" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "approved");

    let (status, _) = app
        .call(
            Method::PUT,
            &format!("{uri}/status"),
            Some(&owner),
            Some(json!({ "status": "approved" })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

// -- Staff --

#[tokio::test]
async fn admin_assigns_and_reviewer_decides() {
    let app = app();
    let (client, client_id) = app.signup("amina@example.com", "Amina Otieno").await;
    let (admin, _) = app.staff("admin@example.com", "admin").await;
    let (reviewer, reviewer_id) = app.staff("reviewer@example.com", "reviewer").await;
    let (other_reviewer, _) = app.staff("second@example.com", "reviewer").await;

    let (_, state) = app.patch_fields(&client, form_fields()).await;
    let application_id = state["application_id"].as_str().unwrap().to_string();

    // Move it past draft without the full flow
    assert!(
        app.state
            .db
            .transition_status(&application_id, "draft", "submitted")
            .unwrap()
    );
    app.state.sessions.evict(client_id.parse().unwrap());

    let (_, listed) = app
        .call(Method::GET, "/admin/applications?status=submitted", Some(&admin), None)
        .await;
    assert_eq!(listed.as_array().unwrap().len(), 1);
    assert_eq!(listed[0]["company_name"], "Savanna Solar Ltd");

    let (status, _) = app
        .call(
            Method::POST,
            &format!("/admin/applications/{application_id}/assign"),
            Some(&admin),
            Some(json!({ "reviewer_id": client_id })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, assigned) = app
        .call(
            Method::POST,
            &format!("/admin/applications/{application_id}/assign"),
            Some(&admin),
            Some(json!({ "reviewer_id": reviewer_id })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(assigned["reviewer_id"], reviewer_id.as_str());

    let (_, mine) = app
        .call(Method::GET, "/reviewer/applications", Some(&reviewer), None)
        .await;
    assert_eq!(mine.as_array().unwrap().len(), 1);

    let status_uri = format!("/applications/{application_id}/status");
    let (status, _) = app
        .call(
            Method::PUT,
            &status_uri,
            Some(&other_reviewer),
            Some(json!({ "status": "under_review" })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .call(Method::PUT, &status_uri, Some(&reviewer), Some(json!({ "status": "approved" })))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    for next in ["under_review", "approved"] {
        let (status, body) = app
            .call(Method::PUT, &status_uri, Some(&reviewer), Some(json!({ "status": next })))
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["status"], next);
    }

    let (_, stats) = app.call(Method::GET, "/admin/stats", Some(&admin), None).await;
    assert_eq!(stats["total"], 1);
    let approved = stats["by_status"]
        .as_array()
        .unwrap()
        .iter()
        .find(|c| c["status"] == "approved")
        .unwrap();
    assert_eq!(approved["count"], 1);

    let (_, reviewers) = app.call(Method::GET, "/admin/reviewers", Some(&admin), None).await;
    assert_eq!(reviewers.as_array().unwrap().len(), 2);

    // A decided application is history; the applicant starts a new one
    let (_, fresh) = app
        .call(Method::GET, "/applications/current", Some(&client), None)
        .await;
    assert!(fresh["application_id"].is_null());
    assert_eq!(fresh["step"], 1);

    // The dashboard still reports the decided application from its row
    let (status, dashboard) = app.call(Method::GET, "/dashboard", Some(&client), None).await;
    assert_eq!(status, StatusCode::OK, "{dashboard}");
    assert_eq!(dashboard["application"]["id"], application_id.as_str());
    assert_eq!(dashboard["application"]["status"], "approved");
}

#[tokio::test]
async fn staff_read_application_details() {
    let app = app();
    let (client, _) = app.signup("amina@example.com", "Amina Otieno").await;
    let (admin, _) = app.staff("admin@example.com", "admin").await;
    let (reviewer, reviewer_id) = app.staff("reviewer@example.com", "reviewer").await;

    let (_, state) = app.patch_fields(&client, form_fields()).await;
    let application_id = state["application_id"].as_str().unwrap().to_string();
    let (status, _) = app.upload(&client, DocumentKind::Cr12, b"%PDF-1.7 cr12").await;
    assert_eq!(status, StatusCode::CREATED);
    app.call(Method::POST, "/applications/current/nda", Some(&client), None)
        .await;

    let detail_uri = format!("/applications/{application_id}");
    let (status, detail) = app.call(Method::GET, &detail_uri, Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK, "{detail}");
    assert_eq!(detail["application"]["applicant_email"], "amina@example.com");
    assert_eq!(detail["draft"]["companyName"], "Savanna Solar Ltd");
    assert_eq!(detail["nda"]["signed"], true);
    assert!(detail["payment"].is_null());
    let documents = detail["documents"].as_array().unwrap();
    assert_eq!(documents.len(), 1);
    let document_id = documents[0]["id"].as_str().unwrap().to_string();
    assert_eq!(detail["draft"]["document.cr12"], document_id.as_str());

    let (status, _) = app.call(Method::GET, &detail_uri, Some(&reviewer), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = app.call(Method::GET, &detail_uri, Some(&client), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    app.call(
        Method::POST,
        &format!("/admin/applications/{application_id}/assign"),
        Some(&admin),
        Some(json!({ "reviewer_id": reviewer_id })),
    )
    .await;
    let (status, detail) = app.call(Method::GET, &detail_uri, Some(&reviewer), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["application"]["reviewer_id"], reviewer_id.as_str());

    // The listed document id is enough to review it
    let (status, reviewed) = app
        .call(
            Method::PUT,
            &format!("/documents/{document_id}/status"),
            Some(&reviewer),
            Some(json!({ "status": "rejected" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reviewed["status"], "rejected");

    let (status, _) = app
        .call(
            Method::GET,
            "/applications/00000000-0000-4000-8000-000000000000",
            Some(&admin),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// -- Messaging --

#[tokio::test]
async fn applicant_and_reviewer_exchange_messages() {
    let app = app();
    let (client, _) = app.signup("amina@example.com", "Amina Otieno").await;
    let (other_client, other_id) = app.signup("other@example.com", "Other Client").await;
    let (reviewer, reviewer_id) = app.staff("reviewer@example.com", "reviewer").await;

    let (status, _) = app
        .call(
            Method::POST,
            "/conversations",
            Some(&client),
            Some(json!({ "participant_id": other_id })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, conversation) = app
        .call(
            Method::POST,
            "/conversations",
            Some(&client),
            Some(json!({ "participant_id": reviewer_id })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(conversation["participant"]["role"], "reviewer");
    let messages_uri = format!(
        "/conversations/{}/messages",
        conversation["id"].as_str().unwrap()
    );

    let (status, again) = app
        .call(
            Method::POST,
            "/conversations",
            Some(&client),
            Some(json!({ "participant_id": reviewer_id })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(again["id"], conversation["id"]);

    let (status, _) = app
        .call(Method::POST, &messages_uri, Some(&client), Some(json!({ "content": "   " })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, sent) = app
        .call(
            Method::POST,
            &messages_uri,
            Some(&client),
            Some(json!({ "content": "  When will my review start?  " })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(sent["content"], "When will my review start?");

    let (status, _) = app
        .call(Method::POST, &messages_uri, Some(&other_client), Some(json!({ "content": "hi" })))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (_, inbox) = app.call(Method::GET, "/conversations", Some(&reviewer), None).await;
    assert_eq!(inbox[0]["participant"]["name"], "Amina Otieno");
    assert_eq!(inbox[0]["last_message"]["is_read"], false);

    let (_, thread) = app.call(Method::GET, &messages_uri, Some(&reviewer), None).await;
    assert_eq!(thread.as_array().unwrap().len(), 1);
    assert_eq!(thread[0]["sender"]["role"], "client");

    let (_, inbox) = app.call(Method::GET, "/conversations", Some(&reviewer), None).await;
    assert_eq!(inbox[0]["last_message"]["is_read"], true);

    let (_, dashboard) = app.call(Method::GET, "/dashboard", Some(&client), None).await;
    assert_eq!(dashboard["unread_conversations"], 0);
}

#[tokio::test]
async fn message_history_pages_backwards() {
    let app = app();
    let (client, _) = app.signup("amina@example.com", "Amina Otieno").await;
    let (reviewer, reviewer_id) = app.staff("reviewer@example.com", "reviewer").await;

    let (_, conversation) = app
        .call(
            Method::POST,
            "/conversations",
            Some(&client),
            Some(json!({ "participant_id": reviewer_id })),
        )
        .await;
    let messages_uri = format!(
        "/conversations/{}/messages",
        conversation["id"].as_str().unwrap()
    );
    for content in ["first", "second", "third"] {
        let (status, _) = app
            .call(Method::POST, &messages_uri, Some(&client), Some(json!({ "content": content })))
            .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let contents = |page: &Value| -> Vec<String> {
        page.as_array()
            .unwrap()
            .iter()
            .map(|m| m["content"].as_str().unwrap().to_string())
            .collect()
    };

    let (status, latest) = app
        .call(Method::GET, &format!("{messages_uri}?limit=2"), Some(&reviewer), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(contents(&latest), vec!["second", "third"]);

    let oldest = latest[0]["id"].as_str().unwrap();
    let (_, older) = app
        .call(
            Method::GET,
            &format!("{messages_uri}?limit=2&before={oldest}"),
            Some(&reviewer),
            None,
        )
        .await;
    assert_eq!(contents(&older), vec!["first"]);

    let first = older[0]["id"].as_str().unwrap();
    let (_, rest) = app
        .call(
            Method::GET,
            &format!("{messages_uri}?before={first}"),
            Some(&reviewer),
            None,
        )
        .await;
    assert!(rest.as_array().unwrap().is_empty());
}
