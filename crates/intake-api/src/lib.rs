//! HTTP surface of the intake service: auth, the application wizard,
//! documents, payments, staff dashboards, and messaging.

pub mod applications;
pub mod auth;
pub mod conversations;
pub mod convert;
pub mod documents;
pub mod error;
pub mod middleware;
pub mod payments;
pub mod session;
pub mod staff;
pub mod state;
pub mod storage;

use std::path::PathBuf;

use axum::{
    Json, Router,
    extract::DefaultBodyLimit,
    middleware::from_fn_with_state,
    routing::{get, post, put},
};
use serde_json::{Value, json};
use tower_http::services::{ServeDir, ServeFile};

pub use error::{ApiError, ApiResult};
pub use state::{AppState, AppStateInner, PaymentSettings};

/// Prefix every API route is mounted under. Everything outside it belongs
/// to the front end's client-side routes.
pub const API_PREFIX: &str = "/api";

/// Build the full router. With `static_dir` set, paths outside `/api` serve
/// the front-end bundle (falling back to its `index.html`); otherwise they
/// get a JSON 404. Unknown `/api` paths are always a JSON 404.
pub fn router(state: AppState, static_dir: Option<PathBuf>) -> Router {
    let public_routes = Router::new()
        .route("/health", get(health))
        .route("/auth/signup", post(auth::signup))
        .route("/auth/login", post(auth::login))
        .route("/payment-callback", get(payments::callback))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/me", get(auth::me).patch(auth::update_me))
        .route("/dashboard", get(applications::dashboard))
        // Wizard
        .route(
            "/applications/current",
            get(applications::current).patch(applications::update),
        )
        .route("/applications/current/advance", post(applications::advance))
        .route("/applications/current/retreat", post(applications::retreat))
        .route("/applications/current/jump", post(applications::jump))
        .route("/applications/current/nda", post(applications::sign_nda))
        .route("/applications/current/submit", post(applications::submit))
        .route("/applications/current/payment", post(payments::initiate))
        // Documents
        .route("/applications/current/documents", get(documents::list))
        .route(
            "/applications/current/documents/{kind}",
            post(documents::upload)
                .layer(DefaultBodyLimit::max(documents::MAX_DOCUMENT_SIZE + 1)),
        )
        .route("/documents/{document_id}", get(documents::download))
        .route("/documents/{document_id}/status", put(documents::set_status))
        // Staff
        .route("/reviewer/applications", get(staff::assigned_applications))
        .route("/applications/{application_id}", get(staff::application_detail))
        .route("/applications/{application_id}/status", put(staff::update_status))
        .route("/admin/applications", get(staff::all_applications))
        .route(
            "/admin/applications/{application_id}/assign",
            post(staff::assign_reviewer),
        )
        .route("/admin/stats", get(staff::stats))
        .route("/admin/reviewers", get(staff::reviewers))
        .route("/admin/users/{user_id}/role", put(auth::set_role))
        // Messaging
        .route(
            "/conversations",
            get(conversations::list).post(conversations::open),
        )
        .route(
            "/conversations/{conversation_id}/messages",
            get(conversations::messages).post(conversations::send),
        )
        .layer(from_fn_with_state(state.clone(), middleware::require_auth))
        .with_state(state);

    let api = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .fallback(not_found);
    let app = Router::new().nest(API_PREFIX, api);

    match static_dir {
        Some(dir) => {
            let index = dir.join("index.html");
            app.fallback_service(ServeDir::new(dir).fallback(ServeFile::new(index)))
        }
        None => app.fallback(not_found),
    }
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn not_found() -> ApiError {
    ApiError::NotFound("Route")
}
