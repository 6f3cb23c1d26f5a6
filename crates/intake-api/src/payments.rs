use axum::{
    Extension, Json,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use tracing::{error, info, warn};
use uuid::Uuid;

use intake_db::models::NewPayment;
use intake_payments::{BillingAddress, OrderRequest};
use intake_types::api::{
    CallbackOutcome, Claims, InitiatePaymentResponse, PaymentCallbackQuery,
    PaymentCallbackResponse,
};
use intake_types::models::{APPLICATION_FEE_CURRENCY, APPLICATION_FEE_USD, PaymentStatus};
use intake_wizard::{Draft, PAYMENT_STATUS_KEY, Wizard, schema};

use crate::convert;
use crate::error::{ApiError, ApiResult};
use crate::middleware::require_client;
use crate::session::{self, ensure_persisted};
use crate::state::{AppState, AppStateInner, PaymentSettings, blocking};

const FEE_DESCRIPTION: &str = "Financing application fee";

/// POST /applications/current/payment. Creates a gateway order for the
/// application fee and returns the hosted checkout URL.
pub async fn initiate(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    require_client(&claims)?;
    let session = session::load(&state, claims.sub).await?;
    session.ensure_editable()?;

    if session.wizard.draft().get(PAYMENT_STATUS_KEY) == Some(PaymentStatus::Completed.as_str()) {
        return Err(ApiError::Conflict(
            "The application fee has already been paid".into(),
        ));
    }

    // Billing contact comes from personal details
    if let Some(personal) = schema::step(1) {
        let errors = personal.validate(session.wizard.draft());
        if !errors.is_empty() {
            return Err(ApiError::Validation(errors));
        }
    }

    let (session, application_id) = ensure_persisted(&state, claims.sub, session).await?;

    let payment_id = Uuid::new_v4();
    let order = build_order(&state.payments, payment_id, session.wizard.draft());
    let created = state.gateway.submit_order(&order).await.map_err(|e| {
        error!("Order submission for application {} failed: {}", application_id, e);
        ApiError::BadGateway("Could not initiate payment")
    })?;

    {
        let created = created.clone();
        blocking(&state, move |s| {
            s.db.insert_payment(&NewPayment {
                id: &payment_id.to_string(),
                application_id: Some(&application_id.to_string()),
                amount: i64::from(APPLICATION_FEE_USD),
                currency: APPLICATION_FEE_CURRENCY,
                reference_id: &created.order_tracking_id,
                merchant_reference: &created.merchant_reference,
            })
        })
        .await?;
    }

    info!(
        "Payment {} initiated for application {} (tracking {})",
        payment_id, application_id, created.order_tracking_id
    );
    Ok((
        StatusCode::CREATED,
        Json(InitiatePaymentResponse {
            payment_id,
            order_tracking_id: created.order_tracking_id,
            redirect_url: created.redirect_url,
        }),
    ))
}

fn build_order(settings: &PaymentSettings, payment_id: Uuid, draft: &Draft) -> OrderRequest {
    let base = settings.public_url.trim_end_matches('/');
    let field = |name: &str| draft.get(name).unwrap_or_default().trim().to_string();
    OrderRequest {
        id: payment_id.to_string(),
        currency: APPLICATION_FEE_CURRENCY.to_string(),
        amount: APPLICATION_FEE_USD,
        description: FEE_DESCRIPTION.to_string(),
        callback_url: format!("{base}/payment-callback"),
        cancellation_url: format!("{base}/dashboard"),
        notification_id: settings
            .notification_id
            .clone()
            .unwrap_or_else(|| format!("INTAKE_{}", Utc::now().timestamp_millis())),
        billing_address: BillingAddress {
            email_address: field("email"),
            phone_number: field("phone"),
            first_name: field("firstName"),
            last_name: field("lastName"),
        },
    }
}

/// GET /payment-callback?OrderTrackingId=. Public: the front end's
/// callback page forwards the gateway's query here after checkout. Every
/// outcome, including a malformed request or an order we never issued, is
/// answered with a status body rather than an error.
pub async fn callback(
    State(state): State<AppState>,
    Query(query): Query<PaymentCallbackQuery>,
) -> ApiResult<Json<PaymentCallbackResponse>> {
    let Some(tracking_id) = query
        .order_tracking_id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
    else {
        warn!("Payment callback without an order tracking id");
        return Ok(Json(outcome(
            PaymentStatus::Failed,
            "Missing order tracking ID",
            None,
        )));
    };

    let status = match state.gateway.transaction_status(&tracking_id).await {
        Ok(status) => status,
        Err(e) => {
            error!("Status check for {} failed: {}", tracking_id, e);
            return Ok(Json(outcome(
                PaymentStatus::Failed,
                "Could not verify payment status",
                None,
            )));
        }
    };

    let payment_status = PaymentStatus::from_gateway(&status.status_description);
    let recorded = {
        let tracking_id = tracking_id.clone();
        let method = status.payment_method.clone();
        let code = status.confirmation_code.clone();
        blocking(&state, move |s| {
            record_outcome(s, &tracking_id, payment_status, method.as_deref(), code.as_deref())
        })
        .await?
    };

    match recorded {
        Recorded::Unknown => {
            return Ok(Json(outcome(
                PaymentStatus::Failed,
                "Could not verify payment status",
                None,
            )));
        }
        Recorded::Updated { owner: Some(user_id) } => state.sessions.evict(user_id),
        Recorded::Updated { owner: None } => {}
    }

    info!(
        "Payment {} reported {} ({})",
        tracking_id,
        payment_status.as_str(),
        status.status_description
    );
    let message = match payment_status {
        PaymentStatus::Completed => "Payment completed successfully",
        PaymentStatus::Failed => "Payment failed",
        PaymentStatus::Pending => "Payment is still being processed",
    };
    Ok(Json(outcome(payment_status, message, status.payment_method)))
}

enum Recorded {
    /// No payment row carries the tracking id.
    Unknown,
    /// `owner` is the applicant whose cached session is now stale.
    Updated { owner: Option<Uuid> },
}

/// Update the payment row and, on completion, mark the fee as paid in the
/// application draft.
fn record_outcome(
    s: &AppStateInner,
    tracking_id: &str,
    status: PaymentStatus,
    method: Option<&str>,
    confirmation_code: Option<&str>,
) -> anyhow::Result<Recorded> {
    let Some(payment) = s.db.get_payment_by_reference(tracking_id)? else {
        warn!("No payment recorded for tracking id {}", tracking_id);
        return Ok(Recorded::Unknown);
    };
    s.db.update_payment_status(&payment.id, status.as_str(), method, confirmation_code)?;

    let untouched = Recorded::Updated { owner: None };
    if status != PaymentStatus::Completed {
        return Ok(untouched);
    }
    let Some(application_id) = payment.application_id.as_deref() else {
        return Ok(untouched);
    };
    let Some(application) = s.db.get_application(application_id)? else {
        warn!("Payment {} references missing application {}", payment.id, application_id);
        return Ok(untouched);
    };
    let owner = Some(convert::parse_id(&application.user_id)?);

    let saved = match convert::saved_draft(&application) {
        Ok(saved) => saved,
        Err(e) => {
            warn!("{:#}; payment {} recorded only", e, payment.id);
            return Ok(Recorded::Updated { owner });
        }
    };
    let mut wizard = Wizard::restore(saved);
    wizard.set_system_field(PAYMENT_STATUS_KEY, PaymentStatus::Completed.as_str());
    let snapshot = wizard.snapshot();
    let draft = serde_json::to_string(&snapshot.values)?;
    if !s.db.save_draft(&application.id, snapshot.step, &draft)? {
        warn!("Application {} is no longer a draft; payment recorded only", application.id);
    }

    Ok(Recorded::Updated { owner })
}

fn outcome(
    status: PaymentStatus,
    message: &str,
    payment_method: Option<String>,
) -> PaymentCallbackResponse {
    let (status, next) = match status {
        PaymentStatus::Completed => (CallbackOutcome::Success, "/dashboard"),
        PaymentStatus::Failed => (CallbackOutcome::Failed, "/application"),
        PaymentStatus::Pending => (CallbackOutcome::Pending, "/application"),
    };
    PaymentCallbackResponse {
        status,
        message: message.to_string(),
        payment_method,
        next: next.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_uses_personal_details_and_public_url() {
        let mut draft = Draft::default();
        draft.set("firstName", "Amina");
        draft.set("lastName", " Otieno ");
        draft.set("email", "amina@example.com");
        draft.set("phone", "+254700000001");
        let settings = PaymentSettings {
            public_url: "https://apply.example/".into(),
            notification_id: Some("ipn-42".into()),
        };

        let id = Uuid::new_v4();
        let order = build_order(&settings, id, &draft);
        assert_eq!(order.id, id.to_string());
        assert_eq!(order.amount, 300);
        assert_eq!(order.currency, "USD");
        assert_eq!(order.callback_url, "https://apply.example/payment-callback");
        assert_eq!(order.notification_id, "ipn-42");
        assert_eq!(order.billing_address.last_name, "Otieno");
    }

    #[test]
    fn missing_notification_id_gets_a_placeholder() {
        let settings = PaymentSettings {
            public_url: "http://localhost:3000".into(),
            notification_id: None,
        };
        let order = build_order(&settings, Uuid::new_v4(), &Draft::default());
        assert!(order.notification_id.starts_with("INTAKE_"));
    }

    #[test]
    fn outcome_routes_only_success_to_dashboard() {
        assert_eq!(outcome(PaymentStatus::Completed, "", None).next, "/dashboard");
        assert_eq!(outcome(PaymentStatus::Pending, "", None).next, "/application");
        let failed = outcome(PaymentStatus::Failed, "Payment failed", None);
        assert_eq!(failed.status, CallbackOutcome::Failed);
        assert_eq!(failed.next, "/application");
    }
}
