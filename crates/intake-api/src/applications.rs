use axum::{Extension, Json, extract::State};
use tracing::{info, warn};

use intake_types::api::{
    ApplicationProgress, Claims, DashboardResponse, JumpRequest, NdaStatus, UpdateDraftRequest,
    WizardStateResponse,
};
use intake_types::models::ApplicationStatus;
use intake_wizard::{Wizard, draft_key, schema};

use crate::convert;
use crate::error::{ApiError, ApiResult};
use crate::middleware::require_client;
use crate::session::{self, ensure_persisted, persist};
use crate::state::{AppState, blocking};

/// GET /applications/current
pub async fn current(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<WizardStateResponse>> {
    require_client(&claims)?;
    let session = session::load(&state, claims.sub).await?;
    Ok(Json(session.to_response()))
}

/// PATCH /applications/current. Merges field values without validating
/// them and autosaves.
pub async fn update(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateDraftRequest>,
) -> ApiResult<Json<WizardStateResponse>> {
    require_client(&claims)?;
    let mut session = session::load(&state, claims.sub).await?;
    session.ensure_editable()?;

    session.wizard.update(req.fields)?;
    let session = persist(&state, claims.sub, session).await;
    Ok(Json(session.to_response()))
}

/// POST /applications/current/advance. A failing step answers 422 with the
/// field errors and leaves the pointer where it was.
pub async fn advance(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<WizardStateResponse>> {
    require_client(&claims)?;
    let mut session = session::load(&state, claims.sub).await?;
    session.ensure_editable()?;

    let moved = session.wizard.advance()?;
    info!("{} completed step {} of their application", claims.sub, moved.from);
    let session = persist(&state, claims.sub, session).await;
    Ok(Json(session.to_response()))
}

/// POST /applications/current/retreat
pub async fn retreat(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<WizardStateResponse>> {
    require_client(&claims)?;
    let mut session = session::load(&state, claims.sub).await?;
    session.ensure_editable()?;

    session.wizard.retreat();
    let session = persist(&state, claims.sub, session).await;
    Ok(Json(session.to_response()))
}

/// POST /applications/current/jump
pub async fn jump(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<JumpRequest>,
) -> ApiResult<Json<WizardStateResponse>> {
    require_client(&claims)?;
    let mut session = session::load(&state, claims.sub).await?;
    session.ensure_editable()?;

    session.wizard.jump_to(req.step)?;
    let session = persist(&state, claims.sub, session).await;
    Ok(Json(session.to_response()))
}

/// POST /applications/current/nda. Signing twice keeps the first timestamp.
pub async fn sign_nda(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<NdaStatus>> {
    require_client(&claims)?;
    let session = session::load(&state, claims.sub).await?;
    let (_, application_id) = ensure_persisted(&state, claims.sub, session).await?;

    let id = application_id.to_string();
    let row = blocking(&state, move |s| {
        if s.db.sign_nda(&id)? {
            info!("NDA signed for application {}", id);
        }
        s.db.get_application(&id)
    })
    .await?
    .ok_or(ApiError::NotFound("Application"))?;

    Ok(Json(NdaStatus {
        signed: row.nda_signed_at.is_some(),
        signed_at: row
            .nda_signed_at
            .as_deref()
            .map(convert::parse_time)
            .transpose()?,
    }))
}

/// POST /applications/current/submit. Every step before review must be
/// valid, which includes the uploaded documents and a completed payment.
pub async fn submit(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<WizardStateResponse>> {
    require_client(&claims)?;
    let session = session::load(&state, claims.sub).await?;
    session.ensure_editable()?;

    let errors = session.wizard.validate_all();
    if !errors.is_empty() {
        return Err(ApiError::Validation(errors));
    }

    let (mut session, application_id) = ensure_persisted(&state, claims.sub, session).await?;

    let id = application_id.to_string();
    let user_id = claims.sub.to_string();
    let submitted = blocking(&state, move |s| {
        let moved = s.db.transition_status(
            &id,
            ApplicationStatus::Draft.as_str(),
            ApplicationStatus::Submitted.as_str(),
        )?;
        if moved {
            if let Err(e) = s.drafts.clear(&draft_key(&user_id)) {
                warn!("Could not clear local draft for {}: {:#}", user_id, e);
            }
        }
        Ok(moved)
    })
    .await?;

    state.sessions.evict(claims.sub);
    if !submitted {
        return Err(ApiError::Conflict(
            "Application has already been submitted".into(),
        ));
    }

    info!("Application {} submitted by {}", application_id, claims.sub);
    session.status = ApplicationStatus::Submitted;
    Ok(Json(session.to_response()))
}

/// GET /dashboard. The applicant's overview of their latest application:
/// progress, documents, NDA, latest payment, and unread conversations.
pub async fn dashboard(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<DashboardResponse>> {
    require_client(&claims)?;
    let session = session::load(&state, claims.sub).await?;

    let user_id = claims.sub.to_string();
    let (user, application, documents, payment, unread) = blocking(&state, move |s| {
        let user = s.db.get_user_by_id(&user_id)?;
        let application = s.db.latest_application_for_user(&user_id)?;
        let (documents, payment) = match &application {
            Some(row) => (
                s.db.list_documents(&row.id)?,
                s.db.latest_payment_for_application(&row.id)?,
            ),
            None => (Vec::new(), None),
        };
        let unread = s.db.count_unread_conversations(&user_id)?;
        Ok((user, application, documents, payment, unread))
    })
    .await?;

    let user = user.ok_or(ApiError::NotFound("User"))?;

    let mut signed_at = None;
    let mut progress = None;
    if let Some(row) = &application {
        let id = convert::parse_id(&row.id)?;
        signed_at = row
            .nda_signed_at
            .as_deref()
            .map(convert::parse_time)
            .transpose()?;
        // The live session is fresher than the row when a save failed
        let (status, wizard) = if session.application_id == Some(id) {
            (session.status, session.wizard)
        } else {
            (
                row.status
                    .parse::<ApplicationStatus>()
                    .map_err(anyhow::Error::from)?,
                Wizard::restore(convert::saved_draft(row)?),
            )
        };
        progress = Some(ApplicationProgress {
            id,
            status,
            step: wizard.current_step(),
            total_steps: schema::total_steps(),
            completed_steps: wizard.completed_steps().iter().copied().collect(),
            percent: wizard.progress_percent(),
        });
    }

    Ok(Json(DashboardResponse {
        user: convert::profile(&user)?,
        application: progress,
        documents: documents
            .into_iter()
            .map(convert::document)
            .collect::<anyhow::Result<_>>()?,
        nda: NdaStatus {
            signed: signed_at.is_some(),
            signed_at,
        },
        payment: payment.map(convert::payment).transpose()?,
        unread_conversations: usize::try_from(unread).unwrap_or(0),
    }))
}
