//! Reviewer and admin endpoints: listings, status decisions, assignment,
//! and statistics.

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
};
use tracing::info;
use uuid::Uuid;

use intake_types::api::{
    ApplicationDetail, ApplicationFilter, ApplicationSummary, AssignReviewerRequest, Claims,
    NdaStatus, ReviewerSummary, StatsResponse, StatusCount, UpdateStatusRequest,
};
use intake_types::models::{ApplicationStatus, Role};
use intake_wizard::Wizard;

use crate::convert;
use crate::error::{ApiError, ApiResult};
use crate::middleware::{require_admin, require_staff};
use crate::state::{AppState, blocking};

/// GET /reviewer/applications
pub async fn assigned_applications(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<Vec<ApplicationSummary>>> {
    require_staff(&claims)?;
    let reviewer_id = claims.sub.to_string();
    let rows = blocking(&state, move |s| s.db.list_assigned_applications(&reviewer_id)).await?;
    let summaries = rows
        .into_iter()
        .map(convert::application_summary)
        .collect::<anyhow::Result<_>>()?;
    Ok(Json(summaries))
}

/// GET /admin/applications?status=
pub async fn all_applications(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(filter): Query<ApplicationFilter>,
) -> ApiResult<Json<Vec<ApplicationSummary>>> {
    require_admin(&claims)?;
    let rows = blocking(&state, move |s| {
        s.db.list_applications(filter.status.map(ApplicationStatus::as_str))
    })
    .await?;
    let summaries = rows
        .into_iter()
        .map(convert::application_summary)
        .collect::<anyhow::Result<_>>()?;
    Ok(Json(summaries))
}

/// GET /applications/{id}. The submitted form, documents, NDA, and latest
/// payment of one application. Reviewers see only their assignments.
pub async fn application_detail(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(application_id): Path<Uuid>,
) -> ApiResult<Json<ApplicationDetail>> {
    require_staff(&claims)?;

    let id = application_id.to_string();
    let (listing, documents, payment) = blocking(&state, move |s| {
        let Some(listing) = s.db.get_application_listing(&id)? else {
            return Ok(None);
        };
        let documents = s.db.list_documents(&id)?;
        let payment = s.db.latest_payment_for_application(&id)?;
        Ok(Some((listing, documents, payment)))
    })
    .await?
    .ok_or(ApiError::NotFound("Application"))?;

    ensure_reviewer_may_access(&claims, listing.application.reviewer_id.as_deref())?;

    let wizard = Wizard::restore(convert::saved_draft(&listing.application)?);
    let signed_at = listing
        .application
        .nda_signed_at
        .as_deref()
        .map(convert::parse_time)
        .transpose()?;

    Ok(Json(ApplicationDetail {
        draft: wizard.draft().values().clone(),
        completed_steps: wizard.completed_steps().iter().copied().collect(),
        documents: documents
            .into_iter()
            .map(convert::document)
            .collect::<anyhow::Result<_>>()?,
        nda: NdaStatus {
            signed: signed_at.is_some(),
            signed_at,
        },
        payment: payment.map(convert::payment).transpose()?,
        application: convert::application_summary(listing)?,
    }))
}

/// Admins reach every application; reviewers only those assigned to them.
fn ensure_reviewer_may_access(claims: &Claims, reviewer_id: Option<&str>) -> ApiResult<()> {
    if claims.role == Role::Reviewer && reviewer_id != Some(claims.sub.to_string().as_str()) {
        return Err(ApiError::Forbidden(
            "This application is not assigned to you",
        ));
    }
    Ok(())
}

/// PUT /applications/{id}/status. Reviewers may only decide applications
/// assigned to them; admins may decide any. Submission itself belongs to
/// the applicant.
pub async fn update_status(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(application_id): Path<Uuid>,
    Json(req): Json<UpdateStatusRequest>,
) -> ApiResult<Json<ApplicationSummary>> {
    require_staff(&claims)?;
    if req.status == ApplicationStatus::Submitted {
        return Err(ApiError::BadRequest(
            "Applications are submitted by the applicant".into(),
        ));
    }

    let id = application_id.to_string();
    let current = blocking(&state, move |s| s.db.get_application(&id))
        .await?
        .ok_or(ApiError::NotFound("Application"))?;

    ensure_reviewer_may_access(&claims, current.reviewer_id.as_deref())?;

    let from: ApplicationStatus = current.status.parse().map_err(anyhow::Error::from)?;
    if !from.can_transition_to(req.status) {
        return Err(ApiError::Conflict(format!(
            "Cannot move an application from {} to {}",
            from, req.status
        )));
    }

    let id = application_id.to_string();
    let to = req.status;
    let updated = blocking(&state, move |s| {
        if !s.db.transition_status(&id, from.as_str(), to.as_str())? {
            return Ok(None);
        }
        s.db.get_application_listing(&id)
    })
    .await?
    .ok_or_else(|| ApiError::Conflict("Application status changed concurrently".into()))?;

    // The applicant's cached wizard still carries the old status
    state
        .sessions
        .evict(convert::parse_id(&current.user_id)?);

    info!(
        "{} moved application {} from {} to {}",
        claims.sub, application_id, from, to
    );
    Ok(Json(convert::application_summary(updated)?))
}

/// POST /admin/applications/{id}/assign
pub async fn assign_reviewer(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(application_id): Path<Uuid>,
    Json(req): Json<AssignReviewerRequest>,
) -> ApiResult<Json<ApplicationSummary>> {
    require_admin(&claims)?;

    let reviewer_id = req.reviewer_id.to_string();
    let reviewer = blocking(&state, move |s| s.db.get_user_by_id(&reviewer_id))
        .await?
        .ok_or(ApiError::NotFound("Reviewer"))?;
    if reviewer.role != Role::Reviewer.as_str() {
        return Err(ApiError::BadRequest(format!(
            "{} is not a reviewer",
            reviewer.email
        )));
    }

    let id = application_id.to_string();
    let assigned = blocking(&state, move |s| {
        if !s.db.assign_reviewer(&id, &reviewer.id)? {
            return Ok(None);
        }
        s.db.get_application_listing(&id)
    })
    .await?
    .ok_or(ApiError::NotFound("Application"))?;

    info!(
        "Application {} assigned to reviewer {}",
        application_id, req.reviewer_id
    );
    Ok(Json(convert::application_summary(assigned)?))
}

/// GET /admin/stats. Every status is listed, including those with no
/// applications.
pub async fn stats(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<StatsResponse>> {
    require_admin(&claims)?;
    let counts = blocking(&state, |s| s.db.count_applications_by_status()).await?;

    let by_status: Vec<StatusCount> = ApplicationStatus::ALL
        .into_iter()
        .map(|status| StatusCount {
            status,
            count: counts
                .iter()
                .find(|(name, _)| name == status.as_str())
                .map(|(_, n)| u64::try_from(*n).unwrap_or(0))
                .unwrap_or(0),
        })
        .collect();
    let total = by_status.iter().map(|c| c.count).sum();

    Ok(Json(StatsResponse { total, by_status }))
}

/// GET /admin/reviewers
pub async fn reviewers(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<Vec<ReviewerSummary>>> {
    require_admin(&claims)?;
    let rows = blocking(&state, |s| s.db.list_reviewers()).await?;
    let reviewers = rows
        .into_iter()
        .map(convert::reviewer)
        .collect::<anyhow::Result<_>>()?;
    Ok(Json(reviewers))
}
