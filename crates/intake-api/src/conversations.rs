use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use intake_db::models::ConversationRow;
use intake_types::api::{
    Claims, ConversationResponse, MessageResponse, OpenConversationRequest, Participant,
    SendMessageRequest,
};
use intake_types::models::Role;

use crate::convert;
use crate::error::{ApiError, ApiResult};
use crate::state::{AppState, blocking};

const MAX_MESSAGE_LEN: usize = 4000;

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Cursor: pass the id of the oldest message already shown to page
    /// backwards.
    pub before: Option<Uuid>,
}

fn default_limit() -> u32 {
    50
}

/// POST /conversations. Opens a thread between the caller and another
/// user, or returns the existing one. One side must be an applicant and
/// the other staff.
pub async fn open(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<OpenConversationRequest>,
) -> ApiResult<impl IntoResponse> {
    if req.participant_id == claims.sub {
        return Err(ApiError::BadRequest(
            "Cannot open a conversation with yourself".into(),
        ));
    }

    let other_id = req.participant_id.to_string();
    let other = blocking(&state, move |s| s.db.get_user_by_id(&other_id))
        .await?
        .ok_or(ApiError::NotFound("User"))?;
    let other_role: Role = other.role.parse().map_err(anyhow::Error::from)?;

    let (client_id, staff_id) = match (claims.role.is_staff(), other_role.is_staff()) {
        (false, true) => (claims.sub, req.participant_id),
        (true, false) => (req.participant_id, claims.sub),
        _ => {
            return Err(ApiError::BadRequest(
                "Conversations are between an applicant and a staff member".into(),
            ));
        }
    };

    let application_id = req.application_id;
    let (row, created) = blocking(&state, move |s| {
        let client = client_id.to_string();
        let staff = staff_id.to_string();
        let app = application_id.map(|id| id.to_string());

        if let Some(app_id) = app.as_deref() {
            match s.db.get_application(app_id)? {
                Some(application) if application.user_id == client => {}
                _ => return Ok(None),
            }
        }

        if let Some(existing) = s.db.find_conversation(&client, &staff, app.as_deref())? {
            return Ok(Some((existing, false)));
        }
        let id = Uuid::new_v4().to_string();
        s.db.create_conversation(&id, &client, &staff, app.as_deref())?;
        let row = s
            .db
            .get_conversation(&id)?
            .ok_or_else(|| anyhow::anyhow!("conversation {id} vanished after insert"))?;
        Ok(Some((row, true)))
    })
    .await?
    .ok_or(ApiError::NotFound("Application"))?;

    if created {
        info!("Conversation {} opened by {}", row.id, claims.sub);
    }

    let participant = Participant {
        id: convert::parse_id(&other.id)?,
        name: other.name,
        role: other_role,
    };
    let body = ConversationResponse {
        id: convert::parse_id(&row.id)?,
        application_id: row
            .application_id
            .as_deref()
            .map(convert::parse_id)
            .transpose()?,
        participant,
        last_message: None,
    };
    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(body)))
}

/// GET /conversations. Most recent activity first.
pub async fn list(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<Vec<ConversationResponse>>> {
    let user_id = claims.sub.to_string();
    let rows = blocking(&state, move |s| s.db.list_conversations(&user_id)).await?;
    let conversations = rows
        .into_iter()
        .map(|row| convert::conversation(row, claims.sub))
        .collect::<anyhow::Result<_>>()?;
    Ok(Json(conversations))
}

/// GET /conversations/{id}/messages. Oldest first; reading marks the
/// conversation read when the last message came from the other side.
pub async fn messages(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(conversation_id): Path<Uuid>,
    Query(query): Query<MessageQuery>,
) -> ApiResult<Json<Vec<MessageResponse>>> {
    let conversation = load_for_participant(&state, conversation_id, claims.sub).await?;

    let limit = query.limit.clamp(1, 200);
    let reader = claims.sub.to_string();
    let before = query.before.map(|id| id.to_string());
    let rows = blocking(&state, move |s| {
        let rows = s
            .db
            .list_messages(&conversation.id, limit, before.as_deref())?;
        s.db.mark_conversation_read(&conversation.id, &reader)?;
        Ok(rows)
    })
    .await?;

    let messages = rows
        .into_iter()
        .map(convert::message)
        .collect::<anyhow::Result<_>>()?;
    Ok(Json(messages))
}

/// POST /conversations/{id}/messages
pub async fn send(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(conversation_id): Path<Uuid>,
    Json(req): Json<SendMessageRequest>,
) -> ApiResult<impl IntoResponse> {
    let content = req.content.trim().to_string();
    if content.is_empty() {
        return Err(ApiError::BadRequest("Message cannot be empty".into()));
    }
    if content.chars().count() > MAX_MESSAGE_LEN {
        return Err(ApiError::BadRequest(format!(
            "Message cannot exceed {MAX_MESSAGE_LEN} characters"
        )));
    }

    load_for_participant(&state, conversation_id, claims.sub).await?;

    let message_id = Uuid::new_v4();
    let created_at = {
        let (cid, sender, content) = (
            conversation_id.to_string(),
            claims.sub.to_string(),
            content.clone(),
        );
        blocking(&state, move |s| {
            s.db.append_message(&message_id.to_string(), &cid, &sender, &content)
        })
        .await?
    };

    Ok((
        StatusCode::CREATED,
        Json(MessageResponse {
            id: message_id,
            conversation_id,
            sender: Participant {
                id: claims.sub,
                name: claims.name.clone(),
                role: claims.role,
            },
            content,
            timestamp: convert::parse_time(&created_at)?,
        }),
    ))
}

/// Fetch a conversation the user takes part in. Non-participants get 403.
async fn load_for_participant(
    state: &AppState,
    conversation_id: Uuid,
    user_id: Uuid,
) -> ApiResult<ConversationRow> {
    let id = conversation_id.to_string();
    let row = blocking(state, move |s| s.db.get_conversation(&id))
        .await?
        .ok_or(ApiError::NotFound("Conversation"))?;

    let uid = user_id.to_string();
    if row.client_id != uid && row.staff_id != uid {
        return Err(ApiError::Forbidden(
            "You are not a participant in this conversation",
        ));
    }
    Ok(row)
}
