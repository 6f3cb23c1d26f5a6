//! Row-to-response conversions. Stored strings are parsed back into typed
//! values here; a row that does not parse is a server error.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use uuid::Uuid;

use intake_db::models::{
    ApplicationListRow, ApplicationRow, ConversationListRow, DocumentRow, MessageRow, PaymentRow,
    ReviewerRow, UserRow,
};
use intake_types::api::{
    ApplicationSummary, ConversationResponse, DocumentResponse, LastMessage, MessageResponse,
    Participant, PaymentResponse, ReviewerSummary, UserProfile,
};
use intake_types::models::{DocumentKind, PaymentStatus};
use intake_wizard::{Draft, SavedDraft};
use tracing::warn;

pub fn parse_id(raw: &str) -> Result<Uuid> {
    raw.parse()
        .with_context(|| format!("stored id {raw:?} is not a UUID"))
}

fn parse_opt_id(raw: Option<&str>) -> Result<Option<Uuid>> {
    raw.map(parse_id).transpose()
}

/// Timestamps are written as RFC 3339; SQLite's `datetime('now')` format is
/// accepted too.
pub fn parse_time(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .map(|naive| naive.and_utc())
        .with_context(|| format!("stored timestamp {raw:?} is not parseable"))
}

fn parse_opt_time(raw: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    raw.map(parse_time).transpose()
}

pub fn profile(row: &UserRow) -> Result<UserProfile> {
    Ok(UserProfile {
        id: parse_id(&row.id)?,
        email: row.email.clone(),
        name: row.name.clone(),
        role: row.role.parse()?,
        avatar_url: row.avatar_url.clone(),
    })
}

/// Stored draft JSON and step pointer as the wizard's saved form. A draft
/// column that fails to decode is an error, so callers never write an empty
/// draft over the stored bytes.
pub fn saved_draft(row: &ApplicationRow) -> Result<SavedDraft> {
    let values: Draft = serde_json::from_str(&row.draft)
        .with_context(|| format!("application {} has an undecodable draft", row.id))?;
    Ok(SavedDraft {
        step: u8::try_from(row.current_step).unwrap_or(1),
        values,
    })
}

pub fn document(row: DocumentRow) -> Result<DocumentResponse> {
    let kind: DocumentKind = row.kind.parse()?;
    Ok(DocumentResponse {
        id: parse_id(&row.id)?,
        application_id: parse_id(&row.application_id)?,
        kind,
        name: kind.display_name().to_string(),
        file_name: row.file_name,
        content_type: row.content_type,
        size: u64::try_from(row.size)?,
        sha256: row.sha256,
        status: row.status.parse()?,
        created_at: parse_time(&row.created_at)?,
    })
}

pub fn payment(row: PaymentRow) -> Result<PaymentResponse> {
    let status: PaymentStatus = row.status.parse()?;
    Ok(PaymentResponse {
        id: parse_id(&row.id)?,
        amount: u32::try_from(row.amount)?,
        currency: row.currency,
        status,
        reference_id: row.reference_id,
        payment_method: row.payment_method,
        confirmation_code: row.confirmation_code,
        created_at: parse_time(&row.created_at)?,
    })
}

pub fn application_summary(row: ApplicationListRow) -> Result<ApplicationSummary> {
    // Listings stay available when one draft is unreadable
    let saved = saved_draft(&row.application).unwrap_or_else(|e| {
        warn!("{:#}", e);
        SavedDraft {
            step: u8::try_from(row.application.current_step).unwrap_or(1),
            values: Draft::default(),
        }
    });
    let app = row.application;
    Ok(ApplicationSummary {
        id: parse_id(&app.id)?,
        user_id: parse_id(&app.user_id)?,
        applicant_name: row.applicant_name,
        applicant_email: row.applicant_email,
        company_name: saved.values.get("companyName").map(str::to_string),
        financing_amount: saved.values.get("financingAmount").map(str::to_string),
        status: app.status.parse()?,
        current_step: saved.step,
        reviewer_id: parse_opt_id(app.reviewer_id.as_deref())?,
        submitted_at: parse_opt_time(app.submitted_at.as_deref())?,
        updated_at: parse_time(&app.updated_at)?,
    })
}

pub fn reviewer(row: ReviewerRow) -> Result<ReviewerSummary> {
    Ok(ReviewerSummary {
        id: parse_id(&row.id)?,
        name: row.name,
        email: row.email,
        assigned_applications: u64::try_from(row.assigned)?,
    })
}

/// A conversation from the viewer's side. `is_read` is reported as true for
/// the viewer's own last message.
pub fn conversation(row: ConversationListRow, viewer: Uuid) -> Result<ConversationResponse> {
    let conv = row.conversation;
    let last_message = match (conv.last_message_content, conv.last_message_time.as_deref()) {
        (Some(content), Some(time)) => {
            let own = conv.last_sender_id.as_deref() == Some(viewer.to_string().as_str());
            Some(LastMessage {
                content,
                timestamp: parse_time(time)?,
                is_read: own || conv.is_read,
            })
        }
        _ => None,
    };
    Ok(ConversationResponse {
        id: parse_id(&conv.id)?,
        application_id: parse_opt_id(conv.application_id.as_deref())?,
        participant: Participant {
            id: parse_id(&row.participant_id)?,
            name: row.participant_name,
            role: row.participant_role.parse()?,
        },
        last_message,
    })
}

pub fn message(row: MessageRow) -> Result<MessageResponse> {
    Ok(MessageResponse {
        id: parse_id(&row.id)?,
        conversation_id: parse_id(&row.conversation_id)?,
        sender: Participant {
            id: parse_id(&row.sender_id)?,
            name: row.sender_name,
            role: row.sender_role.parse()?,
        },
        content: row.content,
        timestamp: parse_time(&row.created_at)?,
    })
}
