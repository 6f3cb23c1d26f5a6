use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::{ApplicationStatus, DocumentKind, DocumentStatus, PaymentStatus, Role};

// -- JWT Claims --

/// JWT claims issued at login. The role travels in the token so route guards
/// never need a database round trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub email: String,
    pub name: String,
    pub role: Role,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct SignupRequest {
    #[validate(email(message = "Please enter a valid email address"))]
    pub email: String,
    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    pub password: String,
    #[validate(length(min = 2, max = 100, message = "Name is required"))]
    pub name: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub role: Role,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: UserProfile,
    /// Where the front end should navigate next.
    pub redirect: String,
}

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct UpdateProfileRequest {
    #[validate(length(min = 2, max = 100, message = "Name is required"))]
    pub name: Option<String>,
    #[validate(url(message = "Avatar must be a URL"))]
    pub avatar_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateRoleRequest {
    pub role: Role,
}

// -- Application wizard --

#[derive(Debug, Serialize, Deserialize)]
pub struct WizardStateResponse {
    /// None until the first autosave creates the application row.
    pub application_id: Option<Uuid>,
    pub status: ApplicationStatus,
    pub step: u8,
    pub step_name: String,
    pub total_steps: u8,
    pub completed_steps: Vec<u8>,
    pub draft: BTreeMap<String, String>,
    /// False when the last write to the application row failed; the next
    /// transition writes the whole draft again.
    pub saved: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateDraftRequest {
    pub fields: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JumpRequest {
    pub step: u8,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NdaStatus {
    pub signed: bool,
    pub signed_at: Option<DateTime<Utc>>,
}

// -- Documents --

#[derive(Debug, Serialize, Deserialize)]
pub struct DocumentResponse {
    pub id: Uuid,
    pub application_id: Uuid,
    pub kind: DocumentKind,
    pub name: String,
    pub file_name: String,
    pub content_type: String,
    pub size: u64,
    pub sha256: String,
    pub status: DocumentStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RequiredDocument {
    pub kind: DocumentKind,
    pub name: String,
    pub description: String,
    pub uploaded: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DocumentListResponse {
    pub documents: Vec<DocumentResponse>,
    pub required: Vec<RequiredDocument>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateDocumentStatusRequest {
    pub status: DocumentStatus,
}

// -- Payments --

#[derive(Debug, Serialize, Deserialize)]
pub struct InitiatePaymentResponse {
    pub payment_id: Uuid,
    pub order_tracking_id: String,
    pub redirect_url: String,
}

#[derive(Debug, Deserialize)]
pub struct PaymentCallbackQuery {
    #[serde(rename = "OrderTrackingId")]
    pub order_tracking_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallbackOutcome {
    Success,
    Failed,
    Pending,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PaymentCallbackResponse {
    pub status: CallbackOutcome,
    pub message: String,
    pub payment_method: Option<String>,
    /// Front-end route to continue to.
    pub next: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PaymentResponse {
    pub id: Uuid,
    pub amount: u32,
    pub currency: String,
    pub status: PaymentStatus,
    pub reference_id: String,
    pub payment_method: Option<String>,
    pub confirmation_code: Option<String>,
    pub created_at: DateTime<Utc>,
}

// -- Dashboards --

#[derive(Debug, Serialize, Deserialize)]
pub struct ApplicationProgress {
    pub id: Uuid,
    pub status: ApplicationStatus,
    pub step: u8,
    pub total_steps: u8,
    pub completed_steps: Vec<u8>,
    pub percent: u8,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DashboardResponse {
    pub user: UserProfile,
    pub application: Option<ApplicationProgress>,
    pub documents: Vec<DocumentResponse>,
    pub nda: NdaStatus,
    pub payment: Option<PaymentResponse>,
    pub unread_conversations: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApplicationSummary {
    pub id: Uuid,
    pub user_id: Uuid,
    pub applicant_name: String,
    pub applicant_email: String,
    pub company_name: Option<String>,
    pub financing_amount: Option<String>,
    pub status: ApplicationStatus,
    pub current_step: u8,
    pub reviewer_id: Option<Uuid>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// Everything a reviewer needs to assess one application.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApplicationDetail {
    pub application: ApplicationSummary,
    pub draft: BTreeMap<String, String>,
    pub completed_steps: Vec<u8>,
    pub documents: Vec<DocumentResponse>,
    pub nda: NdaStatus,
    pub payment: Option<PaymentResponse>,
}

#[derive(Debug, Deserialize)]
pub struct ApplicationFilter {
    pub status: Option<ApplicationStatus>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateStatusRequest {
    pub status: ApplicationStatus,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AssignReviewerRequest {
    pub reviewer_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusCount {
    pub status: ApplicationStatus,
    pub count: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatsResponse {
    pub total: u64,
    pub by_status: Vec<StatusCount>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReviewerSummary {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub assigned_applications: u64,
}

// -- Messaging --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub id: Uuid,
    pub name: String,
    pub role: Role,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OpenConversationRequest {
    pub participant_id: Uuid,
    pub application_id: Option<Uuid>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LastMessage {
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub is_read: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConversationResponse {
    pub id: Uuid,
    pub application_id: Option<Uuid>,
    pub participant: Participant,
    pub last_message: Option<LastMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub content: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender: Participant,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}
