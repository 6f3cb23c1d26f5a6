/// Database row types. These map directly to SQLite rows and stay
/// independent of the intake-types API models.

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: String,
    pub email: String,
    pub name: String,
    pub role: String,
    pub avatar_url: Option<String>,
    pub password: String,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct ApplicationRow {
    pub id: String,
    pub user_id: String,
    pub status: String,
    pub current_step: i64,
    /// JSON object of draft field values.
    pub draft: String,
    pub reviewer_id: Option<String>,
    pub nda_signed_at: Option<String>,
    pub submitted_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Application joined with its owner, for staff listings.
#[derive(Debug, Clone)]
pub struct ApplicationListRow {
    pub application: ApplicationRow,
    pub applicant_name: String,
    pub applicant_email: String,
}

#[derive(Debug, Clone)]
pub struct DocumentRow {
    pub id: String,
    pub application_id: String,
    pub kind: String,
    pub file_name: String,
    pub content_type: String,
    pub size: i64,
    pub sha256: String,
    pub status: String,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct PaymentRow {
    pub id: String,
    pub application_id: Option<String>,
    pub amount: i64,
    pub currency: String,
    pub status: String,
    pub reference_id: String,
    pub merchant_reference: String,
    pub payment_method: Option<String>,
    pub confirmation_code: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct ConversationRow {
    pub id: String,
    pub application_id: Option<String>,
    pub client_id: String,
    pub staff_id: String,
    pub last_message_content: Option<String>,
    pub last_message_time: Option<String>,
    pub last_sender_id: Option<String>,
    pub is_read: bool,
    pub created_at: String,
}

/// Conversation as seen by one participant, with the other side joined in.
#[derive(Debug, Clone)]
pub struct ConversationListRow {
    pub conversation: ConversationRow,
    pub participant_id: String,
    pub participant_name: String,
    pub participant_role: String,
}

#[derive(Debug, Clone)]
pub struct MessageRow {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub sender_role: String,
    pub content: String,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct ReviewerRow {
    pub id: String,
    pub name: String,
    pub email: String,
    pub assigned: i64,
}

pub struct NewDocument<'a> {
    pub id: &'a str,
    pub application_id: &'a str,
    pub kind: &'a str,
    pub file_name: &'a str,
    pub content_type: &'a str,
    pub size: i64,
    pub sha256: &'a str,
}

pub struct NewPayment<'a> {
    pub id: &'a str,
    pub application_id: Option<&'a str>,
    pub amount: i64,
    pub currency: &'a str,
    pub reference_id: &'a str,
    pub merchant_reference: &'a str,
}
