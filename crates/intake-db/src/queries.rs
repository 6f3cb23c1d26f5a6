use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::models::{
    ApplicationListRow, ApplicationRow, ConversationListRow, ConversationRow, DocumentRow,
    MessageRow, NewDocument, NewPayment, PaymentRow, ReviewerRow, UserRow,
};
use crate::{Database, NOW};

const USER_COLUMNS: &str = "id, email, name, role, avatar_url, password, created_at";

const APPLICATION_COLUMNS: &str = "a.id, a.user_id, a.status, a.current_step, a.draft, \
     a.reviewer_id, a.nda_signed_at, a.submitted_at, a.created_at, a.updated_at";

const DOCUMENT_COLUMNS: &str =
    "id, application_id, kind, file_name, content_type, size, sha256, status, created_at";

const PAYMENT_COLUMNS: &str = "id, application_id, amount, currency, status, reference_id, \
     merchant_reference, payment_method, confirmation_code, created_at, updated_at";

const CONVERSATION_COLUMNS: &str = "c.id, c.application_id, c.client_id, c.staff_id, \
     c.last_message_content, c.last_message_time, c.last_sender_id, c.is_read, c.created_at";

impl Database {
    // -- Users --

    pub fn create_user(
        &self,
        id: &str,
        email: &str,
        name: &str,
        role: &str,
        password_hash: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, email, name, role, password) VALUES (?1, ?2, ?3, ?4, ?5)",
                (id, email, name, role, password_hash),
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1");
            Ok(conn.query_row(&sql, [email], map_user).optional()?)
        })
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user_by_id(conn, id))
    }

    /// Apply whichever profile fields are present. Returns the updated row.
    pub fn update_profile(
        &self,
        id: &str,
        name: Option<&str>,
        avatar_url: Option<&str>,
    ) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE users
                 SET name = COALESCE(?2, name), avatar_url = COALESCE(?3, avatar_url)
                 WHERE id = ?1",
                params![id, name, avatar_url],
            )?;
            query_user_by_id(conn, id)
        })
    }

    pub fn set_user_role(&self, id: &str, role: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed =
                conn.execute("UPDATE users SET role = ?2 WHERE id = ?1", params![id, role])?;
            Ok(changed > 0)
        })
    }

    pub fn list_reviewers(&self) -> Result<Vec<ReviewerRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT u.id, u.name, u.email,
                        (SELECT COUNT(*) FROM applications a WHERE a.reviewer_id = u.id)
                 FROM users u
                 WHERE u.role = 'reviewer'
                 ORDER BY u.name",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(ReviewerRow {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        email: row.get(2)?,
                        assigned: row.get(3)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Applications --

    pub fn create_application(
        &self,
        id: &str,
        user_id: &str,
        current_step: u8,
        draft: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO applications (id, user_id, current_step, draft) VALUES (?1, ?2, ?3, ?4)",
                params![id, user_id, current_step, draft],
            )?;
            Ok(())
        })
    }

    pub fn get_application(&self, id: &str) -> Result<Option<ApplicationRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {APPLICATION_COLUMNS} FROM applications a WHERE a.id = ?1");
            Ok(conn.query_row(&sql, [id], map_application).optional()?)
        })
    }

    /// The user's most recently created application, whatever its status.
    pub fn latest_application_for_user(&self, user_id: &str) -> Result<Option<ApplicationRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {APPLICATION_COLUMNS} FROM applications a
                 WHERE a.user_id = ?1
                 ORDER BY a.created_at DESC, a.rowid DESC
                 LIMIT 1"
            );
            Ok(conn.query_row(&sql, [user_id], map_application).optional()?)
        })
    }

    /// Overwrite the stored draft. Only drafts are writable; returns false if
    /// the application has moved on.
    pub fn save_draft(&self, id: &str, current_step: u8, draft: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let sql = format!(
                "UPDATE applications SET current_step = ?2, draft = ?3, updated_at = {NOW}
                 WHERE id = ?1 AND status = 'draft'"
            );
            let changed = conn.execute(&sql, params![id, current_step, draft])?;
            Ok(changed > 0)
        })
    }

    /// Compare-and-set on the status column. Returns false when the row was
    /// not in `from`.
    pub fn transition_status(&self, id: &str, from: &str, to: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let sql = format!(
                "UPDATE applications
                 SET status = ?3,
                     updated_at = {NOW},
                     submitted_at = CASE WHEN ?3 = 'submitted' THEN {NOW} ELSE submitted_at END
                 WHERE id = ?1 AND status = ?2"
            );
            let changed = conn.execute(&sql, params![id, from, to])?;
            Ok(changed > 0)
        })
    }

    pub fn assign_reviewer(&self, id: &str, reviewer_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let sql = format!(
                "UPDATE applications SET reviewer_id = ?2, updated_at = {NOW} WHERE id = ?1"
            );
            let changed = conn.execute(&sql, params![id, reviewer_id])?;
            Ok(changed > 0)
        })
    }

    /// Record the NDA signature once. Returns false if already signed or missing.
    pub fn sign_nda(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let sql = format!(
                "UPDATE applications SET nda_signed_at = {NOW}, updated_at = {NOW}
                 WHERE id = ?1 AND nda_signed_at IS NULL"
            );
            let changed = conn.execute(&sql, [id])?;
            Ok(changed > 0)
        })
    }

    pub fn list_applications(&self, status: Option<&str>) -> Result<Vec<ApplicationListRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {APPLICATION_COLUMNS}, u.name, u.email
                 FROM applications a
                 JOIN users u ON a.user_id = u.id
                 WHERE ?1 IS NULL OR a.status = ?1
                 ORDER BY a.updated_at DESC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([status], map_application_list)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// One application joined with its owner, as listed to staff.
    pub fn get_application_listing(&self, id: &str) -> Result<Option<ApplicationListRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {APPLICATION_COLUMNS}, u.name, u.email
                 FROM applications a
                 JOIN users u ON a.user_id = u.id
                 WHERE a.id = ?1"
            );
            Ok(conn.query_row(&sql, [id], map_application_list).optional()?)
        })
    }

    pub fn list_assigned_applications(&self, reviewer_id: &str) -> Result<Vec<ApplicationListRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {APPLICATION_COLUMNS}, u.name, u.email
                 FROM applications a
                 JOIN users u ON a.user_id = u.id
                 WHERE a.reviewer_id = ?1
                 ORDER BY a.updated_at DESC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([reviewer_id], map_application_list)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn count_applications_by_status(&self) -> Result<Vec<(String, i64)>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT status, COUNT(*) FROM applications GROUP BY status")?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Documents --

    pub fn insert_document(&self, doc: &NewDocument<'_>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO documents (id, application_id, kind, file_name, content_type, size, sha256)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    doc.id,
                    doc.application_id,
                    doc.kind,
                    doc.file_name,
                    doc.content_type,
                    doc.size,
                    doc.sha256
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_document(&self, id: &str) -> Result<Option<DocumentRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = ?1");
            Ok(conn.query_row(&sql, [id], map_document).optional()?)
        })
    }

    pub fn list_documents(&self, application_id: &str) -> Result<Vec<DocumentRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {DOCUMENT_COLUMNS} FROM documents
                 WHERE application_id = ?1
                 ORDER BY created_at, rowid"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([application_id], map_document)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn set_document_status(&self, id: &str, status: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE documents SET status = ?2 WHERE id = ?1",
                params![id, status],
            )?;
            Ok(changed > 0)
        })
    }

    // -- Payments --

    pub fn insert_payment(&self, payment: &NewPayment<'_>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO payments (id, application_id, amount, currency, reference_id, merchant_reference)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    payment.id,
                    payment.application_id,
                    payment.amount,
                    payment.currency,
                    payment.reference_id,
                    payment.merchant_reference
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_payment_by_reference(&self, reference_id: &str) -> Result<Option<PaymentRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE reference_id = ?1");
            Ok(conn.query_row(&sql, [reference_id], map_payment).optional()?)
        })
    }

    pub fn latest_payment_for_application(&self, application_id: &str) -> Result<Option<PaymentRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {PAYMENT_COLUMNS} FROM payments
                 WHERE application_id = ?1
                 ORDER BY created_at DESC, rowid DESC
                 LIMIT 1"
            );
            Ok(conn.query_row(&sql, [application_id], map_payment).optional()?)
        })
    }

    /// Record the gateway's verdict. Method and confirmation code are only
    /// overwritten when the gateway reports them.
    pub fn update_payment_status(
        &self,
        id: &str,
        status: &str,
        payment_method: Option<&str>,
        confirmation_code: Option<&str>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            let sql = format!(
                "UPDATE payments
                 SET status = ?2,
                     payment_method = COALESCE(?3, payment_method),
                     confirmation_code = COALESCE(?4, confirmation_code),
                     updated_at = {NOW}
                 WHERE id = ?1"
            );
            conn.execute(&sql, params![id, status, payment_method, confirmation_code])?;
            Ok(())
        })
    }

    // -- Conversations --

    pub fn find_conversation(
        &self,
        client_id: &str,
        staff_id: &str,
        application_id: Option<&str>,
    ) -> Result<Option<ConversationRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {CONVERSATION_COLUMNS} FROM conversations c
                 WHERE c.client_id = ?1 AND c.staff_id = ?2 AND c.application_id IS ?3"
            );
            Ok(conn
                .query_row(&sql, params![client_id, staff_id, application_id], map_conversation)
                .optional()?)
        })
    }

    pub fn create_conversation(
        &self,
        id: &str,
        client_id: &str,
        staff_id: &str,
        application_id: Option<&str>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO conversations (id, client_id, staff_id, application_id)
                 VALUES (?1, ?2, ?3, ?4)",
                params![id, client_id, staff_id, application_id],
            )?;
            Ok(())
        })
    }

    pub fn get_conversation(&self, id: &str) -> Result<Option<ConversationRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {CONVERSATION_COLUMNS} FROM conversations c WHERE c.id = ?1");
            Ok(conn.query_row(&sql, [id], map_conversation).optional()?)
        })
    }

    /// Conversations the user takes part in, most recent activity first.
    pub fn list_conversations(&self, user_id: &str) -> Result<Vec<ConversationListRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {CONVERSATION_COLUMNS}, u.id, u.name, u.role
                 FROM conversations c
                 JOIN users u
                   ON u.id = CASE WHEN c.client_id = ?1 THEN c.staff_id ELSE c.client_id END
                 WHERE c.client_id = ?1 OR c.staff_id = ?1
                 ORDER BY COALESCE(c.last_message_time, c.created_at) DESC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([user_id], |row| {
                    Ok(ConversationListRow {
                        conversation: map_conversation(row)?,
                        participant_id: row.get(9)?,
                        participant_name: row.get(10)?,
                        participant_role: row.get(11)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Append a message and refresh the conversation's last-message snapshot
    /// in one transaction. Returns the stored timestamp.
    pub fn append_message(
        &self,
        id: &str,
        conversation_id: &str,
        sender_id: &str,
        content: &str,
    ) -> Result<String> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO messages (id, conversation_id, sender_id, content) VALUES (?1, ?2, ?3, ?4)",
                params![id, conversation_id, sender_id, content],
            )?;
            let created_at: String =
                tx.query_row("SELECT created_at FROM messages WHERE id = ?1", [id], |r| r.get(0))?;
            tx.execute(
                "UPDATE conversations
                 SET last_message_content = ?2, last_message_time = ?3, last_sender_id = ?4, is_read = 0
                 WHERE id = ?1",
                params![conversation_id, content, created_at, sender_id],
            )?;
            tx.commit()?;
            Ok(created_at)
        })
    }

    /// Page of messages in ascending time order. `before` is the id of the
    /// oldest message from the previous page; paging is keyed on
    /// `(created_at, rowid)` so messages sharing a timestamp are not skipped.
    pub fn list_messages(
        &self,
        conversation_id: &str,
        limit: u32,
        before: Option<&str>,
    ) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT m.id, m.conversation_id, m.sender_id, u.name, u.role, m.content, m.created_at
                 FROM messages m
                 JOIN users u ON m.sender_id = u.id
                 WHERE m.conversation_id = ?1
                   AND (?3 IS NULL OR (m.created_at, m.rowid) < (
                        SELECT c.created_at, c.rowid FROM messages c
                        WHERE c.id = ?3 AND c.conversation_id = ?1))
                 ORDER BY m.created_at DESC, m.rowid DESC
                 LIMIT ?2",
            )?;
            let mut rows = stmt
                .query_map(params![conversation_id, limit, before], |row| {
                    Ok(MessageRow {
                        id: row.get(0)?,
                        conversation_id: row.get(1)?,
                        sender_id: row.get(2)?,
                        sender_name: row.get(3)?,
                        sender_role: row.get(4)?,
                        content: row.get(5)?,
                        created_at: row.get(6)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.reverse();
            Ok(rows)
        })
    }

    /// Mark read on behalf of `reader_id`; own messages never flip the flag.
    pub fn mark_conversation_read(&self, id: &str, reader_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE conversations SET is_read = 1
                 WHERE id = ?1 AND is_read = 0 AND last_sender_id IS NOT NULL AND last_sender_id != ?2",
                params![id, reader_id],
            )?;
            Ok(changed > 0)
        })
    }

    pub fn count_unread_conversations(&self, user_id: &str) -> Result<i64> {
        self.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM conversations
                 WHERE (client_id = ?1 OR staff_id = ?1)
                   AND is_read = 0
                   AND last_sender_id IS NOT NULL
                   AND last_sender_id != ?1",
                [user_id],
                |r| r.get(0),
            )?)
        })
    }
}

fn query_user_by_id(conn: &Connection, id: &str) -> Result<Option<UserRow>> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1");
    Ok(conn.query_row(&sql, [id], map_user).optional()?)
}

fn map_user(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        email: row.get(1)?,
        name: row.get(2)?,
        role: row.get(3)?,
        avatar_url: row.get(4)?,
        password: row.get(5)?,
        created_at: row.get(6)?,
    })
}

fn map_application(row: &Row<'_>) -> rusqlite::Result<ApplicationRow> {
    Ok(ApplicationRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        status: row.get(2)?,
        current_step: row.get(3)?,
        draft: row.get(4)?,
        reviewer_id: row.get(5)?,
        nda_signed_at: row.get(6)?,
        submitted_at: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

fn map_application_list(row: &Row<'_>) -> rusqlite::Result<ApplicationListRow> {
    Ok(ApplicationListRow {
        application: map_application(row)?,
        applicant_name: row.get(10)?,
        applicant_email: row.get(11)?,
    })
}

fn map_document(row: &Row<'_>) -> rusqlite::Result<DocumentRow> {
    Ok(DocumentRow {
        id: row.get(0)?,
        application_id: row.get(1)?,
        kind: row.get(2)?,
        file_name: row.get(3)?,
        content_type: row.get(4)?,
        size: row.get(5)?,
        sha256: row.get(6)?,
        status: row.get(7)?,
        created_at: row.get(8)?,
    })
}

fn map_payment(row: &Row<'_>) -> rusqlite::Result<PaymentRow> {
    Ok(PaymentRow {
        id: row.get(0)?,
        application_id: row.get(1)?,
        amount: row.get(2)?,
        currency: row.get(3)?,
        status: row.get(4)?,
        reference_id: row.get(5)?,
        merchant_reference: row.get(6)?,
        payment_method: row.get(7)?,
        confirmation_code: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

fn map_conversation(row: &Row<'_>) -> rusqlite::Result<ConversationRow> {
    Ok(ConversationRow {
        id: row.get(0)?,
        application_id: row.get(1)?,
        client_id: row.get(2)?,
        staff_id: row.get(3)?,
        last_message_content: row.get(4)?,
        last_message_time: row.get(5)?,
        last_sender_id: row.get(6)?,
        is_read: row.get(7)?,
        created_at: row.get(8)?,
    })
}
