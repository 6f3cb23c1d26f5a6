use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 =
        conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id          TEXT PRIMARY KEY,
                email       TEXT NOT NULL UNIQUE COLLATE NOCASE,
                name        TEXT NOT NULL,
                role        TEXT NOT NULL DEFAULT 'client'
                            CHECK (role IN ('client', 'reviewer', 'admin')),
                avatar_url  TEXT,
                password    TEXT NOT NULL,
                created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            );

            CREATE TABLE applications (
                id              TEXT PRIMARY KEY,
                user_id         TEXT NOT NULL REFERENCES users(id),
                status          TEXT NOT NULL DEFAULT 'draft',
                current_step    INTEGER NOT NULL DEFAULT 1,
                draft           TEXT NOT NULL DEFAULT '{}',
                reviewer_id     TEXT REFERENCES users(id),
                nda_signed_at   TEXT,
                submitted_at    TEXT,
                created_at      TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
                updated_at      TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            );

            CREATE INDEX idx_applications_user ON applications(user_id, created_at);
            CREATE INDEX idx_applications_reviewer ON applications(reviewer_id);

            CREATE TABLE documents (
                id              TEXT PRIMARY KEY,
                application_id  TEXT NOT NULL REFERENCES applications(id),
                kind            TEXT NOT NULL,
                file_name       TEXT NOT NULL,
                content_type    TEXT NOT NULL,
                size            INTEGER NOT NULL,
                sha256          TEXT NOT NULL,
                status          TEXT NOT NULL DEFAULT 'pending',
                created_at      TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            );

            CREATE INDEX idx_documents_application ON documents(application_id, created_at);

            CREATE TABLE payments (
                id                  TEXT PRIMARY KEY,
                application_id      TEXT REFERENCES applications(id),
                amount              INTEGER NOT NULL,
                currency            TEXT NOT NULL,
                status              TEXT NOT NULL DEFAULT 'pending',
                reference_id        TEXT NOT NULL UNIQUE,
                merchant_reference  TEXT NOT NULL,
                payment_method      TEXT,
                confirmation_code   TEXT,
                created_at          TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
                updated_at          TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            );

            CREATE INDEX idx_payments_application ON payments(application_id, created_at);

            CREATE TABLE conversations (
                id                      TEXT PRIMARY KEY,
                application_id          TEXT REFERENCES applications(id),
                client_id               TEXT NOT NULL REFERENCES users(id),
                staff_id                TEXT NOT NULL REFERENCES users(id),
                last_message_content    TEXT,
                last_message_time       TEXT,
                last_sender_id          TEXT,
                is_read                 INTEGER NOT NULL DEFAULT 1,
                created_at              TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            );

            CREATE INDEX idx_conversations_client ON conversations(client_id);
            CREATE INDEX idx_conversations_staff ON conversations(staff_id);

            CREATE TABLE messages (
                id              TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL REFERENCES conversations(id),
                sender_id       TEXT NOT NULL REFERENCES users(id),
                content         TEXT NOT NULL,
                created_at      TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            );

            CREATE INDEX idx_messages_conversation ON messages(conversation_id, created_at);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run(&conn).unwrap();
        run(&conn).unwrap();

        let version: i64 = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |r| r.get(0))
            .unwrap();
        assert_eq!(version, 1);
    }
}
