use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Running migration v1 (users, notifications)");
        conn.execute_batch(
            "
            -- Mirror of identity-provider users; broadcast fans out over it.
            CREATE TABLE users (
                id          TEXT PRIMARY KEY,
                username    TEXT NOT NULL,
                avatar_url  TEXT,
                created_at  TEXT NOT NULL
            );

            CREATE TABLE notifications (
                seq             INTEGER PRIMARY KEY AUTOINCREMENT,
                id              TEXT NOT NULL UNIQUE,
                recipient_id    TEXT NOT NULL,
                type            TEXT NOT NULL,
                payload         TEXT NOT NULL,
                read            INTEGER NOT NULL DEFAULT 0,
                created_at      TEXT NOT NULL
            );

            CREATE INDEX idx_notifications_recipient
                ON notifications(recipient_id, seq);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    if version < 2 {
        info!("Running migration v2 (direct messages)");
        conn.execute_batch(
            "
            CREATE TABLE direct_messages (
                seq             INTEGER PRIMARY KEY AUTOINCREMENT,
                id              TEXT NOT NULL UNIQUE,
                sender_id       TEXT NOT NULL,
                recipient_id    TEXT NOT NULL,
                content_kind    TEXT NOT NULL,
                content_body    TEXT NOT NULL,
                is_one_time     INTEGER NOT NULL DEFAULT 0,
                viewed_at       TEXT,
                reply_to_id     TEXT REFERENCES direct_messages(id) ON DELETE SET NULL,
                read_at         TEXT,
                client_nonce    TEXT,
                created_at      TEXT NOT NULL
            );

            CREATE INDEX idx_dm_pair
                ON direct_messages(sender_id, recipient_id, seq);

            CREATE INDEX idx_dm_unread
                ON direct_messages(recipient_id, read_at);

            INSERT INTO schema_version (version) VALUES (2);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
