use crate::models::{NewNotification, NotificationRow, UserRow};
use crate::{Database, now_timestamp};
use anyhow::Result;
use rusqlite::{Connection, Row};

const NOTIFICATION_COLUMNS: &str = "seq, id, recipient_id, type, payload, read, created_at";

impl Database {
    // -- Users --

    /// Insert or refresh a directory row from identity claims.
    pub fn upsert_user(&self, id: &str, username: &str, avatar_url: Option<&str>) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, avatar_url, created_at) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO UPDATE SET username = excluded.username, avatar_url = excluded.avatar_url",
                rusqlite::params![id, username, avatar_url, now_timestamp()],
            )?;
            Ok(())
        })
    }

    pub fn get_user(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, username, avatar_url, created_at FROM users WHERE id = ?1",
                [id],
                |row| {
                    Ok(UserRow {
                        id: row.get(0)?,
                        username: row.get(1)?,
                        avatar_url: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                },
            )
            .optional()
        })
    }

    pub fn count_users(&self) -> Result<usize> {
        self.with_conn(|conn| {
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))?;
            Ok(n as usize)
        })
    }

    /// Keyset page of user ids, ordered by id. Pass the last id of the
    /// previous page as `after`.
    pub fn user_ids_page(&self, after: Option<&str>, limit: u32) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id FROM users WHERE (?1 IS NULL OR id > ?1) ORDER BY id LIMIT ?2",
            )?;
            let ids = stmt
                .query_map(rusqlite::params![after, limit], |row| row.get(0))?
                .collect::<std::result::Result<Vec<String>, _>>()?;
            Ok(ids)
        })
    }

    // -- Notifications --

    pub fn insert_notification(&self, new: &NewNotification) -> Result<NotificationRow> {
        self.with_conn_mut(|conn| insert_notification_row(conn, new))
    }

    /// Insert a batch atomically: either every row lands or none does.
    pub fn insert_notifications(&self, batch: &[NewNotification]) -> Result<Vec<NotificationRow>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let mut rows = Vec::with_capacity(batch.len());
            for new in batch {
                rows.push(insert_notification_row(&tx, new)?);
            }
            tx.commit()?;
            Ok(rows)
        })
    }

    /// Newest first. `before` is the `seq` of the last row of the previous page.
    pub fn list_notifications(
        &self,
        recipient_id: &str,
        limit: u32,
        before: Option<i64>,
    ) -> Result<Vec<NotificationRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM notifications
                 WHERE recipient_id = ?1 AND (?2 IS NULL OR seq < ?2)
                 ORDER BY seq DESC
                 LIMIT ?3",
                NOTIFICATION_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params![recipient_id, before, limit], notification_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn get_notification(&self, id: &str) -> Result<Option<NotificationRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM notifications WHERE id = ?1", NOTIFICATION_COLUMNS);
            conn.query_row(&sql, [id], notification_from_row).optional()
        })
    }

    /// Flip one notification to read. Returns false when no row with that id
    /// belongs to `recipient_id`; repeated calls on an existing row return true
    /// and leave it unchanged.
    pub fn mark_notification_read(&self, id: &str, recipient_id: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let n = conn.execute(
                "UPDATE notifications SET read = 1 WHERE id = ?1 AND recipient_id = ?2",
                [id, recipient_id],
            )?;
            Ok(n > 0)
        })
    }

    /// One conditional bulk update; returns how many rows flipped.
    pub fn mark_all_notifications_read(&self, recipient_id: &str) -> Result<usize> {
        self.with_conn_mut(|conn| {
            let n = conn.execute(
                "UPDATE notifications SET read = 1 WHERE recipient_id = ?1 AND read = 0",
                [recipient_id],
            )?;
            Ok(n)
        })
    }

    pub fn delete_notification(&self, id: &str, recipient_id: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let n = conn.execute(
                "DELETE FROM notifications WHERE id = ?1 AND recipient_id = ?2",
                [id, recipient_id],
            )?;
            Ok(n > 0)
        })
    }

    pub fn clear_notifications(&self, recipient_id: &str) -> Result<usize> {
        self.with_conn_mut(|conn| {
            let n = conn.execute("DELETE FROM notifications WHERE recipient_id = ?1", [recipient_id])?;
            Ok(n)
        })
    }

    pub fn unread_notification_count(&self, recipient_id: &str) -> Result<usize> {
        self.with_conn(|conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM notifications WHERE recipient_id = ?1 AND read = 0",
                [recipient_id],
                |r| r.get(0),
            )?;
            Ok(n as usize)
        })
    }
}

fn insert_notification_row(conn: &Connection, new: &NewNotification) -> Result<NotificationRow> {
    let created_at = now_timestamp();
    conn.execute(
        "INSERT INTO notifications (id, recipient_id, type, payload, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![new.id, new.recipient_id, new.type_name, new.payload, created_at],
    )?;

    Ok(NotificationRow {
        seq: conn.last_insert_rowid(),
        id: new.id.clone(),
        recipient_id: new.recipient_id.clone(),
        type_name: new.type_name.clone(),
        payload: new.payload.clone(),
        read: false,
        created_at,
    })
}

fn notification_from_row(row: &Row<'_>) -> rusqlite::Result<NotificationRow> {
    Ok(NotificationRow {
        seq: row.get(0)?,
        id: row.get(1)?,
        recipient_id: row.get(2)?,
        type_name: row.get(3)?,
        payload: row.get(4)?,
        read: row.get(5)?,
        created_at: row.get(6)?,
    })
}

/// Extension trait for optional query results
pub(crate) trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn new_notification(recipient: &str) -> NewNotification {
        NewNotification {
            id: Uuid::new_v4().to_string(),
            recipient_id: recipient.to_string(),
            type_name: "follow".into(),
            payload: r#"{"type":"follow","content":"hi"}"#.into(),
        }
    }

    #[test]
    fn list_is_newest_first_and_paginates_by_seq() {
        let db = Database::open_in_memory().unwrap();
        for _ in 0..5 {
            db.insert_notification(&new_notification("alice")).unwrap();
        }
        db.insert_notification(&new_notification("bob")).unwrap();

        let first = db.list_notifications("alice", 3, None).unwrap();
        assert_eq!(first.len(), 3);
        assert!(first.windows(2).all(|w| w[0].seq > w[1].seq));

        let cursor = first.last().map(|r| r.seq);
        let second = db.list_notifications("alice", 3, cursor).unwrap();
        assert_eq!(second.len(), 2);
        assert!(second[0].seq < first[2].seq);
    }

    #[test]
    fn mark_read_is_idempotent_and_owner_scoped() {
        let db = Database::open_in_memory().unwrap();
        let row = db.insert_notification(&new_notification("alice")).unwrap();

        assert!(!db.mark_notification_read(&row.id, "mallory").unwrap());
        assert!(db.mark_notification_read(&row.id, "alice").unwrap());
        let once = db.get_notification(&row.id).unwrap().unwrap();
        assert!(db.mark_notification_read(&row.id, "alice").unwrap());
        let twice = db.get_notification(&row.id).unwrap().unwrap();

        assert!(once.read && twice.read);
        assert_eq!(once.created_at, twice.created_at);
        assert_eq!(db.unread_notification_count("alice").unwrap(), 0);
    }

    #[test]
    fn mark_all_read_only_counts_unread_rows() {
        let db = Database::open_in_memory().unwrap();
        let first = db.insert_notification(&new_notification("alice")).unwrap();
        db.insert_notification(&new_notification("alice")).unwrap();
        db.insert_notification(&new_notification("alice")).unwrap();
        db.insert_notification(&new_notification("bob")).unwrap();
        db.mark_notification_read(&first.id, "alice").unwrap();

        assert_eq!(db.mark_all_notifications_read("alice").unwrap(), 2);
        assert_eq!(db.mark_all_notifications_read("alice").unwrap(), 0);
        assert_eq!(db.unread_notification_count("bob").unwrap(), 1);
    }

    #[test]
    fn batch_insert_is_all_or_nothing() {
        let db = Database::open_in_memory().unwrap();
        let a = new_notification("alice");
        let mut dup = new_notification("bob");
        dup.id = a.id.clone();

        assert!(db.insert_notifications(&[a, dup]).is_err());
        assert!(db.list_notifications("alice", 10, None).unwrap().is_empty());
    }

    #[test]
    fn clear_and_delete() {
        let db = Database::open_in_memory().unwrap();
        let row = db.insert_notification(&new_notification("alice")).unwrap();
        db.insert_notification(&new_notification("alice")).unwrap();

        assert!(!db.delete_notification(&row.id, "bob").unwrap());
        assert!(db.delete_notification(&row.id, "alice").unwrap());
        assert!(db.get_notification(&row.id).unwrap().is_none());
        assert_eq!(db.clear_notifications("alice").unwrap(), 1);
        assert_eq!(db.clear_notifications("alice").unwrap(), 0);
    }

    #[test]
    fn user_pages_walk_the_whole_directory() {
        let db = Database::open_in_memory().unwrap();
        for i in 0..7 {
            db.upsert_user(&format!("user-{:02}", i), "name", None).unwrap();
        }
        db.upsert_user("user-00", "renamed", Some("https://a/x.png")).unwrap();
        assert_eq!(db.count_users().unwrap(), 7);
        assert_eq!(db.get_user("user-00").unwrap().unwrap().username, "renamed");

        let mut seen = Vec::new();
        let mut after: Option<String> = None;
        loop {
            let page = db.user_ids_page(after.as_deref(), 3).unwrap();
            if page.is_empty() {
                break;
            }
            after = page.last().cloned();
            seen.extend(page);
        }
        assert_eq!(seen.len(), 7);
    }
}
