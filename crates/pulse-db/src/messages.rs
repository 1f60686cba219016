use anyhow::Result;
use rusqlite::Row;

use crate::models::{ConversationHeadRow, MessageRow, NewMessage};
use crate::queries::OptionalExt;
use crate::{Database, now_timestamp};

const MESSAGE_COLUMNS: &str = "seq, id, sender_id, recipient_id, content_kind, content_body, \
     is_one_time, viewed_at, reply_to_id, read_at, client_nonce, created_at";

impl Database {
    // -- Direct messages --

    pub fn insert_message(&self, new: &NewMessage) -> Result<MessageRow> {
        self.with_conn_mut(|conn| {
            let created_at = now_timestamp();
            conn.execute(
                "INSERT INTO direct_messages
                    (id, sender_id, recipient_id, content_kind, content_body, is_one_time, reply_to_id, client_nonce, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                rusqlite::params![
                    new.id,
                    new.sender_id,
                    new.recipient_id,
                    new.content_kind,
                    new.content_body,
                    new.is_one_time,
                    new.reply_to_id,
                    new.client_nonce,
                    created_at,
                ],
            )?;

            Ok(MessageRow {
                seq: conn.last_insert_rowid(),
                id: new.id.clone(),
                sender_id: new.sender_id.clone(),
                recipient_id: new.recipient_id.clone(),
                content_kind: new.content_kind.clone(),
                content_body: new.content_body.clone(),
                is_one_time: new.is_one_time,
                viewed_at: None,
                reply_to_id: new.reply_to_id.clone(),
                read_at: None,
                client_nonce: new.client_nonce.clone(),
                created_at,
            })
        })
    }

    pub fn get_message(&self, id: &str) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM direct_messages WHERE id = ?1", MESSAGE_COLUMNS);
            conn.query_row(&sql, [id], message_from_row).optional()
        })
    }

    /// Up to `limit` messages between `a` and `b`, oldest first. `before`
    /// (a `seq`) pages back through older history.
    pub fn list_conversation(
        &self,
        a: &str,
        b: &str,
        limit: u32,
        before: Option<i64>,
    ) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            // Take the newest page, then flip it so callers get ascending order
            let sql = format!(
                "SELECT {} FROM direct_messages
                 WHERE ((sender_id = ?1 AND recipient_id = ?2) OR (sender_id = ?2 AND recipient_id = ?1))
                   AND (?3 IS NULL OR seq < ?3)
                 ORDER BY seq DESC
                 LIMIT ?4",
                MESSAGE_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt
                .query_map(rusqlite::params![a, b, before, limit], message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.reverse();
            Ok(rows)
        })
    }

    /// Newest message per peer plus the number of unread messages that peer
    /// sent `user_id`, most recently active conversation first.
    pub fn list_conversation_heads(&self, user_id: &str) -> Result<Vec<ConversationHeadRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "WITH mine AS (
                     SELECT *, CASE WHEN sender_id = ?1 THEN recipient_id ELSE sender_id END AS peer_id
                     FROM direct_messages
                     WHERE sender_id = ?1 OR recipient_id = ?1
                 )
                 SELECT {}, m.peer_id,
                        (SELECT COUNT(*) FROM direct_messages u
                          WHERE u.recipient_id = ?1 AND u.sender_id = m.peer_id AND u.read_at IS NULL)
                 FROM mine m
                 WHERE m.seq = (SELECT MAX(x.seq) FROM mine x WHERE x.peer_id = m.peer_id)
                 ORDER BY m.seq DESC",
                MESSAGE_COLUMNS
                    .split(", ")
                    .map(|c| format!("m.{}", c.trim()))
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([user_id], |row| {
                    Ok(ConversationHeadRow {
                        message: message_from_row(row)?,
                        peer_id: row.get(12)?,
                        unread_count: row.get(13)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Atomic first-write-wins flip of a one-time message to viewed.
    ///
    /// Returns true only for the single call that performed the transition;
    /// every other call (already viewed, not one-time, wrong viewer, missing
    /// row) returns false.
    pub fn mark_message_viewed(&self, id: &str, viewer_id: &str, viewed_at: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let n = conn.execute(
                "UPDATE direct_messages SET viewed_at = ?3
                 WHERE id = ?1 AND recipient_id = ?2 AND is_one_time = 1 AND viewed_at IS NULL",
                [id, viewer_id, viewed_at],
            )?;
            Ok(n == 1)
        })
    }

    /// Mark everything `peer_id` sent `reader_id` as read in one statement.
    pub fn mark_conversation_read(&self, reader_id: &str, peer_id: &str, read_at: &str) -> Result<usize> {
        self.with_conn_mut(|conn| {
            let n = conn.execute(
                "UPDATE direct_messages SET read_at = ?3
                 WHERE recipient_id = ?1 AND sender_id = ?2 AND read_at IS NULL",
                [reader_id, peer_id, read_at],
            )?;
            Ok(n)
        })
    }

    /// Hard delete, only when `sender_id` authored the message.
    pub fn delete_message_by_sender(&self, id: &str, sender_id: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let n = conn.execute(
                "DELETE FROM direct_messages WHERE id = ?1 AND sender_id = ?2",
                [id, sender_id],
            )?;
            Ok(n > 0)
        })
    }
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        seq: row.get(0)?,
        id: row.get(1)?,
        sender_id: row.get(2)?,
        recipient_id: row.get(3)?,
        content_kind: row.get(4)?,
        content_body: row.get(5)?,
        is_one_time: row.get(6)?,
        viewed_at: row.get(7)?,
        reply_to_id: row.get(8)?,
        read_at: row.get(9)?,
        client_nonce: row.get(10)?,
        created_at: row.get(11)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn send(db: &Database, from: &str, to: &str, body: &str, one_time: bool) -> MessageRow {
        db.insert_message(&NewMessage {
            id: Uuid::new_v4().to_string(),
            sender_id: from.into(),
            recipient_id: to.into(),
            content_kind: "text".into(),
            content_body: body.into(),
            is_one_time: one_time,
            reply_to_id: None,
            client_nonce: None,
        })
        .unwrap()
    }

    #[test]
    fn conversation_is_oldest_first_and_pages_backwards() {
        let db = Database::open_in_memory().unwrap();
        for i in 0..5 {
            let (from, to) = if i % 2 == 0 { ("x", "y") } else { ("y", "x") };
            send(&db, from, to, &format!("m{}", i), false);
        }
        send(&db, "x", "z", "elsewhere", false);

        let latest = db.list_conversation("y", "x", 3, None).unwrap();
        let bodies: Vec<_> = latest.iter().map(|m| m.content_body.as_str()).collect();
        assert_eq!(bodies, vec!["m2", "m3", "m4"]);

        let older = db.list_conversation("x", "y", 3, Some(latest[0].seq)).unwrap();
        let bodies: Vec<_> = older.iter().map(|m| m.content_body.as_str()).collect();
        assert_eq!(bodies, vec!["m0", "m1"]);
    }

    #[test]
    fn view_flip_happens_once_and_only_for_the_recipient() {
        let db = Database::open_in_memory().unwrap();
        let msg = send(&db, "x", "y", "secret", true);
        let plain = send(&db, "x", "y", "hello", false);
        let now = now_timestamp();

        assert!(!db.mark_message_viewed(&msg.id, "x", &now).unwrap());
        assert!(db.mark_message_viewed(&msg.id, "y", &now).unwrap());
        assert!(!db.mark_message_viewed(&msg.id, "y", &now).unwrap());
        assert!(!db.mark_message_viewed(&plain.id, "y", &now).unwrap());

        let stored = db.get_message(&msg.id).unwrap().unwrap();
        assert_eq!(stored.viewed_at.as_deref(), Some(now.as_str()));
    }

    #[test]
    fn heads_report_latest_message_and_unread_per_peer() {
        let db = Database::open_in_memory().unwrap();
        send(&db, "y", "x", "hi", false);
        send(&db, "y", "x", "you there?", false);
        send(&db, "z", "x", "yo", false);
        let last = send(&db, "x", "y", "yes", false);

        let heads = db.list_conversation_heads("x").unwrap();
        assert_eq!(heads.len(), 2);
        assert_eq!(heads[0].peer_id, "y");
        assert_eq!(heads[0].message.id, last.id);
        assert_eq!(heads[0].unread_count, 2);
        assert_eq!(heads[1].peer_id, "z");
        assert_eq!(heads[1].unread_count, 1);

        assert_eq!(db.mark_conversation_read("x", "y", &now_timestamp()).unwrap(), 2);
        assert_eq!(db.mark_conversation_read("x", "y", &now_timestamp()).unwrap(), 0);
        let heads = db.list_conversation_heads("x").unwrap();
        assert_eq!(heads[0].unread_count, 0);
    }

    #[test]
    fn only_the_sender_can_delete() {
        let db = Database::open_in_memory().unwrap();
        let msg = send(&db, "x", "y", "oops", false);
        assert!(!db.delete_message_by_sender(&msg.id, "y").unwrap());
        assert!(db.delete_message_by_sender(&msg.id, "x").unwrap());
        assert!(db.get_message(&msg.id).unwrap().is_none());
    }

    #[test]
    fn deleting_a_replied_message_detaches_replies() {
        let db = Database::open_in_memory().unwrap();
        let original = send(&db, "x", "y", "question", false);
        let reply = db
            .insert_message(&NewMessage {
                id: Uuid::new_v4().to_string(),
                sender_id: "y".into(),
                recipient_id: "x".into(),
                content_kind: "text".into(),
                content_body: "answer".into(),
                is_one_time: false,
                reply_to_id: Some(original.id.clone()),
                client_nonce: Some("n-1".into()),
            })
            .unwrap();

        db.delete_message_by_sender(&original.id, "x").unwrap();
        let reply = db.get_message(&reply.id).unwrap().unwrap();
        assert_eq!(reply.reply_to_id, None);
        assert_eq!(reply.client_nonce.as_deref(), Some("n-1"));
    }
}
