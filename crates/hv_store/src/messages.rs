//! Message queries. Content is sealed per row.

use chrono::{DateTime, Utc};
use sqlx::{Executor, Sqlite};

use hv_proto::MessageType;

use crate::db::Store;
use crate::error::StoreError;
use crate::models::{from_millis, now, to_millis, Message};

/// Result of recording an inbound message id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundOutcome {
    Inserted,
    /// Same message already stored for the same sender and contact.
    Duplicate(Message),
    /// Id was seen before but its row is gone or belongs elsewhere.
    Replayed,
}

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: String,
    contact_id: String,
    content_enc: String,
    sender_id: String,
    recipient_id: String,
    timestamp: i64,
    is_sent: bool,
    is_delivered: bool,
    is_read: bool,
    is_ephemeral: bool,
    ephemeral_duration_seconds: Option<i64>,
    message_type: String,
    created_at: i64,
}

const SELECT_MESSAGE: &str = "SELECT id, contact_id, content_enc, sender_id, recipient_id, timestamp, \
     is_sent, is_delivered, is_read, is_ephemeral, ephemeral_duration_seconds, message_type, \
     created_at FROM messages";

impl Store {
    pub async fn insert_message(&self, message: &Message) -> Result<(), StoreError> {
        self.write_message(self.pool(), message, "INSERT INTO")
            .await
            .map(|_| ())
    }

    pub async fn insert_message_if_absent(&self, message: &Message) -> Result<bool, StoreError> {
        self.write_message(self.pool(), message, "INSERT OR IGNORE INTO").await
    }

    /// Store an inbound message once per id. Ids land in `seen_messages` with
    /// the row and stay there after the row is deleted or expires, so a
    /// replayed payload cannot bring a message back.
    pub async fn record_inbound(&self, message: &Message) -> Result<InboundOutcome, StoreError> {
        let mut tx = self.pool().begin().await?;
        let fresh = sqlx::query(
            "INSERT OR IGNORE INTO seen_messages (id, contact_id, seen_at) VALUES (?, ?, ?)",
        )
        .bind(&message.id)
        .bind(&message.contact_id)
        .bind(to_millis(now()))
        .execute(&mut *tx)
        .await?
        .rows_affected()
            > 0;
        let inserted = fresh
            && self
                .write_message(&mut *tx, message, "INSERT OR IGNORE INTO")
                .await?;
        tx.commit().await?;

        if inserted {
            return Ok(InboundOutcome::Inserted);
        }
        match self.get_message(&message.id).await? {
            Some(existing)
                if existing.contact_id == message.contact_id
                    && existing.sender_id == message.sender_id =>
            {
                Ok(InboundOutcome::Duplicate(existing))
            }
            _ => Ok(InboundOutcome::Replayed),
        }
    }

    async fn write_message<'e, E>(&self, exec: E, m: &Message, verb: &str) -> Result<bool, StoreError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        m.validate()?;
        let content_enc = self.encrypt_value(&content_ctx(&m.id), m.content.as_bytes())?;

        let sql = format!(
            "{verb} messages (id, contact_id, content_enc, sender_id, recipient_id, timestamp, \
             is_sent, is_delivered, is_read, is_ephemeral, ephemeral_duration_seconds, \
             message_type, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        );
        let result = sqlx::query(&sql)
            .bind(&m.id)
            .bind(&m.contact_id)
            .bind(content_enc)
            .bind(&m.sender_id)
            .bind(&m.recipient_id)
            .bind(to_millis(m.timestamp))
            .bind(m.is_sent)
            .bind(m.is_delivered)
            .bind(m.is_read)
            .bind(m.is_ephemeral)
            .bind(m.ephemeral_duration_seconds.map(i64::from))
            .bind(m.message_type.as_str())
            .bind(to_millis(m.created_at))
            .execute(exec)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get_message(&self, id: &str) -> Result<Option<Message>, StoreError> {
        let row: Option<MessageRow> = sqlx::query_as(&format!("{SELECT_MESSAGE} WHERE id = ?"))
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        row.map(|r| self.message_from_row(r)).transpose()
    }

    /// Conversation history, oldest first.
    pub async fn list_messages(&self, contact_id: &str) -> Result<Vec<Message>, StoreError> {
        let rows: Vec<MessageRow> = sqlx::query_as(&format!(
            "{SELECT_MESSAGE} WHERE contact_id = ? ORDER BY timestamp ASC, created_at ASC"
        ))
        .bind(contact_id)
        .fetch_all(self.pool())
        .await?;
        rows.into_iter().map(|r| self.message_from_row(r)).collect()
    }

    pub async fn count_messages(&self) -> Result<u64, StoreError> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages")
            .fetch_one(self.pool())
            .await?;
        Ok(n as u64)
    }

    pub async fn set_message_sent(&self, id: &str, sent: bool) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE messages SET is_sent = ? WHERE id = ?")
            .bind(sent)
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn mark_message_read(&self, id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE messages SET is_read = 1 WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Mark every unread message read, for one contact or all of them.
    pub async fn mark_all_read(&self, contact_id: Option<&str>) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE messages SET is_read = 1 WHERE is_read = 0 AND (? IS NULL OR contact_id = ?)",
        )
        .bind(contact_id)
        .bind(contact_id)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn delete_message(&self, id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM messages WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete_messages(&self, contact_id: Option<&str>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM messages WHERE ? IS NULL OR contact_id = ?")
            .bind(contact_id)
            .bind(contact_id)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected())
    }

    /// Unread messages authored by the contact (not by us).
    pub async fn unread_count(&self, contact_id: Option<&str>) -> Result<u64, StoreError> {
        let n: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM messages m JOIN contacts c ON c.id = m.contact_id \
             WHERE m.is_read = 0 AND m.sender_id = c.public_key \
             AND (? IS NULL OR m.contact_id = ?)",
        )
        .bind(contact_id)
        .bind(contact_id)
        .fetch_one(self.pool())
        .await?;
        Ok(n as u64)
    }

    /// Delete every ephemeral row with `now >= created_at + duration` in one
    /// statement and return the removed ids.
    pub async fn delete_expired(&self, now: DateTime<Utc>) -> Result<Vec<String>, StoreError> {
        let ids: Vec<String> = sqlx::query_scalar(
            "DELETE FROM messages WHERE is_ephemeral = 1 \
             AND created_at + ephemeral_duration_seconds * 1000 <= ? RETURNING id",
        )
        .bind(to_millis(now))
        .fetch_all(self.pool())
        .await?;
        Ok(ids)
    }

    fn message_from_row(&self, row: MessageRow) -> Result<Message, StoreError> {
        let content = self.decrypt_string(&content_ctx(&row.id), &row.content_enc)?;
        let message_type = MessageType::parse(&row.message_type).ok_or_else(|| {
            StoreError::Corrupt(format!("message {}: type {}", row.id, row.message_type))
        })?;
        let ephemeral_duration_seconds = row
            .ephemeral_duration_seconds
            .map(u32::try_from)
            .transpose()
            .map_err(|_| StoreError::Corrupt(format!("message {}: duration", row.id)))?;

        Ok(Message {
            content,
            contact_id: row.contact_id,
            sender_id: row.sender_id,
            recipient_id: row.recipient_id,
            timestamp: from_millis(row.timestamp)?,
            is_sent: row.is_sent,
            is_delivered: row.is_delivered,
            is_read: row.is_read,
            is_ephemeral: row.is_ephemeral,
            ephemeral_duration_seconds,
            message_type,
            created_at: from_millis(row.created_at)?,
            id: row.id,
        })
    }
}

fn content_ctx(id: &str) -> String {
    format!("messages.content:{id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{StoreKey, StoreName};
    use crate::models::{now, Contact};
    use hv_crypto::{safety::generate_safety_number, IdentityKeyPair};
    use hv_proto::RouteHandle;

    struct Fixture {
        _dir: tempfile::TempDir,
        store: Store,
        me: String,
        them: String,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open_in(dir.path(), StoreName::Real, StoreKey::generate())
            .await
            .unwrap();
        let me = IdentityKeyPair::generate();
        let them = IdentityKeyPair::generate();
        let at = now();
        store
            .insert_contact(&Contact {
                id: "c1".into(),
                name: "Bob".into(),
                route: RouteHandle(vec![9]),
                public_key: them.public,
                safety_number: generate_safety_number(&me.public, &them.public),
                verified: false,
                trust_level: 0,
                created_at: at,
                updated_at: at,
            })
            .await
            .unwrap();
        Fixture {
            _dir: dir,
            store,
            me: me.public.to_b64(),
            them: them.public.to_b64(),
        }
    }

    fn message(id: &str, from: &str, to: &str, ephemeral: Option<u32>) -> Message {
        let at = now();
        Message {
            id: id.into(),
            contact_id: "c1".into(),
            content: format!("body of {id}"),
            sender_id: from.into(),
            recipient_id: to.into(),
            timestamp: at,
            is_sent: false,
            is_delivered: true,
            is_read: false,
            is_ephemeral: ephemeral.is_some(),
            ephemeral_duration_seconds: ephemeral,
            message_type: MessageType::Text,
            created_at: at,
        }
    }

    #[tokio::test]
    async fn roundtrip_through_sealed_column() {
        let f = fixture().await;
        let m = message("m1", &f.them, &f.me, None);
        f.store.insert_message(&m).await.unwrap();

        assert_eq!(f.store.get_message("m1").await.unwrap(), Some(m));
        let raw: String = sqlx::query_scalar("SELECT content_enc FROM messages WHERE id = 'm1'")
            .fetch_one(f.store.pool())
            .await
            .unwrap();
        assert!(!raw.contains("body of"));
    }

    #[tokio::test]
    async fn invalid_ephemeral_row_is_refused() {
        let f = fixture().await;
        let mut m = message("m1", &f.them, &f.me, None);
        m.is_ephemeral = true;
        assert!(matches!(
            f.store.insert_message(&m).await,
            Err(StoreError::Invalid(_))
        ));
        assert_eq!(f.store.count_messages().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn unread_counts_only_incoming() {
        let f = fixture().await;
        f.store.insert_message(&message("in1", &f.them, &f.me, None)).await.unwrap();
        f.store.insert_message(&message("in2", &f.them, &f.me, None)).await.unwrap();
        f.store.insert_message(&message("out1", &f.me, &f.them, None)).await.unwrap();

        assert_eq!(f.store.unread_count(None).await.unwrap(), 2);
        assert!(f.store.mark_message_read("in1").await.unwrap());
        assert_eq!(f.store.unread_count(Some("c1")).await.unwrap(), 1);
        f.store.mark_all_read(Some("c1")).await.unwrap();
        assert_eq!(f.store.unread_count(None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn expiry_uses_created_at_plus_duration() {
        let f = fixture().await;
        let m = message("eph", &f.them, &f.me, Some(30));
        f.store.insert_message(&m).await.unwrap();
        f.store.insert_message(&message("keep", &f.them, &f.me, None)).await.unwrap();

        let just_before = m.created_at + chrono::Duration::milliseconds(29_999);
        assert!(f.store.delete_expired(just_before).await.unwrap().is_empty());

        let at = m.created_at + chrono::Duration::seconds(30);
        assert_eq!(f.store.delete_expired(at).await.unwrap(), vec!["eph".to_string()]);
        assert_eq!(f.store.count_messages().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn deleting_contact_cascades_to_messages() {
        let f = fixture().await;
        f.store.insert_message(&message("m1", &f.them, &f.me, None)).await.unwrap();
        f.store.insert_message(&message("m2", &f.me, &f.them, None)).await.unwrap();

        f.store.delete_contact("c1").await.unwrap();
        assert_eq!(f.store.count_messages().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn history_is_ordered_and_deletable() {
        let f = fixture().await;
        let mut first = message("a", &f.them, &f.me, None);
        first.timestamp = first.timestamp - chrono::Duration::seconds(5);
        f.store.insert_message(&message("b", &f.me, &f.them, None)).await.unwrap();
        f.store.insert_message(&first).await.unwrap();

        let ids: Vec<_> = f
            .store
            .list_messages("c1")
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ids, vec!["a", "b"]);

        assert!(f.store.delete_message("a").await.unwrap());
        assert_eq!(f.store.delete_messages(Some("c1")).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn inbound_ids_are_accepted_once() {
        let f = fixture().await;
        let m = message("in1", &f.them, &f.me, Some(5));
        assert_eq!(f.store.record_inbound(&m).await.unwrap(), InboundOutcome::Inserted);
        assert_eq!(
            f.store.record_inbound(&m).await.unwrap(),
            InboundOutcome::Duplicate(m.clone())
        );

        let later = m.created_at + chrono::Duration::seconds(5);
        assert_eq!(f.store.delete_expired(later).await.unwrap(), vec!["in1".to_string()]);
        assert_eq!(f.store.record_inbound(&m).await.unwrap(), InboundOutcome::Replayed);

        let deleted = message("in2", &f.them, &f.me, None);
        f.store.record_inbound(&deleted).await.unwrap();
        assert!(f.store.delete_message("in2").await.unwrap());
        assert_eq!(f.store.record_inbound(&deleted).await.unwrap(), InboundOutcome::Replayed);
        assert_eq!(f.store.count_messages().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn inbound_id_owned_by_another_row_is_refused() {
        let f = fixture().await;
        let ours = message("shared", &f.me, &f.them, None);
        f.store.insert_message(&ours).await.unwrap();

        let theirs = message("shared", &f.them, &f.me, None);
        assert_eq!(f.store.record_inbound(&theirs).await.unwrap(), InboundOutcome::Replayed);
        assert_eq!(f.store.get_message("shared").await.unwrap(), Some(ours));
    }
}
