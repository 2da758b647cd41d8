use anyhow::{Result, bail};
use rusqlite::{Connection, Row};
use uuid::Uuid;

use guardian_types::models::{ChatMessage, Conversation, Role, Visibility};

use super::OptionalExt;
use crate::Database;
use crate::models::{UsageRecord, enum_col, opt_timestamp_col, timestamp_col, uuid_col};

impl Database {
    // -- Conversations --

    /// Fetch a conversation, including soft-deleted ones.
    pub fn get_conversation(&self, id: &Uuid) -> Result<Option<Conversation>> {
        self.with_conn(|conn| query_conversation(conn, id))
    }

    pub fn create_conversation(
        &self,
        id: &Uuid,
        account_id: &Uuid,
        persona_id: &Uuid,
        title: &str,
    ) -> Result<Conversation> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO conversations (id, account_id, persona_id, title) VALUES (?1, ?2, ?3, ?4)",
                (id.to_string(), account_id.to_string(), persona_id.to_string(), title),
            )?;
            query_conversation(conn, id)?
                .ok_or_else(|| anyhow::anyhow!("Conversation {} vanished after insert", id))
        })
    }

    /// Live conversations of a persona, newest first.
    pub fn list_conversations(&self, persona_id: &Uuid) -> Result<Vec<Conversation>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, account_id, persona_id, title, visibility, created_at, deleted_at
                 FROM conversations
                 WHERE persona_id = ?1 AND deleted_at IS NULL
                 ORDER BY created_at DESC, rowid DESC",
            )?;
            let rows = stmt
                .query_map([persona_id.to_string()], conversation_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Mark a conversation deleted. Messages and flags are left in place.
    /// Returns false if it was already deleted or does not exist.
    pub fn soft_delete_conversation(&self, id: &Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE conversations SET deleted_at = datetime('now')
                 WHERE id = ?1 AND deleted_at IS NULL",
                [id.to_string()],
            )?;
            Ok(updated > 0)
        })
    }

    // -- Messages --

    /// Insert a message unless a row with the same id already exists in this
    /// conversation. Returns true if a row was written. An id that already
    /// belongs to another conversation is an error.
    pub fn insert_message_if_absent(&self, conversation_id: &Uuid, message: &ChatMessage) -> Result<bool> {
        self.with_conn(|conn| insert_if_absent(conn, conversation_id, message))
    }

    /// Persist one generated turn atomically: the originating user message (if
    /// not stored yet), every finalized reply message, and the token accounting row.
    pub fn save_turn(
        &self,
        conversation_id: &Uuid,
        messages: &[ChatMessage],
        usage: Option<&UsageRecord>,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            for message in messages {
                insert_if_absent(&tx, conversation_id, message)?;
            }

            if let Some(record) = usage {
                tx.execute(
                    "INSERT INTO message_usage
                        (id, conversation_id, message_id, category, prompt_tokens, completion_tokens)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    rusqlite::params![
                        record.id.to_string(),
                        conversation_id.to_string(),
                        record.message_id.to_string(),
                        record.category,
                        record.usage.prompt_tokens,
                        record.usage.completion_tokens,
                    ],
                )?;
            }

            tx.commit()?;
            Ok(())
        })
    }

    pub fn get_messages(&self, conversation_id: &Uuid) -> Result<Vec<ChatMessage>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, role, content FROM messages
                 WHERE conversation_id = ?1
                 ORDER BY created_at, rowid",
            )?;
            let rows = stmt
                .query_map([conversation_id.to_string()], message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Messages in order, leaving out any that carry a flag.
    pub fn get_unflagged_messages(&self, conversation_id: &Uuid) -> Result<Vec<ChatMessage>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT m.id, m.role, m.content FROM messages m
                 WHERE m.conversation_id = ?1
                   AND NOT EXISTS (SELECT 1 FROM flags f WHERE f.message_id = m.id)
                 ORDER BY m.created_at, m.rowid",
            )?;
            let rows = stmt
                .query_map([conversation_id.to_string()], message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn get_message(&self, id: &Uuid) -> Result<Option<ChatMessage>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, role, content FROM messages WHERE id = ?1",
                [id.to_string()],
                message_from_row,
            )
            .optional()
        })
    }

    pub fn count_usage_records(&self, conversation_id: &Uuid) -> Result<i64> {
        self.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM message_usage WHERE conversation_id = ?1",
                [conversation_id.to_string()],
                |row| row.get(0),
            )?)
        })
    }
}

fn insert_if_absent(conn: &Connection, conversation_id: &Uuid, message: &ChatMessage) -> Result<bool> {
    let inserted = conn.execute(
        "INSERT INTO messages (id, conversation_id, role, content) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(id) DO NOTHING",
        (
            message.id.to_string(),
            conversation_id.to_string(),
            message.role.as_str(),
            &message.content,
        ),
    )?;

    if inserted == 0 {
        let owner: String = conn.query_row(
            "SELECT conversation_id FROM messages WHERE id = ?1",
            [message.id.to_string()],
            |row| row.get(0),
        )?;
        if owner != conversation_id.to_string() {
            bail!("Message {} belongs to another conversation", message.id);
        }
    }

    Ok(inserted > 0)
}

fn query_conversation(conn: &Connection, id: &Uuid) -> Result<Option<Conversation>> {
    conn.query_row(
        "SELECT id, account_id, persona_id, title, visibility, created_at, deleted_at
         FROM conversations WHERE id = ?1",
        [id.to_string()],
        conversation_from_row,
    )
    .optional()
}

fn conversation_from_row(row: &Row<'_>) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: uuid_col(row, 0)?,
        account_id: uuid_col(row, 1)?,
        persona_id: uuid_col(row, 2)?,
        title: row.get(3)?,
        visibility: enum_col::<Visibility>(row, 4)?,
        created_at: timestamp_col(row, 5)?,
        deleted_at: opt_timestamp_col(row, 6)?,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<ChatMessage> {
    Ok(ChatMessage {
        id: uuid_col(row, 0)?,
        role: enum_col::<Role>(row, 1)?,
        content: row.get(2)?,
    })
}
