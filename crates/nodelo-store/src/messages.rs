use rusqlite::{params, params_from_iter, types::Value, OptionalExtension};
use uuid::Uuid;

use nodelo_shared::SenderType;

use crate::columns::{bool_at, enum_at, json_at, now, opt_ts_at, opt_uuid_at, ts, ts_at, uuid_at};
use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{Attachment, Message, NewMessage};
use crate::page::{Page, Paginated};

const MESSAGE_COLUMNS: &str = "id, chat_id, sender_type, sender_id, sender_name, content,
     attachments, is_read, read_at, is_reply_to_contact, email_sent, created_at, updated_at";

impl Database {
    /// Store an unread message. The chat aggregates are left alone; callers
    /// follow up with [`Database::record_chat_message`] in the same
    /// transaction.
    pub fn create_message(&self, new: &NewMessage) -> Result<Message> {
        let id = Uuid::new_v4();
        let created = now();
        let attachments = serde_json::to_string(&new.attachments)?;

        self.conn().execute(
            "INSERT INTO messages (id, chat_id, sender_type, sender_id, sender_name, content,
                                   attachments, is_reply_to_contact, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
            params![
                id.to_string(),
                new.chat_id.to_string(),
                new.sender_type.as_str(),
                new.sender_id.map(|s| s.to_string()),
                new.sender_name,
                new.content,
                attachments,
                new.is_reply_to_contact,
                ts(&created),
            ],
        )?;

        Ok(Message {
            id,
            chat_id: new.chat_id,
            sender_type: new.sender_type,
            sender_id: new.sender_id,
            sender_name: new.sender_name.clone(),
            content: new.content.clone(),
            attachments: new.attachments.clone(),
            is_read: false,
            read_at: None,
            is_reply_to_contact: new.is_reply_to_contact,
            email_sent: false,
            created_at: created,
            updated_at: created,
        })
    }

    pub fn find_message(&self, id: Uuid) -> Result<Option<Message>> {
        Ok(self
            .conn()
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                params![id.to_string()],
                row_to_message,
            )
            .optional()?)
    }

    /// Page through a chat's history. Page 1 is the newest window; the items
    /// of every page are returned oldest first so they render top to bottom.
    pub fn list_messages_for_chat(&self, chat_id: Uuid, page: Page) -> Result<Paginated<Message>> {
        let total: u64 = self.conn().query_row(
            "SELECT COUNT(*) FROM messages WHERE chat_id = ?1",
            params![chat_id.to_string()],
            |row| row.get(0),
        )?;

        let mut stmt = self.conn().prepare(&format!(
            "SELECT {MESSAGE_COLUMNS}
             FROM messages
             WHERE chat_id = ?1
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?2 OFFSET ?3"
        ))?;
        let rows = stmt.query_map(
            params![chat_id.to_string(), page.limit, page.offset()],
            row_to_message,
        )?;

        let mut items = Vec::new();
        for row in rows {
            items.push(row?);
        }
        items.reverse();
        Ok(Paginated { items, total, page })
    }

    /// Mark unread messages sent by `sender` in a chat as read. When `ids` is
    /// given only those messages are touched, and still only if they match
    /// the chat and sender. Returns the number of rows changed.
    pub fn mark_messages_read(
        &self,
        chat_id: Uuid,
        sender: SenderType,
        ids: Option<&[Uuid]>,
    ) -> Result<usize> {
        let read_at = ts(&now());
        let mut sql = String::from(
            "UPDATE messages SET is_read = 1, read_at = ?1, updated_at = ?1
             WHERE chat_id = ?2 AND sender_type = ?3 AND is_read = 0",
        );
        let mut values = vec![
            Value::Text(read_at),
            Value::Text(chat_id.to_string()),
            Value::Text(sender.as_str().to_owned()),
        ];

        if let Some(ids) = ids {
            if ids.is_empty() {
                return Ok(0);
            }
            let placeholders = (0..ids.len())
                .map(|i| format!("?{}", i + 4))
                .collect::<Vec<_>>()
                .join(", ");
            sql.push_str(&format!(" AND id IN ({placeholders})"));
            values.extend(ids.iter().map(|id| Value::Text(id.to_string())));
        }

        Ok(self.conn().execute(&sql, params_from_iter(values))?)
    }

    /// Every attachment referenced by a chat's messages, oldest first.
    pub fn list_chat_attachments(&self, chat_id: Uuid) -> Result<Vec<Attachment>> {
        let mut stmt = self.conn().prepare(
            "SELECT attachments FROM messages
             WHERE chat_id = ?1 AND attachments != '[]'
             ORDER BY created_at ASC, rowid ASC",
        )?;
        let rows = stmt.query_map(params![chat_id.to_string()], |row| {
            json_at::<Vec<Attachment>>(row, 0)
        })?;

        let mut attachments = Vec::new();
        for row in rows {
            attachments.extend(row?);
        }
        Ok(attachments)
    }

    pub fn set_message_email_sent(&self, id: Uuid) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE messages SET email_sent = 1, updated_at = ?1 WHERE id = ?2",
            params![ts(&now()), id.to_string()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: uuid_at(row, 0)?,
        chat_id: uuid_at(row, 1)?,
        sender_type: enum_at(row, 2)?,
        sender_id: opt_uuid_at(row, 3)?,
        sender_name: row.get(4)?,
        content: row.get(5)?,
        attachments: json_at(row, 6)?,
        is_read: bool_at(row, 7)?,
        read_at: opt_ts_at(row, 8)?,
        is_reply_to_contact: bool_at(row, 9)?,
        email_sent: bool_at(row, 10)?,
        created_at: ts_at(row, 11)?,
        updated_at: ts_at(row, 12)?,
    })
}
