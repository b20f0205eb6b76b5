//! CRUD operations for [`Chat`] records, including the unread-counter
//! bookkeeping that concurrent senders contend on.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use nodelo_shared::{ChatStatus, SenderType};

use crate::columns::{enum_at, now, opt_enum_at, opt_uuid_at, ts, ts_at, uuid_at};
use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{Chat, NewChat, UnreadCount};
use crate::page::{Page, Paginated};

const CHAT_COLUMNS: &str = "id, contact_id, user_id, user_name, user_email, admin_id, admin_name,
     status, last_message_at, last_message_by, unread_user, unread_admin, created_at, updated_at";

/// Optional filters for [`Database::list_chats`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatFilter {
    pub status: Option<ChatStatus>,
    pub user_email: Option<String>,
}

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Open a new active chat with both unread counters at zero.
    ///
    /// Fails with [`StoreError::Conflict`] if `contact_id` already has a chat.
    pub fn create_chat(&self, new: &NewChat) -> Result<Chat> {
        let id = Uuid::new_v4();
        let created = now();
        let user_email = new.user_email.trim().to_lowercase();

        self.conn().execute(
            "INSERT INTO chats (id, contact_id, user_id, user_name, user_email, admin_id,
                                admin_name, status, last_message_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9, ?9)",
            params![
                id.to_string(),
                new.contact_id.map(|c| c.to_string()),
                new.user_id,
                new.user_name,
                user_email,
                new.admin_id.map(|a| a.to_string()),
                new.admin_name,
                ChatStatus::Active.as_str(),
                ts(&created),
            ],
        )?;

        tracing::debug!(chat = %id, contact = ?new.contact_id, "created chat");

        Ok(Chat {
            id,
            contact_id: new.contact_id,
            user_id: new.user_id.clone(),
            user_name: new.user_name.clone(),
            user_email,
            admin_id: new.admin_id,
            admin_name: new.admin_name.clone(),
            status: ChatStatus::Active,
            last_message_at: created,
            last_message_by: None,
            unread_count: UnreadCount::default(),
            created_at: created,
            updated_at: created,
        })
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    pub fn find_chat(&self, id: Uuid) -> Result<Option<Chat>> {
        self.find_chat_where("id = ?1", &id.to_string())
    }

    /// Fetch a chat, failing with [`StoreError::NotFound`] if absent.
    pub fn get_chat(&self, id: Uuid) -> Result<Chat> {
        self.find_chat(id)?.ok_or(StoreError::NotFound)
    }

    pub fn find_chat_by_contact(&self, contact_id: Uuid) -> Result<Option<Chat>> {
        self.find_chat_where("contact_id = ?1", &contact_id.to_string())
    }

    /// Case-insensitive lookup by visitor email. If several chats share the
    /// email the oldest one is returned, so resolution is stable.
    pub fn find_chat_by_user_email(&self, email: &str) -> Result<Option<Chat>> {
        self.find_chat_where("user_email = ?1", &email.trim().to_lowercase())
    }

    fn find_chat_where(&self, predicate: &str, value: &str) -> Result<Option<Chat>> {
        Ok(self
            .conn()
            .query_row(
                &format!(
                    "SELECT {CHAT_COLUMNS} FROM chats WHERE {predicate}
                     ORDER BY created_at ASC, rowid ASC LIMIT 1"
                ),
                params![value],
                row_to_chat,
            )
            .optional()?)
    }

    /// Page of chats, most recently active first.
    pub fn list_chats(&self, filter: &ChatFilter, page: Page) -> Result<Paginated<Chat>> {
        let status = filter.status.map(|s| s.as_str());
        let email = filter.user_email.as_deref().map(|e| e.trim().to_lowercase());

        let total: u64 = self.conn().query_row(
            "SELECT COUNT(*) FROM chats
             WHERE (?1 IS NULL OR status = ?1) AND (?2 IS NULL OR user_email = ?2)",
            params![status, email],
            |row| row.get(0),
        )?;

        let mut stmt = self.conn().prepare(&format!(
            "SELECT {CHAT_COLUMNS}
             FROM chats
             WHERE (?1 IS NULL OR status = ?1) AND (?2 IS NULL OR user_email = ?2)
             ORDER BY last_message_at DESC, rowid DESC
             LIMIT ?3 OFFSET ?4"
        ))?;
        let rows = stmt.query_map(
            params![status, email, page.limit, page.offset()],
            row_to_chat,
        )?;

        let mut items = Vec::new();
        for row in rows {
            items.push(row?);
        }
        Ok(Paginated { items, total, page })
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    pub fn update_chat_status(&self, id: Uuid, status: ChatStatus) -> Result<Chat> {
        let affected = self.conn().execute(
            "UPDATE chats SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status.as_str(), ts(&now()), id.to_string()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        self.get_chat(id)
    }

    /// Apply the aggregate update for a newly stored message: stamp
    /// `last_message_at` / `last_message_by` and add one to the unread counter
    /// of the party the message is addressed to.
    ///
    /// The increment happens inside the `UPDATE` itself so two concurrent
    /// senders can never overwrite each other's count.
    pub fn record_chat_message(
        &self,
        id: Uuid,
        sender: SenderType,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let sql = match sender.other() {
            SenderType::Admin => {
                "UPDATE chats
                 SET last_message_at = ?1, last_message_by = ?2,
                     unread_admin = unread_admin + 1, updated_at = ?1
                 WHERE id = ?3"
            }
            SenderType::User => {
                "UPDATE chats
                 SET last_message_at = ?1, last_message_by = ?2,
                     unread_user = unread_user + 1, updated_at = ?1
                 WHERE id = ?3"
            }
        };
        let affected = self
            .conn()
            .execute(sql, params![ts(&at), sender.as_str(), id.to_string()])?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Zero the unread counter of `party`. Returns `false` if the chat is gone.
    pub fn clear_unread(&self, id: Uuid, party: SenderType) -> Result<bool> {
        let sql = match party {
            SenderType::Admin => "UPDATE chats SET unread_admin = 0, updated_at = ?1 WHERE id = ?2",
            SenderType::User => "UPDATE chats SET unread_user = 0, updated_at = ?1 WHERE id = ?2",
        };
        let affected = self
            .conn()
            .execute(sql, params![ts(&now()), id.to_string()])?;
        Ok(affected > 0)
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    // ON DELETE CASCADE: the chat's messages go with it
    pub fn delete_chat(&self, id: Uuid) -> Result<()> {
        let affected = self
            .conn()
            .execute("DELETE FROM chats WHERE id = ?1", params![id.to_string()])?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}

fn row_to_chat(row: &rusqlite::Row<'_>) -> rusqlite::Result<Chat> {
    Ok(Chat {
        id: uuid_at(row, 0)?,
        contact_id: opt_uuid_at(row, 1)?,
        user_id: row.get(2)?,
        user_name: row.get(3)?,
        user_email: row.get(4)?,
        admin_id: opt_uuid_at(row, 5)?,
        admin_name: row.get(6)?,
        status: enum_at(row, 7)?,
        last_message_at: ts_at(row, 8)?,
        last_message_by: opt_enum_at(row, 9)?,
        unread_count: UnreadCount {
            user: row.get(10)?,
            admin: row.get(11)?,
        },
        created_at: ts_at(row, 12)?,
        updated_at: ts_at(row, 13)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn visitor(email: &str) -> NewChat {
        NewChat {
            contact_id: None,
            user_id: email.to_lowercase(),
            user_name: "Visitor".into(),
            user_email: email.into(),
            admin_id: None,
            admin_name: None,
        }
    }

    #[test]
    fn create_defaults() {
        let db = Database::open_in_memory().unwrap();
        let chat = db.create_chat(&visitor("A@X.com")).unwrap();

        assert_eq!(chat.status, ChatStatus::Active);
        assert_eq!(chat.unread_count, UnreadCount::default());
        assert_eq!(chat.user_email, "a@x.com");
        assert_eq!(db.get_chat(chat.id).unwrap(), chat);
    }

    #[test]
    fn lookups_return_none_when_absent() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.find_chat(Uuid::new_v4()).unwrap().is_none());
        assert!(db.find_chat_by_contact(Uuid::new_v4()).unwrap().is_none());
        assert!(db.find_chat_by_user_email("nobody@x.com").unwrap().is_none());
    }

    #[test]
    fn email_lookup_is_case_insensitive() {
        let db = Database::open_in_memory().unwrap();
        let chat = db.create_chat(&visitor("a@x.com")).unwrap();
        let found = db.find_chat_by_user_email("  A@X.COM ").unwrap().unwrap();
        assert_eq!(found.id, chat.id);
    }

    #[test]
    fn one_chat_per_contact() {
        let db = Database::open_in_memory().unwrap();
        let contact = db
            .create_contact(
                &nodelo_shared::validate::ContactSubmission {
                    name: Some("C".into()),
                    email: Some("c@x.com".into()),
                    message: Some("A message long enough".into()),
                    ..Default::default()
                }
                .validate()
                .unwrap(),
            )
            .unwrap();

        let mut new = visitor("c@x.com");
        new.contact_id = Some(contact.id);
        db.create_chat(&new).unwrap();

        assert!(matches!(db.create_chat(&new), Err(StoreError::Conflict(_))));
    }

    #[test]
    fn unread_counts_follow_the_other_party() {
        let db = Database::open_in_memory().unwrap();
        let chat = db.create_chat(&visitor("a@x.com")).unwrap();

        for _ in 0..3 {
            db.record_chat_message(chat.id, SenderType::User, now()).unwrap();
        }
        db.record_chat_message(chat.id, SenderType::Admin, now()).unwrap();

        let chat = db.get_chat(chat.id).unwrap();
        assert_eq!(chat.unread_count, UnreadCount { user: 1, admin: 3 });
        assert_eq!(chat.last_message_by, Some(SenderType::Admin));

        assert!(db.clear_unread(chat.id, SenderType::Admin).unwrap());
        let chat = db.get_chat(chat.id).unwrap();
        assert_eq!(chat.unread_count, UnreadCount { user: 1, admin: 0 });
    }

    #[test]
    fn aggregate_update_on_missing_chat_fails() {
        let db = Database::open_in_memory().unwrap();
        assert!(matches!(
            db.record_chat_message(Uuid::new_v4(), SenderType::User, now()),
            Err(StoreError::NotFound)
        ));
        assert!(!db.clear_unread(Uuid::new_v4(), SenderType::User).unwrap());
    }

    #[test]
    fn list_orders_by_latest_activity() {
        let db = Database::open_in_memory().unwrap();
        let older = db.create_chat(&visitor("a@x.com")).unwrap();
        let newer = db.create_chat(&visitor("b@x.com")).unwrap();
        db.update_chat_status(newer.id, ChatStatus::Resolved).unwrap();

        // A fresh message moves the older chat to the top.
        db.record_chat_message(older.id, SenderType::User, now()).unwrap();

        let page = db.list_chats(&ChatFilter::default(), Page::default()).unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.items[0].id, older.id);

        let resolved = db
            .list_chats(
                &ChatFilter {
                    status: Some(ChatStatus::Resolved),
                    ..Default::default()
                },
                Page::default(),
            )
            .unwrap();
        assert_eq!(resolved.items.len(), 1);
        assert_eq!(resolved.items[0].id, newer.id);

        let by_email = db
            .list_chats(
                &ChatFilter {
                    user_email: Some("B@X.COM".into()),
                    ..Default::default()
                },
                Page::default(),
            )
            .unwrap();
        assert_eq!(by_email.total, 1);
    }
}
