//! CRUD operations for [`Contact`] records.

use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use nodelo_shared::validate::ContactDraft;
use nodelo_shared::ContactStatus;

use crate::columns::{bool_at, enum_at, now, opt_uuid_at, ts, ts_at, uuid_at};
use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::Contact;
use crate::page::{Page, Paginated};

const CONTACT_COLUMNS: &str = "id, name, email, company, project_type, budget, message, status,
     email_sent, chat_id, replied_by, reply_count, created_at, updated_at";

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Persist a validated submission with status `new`.
    pub fn create_contact(&self, draft: &ContactDraft) -> Result<Contact> {
        let id = Uuid::new_v4();
        let created = now();

        self.conn().execute(
            "INSERT INTO contacts (id, name, email, company, project_type, budget, message,
                                   status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
            params![
                id.to_string(),
                draft.name,
                draft.email,
                draft.company,
                draft.project_type.as_str(),
                draft.budget.as_str(),
                draft.message,
                ContactStatus::New.as_str(),
                ts(&created),
            ],
        )?;

        Ok(Contact {
            id,
            name: draft.name.clone(),
            email: draft.email.clone(),
            company: draft.company.clone(),
            project_type: draft.project_type,
            budget: draft.budget,
            message: draft.message.clone(),
            status: ContactStatus::New,
            email_sent: false,
            chat_id: None,
            replied_by: None,
            reply_count: 0,
            created_at: created,
            updated_at: created,
        })
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    pub fn find_contact(&self, id: Uuid) -> Result<Option<Contact>> {
        Ok(self
            .conn()
            .query_row(
                &format!("SELECT {CONTACT_COLUMNS} FROM contacts WHERE id = ?1"),
                params![id.to_string()],
                row_to_contact,
            )
            .optional()?)
    }

    /// Fetch a contact, failing with [`StoreError::NotFound`] if absent.
    pub fn get_contact(&self, id: Uuid) -> Result<Contact> {
        self.find_contact(id)?.ok_or(StoreError::NotFound)
    }

    /// Newest-first page of contacts, optionally filtered by status.
    pub fn list_contacts(
        &self,
        status: Option<ContactStatus>,
        page: Page,
    ) -> Result<Paginated<Contact>> {
        let status = status.map(|s| s.as_str());

        let total: u64 = self.conn().query_row(
            "SELECT COUNT(*) FROM contacts WHERE (?1 IS NULL OR status = ?1)",
            params![status],
            |row| row.get(0),
        )?;

        let mut stmt = self.conn().prepare(&format!(
            "SELECT {CONTACT_COLUMNS}
             FROM contacts
             WHERE (?1 IS NULL OR status = ?1)
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?2 OFFSET ?3"
        ))?;
        let rows = stmt.query_map(params![status, page.limit, page.offset()], row_to_contact)?;

        let mut items = Vec::new();
        for row in rows {
            items.push(row?);
        }
        Ok(Paginated { items, total, page })
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    pub fn update_contact_status(&self, id: Uuid, status: ContactStatus) -> Result<Contact> {
        let affected = self.conn().execute(
            "UPDATE contacts SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status.as_str(), ts(&now()), id.to_string()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        self.get_contact(id)
    }

    pub fn set_contact_email_sent(&self, id: Uuid) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE contacts SET email_sent = 1, updated_at = ?1 WHERE id = ?2",
            params![ts(&now()), id.to_string()],
        )?;
        Ok(affected > 0)
    }

    /// Point the contact at its chat. A contact linked to a live chat keeps
    /// it; a link to a deleted chat is replaced. The link never reverts to
    /// null.
    pub fn link_contact_chat(&self, id: Uuid, chat_id: Uuid) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE contacts
             SET chat_id = CASE
                     WHEN chat_id IS NULL OR chat_id NOT IN (SELECT id FROM chats) THEN ?1
                     ELSE chat_id
                 END,
                 updated_at = ?2
             WHERE id = ?3",
            params![chat_id.to_string(), ts(&now()), id.to_string()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Mark the contact replied by `admin_id` and bump its reply counter.
    pub fn record_contact_reply(&self, id: Uuid, admin_id: Uuid) -> Result<Contact> {
        let affected = self.conn().execute(
            "UPDATE contacts
             SET status = ?1, replied_by = ?2, reply_count = reply_count + 1, updated_at = ?3
             WHERE id = ?4",
            params![
                ContactStatus::Replied.as_str(),
                admin_id.to_string(),
                ts(&now()),
                id.to_string(),
            ],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        self.get_contact(id)
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    pub fn delete_contact(&self, id: Uuid) -> Result<()> {
        let affected = self
            .conn()
            .execute("DELETE FROM contacts WHERE id = ?1", params![id.to_string()])?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}

fn row_to_contact(row: &rusqlite::Row<'_>) -> rusqlite::Result<Contact> {
    Ok(Contact {
        id: uuid_at(row, 0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        company: row.get(3)?,
        project_type: enum_at(row, 4)?,
        budget: enum_at(row, 5)?,
        message: row.get(6)?,
        status: enum_at(row, 7)?,
        email_sent: bool_at(row, 8)?,
        chat_id: opt_uuid_at(row, 9)?,
        replied_by: opt_uuid_at(row, 10)?,
        reply_count: row.get(11)?,
        created_at: ts_at(row, 12)?,
        updated_at: ts_at(row, 13)?,
    })
}
