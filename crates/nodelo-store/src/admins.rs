//! CRUD operations for [`Admin`] records.

use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use crate::columns::{bool_at, now, ts, ts_at, uuid_at};
use crate::database::Database;
use crate::error::Result;
use crate::models::Admin;

const ADMIN_COLUMNS: &str = "id, email, name, is_active, created_at";

impl Database {
    /// Create an admin, or refresh the name/token of an existing one with the
    /// same email. Used to seed the bootstrap account on start-up.
    pub fn upsert_admin(&self, email: &str, name: Option<&str>, token_hash: &str) -> Result<Admin> {
        let email = email.trim().to_lowercase();
        self.conn().execute(
            "INSERT INTO admins (id, email, name, token_hash, is_active, created_at)
             VALUES (?1, ?2, ?3, ?4, 1, ?5)
             ON CONFLICT(email) DO UPDATE SET
                 name = excluded.name,
                 token_hash = excluded.token_hash,
                 is_active = 1",
            params![Uuid::new_v4().to_string(), email, name, token_hash, ts(&now())],
        )?;

        Ok(self.conn().query_row(
            &format!("SELECT {ADMIN_COLUMNS} FROM admins WHERE email = ?1"),
            params![email],
            row_to_admin,
        )?)
    }

    pub fn find_admin(&self, id: Uuid) -> Result<Option<Admin>> {
        Ok(self
            .conn()
            .query_row(
                &format!("SELECT {ADMIN_COLUMNS} FROM admins WHERE id = ?1"),
                params![id.to_string()],
                row_to_admin,
            )
            .optional()?)
    }

    /// Look up the active admin owning a token hash.
    pub fn find_admin_by_token_hash(&self, token_hash: &str) -> Result<Option<Admin>> {
        Ok(self
            .conn()
            .query_row(
                &format!(
                    "SELECT {ADMIN_COLUMNS} FROM admins WHERE token_hash = ?1 AND is_active = 1"
                ),
                params![token_hash],
                row_to_admin,
            )
            .optional()?)
    }

    pub fn set_admin_active(&self, id: Uuid, active: bool) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE admins SET is_active = ?1 WHERE id = ?2",
            params![active, id.to_string()],
        )?;
        Ok(affected > 0)
    }
}

fn row_to_admin(row: &rusqlite::Row<'_>) -> rusqlite::Result<Admin> {
    Ok(Admin {
        id: uuid_at(row, 0)?,
        email: row.get(1)?,
        name: row.get(2)?,
        is_active: bool_at(row, 3)?,
        created_at: ts_at(row, 4)?,
    })
}
