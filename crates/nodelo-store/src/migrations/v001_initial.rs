//! v001 -- Initial schema creation.
//!
//! Creates the four core tables: `admins`, `contacts`, `chats` and
//! `messages`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Admins
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS admins (
    id         TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    email      TEXT NOT NULL UNIQUE,        -- lowercased
    name       TEXT,
    token_hash TEXT NOT NULL UNIQUE,        -- BLAKE3 hex of the API token
    is_active  INTEGER NOT NULL DEFAULT 1,  -- boolean 0/1
    created_at TEXT NOT NULL                -- RFC-3339, microseconds, UTC
);

-- ----------------------------------------------------------------
-- Contacts (form submissions)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS contacts (
    id           TEXT PRIMARY KEY NOT NULL,
    name         TEXT NOT NULL,
    email        TEXT NOT NULL,
    company      TEXT,
    project_type TEXT NOT NULL DEFAULT '',
    budget       TEXT NOT NULL DEFAULT '',
    message      TEXT NOT NULL,
    status       TEXT NOT NULL DEFAULT 'new',
    email_sent   INTEGER NOT NULL DEFAULT 0,
    chat_id      TEXT,                       -- never cleared
    replied_by   TEXT,
    reply_count  INTEGER NOT NULL DEFAULT 0,
    created_at   TEXT NOT NULL,
    updated_at   TEXT NOT NULL,

    FOREIGN KEY (replied_by) REFERENCES admins(id) ON DELETE SET NULL
);

CREATE INDEX IF NOT EXISTS idx_contacts_created ON contacts(created_at DESC);
CREATE INDEX IF NOT EXISTS idx_contacts_status ON contacts(status);
CREATE INDEX IF NOT EXISTS idx_contacts_email ON contacts(email);

-- ----------------------------------------------------------------
-- Chats
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS chats (
    id              TEXT PRIMARY KEY NOT NULL,
    contact_id      TEXT,
    user_id         TEXT NOT NULL,
    user_name       TEXT NOT NULL,
    user_email      TEXT NOT NULL,           -- lowercased
    admin_id        TEXT,
    admin_name      TEXT,                    -- snapshot at assignment time
    status          TEXT NOT NULL DEFAULT 'active',
    last_message_at TEXT NOT NULL,
    last_message_by TEXT,
    unread_user     INTEGER NOT NULL DEFAULT 0 CHECK (unread_user >= 0),
    unread_admin    INTEGER NOT NULL DEFAULT 0 CHECK (unread_admin >= 0),
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL,

    FOREIGN KEY (contact_id) REFERENCES contacts(id) ON DELETE SET NULL,
    FOREIGN KEY (admin_id) REFERENCES admins(id) ON DELETE SET NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_chats_contact ON chats(contact_id);
CREATE INDEX IF NOT EXISTS idx_chats_user_email ON chats(user_email);
CREATE INDEX IF NOT EXISTS idx_chats_status ON chats(status);
CREATE INDEX IF NOT EXISTS idx_chats_last_message ON chats(last_message_at DESC);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id                  TEXT PRIMARY KEY NOT NULL,
    chat_id             TEXT NOT NULL,
    sender_type         TEXT NOT NULL,       -- 'user' | 'admin'
    sender_id           TEXT,                -- NULL for visitor messages
    sender_name         TEXT NOT NULL,       -- snapshot at send time
    content             TEXT NOT NULL DEFAULT '',
    attachments         TEXT NOT NULL DEFAULT '[]',  -- JSON array
    is_read             INTEGER NOT NULL DEFAULT 0,
    read_at             TEXT,
    is_reply_to_contact INTEGER NOT NULL DEFAULT 0,
    email_sent          INTEGER NOT NULL DEFAULT 0,
    created_at          TEXT NOT NULL,
    updated_at          TEXT NOT NULL,

    FOREIGN KEY (chat_id) REFERENCES chats(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_messages_chat_created
    ON messages(chat_id, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_messages_unread
    ON messages(chat_id, sender_type, is_read);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
