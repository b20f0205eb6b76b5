//! Domain model structs persisted in the SQLite database.
//!
//! Every struct derives `Serialize` (camelCase) so it can be handed directly
//! to the API layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use nodelo_shared::{AttachmentKind, Budget, ChatStatus, ContactStatus, ProjectType, SenderType};

// ---------------------------------------------------------------------------
// Admin
// ---------------------------------------------------------------------------

/// An admin account. The API token itself is never stored, only its hash.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Admin {
    pub id: Uuid,
    pub email: String,
    pub name: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Admin {
    /// Name shown to visitors: the admin's name, or their email if unnamed.
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .filter(|n| !n.is_empty())
            .unwrap_or(&self.email)
    }
}

// ---------------------------------------------------------------------------
// Contact
// ---------------------------------------------------------------------------

/// A contact-form submission.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: Uuid,
    pub name: String,
    /// Lowercased and trimmed.
    pub email: String,
    pub company: Option<String>,
    pub project_type: ProjectType,
    pub budget: Budget,
    pub message: String,
    pub status: ContactStatus,
    /// Whether the admin notification for this submission was delivered.
    pub email_sent: bool,
    /// Chat this contact was promoted into. Never cleared once set.
    pub chat_id: Option<Uuid>,
    pub replied_by: Option<Uuid>,
    pub reply_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

/// Per-party count of messages awaiting that party's read.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UnreadCount {
    /// Admin messages the visitor has not read.
    pub user: i64,
    /// Visitor messages no admin has read.
    pub admin: i64,
}

/// A conversation thread between one visitor and the admin team.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: Uuid,
    pub contact_id: Option<Uuid>,
    /// Stable visitor identifier, the visitor's email in practice.
    pub user_id: String,
    pub user_name: String,
    pub user_email: String,
    pub admin_id: Option<Uuid>,
    /// Admin display name captured when the chat was assigned.
    pub admin_name: Option<String>,
    pub status: ChatStatus,
    pub last_message_at: DateTime<Utc>,
    pub last_message_by: Option<SenderType>,
    pub unread_count: UnreadCount,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields needed to open a chat. Status starts `active`, counters at zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewChat {
    pub contact_id: Option<Uuid>,
    pub user_id: String,
    pub user_name: String,
    pub user_email: String,
    pub admin_id: Option<Uuid>,
    pub admin_name: Option<String>,
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A file stored in blob storage and referenced from a message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub url: String,
    #[serde(rename = "type")]
    pub kind: AttachmentKind,
    pub file_name: String,
    pub file_size: i64,
    pub storage_id: String,
}

/// A single chat message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub chat_id: Uuid,
    pub sender_type: SenderType,
    /// Admin id for admin messages, `None` for visitors.
    pub sender_id: Option<Uuid>,
    /// Sender name as it was when the message was written.
    pub sender_name: String,
    pub content: String,
    pub attachments: Vec<Attachment>,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub is_reply_to_contact: bool,
    pub email_sent: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub chat_id: Uuid,
    pub sender_type: SenderType,
    pub sender_id: Option<Uuid>,
    pub sender_name: String,
    pub content: String,
    pub attachments: Vec<Attachment>,
    pub is_reply_to_contact: bool,
}
