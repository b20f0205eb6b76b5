//! The messaging engine: contacts, chats and messages, and the rules that
//! keep them consistent with each other.
//!
//! The SQLite handle sits behind one async mutex. Every operation that
//! writes more than one row does so inside a single transaction, and unread
//! counters are incremented inside the `UPDATE` statement, so concurrent
//! senders never lose a count. Slow collaborators (blob uploads, email) are
//! always awaited with the lock released.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use nodelo_shared::constants::CONTACT_NAME_MAX;
use nodelo_shared::validate::{self, ContactSubmission};
use nodelo_shared::{AttachmentKind, ChatStatus, ContactStatus, SenderType, ValidationError};
use nodelo_store::chats::ChatFilter;
use nodelo_store::{
    Admin, Attachment, Chat, Contact, Database, Message, NewChat, NewMessage, Page, Paginated,
    StoreError,
};

use crate::auth::{hash_token, AdminIdentity};
use crate::blob_store::BlobStorage;
use crate::error::ServerError;
use crate::fanout::{FanOut, ServerEvent};
use crate::notify::{AdminReplyNotice, NotifyError, Notifier};

// ---------------------------------------------------------------------------
// Inputs and outputs
// ---------------------------------------------------------------------------

/// A file received with a message, not yet stored.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: String,
    pub mimetype: String,
    pub data: Bytes,
}

/// Which chat a message goes to.
#[derive(Debug, Clone)]
pub enum ChatTarget {
    /// A known chat. A visitor may pass their email to prove ownership.
    Explicit {
        chat_id: Uuid,
        user_email: Option<String>,
    },
    /// The visitor's chat, created on first use.
    ByEmail { user_email: String, user_name: String },
}

/// Who is sending. An authenticated admin always wins over any name the
/// client supplied.
#[derive(Debug, Clone)]
pub enum SenderContext {
    Admin(AdminIdentity),
    Visitor,
}

#[derive(Debug, Clone)]
pub struct SendInput {
    pub target: ChatTarget,
    pub sender: SenderContext,
    /// Display name a visitor asked for.
    pub sender_name: Option<String>,
    pub content: Option<String>,
    pub files: Vec<UploadedFile>,
}

/// Identity fields of a chat returned alongside a sent message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSnapshot {
    pub id: Uuid,
    pub user_name: String,
    pub user_email: String,
    pub status: ChatStatus,
}

impl From<&Chat> for ChatSnapshot {
    fn from(chat: &Chat) -> Self {
        Self {
            id: chat.id,
            user_name: chat.user_name.clone(),
            user_email: chat.user_email.clone(),
            status: chat.status,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SendOutcome {
    pub message: Message,
    pub chat: ChatSnapshot,
}

#[derive(Debug, Clone)]
pub struct ReplyOutcome {
    pub message: Message,
    pub chat: Chat,
}

#[derive(Debug, Clone)]
pub struct ChatWithMessages {
    pub chat: Chat,
    pub messages: Paginated<Message>,
}

/// Who is reading a chat.
#[derive(Debug, Clone)]
pub enum Viewer {
    Admin(AdminIdentity),
    /// Visitors must present the chat's email.
    Visitor { user_email: Option<String> },
}

impl Viewer {
    pub fn party(&self) -> SenderType {
        match self {
            Viewer::Admin(_) => SenderType::Admin,
            Viewer::Visitor { .. } => SenderType::User,
        }
    }

    fn authorize(&self, chat: &Chat) -> Result<(), ServerError> {
        match self {
            Viewer::Admin(_) => Ok(()),
            Viewer::Visitor {
                user_email: Some(email),
            } if same_email(email, &chat.user_email) => Ok(()),
            Viewer::Visitor { .. } => Err(ServerError::PermissionDenied(
                "You do not have permission to view this chat",
            )),
        }
    }
}

/// Where a mark-read came from. A vanished chat is an error for a request
/// and a no-op for a socket event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOrigin {
    Request,
    Realtime,
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub notify_timeout: Duration,
    pub max_upload_size: usize,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Chat target after the read-only lookup in [`MessagingEngine::send`].
enum Resolution {
    Existing(Chat),
    New { email: String, name: String },
}

pub struct MessagingEngine {
    db: Arc<Mutex<Database>>,
    blobs: Arc<dyn BlobStorage>,
    notifier: Arc<dyn Notifier>,
    fanout: FanOut,
    settings: EngineSettings,
}

impl MessagingEngine {
    pub fn new(
        db: Database,
        blobs: Arc<dyn BlobStorage>,
        notifier: Arc<dyn Notifier>,
        fanout: FanOut,
        settings: EngineSettings,
    ) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
            blobs,
            notifier,
            fanout,
            settings,
        }
    }

    pub fn fanout(&self) -> &FanOut {
        &self.fanout
    }

    // ------------------------------------------------------------------
    // Admins
    // ------------------------------------------------------------------

    /// Create or refresh the bootstrap admin.
    pub async fn seed_admin(
        &self,
        email: &str,
        name: Option<&str>,
        token: &str,
    ) -> Result<Admin, ServerError> {
        let email = validate::normalize_email(email)?;
        let admin = self
            .db
            .lock()
            .await
            .upsert_admin(&email, name, &hash_token(token))?;
        info!(admin = %admin.id, email = %admin.email, "Admin account ready");
        Ok(admin)
    }

    pub async fn authenticate(&self, token: &str) -> Result<Option<AdminIdentity>, ServerError> {
        let admin = self
            .db
            .lock()
            .await
            .find_admin_by_token_hash(&hash_token(token))?;
        Ok(admin.as_ref().map(AdminIdentity::from))
    }

    // ------------------------------------------------------------------
    // Contacts
    // ------------------------------------------------------------------

    /// Store a contact-form submission and fire the notification emails in
    /// the background.
    pub async fn submit_contact(&self, submission: ContactSubmission) -> Result<Contact, ServerError> {
        let draft = submission.validate()?;
        let contact = self.db.lock().await.create_contact(&draft)?;

        info!(contact = %contact.id, "Contact submission stored");
        self.spawn_contact_notifications(&contact);

        Ok(contact)
    }

    fn spawn_contact_notifications(&self, contact: &Contact) {
        let timeout = self.settings.notify_timeout;

        let db = Arc::clone(&self.db);
        let notifier = Arc::clone(&self.notifier);
        let submitted = contact.clone();
        tokio::spawn(async move {
            match tokio::time::timeout(timeout, notifier.notify_new_contact(&submitted)).await {
                Ok(Ok(())) => {
                    if let Err(e) = db.lock().await.set_contact_email_sent(submitted.id) {
                        warn!(contact = %submitted.id, error = %e, "Could not flag contact notification");
                    }
                }
                Ok(Err(NotifyError::Disabled)) => {}
                Ok(Err(e)) => {
                    warn!(contact = %submitted.id, error = %e, "New-contact notification failed")
                }
                Err(_) => warn!(contact = %submitted.id, "New-contact notification timed out"),
            }
        });

        let notifier = Arc::clone(&self.notifier);
        let submitted = contact.clone();
        tokio::spawn(async move {
            match tokio::time::timeout(timeout, notifier.notify_contact_confirmation(&submitted)).await {
                Ok(Ok(())) | Ok(Err(NotifyError::Disabled)) => {}
                Ok(Err(e)) => debug!(contact = %submitted.id, error = %e, "Confirmation email failed"),
                Err(_) => debug!(contact = %submitted.id, "Confirmation email timed out"),
            }
        });
    }

    pub async fn list_contacts(
        &self,
        status: Option<ContactStatus>,
        page: Page,
    ) -> Result<Paginated<Contact>, ServerError> {
        Ok(self.db.lock().await.list_contacts(status, page)?)
    }

    pub async fn get_contact(&self, id: Uuid) -> Result<Contact, ServerError> {
        self.db
            .lock()
            .await
            .find_contact(id)?
            .ok_or(ServerError::NotFound("Contact"))
    }

    pub async fn update_contact_status(
        &self,
        id: Uuid,
        status: ContactStatus,
    ) -> Result<Contact, ServerError> {
        self.db
            .lock()
            .await
            .update_contact_status(id, status)
            .map_err(not_found_as("Contact"))
    }

    pub async fn delete_contact(&self, id: Uuid) -> Result<(), ServerError> {
        self.db
            .lock()
            .await
            .delete_contact(id)
            .map_err(not_found_as("Contact"))?;
        info!(contact = %id, "Contact deleted");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Chats
    // ------------------------------------------------------------------

    /// Open the chat for a contact, or return the one it already has. The
    /// boolean is `true` when a chat was created.
    pub async fn promote_contact_to_chat(
        &self,
        contact_id: Uuid,
        admin_id: Option<Uuid>,
        caller: &AdminIdentity,
    ) -> Result<(Chat, bool), ServerError> {
        let db = self.db.lock().await;
        let contact = db
            .find_contact(contact_id)?
            .ok_or(ServerError::NotFound("Contact"))?;

        if let Some(chat) = chat_for_contact(&db, &contact)? {
            debug!(contact = %contact.id, chat = %chat.id, "Contact already has a chat");
            return Ok((chat, false));
        }

        let admin = assigning_admin(&db, admin_id, caller)?;
        let chat = db.transaction(|db| {
            let chat = db.create_chat(&contact_chat(&contact, &admin))?;
            db.link_contact_chat(contact.id, chat.id)?;
            Ok(chat)
        })?;

        info!(contact = %contact.id, chat = %chat.id, admin = %admin.id, "Contact promoted to chat");
        Ok((chat, true))
    }

    /// Open a chat with a visitor who never filled in the contact form.
    pub async fn create_ad_hoc_chat(
        &self,
        user_name: Option<String>,
        user_email: Option<String>,
        admin_id: Option<Uuid>,
        caller: &AdminIdentity,
    ) -> Result<Chat, ServerError> {
        let user_name = visitor_name(user_name, "userName")?;
        let user_email =
            validate::normalize_email(&validate::required(user_email, "userEmail")?)?;

        let db = self.db.lock().await;
        let admin = assigning_admin(&db, admin_id, caller)?;
        let chat = db.create_chat(&NewChat {
            contact_id: None,
            user_id: user_email.clone(),
            user_name,
            user_email,
            admin_id: Some(admin.id),
            admin_name: Some(admin.name.clone()),
        })?;

        info!(chat = %chat.id, admin = %admin.id, "Ad-hoc chat created");
        Ok(chat)
    }

    pub async fn list_chats(
        &self,
        filter: &ChatFilter,
        page: Page,
    ) -> Result<Paginated<Chat>, ServerError> {
        Ok(self.db.lock().await.list_chats(filter, page)?)
    }

    /// A visitor's own chats, found by email.
    pub async fn list_chats_for_user(
        &self,
        user_email: &str,
        page: Page,
    ) -> Result<Paginated<Chat>, ServerError> {
        let filter = ChatFilter {
            status: None,
            user_email: Some(validate::normalize_email(user_email)?),
        };
        self.list_chats(&filter, page).await
    }

    pub async fn get_chat_with_messages(
        &self,
        chat_id: Uuid,
        viewer: &Viewer,
        page: Page,
    ) -> Result<ChatWithMessages, ServerError> {
        let db = self.db.lock().await;
        let chat = db.find_chat(chat_id)?.ok_or(ServerError::NotFound("Chat"))?;
        viewer.authorize(&chat)?;
        let messages = db.list_messages_for_chat(chat_id, page)?;
        Ok(ChatWithMessages { chat, messages })
    }

    /// Check that `viewer` may follow a chat in real time.
    pub async fn authorize_viewer(&self, chat_id: Uuid, viewer: &Viewer) -> Result<(), ServerError> {
        let chat = self
            .db
            .lock()
            .await
            .find_chat(chat_id)?
            .ok_or(ServerError::NotFound("Chat"))?;
        viewer.authorize(&chat)
    }

    pub async fn update_chat_status(&self, id: Uuid, status: ChatStatus) -> Result<Chat, ServerError> {
        let chat = self
            .db
            .lock()
            .await
            .update_chat_status(id, status)
            .map_err(not_found_as("Chat"))?;
        info!(chat = %id, status = %status, "Chat status updated");
        Ok(chat)
    }

    /// Delete a chat with its messages, then their stored files.
    pub async fn delete_chat(&self, id: Uuid) -> Result<(), ServerError> {
        let attachments = self
            .db
            .lock()
            .await
            .transaction(|db| {
                let attachments = db.list_chat_attachments(id)?;
                db.delete_chat(id)?;
                Ok(attachments)
            })
            .map_err(not_found_as("Chat"))?;

        self.discard(&attachments).await;
        info!(chat = %id, files = attachments.len(), "Chat deleted");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Messages
    // ------------------------------------------------------------------

    /// Deliver one message: resolve the chat, settle the sender, validate,
    /// upload files, then store the message and the chat aggregates together
    /// and publish `newMessage`.
    pub async fn send(&self, input: SendInput) -> Result<SendOutcome, ServerError> {
        let SendInput {
            target,
            sender,
            sender_name,
            content,
            files,
        } = input;

        // Read-only: nothing is created until the uploads succeeded.
        let resolution = match &target {
            ChatTarget::Explicit { chat_id, .. } => {
                let chat = self
                    .db
                    .lock()
                    .await
                    .find_chat(*chat_id)?
                    .ok_or(ServerError::NotFound("Chat"))?;
                Resolution::Existing(chat)
            }
            ChatTarget::ByEmail {
                user_email,
                user_name,
            } => {
                let email = validate::normalize_email(user_email)?;
                let name = visitor_name(Some(user_name.clone()), "userName")?;
                match self.db.lock().await.find_chat_by_user_email(&email)? {
                    Some(chat) => Resolution::Existing(chat),
                    None => Resolution::New { email, name },
                }
            }
        };

        let (sender_type, sender_id, sender_name) = match &sender {
            SenderContext::Admin(admin) => (SenderType::Admin, Some(admin.id), admin.name.clone()),
            SenderContext::Visitor => {
                if let (
                    ChatTarget::Explicit {
                        user_email: Some(email),
                        ..
                    },
                    Resolution::Existing(chat),
                ) = (&target, &resolution)
                {
                    if !same_email(email, &chat.user_email) {
                        return Err(ServerError::PermissionDenied("Email does not match chat"));
                    }
                }
                let fallback = match (&target, &resolution) {
                    (ChatTarget::ByEmail { user_name, .. }, _) => user_name.trim().to_string(),
                    (_, Resolution::Existing(chat)) => chat.user_name.clone(),
                    (_, Resolution::New { name, .. }) => name.clone(),
                };
                let name = match validate::optional(sender_name) {
                    Some(name) => visitor_name(Some(name), "senderName")?,
                    None => fallback,
                };
                (SenderType::User, None, name)
            }
        };

        let content = validate::normalize_content(content.as_deref())?;
        validate::check_attachment_count(files.len())?;
        for file in &files {
            validate::check_upload(&file.file_name, &file.mimetype, file.data.len())?;
            if file.data.len() > self.settings.max_upload_size {
                return Err(ValidationError::FileTooLarge {
                    file_name: file.file_name.clone(),
                    max: self.settings.max_upload_size,
                }
                .into());
            }
        }
        if content.is_empty() && files.is_empty() {
            return Err(ValidationError::EmptyMessage.into());
        }

        let attachments = self.upload_all(&files).await?;

        let admin_for_new_chat = match &sender {
            SenderContext::Admin(admin) => Some(admin),
            SenderContext::Visitor => None,
        };
        let committed = self.db.lock().await.transaction(|db| {
            let chat = match &resolution {
                Resolution::Existing(chat) => db.get_chat(chat.id)?,
                // Looked up again under the lock: another request may have
                // created the chat while files were uploading.
                Resolution::New { email, name } => match db.find_chat_by_user_email(email)? {
                    Some(chat) => chat,
                    None => db.create_chat(&NewChat {
                        contact_id: None,
                        user_id: email.clone(),
                        user_name: name.clone(),
                        user_email: email.clone(),
                        admin_id: admin_for_new_chat.map(|a| a.id),
                        admin_name: admin_for_new_chat.map(|a| a.name.clone()),
                    })?,
                },
            };

            let message = db.create_message(&NewMessage {
                chat_id: chat.id,
                sender_type,
                sender_id,
                sender_name: sender_name.clone(),
                content: content.clone(),
                attachments: attachments.clone(),
                is_reply_to_contact: false,
            })?;
            db.record_chat_message(chat.id, sender_type, message.created_at)?;

            Ok((db.get_chat(chat.id)?, message))
        });

        let (chat, message) = match committed {
            Ok(stored) => stored,
            Err(e) => {
                self.discard(&attachments).await;
                return Err(not_found_as("Chat")(e));
            }
        };

        info!(
            chat = %chat.id,
            message = %message.id,
            sender = %sender_type,
            files = message.attachments.len(),
            "Message stored"
        );

        self.fanout
            .publish(chat.id, ServerEvent::NewMessage(message.clone()))
            .await;

        Ok(SendOutcome {
            message,
            chat: ChatSnapshot::from(&chat),
        })
    }

    /// Answer a contact submission inside its chat (creating the chat if
    /// needed) and email the reply to the visitor.
    pub async fn reply_to_contact(
        &self,
        contact_id: Uuid,
        message: &str,
        admin: &AdminIdentity,
        chat_id: Option<Uuid>,
    ) -> Result<ReplyOutcome, ServerError> {
        let content = validate::normalize_content(Some(message))?;
        if content.is_empty() {
            return Err(ValidationError::Required("message").into());
        }

        let (contact, chat, mut message) = {
            let db = self.db.lock().await;
            let contact = db
                .find_contact(contact_id)?
                .ok_or(ServerError::NotFound("Contact"))?;

            let requested = match chat_id {
                Some(id) => {
                    let chat = db.find_chat(id)?.ok_or(ServerError::NotFound("Chat"))?;
                    let foreign = chat.contact_id.is_some_and(|owner| owner != contact.id)
                        || !same_email(&contact.email, &chat.user_email);
                    if foreign {
                        return Err(ServerError::PermissionDenied(
                            "This chat belongs to another visitor",
                        ));
                    }
                    Some(chat)
                }
                None => None,
            };

            db.transaction(|db| {
                let chat = match requested {
                    Some(chat) => chat,
                    None => match chat_for_contact(db, &contact)? {
                        Some(chat) => chat,
                        None => {
                            let chat = db.create_chat(&contact_chat(&contact, admin))?;
                            db.link_contact_chat(contact.id, chat.id)?;
                            chat
                        }
                    },
                };

                let message = db.create_message(&NewMessage {
                    chat_id: chat.id,
                    sender_type: SenderType::Admin,
                    sender_id: Some(admin.id),
                    sender_name: admin.name.clone(),
                    content: content.clone(),
                    attachments: Vec::new(),
                    is_reply_to_contact: true,
                })?;
                db.record_chat_message(chat.id, SenderType::Admin, message.created_at)?;
                let contact = db.record_contact_reply(contact.id, admin.id)?;

                Ok((contact, db.get_chat(chat.id)?, message))
            })
            .map_err(not_found_as("Chat"))?
        };

        info!(
            contact = %contact.id,
            chat = %chat.id,
            replies = contact.reply_count,
            "Reply to contact stored"
        );

        let notice = AdminReplyNotice {
            to: contact.email.clone(),
            user_name: contact.name.clone(),
            admin_name: admin.name.clone(),
            message: content,
            original_message: contact.message.clone(),
        };
        let sent = tokio::time::timeout(
            self.settings.notify_timeout,
            self.notifier.notify_admin_reply(&notice),
        )
        .await;
        match sent {
            Ok(Ok(())) => match self.db.lock().await.set_message_email_sent(message.id) {
                Ok(()) => message.email_sent = true,
                Err(e) => warn!(message = %message.id, error = %e, "Could not flag reply email"),
            },
            Ok(Err(NotifyError::Disabled)) => {
                debug!(contact = %contact.id, "Email disabled, reply not mailed")
            }
            Ok(Err(e)) => warn!(contact = %contact.id, error = %e, "Reply email failed"),
            Err(_) => warn!(contact = %contact.id, "Reply email timed out"),
        }

        self.fanout
            .publish(chat.id, ServerEvent::NewMessage(message.clone()))
            .await;

        Ok(ReplyOutcome { message, chat })
    }

    /// Mark the other party's messages read on behalf of `viewer` and zero
    /// the viewer's own unread counter. Returns the number of messages
    /// marked.
    pub async fn mark_read(
        &self,
        chat_id: Uuid,
        viewer: &Viewer,
        ids: Option<&[Uuid]>,
        origin: ReadOrigin,
    ) -> Result<usize, ServerError> {
        let party = viewer.party();

        let marked = {
            let db = self.db.lock().await;
            let Some(chat) = db.find_chat(chat_id)? else {
                return match origin {
                    ReadOrigin::Request => Err(ServerError::NotFound("Chat")),
                    ReadOrigin::Realtime => {
                        debug!(chat = %chat_id, "markRead for unknown chat ignored");
                        Ok(0)
                    }
                };
            };
            viewer.authorize(&chat)?;

            db.transaction(|db| {
                let marked = db.mark_messages_read(chat_id, party.other(), ids)?;
                db.clear_unread(chat_id, party)?;
                Ok(marked)
            })?
        };

        debug!(chat = %chat_id, reader = %party, marked, "Messages marked read");

        self.fanout
            .publish(
                chat_id,
                ServerEvent::MessagesRead {
                    chat_id,
                    read_by: party,
                },
            )
            .await;

        Ok(marked)
    }

    // ------------------------------------------------------------------
    // Attachments
    // ------------------------------------------------------------------

    /// Upload every file concurrently. If any upload fails the ones that
    /// succeeded are deleted again, so a message never carries a partial set.
    async fn upload_all(&self, files: &[UploadedFile]) -> Result<Vec<Attachment>, ServerError> {
        let results = join_all(
            files
                .iter()
                .map(|file| self.blobs.upload(file.data.clone(), &file.mimetype)),
        )
        .await;

        let mut stored = Vec::with_capacity(files.len());
        let mut failure = None;
        for (file, result) in files.iter().zip(results) {
            match result {
                Ok(blob) => stored.push(Attachment {
                    url: blob.url,
                    kind: AttachmentKind::from_mimetype(&file.mimetype),
                    file_name: file.file_name.clone(),
                    file_size: i64::try_from(blob.size).unwrap_or(i64::MAX),
                    storage_id: blob.storage_id,
                }),
                Err(e) => {
                    warn!(file = %file.file_name, error = %e, "Attachment upload failed");
                    if failure.is_none() {
                        failure = Some(e);
                    }
                }
            }
        }

        match failure {
            None => Ok(stored),
            Some(err) => {
                self.discard(&stored).await;
                Err(match err {
                    ServerError::Upload(_) => err,
                    other => ServerError::Upload(other.to_string()),
                })
            }
        }
    }

    async fn discard(&self, attachments: &[Attachment]) {
        for attachment in attachments {
            if let Err(e) = self.blobs.delete(&attachment.storage_id).await {
                warn!(id = %attachment.storage_id, error = %e, "Could not delete stored file");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn same_email(candidate: &str, stored: &str) -> bool {
    candidate.trim().to_lowercase() == stored
}

fn visitor_name(raw: Option<String>, field: &'static str) -> Result<String, ValidationError> {
    let name = validate::required(raw, field)?;
    if name.chars().count() > CONTACT_NAME_MAX {
        return Err(ValidationError::TooLong {
            field,
            max: CONTACT_NAME_MAX,
        });
    }
    Ok(name)
}

fn not_found_as(entity: &'static str) -> impl FnOnce(StoreError) -> ServerError {
    move |err| match err {
        StoreError::NotFound => ServerError::NotFound(entity),
        other => other.into(),
    }
}

/// The chat a contact already has, by back-reference or by link.
fn chat_for_contact(db: &Database, contact: &Contact) -> nodelo_store::Result<Option<Chat>> {
    if let Some(chat) = db.find_chat_by_contact(contact.id)? {
        return Ok(Some(chat));
    }
    match contact.chat_id {
        Some(chat_id) => db.find_chat(chat_id),
        None => Ok(None),
    }
}

fn contact_chat(contact: &Contact, admin: &AdminIdentity) -> NewChat {
    NewChat {
        contact_id: Some(contact.id),
        user_id: contact.email.clone(),
        user_name: contact.name.clone(),
        user_email: contact.email.clone(),
        admin_id: Some(admin.id),
        admin_name: Some(admin.name.clone()),
    }
}

/// The admin a new chat is assigned to: the requested one, or the caller.
fn assigning_admin(
    db: &Database,
    admin_id: Option<Uuid>,
    caller: &AdminIdentity,
) -> Result<AdminIdentity, ServerError> {
    match admin_id {
        Some(id) if id != caller.id => db
            .find_admin(id)?
            .filter(|admin| admin.is_active)
            .map(|admin| AdminIdentity::from(&admin))
            .ok_or(ServerError::NotFound("Admin")),
        _ => Ok(caller.clone()),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;

    use crate::blob_store::{BlobContent, StoredBlob};

    /// In-memory blob store that fails uploads of one chosen mimetype.
    #[derive(Default)]
    pub(crate) struct MemoryBlobs {
        pub files: StdMutex<HashMap<String, (Bytes, String)>>,
        pub fail_mimetype: Option<&'static str>,
    }

    #[async_trait]
    impl BlobStorage for MemoryBlobs {
        async fn upload(&self, data: Bytes, mimetype: &str) -> Result<StoredBlob, ServerError> {
            if self.fail_mimetype == Some(mimetype) {
                return Err(ServerError::Upload("storage offline".into()));
            }
            let storage_id = Uuid::new_v4().to_string();
            let size = data.len();
            self.files
                .lock()
                .unwrap()
                .insert(storage_id.clone(), (data, mimetype.to_string()));
            Ok(StoredBlob {
                url: format!("http://files.test/api/files/{storage_id}"),
                storage_id,
                size,
            })
        }

        async fn fetch(&self, storage_id: &str) -> Result<BlobContent, ServerError> {
            self.files
                .lock()
                .unwrap()
                .get(storage_id)
                .map(|(data, mimetype)| BlobContent {
                    data: data.clone(),
                    mimetype: mimetype.clone(),
                })
                .ok_or(ServerError::NotFound("File"))
        }

        async fn delete(&self, storage_id: &str) -> Result<(), ServerError> {
            self.files
                .lock()
                .unwrap()
                .remove(storage_id)
                .map(|_| ())
                .ok_or(ServerError::NotFound("File"))
        }
    }

    /// Records every email instead of sending it.
    #[derive(Default)]
    pub(crate) struct RecordingNotifier {
        pub fail: bool,
        pub contacts: StdMutex<Vec<Uuid>>,
        pub replies: StdMutex<Vec<AdminReplyNotice>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify_new_contact(&self, contact: &Contact) -> Result<(), NotifyError> {
            if self.fail {
                return Err(NotifyError::Address("unreachable".into()));
            }
            self.contacts.lock().unwrap().push(contact.id);
            Ok(())
        }

        async fn notify_contact_confirmation(&self, _contact: &Contact) -> Result<(), NotifyError> {
            Ok(())
        }

        async fn notify_admin_reply(&self, reply: &AdminReplyNotice) -> Result<(), NotifyError> {
            if self.fail {
                return Err(NotifyError::Address(reply.to.clone()));
            }
            self.replies.lock().unwrap().push(reply.clone());
            Ok(())
        }
    }

    pub(crate) struct Harness {
        pub engine: Arc<MessagingEngine>,
        pub blobs: Arc<MemoryBlobs>,
        pub notifier: Arc<RecordingNotifier>,
        pub admin: AdminIdentity,
    }

    pub(crate) async fn harness_with(blobs: MemoryBlobs, notifier: RecordingNotifier) -> Harness {
        let blobs = Arc::new(blobs);
        let notifier = Arc::new(notifier);
        let engine = Arc::new(MessagingEngine::new(
            Database::open_in_memory().unwrap(),
            blobs.clone(),
            notifier.clone(),
            FanOut::new(),
            EngineSettings {
                notify_timeout: Duration::from_secs(2),
                max_upload_size: 1024,
            },
        ));
        let admin = engine
            .seed_admin("grace@nodelo.dev", Some("Grace"), "admin-token")
            .await
            .unwrap();
        Harness {
            engine,
            blobs,
            notifier,
            admin: AdminIdentity::from(&admin),
        }
    }

    pub(crate) async fn harness() -> Harness {
        harness_with(MemoryBlobs::default(), RecordingNotifier::default()).await
    }

    fn visitor_send(email: &str, content: &str) -> SendInput {
        SendInput {
            target: ChatTarget::ByEmail {
                user_email: email.into(),
                user_name: "Ada".into(),
            },
            sender: SenderContext::Visitor,
            sender_name: None,
            content: Some(content.into()),
            files: Vec::new(),
        }
    }

    fn file(name: &str, mimetype: &str) -> UploadedFile {
        UploadedFile {
            file_name: name.into(),
            mimetype: mimetype.into(),
            data: Bytes::from_static(b"0123456789"),
        }
    }

    fn submission(email: &str) -> ContactSubmission {
        ContactSubmission {
            name: Some("Ada Lovelace".into()),
            email: Some(email.into()),
            message: Some("I would like a new marketing site.".into()),
            ..Default::default()
        }
    }

    async fn chat_count(engine: &MessagingEngine) -> u64 {
        engine
            .list_chats(&ChatFilter::default(), Page::default())
            .await
            .unwrap()
            .total
    }

    async fn message_count(engine: &MessagingEngine, chat_id: Uuid) -> u64 {
        engine
            .get_chat_with_messages(
                chat_id,
                &Viewer::Visitor {
                    user_email: Some("a@x.com".into()),
                },
                Page::default(),
            )
            .await
            .map(|c| c.messages.total)
            .unwrap_or(0)
    }

    #[tokio::test]
    async fn first_visitor_message_opens_chat_and_admin_read_clears_it() {
        let h = harness().await;

        let sent = h.engine.send(visitor_send("A@X.com", "hello")).await.unwrap();
        let view = Viewer::Admin(h.admin.clone());
        let chat = h
            .engine
            .get_chat_with_messages(sent.chat.id, &view, Page::default())
            .await
            .unwrap()
            .chat;

        assert_eq!(chat.user_email, "a@x.com");
        assert_eq!(chat.unread_count.user, 0);
        assert_eq!(chat.unread_count.admin, 1);
        assert_eq!(chat.last_message_by, Some(SenderType::User));
        assert_eq!(sent.message.sender_name, "Ada");

        let marked = h
            .engine
            .mark_read(sent.chat.id, &view, None, ReadOrigin::Request)
            .await
            .unwrap();
        assert_eq!(marked, 1);

        let after = h
            .engine
            .get_chat_with_messages(sent.chat.id, &view, Page::default())
            .await
            .unwrap();
        assert_eq!(after.chat.unread_count.admin, 0);
        assert!(after.messages.items[0].is_read);
        assert!(after.messages.items[0].read_at.is_some());
    }

    #[tokio::test]
    async fn same_email_reuses_chat_and_counts_every_message() {
        let h = harness().await;

        let first = h.engine.send(visitor_send("a@x.com", "one")).await.unwrap();
        let second = h.engine.send(visitor_send(" a@X.COM ", "two")).await.unwrap();
        let third = h.engine.send(visitor_send("a@x.com", "three")).await.unwrap();

        assert_eq!(first.chat.id, second.chat.id);
        assert_eq!(first.chat.id, third.chat.id);
        assert_eq!(chat_count(&h.engine).await, 1);

        let chat = h
            .engine
            .get_chat_with_messages(first.chat.id, &Viewer::Admin(h.admin.clone()), Page::default())
            .await
            .unwrap()
            .chat;
        assert_eq!(chat.unread_count.admin, 3);
    }

    #[tokio::test]
    async fn concurrent_senders_never_lose_an_increment() {
        let h = harness().await;
        let chat = h.engine.send(visitor_send("a@x.com", "start")).await.unwrap().chat;

        let mut tasks = Vec::new();
        for i in 0..20 {
            let engine = Arc::clone(&h.engine);
            tasks.push(tokio::spawn(async move {
                engine
                    .send(SendInput {
                        target: ChatTarget::Explicit {
                            chat_id: chat.id,
                            user_email: None,
                        },
                        sender: SenderContext::Visitor,
                        sender_name: None,
                        content: Some(format!("msg {i}")),
                        files: Vec::new(),
                    })
                    .await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let chat = h
            .engine
            .get_chat_with_messages(chat.id, &Viewer::Admin(h.admin.clone()), Page::default())
            .await
            .unwrap()
            .chat;
        assert_eq!(chat.unread_count.admin, 21);
    }

    #[tokio::test]
    async fn empty_message_is_rejected_without_side_effects() {
        let h = harness().await;

        let err = h.engine.send(visitor_send("a@x.com", "   ")).await.unwrap_err();
        assert!(matches!(err, ServerError::Validation(ValidationError::EmptyMessage)));
        assert_eq!(chat_count(&h.engine).await, 0);
    }

    #[tokio::test]
    async fn failed_upload_stores_nothing() {
        let h = harness_with(
            MemoryBlobs {
                fail_mimetype: Some("application/pdf"),
                ..Default::default()
            },
            RecordingNotifier::default(),
        )
        .await;
        let chat = h.engine.send(visitor_send("a@x.com", "hello")).await.unwrap().chat;
        let view = Viewer::Admin(h.admin.clone());
        let before = h
            .engine
            .get_chat_with_messages(chat.id, &view, Page::default())
            .await
            .unwrap()
            .chat;

        let mut input = visitor_send("a@x.com", "see attached");
        input.files = vec![file("photo.png", "image/png"), file("brief.pdf", "application/pdf")];
        let err = h.engine.send(input).await.unwrap_err();
        assert!(matches!(err, ServerError::Upload(_)));

        let after = h
            .engine
            .get_chat_with_messages(chat.id, &view, Page::default())
            .await
            .unwrap();
        assert_eq!(after.messages.total, 1);
        assert_eq!(after.chat.unread_count, before.unread_count);
        assert_eq!(after.chat.last_message_at, before.last_message_at);
        // The png that did upload was removed again.
        assert!(h.blobs.files.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn attachments_are_stored_with_the_message() {
        let h = harness().await;
        let mut input = visitor_send("a@x.com", "");
        input.files = vec![file("photo.png", "image/png"), file("notes.pdf", "application/pdf")];

        let sent = h.engine.send(input).await.unwrap();
        let kinds: Vec<_> = sent.message.attachments.iter().map(|a| a.kind).collect();
        assert_eq!(kinds, vec![AttachmentKind::Image, AttachmentKind::Pdf]);
        assert_eq!(sent.message.attachments[0].file_name, "photo.png");
        assert_eq!(sent.message.attachments[0].file_size, 10);
        assert_eq!(h.blobs.files.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn file_rules_are_enforced_before_upload() {
        let h = harness().await;

        let mut too_many = visitor_send("a@x.com", "");
        too_many.files = (0..6).map(|i| file(&format!("{i}.png"), "image/png")).collect();
        assert!(matches!(
            h.engine.send(too_many).await.unwrap_err(),
            ServerError::Validation(ValidationError::TooManyFiles { .. })
        ));

        let mut wrong_type = visitor_send("a@x.com", "");
        wrong_type.files = vec![file("run.exe", "application/x-msdownload")];
        assert!(matches!(
            h.engine.send(wrong_type).await.unwrap_err(),
            ServerError::Validation(ValidationError::FileTypeNotAllowed(_))
        ));

        let mut too_big = visitor_send("a@x.com", "");
        too_big.files = vec![UploadedFile {
            file_name: "big.png".into(),
            mimetype: "image/png".into(),
            data: Bytes::from(vec![0u8; 2048]),
        }];
        assert!(matches!(
            h.engine.send(too_big).await.unwrap_err(),
            ServerError::Validation(ValidationError::FileTooLarge { .. })
        ));

        assert!(h.blobs.files.lock().unwrap().is_empty());
        assert_eq!(chat_count(&h.engine).await, 0);
    }

    #[tokio::test]
    async fn visitor_cannot_write_into_another_chat() {
        let h = harness().await;
        h.engine.send(visitor_send("a@x.com", "mine")).await.unwrap();
        let other = h.engine.send(visitor_send("b@x.com", "theirs")).await.unwrap().chat;

        let err = h
            .engine
            .send(SendInput {
                target: ChatTarget::Explicit {
                    chat_id: other.id,
                    user_email: Some("a@x.com".into()),
                },
                sender: SenderContext::Visitor,
                sender_name: None,
                content: Some("injected".into()),
                files: Vec::new(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::PermissionDenied(_)));

        let view = Viewer::Admin(h.admin.clone());
        let messages = h
            .engine
            .get_chat_with_messages(other.id, &view, Page::default())
            .await
            .unwrap()
            .messages;
        assert_eq!(messages.total, 1);
    }

    #[tokio::test]
    async fn unknown_chat_is_not_found() {
        let h = harness().await;
        let err = h
            .engine
            .send(SendInput {
                target: ChatTarget::Explicit {
                    chat_id: Uuid::new_v4(),
                    user_email: None,
                },
                sender: SenderContext::Visitor,
                sender_name: None,
                content: Some("hi".into()),
                files: Vec::new(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::NotFound("Chat")));
    }

    #[tokio::test]
    async fn admin_identity_overrides_client_fields() {
        let h = harness().await;
        let chat = h.engine.send(visitor_send("a@x.com", "hi")).await.unwrap().chat;

        let sent = h
            .engine
            .send(SendInput {
                target: ChatTarget::Explicit {
                    chat_id: chat.id,
                    user_email: Some("someone-else@x.com".into()),
                },
                sender: SenderContext::Admin(h.admin.clone()),
                sender_name: Some("Impostor".into()),
                content: Some("Hello from the team".into()),
                files: Vec::new(),
            })
            .await
            .unwrap();

        assert_eq!(sent.message.sender_type, SenderType::Admin);
        assert_eq!(sent.message.sender_id, Some(h.admin.id));
        assert_eq!(sent.message.sender_name, "Grace");

        let chat = h
            .engine
            .get_chat_with_messages(chat.id, &Viewer::Admin(h.admin.clone()), Page::default())
            .await
            .unwrap()
            .chat;
        assert_eq!(chat.unread_count.user, 1);
        assert_eq!(chat.unread_count.admin, 1);
    }

    #[tokio::test]
    async fn admin_opened_chat_is_unread_for_the_visitor_only() {
        let h = harness().await;
        let sent = h
            .engine
            .send(SendInput {
                target: ChatTarget::ByEmail {
                    user_email: "new@x.com".into(),
                    user_name: "Ada".into(),
                },
                sender: SenderContext::Admin(h.admin.clone()),
                sender_name: None,
                content: Some("We saw your message".into()),
                files: Vec::new(),
            })
            .await
            .unwrap();

        let chat = h
            .engine
            .get_chat_with_messages(sent.chat.id, &Viewer::Admin(h.admin.clone()), Page::default())
            .await
            .unwrap()
            .chat;
        assert_eq!(chat.admin_id, Some(h.admin.id));
        assert_eq!(chat.unread_count.user, 1);
        assert_eq!(chat.unread_count.admin, 0);
    }

    #[tokio::test]
    async fn visitor_read_marks_only_admin_messages() {
        let h = harness().await;
        let chat = h.engine.send(visitor_send("a@x.com", "hi")).await.unwrap().chat;
        h.engine
            .send(SendInput {
                target: ChatTarget::Explicit {
                    chat_id: chat.id,
                    user_email: None,
                },
                sender: SenderContext::Admin(h.admin.clone()),
                sender_name: None,
                content: Some("hello".into()),
                files: Vec::new(),
            })
            .await
            .unwrap();

        let visitor = Viewer::Visitor {
            user_email: Some("a@x.com".into()),
        };
        let marked = h
            .engine
            .mark_read(chat.id, &visitor, None, ReadOrigin::Request)
            .await
            .unwrap();
        assert_eq!(marked, 1);

        let view = h
            .engine
            .get_chat_with_messages(chat.id, &visitor, Page::default())
            .await
            .unwrap();
        assert_eq!(view.chat.unread_count.user, 0);
        assert_eq!(view.chat.unread_count.admin, 1);
        let user_msg = &view.messages.items[0];
        assert_eq!(user_msg.sender_type, SenderType::User);
        assert!(!user_msg.is_read);
    }

    #[tokio::test]
    async fn mark_read_on_missing_chat_depends_on_origin() {
        let h = harness().await;
        let view = Viewer::Admin(h.admin.clone());
        let missing = Uuid::new_v4();

        assert!(matches!(
            h.engine
                .mark_read(missing, &view, None, ReadOrigin::Request)
                .await,
            Err(ServerError::NotFound("Chat"))
        ));
        assert_eq!(
            h.engine
                .mark_read(missing, &view, None, ReadOrigin::Realtime)
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn visitors_need_the_matching_email_to_read() {
        let h = harness().await;
        let chat = h.engine.send(visitor_send("a@x.com", "hi")).await.unwrap().chat;

        for email in [None, Some("b@x.com".to_string())] {
            let err = h
                .engine
                .get_chat_with_messages(chat.id, &Viewer::Visitor { user_email: email }, Page::default())
                .await
                .unwrap_err();
            assert!(matches!(err, ServerError::PermissionDenied(_)));
        }
        assert_eq!(message_count(&h.engine, chat.id).await, 1);
    }

    #[tokio::test]
    async fn promotion_is_idempotent() {
        let h = harness().await;
        let contact = h.engine.submit_contact(submission("c1@x.com")).await.unwrap();

        let (first, created) = h
            .engine
            .promote_contact_to_chat(contact.id, None, &h.admin)
            .await
            .unwrap();
        assert!(created);
        assert_eq!(first.contact_id, Some(contact.id));
        assert_eq!(first.admin_name.as_deref(), Some("Grace"));

        let (second, created) = h
            .engine
            .promote_contact_to_chat(contact.id, None, &h.admin)
            .await
            .unwrap();
        assert!(!created);
        assert_eq!(first.id, second.id);
        assert_eq!(chat_count(&h.engine).await, 1);

        let contact = h.engine.get_contact(contact.id).await.unwrap();
        assert_eq!(contact.chat_id, Some(first.id));
    }

    #[tokio::test]
    async fn promotion_checks_references() {
        let h = harness().await;
        assert!(matches!(
            h.engine
                .promote_contact_to_chat(Uuid::new_v4(), None, &h.admin)
                .await,
            Err(ServerError::NotFound("Contact"))
        ));

        let contact = h.engine.submit_contact(submission("c1@x.com")).await.unwrap();
        assert!(matches!(
            h.engine
                .promote_contact_to_chat(contact.id, Some(Uuid::new_v4()), &h.admin)
                .await,
            Err(ServerError::NotFound("Admin"))
        ));
        assert_eq!(chat_count(&h.engine).await, 0);
    }

    #[tokio::test]
    async fn reply_to_new_contact_opens_chat_and_mails() {
        let h = harness().await;
        let contact = h.engine.submit_contact(submission("c1@x.com")).await.unwrap();

        let reply = h
            .engine
            .reply_to_contact(contact.id, "Thanks!", &h.admin, None)
            .await
            .unwrap();

        assert_eq!(reply.chat.contact_id, Some(contact.id));
        assert_eq!(reply.chat.unread_count.user, 1);
        assert_eq!(reply.message.sender_type, SenderType::Admin);
        assert!(reply.message.is_reply_to_contact);
        assert!(reply.message.email_sent);

        let contact = h.engine.get_contact(contact.id).await.unwrap();
        assert_eq!(contact.status, ContactStatus::Replied);
        assert_eq!(contact.reply_count, 1);
        assert_eq!(contact.replied_by, Some(h.admin.id));
        assert_eq!(contact.chat_id, Some(reply.chat.id));

        let replies = h.notifier.replies.lock().unwrap();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].to, "c1@x.com");
        assert_eq!(replies[0].original_message, contact.message);
    }

    #[tokio::test]
    async fn reply_survives_email_failure() {
        let h = harness_with(
            MemoryBlobs::default(),
            RecordingNotifier {
                fail: true,
                ..Default::default()
            },
        )
        .await;
        let contact = h.engine.submit_contact(submission("c1@x.com")).await.unwrap();

        let first = h
            .engine
            .reply_to_contact(contact.id, "Thanks!", &h.admin, None)
            .await
            .unwrap();
        assert!(!first.message.email_sent);

        let second = h
            .engine
            .reply_to_contact(contact.id, "Following up", &h.admin, None)
            .await
            .unwrap();
        assert_eq!(first.chat.id, second.chat.id);
        assert_eq!(second.chat.unread_count.user, 2);

        let contact = h.engine.get_contact(contact.id).await.unwrap();
        assert_eq!(contact.reply_count, 2);
    }

    #[tokio::test]
    async fn reply_into_missing_chat_is_not_found() {
        let h = harness().await;
        let contact = h.engine.submit_contact(submission("c1@x.com")).await.unwrap();

        let err = h
            .engine
            .reply_to_contact(contact.id, "Thanks!", &h.admin, Some(Uuid::new_v4()))
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::NotFound("Chat")));

        let contact = h.engine.get_contact(contact.id).await.unwrap();
        assert_eq!(contact.reply_count, 0);
        assert_eq!(contact.status, ContactStatus::New);
    }

    #[tokio::test]
    async fn reply_into_another_visitors_chat_is_refused() {
        let h = harness().await;
        let first = h.engine.submit_contact(submission("c1@x.com")).await.unwrap();
        let second = h.engine.submit_contact(submission("c2@x.com")).await.unwrap();
        let (chat, _) = h
            .engine
            .promote_contact_to_chat(first.id, None, &h.admin)
            .await
            .unwrap();

        let err = h
            .engine
            .reply_to_contact(second.id, "Thanks!", &h.admin, Some(chat.id))
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::PermissionDenied(_)));

        assert_eq!(message_count(&h.engine, chat.id).await, 0);
        assert_eq!(h.engine.get_contact(second.id).await.unwrap().reply_count, 0);

        let ad_hoc = h
            .engine
            .create_ad_hoc_chat(Some("Grace".into()), Some("C2@x.com".into()), None, &h.admin)
            .await
            .unwrap();
        let reply = h
            .engine
            .reply_to_contact(second.id, "Over here", &h.admin, Some(ad_hoc.id))
            .await
            .unwrap();
        assert_eq!(reply.chat.id, ad_hoc.id);
    }

    #[tokio::test]
    async fn deleted_chat_is_replaced_on_next_promotion() {
        let h = harness().await;
        let contact = h.engine.submit_contact(submission("c1@x.com")).await.unwrap();
        let (first, _) = h
            .engine
            .promote_contact_to_chat(contact.id, None, &h.admin)
            .await
            .unwrap();
        h.engine.delete_chat(first.id).await.unwrap();

        let (second, created) = h
            .engine
            .promote_contact_to_chat(contact.id, None, &h.admin)
            .await
            .unwrap();
        assert!(created);
        assert_ne!(second.id, first.id);

        let contact = h.engine.get_contact(contact.id).await.unwrap();
        assert_eq!(contact.chat_id, Some(second.id));
    }

    #[tokio::test]
    async fn submitted_contact_is_normalised_and_flagged_once_mailed() {
        let h = harness().await;
        let contact = h
            .engine
            .submit_contact(submission("  Ada@Example.COM "))
            .await
            .unwrap();
        assert_eq!(contact.email, "ada@example.com");
        assert_eq!(contact.status, ContactStatus::New);

        let mut flagged = false;
        for _ in 0..50 {
            if h.engine.get_contact(contact.id).await.unwrap().email_sent {
                flagged = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(flagged);
        assert_eq!(*h.notifier.contacts.lock().unwrap(), vec![contact.id]);
    }

    #[tokio::test]
    async fn new_messages_reach_the_room() {
        let h = harness().await;
        let chat = h.engine.send(visitor_send("a@x.com", "hi")).await.unwrap().chat;

        let (conn, mut rx) = h.engine.fanout().connect().await;
        h.engine.fanout().join(conn, chat.id).await;
        assert!(matches!(rx.recv().await, Some(ServerEvent::ChatJoined { .. })));

        let sent = h.engine.send(visitor_send("a@x.com", "again")).await.unwrap();
        match rx.recv().await {
            Some(ServerEvent::NewMessage(message)) => assert_eq!(message.id, sent.message.id),
            other => panic!("unexpected event: {other:?}"),
        }

        h.engine
            .mark_read(chat.id, &Viewer::Admin(h.admin.clone()), None, ReadOrigin::Realtime)
            .await
            .unwrap();
        assert_eq!(
            rx.recv().await,
            Some(ServerEvent::MessagesRead {
                chat_id: chat.id,
                read_by: SenderType::Admin
            })
        );
    }

    #[tokio::test]
    async fn deleting_a_chat_removes_messages_and_files() {
        let h = harness().await;
        let mut input = visitor_send("a@x.com", "with file");
        input.files = vec![file("photo.png", "image/png")];
        let chat = h.engine.send(input).await.unwrap().chat;

        h.engine.delete_chat(chat.id).await.unwrap();
        assert!(h.blobs.files.lock().unwrap().is_empty());
        assert_eq!(chat_count(&h.engine).await, 0);
        assert!(matches!(
            h.engine.delete_chat(chat.id).await,
            Err(ServerError::NotFound("Chat"))
        ));
    }

    #[tokio::test]
    async fn ad_hoc_chat_is_assigned_to_the_caller() {
        let h = harness().await;
        let chat = h
            .engine
            .create_ad_hoc_chat(Some("Ada".into()), Some("ADA@x.com".into()), None, &h.admin)
            .await
            .unwrap();
        assert_eq!(chat.user_email, "ada@x.com");
        assert_eq!(chat.admin_id, Some(h.admin.id));
        assert_eq!(chat.unread_count.admin, 0);

        assert!(matches!(
            h.engine
                .create_ad_hoc_chat(None, Some("ada@x.com".into()), None, &h.admin)
                .await,
            Err(ServerError::Validation(ValidationError::Required("userName")))
        ));
    }

    #[tokio::test]
    async fn tokens_authenticate_active_admins_only() {
        let h = harness().await;
        assert_eq!(
            h.engine.authenticate("admin-token").await.unwrap(),
            Some(h.admin.clone())
        );
        assert_eq!(h.engine.authenticate("wrong").await.unwrap(), None);
    }
}
