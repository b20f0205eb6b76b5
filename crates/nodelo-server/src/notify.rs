//! Outgoing email notifications.
//!
//! Every caller treats these as best effort: a failure is logged and never
//! turns into an API error.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use thiserror::Error;
use tracing::{debug, info};

use nodelo_shared::constants::APP_NAME;
use nodelo_store::Contact;

use crate::config::SmtpConfig;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Email notifications are disabled")]
    Disabled,

    #[error("Invalid address '{0}'")]
    Address(String),

    #[error("Could not build email: {0}")]
    Build(#[from] lettre::error::Error),

    #[error("SMTP error: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),
}

/// Data for the email an admin reply produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminReplyNotice {
    pub to: String,
    pub user_name: String,
    pub admin_name: String,
    pub message: String,
    /// The contact's original submission, quoted for context.
    pub original_message: String,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Tell the admin team about a new contact submission.
    async fn notify_new_contact(&self, contact: &Contact) -> Result<(), NotifyError>;

    /// Acknowledge a submission to the visitor.
    async fn notify_contact_confirmation(&self, contact: &Contact) -> Result<(), NotifyError>;

    async fn notify_admin_reply(&self, reply: &AdminReplyNotice) -> Result<(), NotifyError>;
}

/// Used when no SMTP server is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledNotifier;

#[async_trait]
impl Notifier for DisabledNotifier {
    async fn notify_new_contact(&self, contact: &Contact) -> Result<(), NotifyError> {
        debug!(contact = %contact.id, "Email disabled, skipping new-contact notification");
        Err(NotifyError::Disabled)
    }

    async fn notify_contact_confirmation(&self, contact: &Contact) -> Result<(), NotifyError> {
        debug!(contact = %contact.id, "Email disabled, skipping confirmation");
        Err(NotifyError::Disabled)
    }

    async fn notify_admin_reply(&self, reply: &AdminReplyNotice) -> Result<(), NotifyError> {
        debug!(to = %reply.to, "Email disabled, skipping admin reply");
        Err(NotifyError::Disabled)
    }
}

pub struct SmtpNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    /// Recipient of new-contact notifications.
    admin_inbox: Option<Mailbox>,
}

impl SmtpNotifier {
    pub fn new(config: &SmtpConfig, admin_inbox: Option<&str>) -> Result<Self, NotifyError> {
        let builder = if config.port == 465 {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)?
        };
        let mut builder = builder.port(config.port);
        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        let from = mailbox(Some(&config.from_name), &config.from_email)?;
        let admin_inbox = admin_inbox.map(|to| mailbox(None, to)).transpose()?;

        info!(host = %config.host, port = config.port, "SMTP notifications enabled");

        Ok(Self {
            transport: builder.build(),
            from,
            admin_inbox,
        })
    }

    async fn deliver(&self, message: Message) -> Result<(), NotifyError> {
        self.transport.send(message).await?;
        Ok(())
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn notify_new_contact(&self, contact: &Contact) -> Result<(), NotifyError> {
        let to = self.admin_inbox.clone().ok_or(NotifyError::Disabled)?;
        let message = new_contact_email(self.from.clone(), to, contact)?;
        self.deliver(message).await?;
        info!(contact = %contact.id, "New-contact notification sent");
        Ok(())
    }

    async fn notify_contact_confirmation(&self, contact: &Contact) -> Result<(), NotifyError> {
        let to = mailbox(Some(&contact.name), &contact.email)?;
        let message = confirmation_email(self.from.clone(), to, contact)?;
        self.deliver(message).await
    }

    async fn notify_admin_reply(&self, reply: &AdminReplyNotice) -> Result<(), NotifyError> {
        let to = mailbox(Some(&reply.user_name), &reply.to)?;
        let message = admin_reply_email(self.from.clone(), to, reply)?;
        self.deliver(message).await?;
        info!(to = %reply.to, "Admin reply email sent");
        Ok(())
    }
}

fn mailbox(name: Option<&str>, email: &str) -> Result<Mailbox, NotifyError> {
    let address = email
        .parse()
        .map_err(|_| NotifyError::Address(email.to_string()))?;
    Ok(Mailbox::new(name.map(str::to_string), address))
}

fn plain(from: Mailbox, to: Mailbox, subject: String, body: String) -> Result<Message, NotifyError> {
    Ok(Message::builder()
        .from(from)
        .to(to)
        .subject(subject)
        .header(ContentType::TEXT_PLAIN)
        .body(body)?)
}

fn new_contact_email(from: Mailbox, to: Mailbox, contact: &Contact) -> Result<Message, NotifyError> {
    let or_dash = |s: &str| if s.is_empty() { "-".to_string() } else { s.to_string() };
    let body = format!(
        "Name: {}\nEmail: {}\nCompany: {}\nProject type: {}\nBudget: {}\n\n{}\n",
        contact.name,
        contact.email,
        contact.company.as_deref().unwrap_or("-"),
        or_dash(contact.project_type.as_str()),
        or_dash(contact.budget.as_str()),
        contact.message,
    );
    let mut builder = Message::builder()
        .from(from)
        .to(to)
        .subject(format!("New Contact Form Submission from {}", contact.name))
        .header(ContentType::TEXT_PLAIN);
    if let Ok(reply_to) = mailbox(Some(&contact.name), &contact.email) {
        builder = builder.reply_to(reply_to);
    }
    Ok(builder.body(body)?)
}

fn confirmation_email(from: Mailbox, to: Mailbox, contact: &Contact) -> Result<Message, NotifyError> {
    let body = format!(
        "Hi {},\n\nThanks for reaching out. We received your message and will get back to you soon.\n\n> {}\n\n{}\n",
        contact.name,
        contact.message.replace('\n', "\n> "),
        APP_NAME,
    );
    plain(from, to, format!("We received your message - {APP_NAME}"), body)
}

fn admin_reply_email(
    from: Mailbox,
    to: Mailbox,
    reply: &AdminReplyNotice,
) -> Result<Message, NotifyError> {
    let body = format!(
        "Hi {},\n\n{}\n\n{}\n{}\n\nYour original message:\n> {}\n",
        reply.user_name,
        reply.message,
        reply.admin_name,
        APP_NAME,
        reply.original_message.replace('\n', "\n> "),
    );
    plain(
        from,
        to,
        format!("Re: Your inquiry - {} from {APP_NAME}", reply.admin_name),
        body,
    )
}
