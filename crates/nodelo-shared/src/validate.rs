//! Normalisation and validation of inbound user input.
//!
//! Every string is trimmed before it is measured or stored, and emails are
//! lowercased, so the stores only ever see canonical values.

use serde::Deserialize;

use crate::constants::{
    ALLOWED_MIMETYPES, CONTACT_COMPANY_MAX, CONTACT_MESSAGE_MAX, CONTACT_MESSAGE_MIN,
    CONTACT_NAME_MAX, MAX_ATTACHMENTS, MAX_FILE_SIZE, MESSAGE_CONTENT_MAX,
};
use crate::error::ValidationError;
use crate::types::{Budget, ProjectType};

/// Raw contact form as posted by the website.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactSubmission {
    pub name: Option<String>,
    pub email: Option<String>,
    pub company: Option<String>,
    pub project_type: Option<String>,
    pub budget: Option<String>,
    pub message: Option<String>,
}

/// A contact submission that passed validation, ready to persist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactDraft {
    pub name: String,
    pub email: String,
    pub company: Option<String>,
    pub project_type: ProjectType,
    pub budget: Budget,
    pub message: String,
}

impl ContactSubmission {
    pub fn validate(self) -> Result<ContactDraft, ValidationError> {
        let name = required(self.name, "name")?;
        let email = required(self.email, "email")?;
        let message = required(self.message, "message")?;

        let email = normalize_email(&email)?;
        check_max(&name, "name", CONTACT_NAME_MAX)?;

        let message_len = message.chars().count();
        if message_len < CONTACT_MESSAGE_MIN {
            return Err(ValidationError::TooShort {
                field: "message",
                min: CONTACT_MESSAGE_MIN,
            });
        }
        check_max(&message, "message", CONTACT_MESSAGE_MAX)?;

        let company = optional(self.company);
        if let Some(company) = &company {
            check_max(company, "company", CONTACT_COMPANY_MAX)?;
        }

        let project_type = match optional(self.project_type) {
            Some(raw) => raw.parse()?,
            None => ProjectType::Unspecified,
        };
        let budget = match optional(self.budget) {
            Some(raw) => raw.parse()?,
            None => Budget::Unspecified,
        };

        Ok(ContactDraft {
            name,
            email,
            company,
            project_type,
            budget,
            message,
        })
    }
}

/// Trim and lowercase an email, rejecting anything not shaped like
/// `local@domain.tld`.
pub fn normalize_email(raw: &str) -> Result<String, ValidationError> {
    let email = raw.trim().to_lowercase();
    if email.is_empty() {
        return Err(ValidationError::Required("email"));
    }
    if !is_valid_email(&email) {
        return Err(ValidationError::InvalidEmail);
    }
    Ok(email)
}

/// One `@`, no whitespace, and a dot inside the domain with text on both sides.
pub fn is_valid_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    domain
        .char_indices()
        .any(|(i, c)| c == '.' && i > 0 && i + 1 < domain.len())
}

/// Trim chat message content. Returns an empty string when there is none;
/// the caller decides whether attachments make that acceptable.
pub fn normalize_content(raw: Option<&str>) -> Result<String, ValidationError> {
    let content = raw.map(str::trim).unwrap_or_default().to_string();
    check_max(&content, "content", MESSAGE_CONTENT_MAX)?;
    Ok(content)
}

/// Check an upload before it is handed to blob storage.
pub fn check_upload(file_name: &str, mimetype: &str, size: usize) -> Result<(), ValidationError> {
    if !ALLOWED_MIMETYPES.contains(&mimetype) {
        return Err(ValidationError::FileTypeNotAllowed(mimetype.to_string()));
    }
    if size > MAX_FILE_SIZE {
        return Err(ValidationError::FileTooLarge {
            file_name: file_name.to_string(),
            max: MAX_FILE_SIZE,
        });
    }
    Ok(())
}

pub fn check_attachment_count(count: usize) -> Result<(), ValidationError> {
    if count > MAX_ATTACHMENTS {
        return Err(ValidationError::TooManyFiles {
            max: MAX_ATTACHMENTS,
        });
    }
    Ok(())
}

/// Trimmed value, or `Required` when absent or blank.
pub fn required(value: Option<String>, field: &'static str) -> Result<String, ValidationError> {
    optional(value).ok_or(ValidationError::Required(field))
}

/// Trimmed value, `None` when absent or blank.
pub fn optional(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn check_max(value: &str, field: &'static str, max: usize) -> Result<(), ValidationError> {
    if value.chars().count() > max {
        return Err(ValidationError::TooLong { field, max });
    }
    Ok(())
}
