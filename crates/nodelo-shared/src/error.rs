use thiserror::Error;

/// Malformed or missing input. Every variant can name the offending field so
/// the API can return field-level detail.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{0} is required")]
    Required(&'static str),

    #[error("Invalid email format")]
    InvalidEmail,

    #[error("{field} must be at least {min} characters")]
    TooShort { field: &'static str, min: usize },

    #[error("{field} cannot exceed {max} characters")]
    TooLong { field: &'static str, max: usize },

    #[error("Invalid {field}: '{value}'")]
    InvalidValue { field: &'static str, value: String },

    #[error("Invalid id: {0}")]
    InvalidId(String),

    #[error("Message content or file is required")]
    EmptyMessage,

    #[error("Too many files. Maximum {max} files per message")]
    TooManyFiles { max: usize },

    #[error("File type not allowed: {0}")]
    FileTypeNotAllowed(String),

    #[error("File too large: {file_name} (max {max} bytes)")]
    FileTooLarge { file_name: String, max: usize },
}

impl ValidationError {
    /// The request field this error refers to, if any.
    pub fn field(&self) -> Option<&'static str> {
        match self {
            ValidationError::Required(field)
            | ValidationError::TooShort { field, .. }
            | ValidationError::TooLong { field, .. }
            | ValidationError::InvalidValue { field, .. } => Some(field),
            ValidationError::InvalidEmail => Some("email"),
            ValidationError::InvalidId(_) => Some("id"),
            ValidationError::EmptyMessage => Some("content"),
            ValidationError::TooManyFiles { .. }
            | ValidationError::FileTypeNotAllowed(_)
            | ValidationError::FileTooLarge { .. } => Some("files"),
        }
    }
}
