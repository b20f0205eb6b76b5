/// Application name used in log lines and outgoing mail
pub const APP_NAME: &str = "Nodelo";

/// Contact form limits (characters, after trimming)
pub const CONTACT_NAME_MAX: usize = 100;
pub const CONTACT_COMPANY_MAX: usize = 200;
pub const CONTACT_MESSAGE_MIN: usize = 10;
pub const CONTACT_MESSAGE_MAX: usize = 5000;

/// Maximum chat message length in characters
pub const MESSAGE_CONTENT_MAX: usize = 10_000;

/// Maximum number of files attached to one message
pub const MAX_ATTACHMENTS: usize = 5;

/// Maximum size of a single uploaded file in bytes (50 MiB)
pub const MAX_FILE_SIZE: usize = 50 * 1024 * 1024;

/// Default page sizes
pub const DEFAULT_PAGE_LIMIT: u32 = 20;
pub const DEFAULT_MESSAGE_PAGE_LIMIT: u32 = 50;
pub const MAX_PAGE_LIMIT: u32 = 100;

/// Default HTTP API port
pub const DEFAULT_HTTP_PORT: u16 = 3000;

/// Prefix of the real-time room a chat maps to
pub const ROOM_PREFIX: &str = "chat-";

/// Mimetypes accepted for message attachments
pub const ALLOWED_MIMETYPES: &[&str] = &[
    "image/jpeg",
    "image/png",
    "image/gif",
    "image/webp",
    "video/mp4",
    "video/webm",
    "video/quicktime",
    "application/pdf",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "text/plain",
];
