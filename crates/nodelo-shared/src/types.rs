use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ValidationError;

/// Declares a closed set of string-valued variants with the `as_str` /
/// `FromStr` / serde plumbing they all share. The wire form is the string.
macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $field:literal {
            $($variant:ident => $text:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl FromStr for $name {
            type Err = ValidationError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(ValidationError::InvalidValue {
                        field: $field,
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = String::deserialize(deserializer)?;
                raw.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

string_enum! {
    /// Lifecycle of a contact-form submission.
    ContactStatus, "status" {
        New => "new",
        Replied => "replied",
        Archived => "archived",
    }
}

string_enum! {
    /// Admin-driven state of a chat thread. Nothing transitions automatically.
    ChatStatus, "status" {
        Active => "active",
        Resolved => "resolved",
        Archived => "archived",
    }
}

string_enum! {
    /// Which side of a conversation authored a message, or is acting.
    SenderType, "senderType" {
        User => "user",
        Admin => "admin",
    }
}

string_enum! {
    AttachmentKind, "type" {
        Image => "image",
        Video => "video",
        Pdf => "pdf",
        Document => "document",
    }
}

string_enum! {
    ProjectType, "projectType" {
        StarterSite => "starter-site",
        MvpWebApp => "mvp-web-app",
        DappContract => "dapp-contract",
        SupportOps => "support-ops",
        Other => "other",
        Unspecified => "",
    }
}

string_enum! {
    Budget, "budget" {
        Under1k => "under-1k",
        From1kTo5k => "1k-5k",
        From5kTo10k => "5k-10k",
        From10kTo25k => "10k-25k",
        Over25k => "25k-plus",
        Unspecified => "",
    }
}

impl SenderType {
    /// The opposite party: whose unread counter a message from `self` bumps,
    /// and whose messages `self` clears when marking read.
    pub fn other(&self) -> SenderType {
        match self {
            SenderType::User => SenderType::Admin,
            SenderType::Admin => SenderType::User,
        }
    }
}

impl AttachmentKind {
    /// Classify an upload by its mimetype.
    pub fn from_mimetype(mimetype: &str) -> Self {
        if mimetype.starts_with("image/") {
            AttachmentKind::Image
        } else if mimetype.starts_with("video/") {
            AttachmentKind::Video
        } else if mimetype == "application/pdf" {
            AttachmentKind::Pdf
        } else {
            AttachmentKind::Document
        }
    }
}

impl Default for ProjectType {
    fn default() -> Self {
        ProjectType::Unspecified
    }
}

impl Default for Budget {
    fn default() -> Self {
        Budget::Unspecified
    }
}
