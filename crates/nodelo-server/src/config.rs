//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use nodelo_shared::constants::{DEFAULT_HTTP_PORT, MAX_FILE_SIZE};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP (axum) API server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:3000`
    pub http_addr: SocketAddr,

    /// SQLite database file.
    /// Env: `DATABASE_PATH`
    /// Default: the platform data directory.
    pub database_path: Option<PathBuf>,

    /// Directory where uploaded attachments are stored.
    /// Env: `BLOB_STORAGE_PATH`
    /// Default: `./uploads`
    pub blob_storage_path: PathBuf,

    /// Base URL used to build attachment links.
    /// Env: `PUBLIC_BASE_URL`
    /// Default: `http://localhost:3000`
    pub public_base_url: String,

    /// Maximum size of a single uploaded file in bytes.
    /// Env: `MAX_UPLOAD_SIZE`
    pub max_upload_size: usize,

    /// Allowed CORS origin. `None` allows any origin.
    /// Env: `CORS_ORIGIN`
    pub cors_origin: Option<String>,

    /// Bootstrap admin seeded at start-up when email and token are both set.
    /// Env: `ADMIN_EMAIL`, `ADMIN_NAME`, `ADMIN_TOKEN`
    pub admin: Option<AdminSeed>,

    /// Outgoing mail. `None` disables notifications.
    /// Env: `SMTP_HOST`, `SMTP_PORT`, `SMTP_USERNAME`, `SMTP_PASSWORD`,
    /// `EMAIL_FROM`, `EMAIL_FROM_NAME`
    pub smtp: Option<SmtpConfig>,

    /// Address that receives new-contact notifications. Falls back to the
    /// bootstrap admin's email.
    /// Env: `ADMIN_NOTIFY_EMAIL`
    pub notify_to: Option<String>,

    /// Upper bound on the awaited admin-reply email.
    /// Env: `NOTIFY_TIMEOUT_SECS`
    /// Default: 10 seconds
    pub notify_timeout: Duration,

    /// Token bucket refill rate for public write routes.
    /// Env: `RATE_LIMIT_PER_SEC`
    /// Default: `5`
    pub rate_limit_per_sec: f64,

    /// Token bucket capacity.
    /// Env: `RATE_LIMIT_BURST`
    /// Default: `20`
    pub rate_limit_burst: f64,
}

#[derive(Clone)]
pub struct AdminSeed {
    pub email: String,
    pub name: Option<String>,
    pub token: String,
}

// Keep the token out of logs.
impl std::fmt::Debug for AdminSeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminSeed")
            .field("email", &self.email)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
pub struct SmtpConfig {
    pub host: String,
    /// 465 selects implicit TLS, anything else STARTTLS.
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from_email: String,
    pub from_name: String,
}

impl std::fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("from_email", &self.from_email)
            .field("from_name", &self.from_name)
            .finish_non_exhaustive()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: None,
            blob_storage_path: PathBuf::from("./uploads"),
            public_base_url: format!("http://localhost:{DEFAULT_HTTP_PORT}"),
            max_upload_size: MAX_FILE_SIZE,
            cors_origin: None,
            admin: None,
            smtp: None,
            notify_to: None,
            notify_timeout: Duration::from_secs(10),
            rate_limit_per_sec: 5.0,
            rate_limit_burst: 20.0,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup. Empty values are
    /// treated as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut config = Self::default();

        if let Some(addr) = get("HTTP_ADDR") {
            parse_into(&mut config.http_addr, "HTTP_ADDR", &addr);
        }

        config.database_path = get("DATABASE_PATH").map(PathBuf::from);

        if let Some(path) = get("BLOB_STORAGE_PATH") {
            config.blob_storage_path = PathBuf::from(path);
        }

        if let Some(url) = get("PUBLIC_BASE_URL") {
            config.public_base_url = url.trim_end_matches('/').to_string();
        }

        if let Some(size) = get("MAX_UPLOAD_SIZE") {
            parse_into(&mut config.max_upload_size, "MAX_UPLOAD_SIZE", &size);
        }

        config.cors_origin = get("CORS_ORIGIN").filter(|o| o != "*");

        match (get("ADMIN_EMAIL"), get("ADMIN_TOKEN")) {
            (Some(email), Some(token)) => {
                config.admin = Some(AdminSeed {
                    email,
                    name: get("ADMIN_NAME"),
                    token,
                });
            }
            (Some(_), None) | (None, Some(_)) => {
                tracing::warn!("ADMIN_EMAIL and ADMIN_TOKEN must both be set, skipping admin seed");
            }
            (None, None) => {}
        }

        if let Some(host) = get("SMTP_HOST") {
            let mut port = 587u16;
            if let Some(raw) = get("SMTP_PORT") {
                parse_into(&mut port, "SMTP_PORT", &raw);
            }
            let username = get("SMTP_USERNAME");
            let from_email = get("EMAIL_FROM").or_else(|| username.clone());

            match from_email {
                Some(from_email) => {
                    config.smtp = Some(SmtpConfig {
                        host,
                        port,
                        username,
                        password: get("SMTP_PASSWORD"),
                        from_email,
                        from_name: get("EMAIL_FROM_NAME")
                            .unwrap_or_else(|| nodelo_shared::constants::APP_NAME.to_string()),
                    });
                }
                None => tracing::warn!("SMTP_HOST set without EMAIL_FROM or SMTP_USERNAME, email disabled"),
            }
        }

        config.notify_to = get("ADMIN_NOTIFY_EMAIL")
            .or_else(|| config.admin.as_ref().map(|a| a.email.clone()));

        if let Some(raw) = get("NOTIFY_TIMEOUT_SECS") {
            let mut secs = config.notify_timeout.as_secs();
            parse_into(&mut secs, "NOTIFY_TIMEOUT_SECS", &raw);
            config.notify_timeout = Duration::from_secs(secs);
        }

        if let Some(raw) = get("RATE_LIMIT_PER_SEC") {
            parse_positive(&mut config.rate_limit_per_sec, "RATE_LIMIT_PER_SEC", &raw);
        }

        if let Some(raw) = get("RATE_LIMIT_BURST") {
            parse_positive(&mut config.rate_limit_burst, "RATE_LIMIT_BURST", &raw);
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

fn parse_into<T: FromStr>(slot: &mut T, key: &str, raw: &str) {
    match raw.parse() {
        Ok(value) => *slot = value,
        Err(_) => tracing::warn!(key, value = %raw, "Invalid value, using default"),
    }
}

fn parse_positive(slot: &mut f64, key: &str, raw: &str) {
    match raw.parse::<f64>() {
        Ok(value) if value > 0.0 && value.is_finite() => *slot = value,
        _ => tracing::warn!(key, value = %raw, "Expected a positive number, using default"),
    }
}
