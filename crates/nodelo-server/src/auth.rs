//! Admin identity for incoming requests.
//!
//! Admins authenticate with an opaque API token sent as
//! `Authorization: Bearer <token>` (or `?token=` for WebSocket upgrades, where
//! browsers cannot set headers). Only the BLAKE3 hash of a token is stored.

use axum::extract::{FromRequestParts, Query};
use axum::http::request::Parts;
use serde::Deserialize;
use uuid::Uuid;

use nodelo_store::Admin;

use crate::api::AppState;
use crate::error::ServerError;

/// The authenticated admin behind a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminIdentity {
    pub id: Uuid,
    pub email: String,
    /// Display name, captured into message and chat snapshots.
    pub name: String,
}

impl From<&Admin> for AdminIdentity {
    fn from(admin: &Admin) -> Self {
        Self {
            id: admin.id,
            email: admin.email.clone(),
            name: admin.display_name().to_string(),
        }
    }
}

pub fn hash_token(token: &str) -> String {
    blake3::hash(token.as_bytes()).to_hex().to_string()
}

#[derive(Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

fn bearer_token(parts: &Parts) -> Option<String> {
    let from_header = parts
        .headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string());

    from_header
        .or_else(|| {
            Query::<TokenQuery>::try_from_uri(&parts.uri)
                .ok()
                .and_then(|q| q.0.token)
        })
        .filter(|t| !t.is_empty())
}

async fn resolve(parts: &Parts, state: &AppState) -> Result<Option<AdminIdentity>, ServerError> {
    match bearer_token(parts) {
        Some(token) => state.engine.authenticate(&token).await,
        None => Ok(None),
    }
}

/// Rejects the request with 401 unless a valid admin token is present.
#[derive(Debug, Clone)]
pub struct AdminAuth(pub AdminIdentity);

impl FromRequestParts<AppState> for AdminAuth {
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        match resolve(parts, state).await? {
            Some(admin) => Ok(AdminAuth(admin)),
            None => Err(ServerError::Unauthorized),
        }
    }
}

/// The admin behind the request, if any. A missing or invalid token makes the
/// caller a visitor rather than failing the request.
#[derive(Debug, Clone)]
pub struct MaybeAdmin(pub Option<AdminIdentity>);

impl FromRequestParts<AppState> for MaybeAdmin {
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let admin = resolve(parts, state).await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Optional authentication failed, treating as visitor");
            None
        });
        Ok(MaybeAdmin(admin))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts(req: Request<()>) -> Parts {
        req.into_parts().0
    }

    #[test]
    fn test_hash_is_stable_hex() {
        let h = hash_token("secret");
        assert_eq!(h.len(), 64);
        assert_eq!(h, hash_token("secret"));
        assert_ne!(h, hash_token("Secret"));
    }

    #[test]
    fn test_token_from_header_or_query() {
        let p = parts(
            Request::builder()
                .header("authorization", "Bearer abc")
                .body(())
                .unwrap(),
        );
        assert_eq!(bearer_token(&p).as_deref(), Some("abc"));

        let p = parts(Request::builder().uri("/api/ws?token=xyz").body(()).unwrap());
        assert_eq!(bearer_token(&p).as_deref(), Some("xyz"));

        let p = parts(
            Request::builder()
                .header("authorization", "Basic abc")
                .body(())
                .unwrap(),
        );
        assert_eq!(bearer_token(&p), None);
    }
}
