//! HTTP API: router, shared state, and the JSON envelope every handler
//! answers with.

mod chats;
mod contacts;
mod files;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{DefaultBodyLimit, FromRequest, FromRequestParts, Request};
use axum::http::request::Parts;
use axum::http::{HeaderValue, Method, StatusCode};
use axum::routing::{get, MethodRouter};
use axum::{middleware, Json, Router};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use nodelo_shared::constants::MAX_ATTACHMENTS;
use nodelo_shared::ValidationError;
use nodelo_store::{Page, Paginated};

use crate::blob_store::BlobStorage;
use crate::config::ServerConfig;
use crate::engine::MessagingEngine;
use crate::error::ServerError;
use crate::rate_limit::{rate_limit_middleware, RateLimiter};

/// Room left in a request body for the text fields next to the files.
const FORM_OVERHEAD: usize = 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<MessagingEngine>,
    pub blobs: Arc<dyn BlobStorage>,
    pub rate_limiter: RateLimiter,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let body_limit = state
        .config
        .max_upload_size
        .saturating_mul(MAX_ATTACHMENTS)
        .saturating_add(FORM_OVERHEAD);

    Router::new()
        .route("/health", get(health_check))
        .route("/api/ws", get(crate::ws::ws_handler))
        .merge(contacts::routes(&state))
        .merge(chats::routes(&state))
        .merge(files::routes())
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors_layer(state.config.cors_origin.as_deref()))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origin: Option<&str>) -> CorsLayer {
    let allow_origin = match origin.map(HeaderValue::from_str) {
        Some(Ok(origin)) => AllowOrigin::exact(origin),
        Some(Err(_)) => {
            warn!("CORS_ORIGIN is not a valid header value, allowing any origin");
            AllowOrigin::from(Any)
        }
        None => AllowOrigin::from(Any),
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any)
}

/// Public write routes get the per-IP token bucket.
fn rate_limited(router: MethodRouter<AppState>, state: &AppState) -> MethodRouter<AppState> {
    router.route_layer(middleware::from_fn_with_state(
        state.rate_limiter.clone(),
        rate_limit_middleware,
    ))
}

pub async fn serve(state: AppState, addr: SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total: u64,
    pub pages: u64,
}

impl<T> From<&Paginated<T>> for Pagination {
    fn from(p: &Paginated<T>) -> Self {
        Self {
            page: p.page.page,
            limit: p.page.limit,
            total: p.total,
            pages: p.pages(),
        }
    }
}

/// `{success, message?, data?, pagination?}`
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pagination: Option<Pagination>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            message: None,
            data: Some(data),
            pagination: None,
        })
    }

    pub fn with_message(message: &'static str, data: T) -> Json<Self> {
        Json(Self {
            success: true,
            message: Some(message),
            data: Some(data),
            pagination: None,
        })
    }
}

impl<T> ApiResponse<Vec<T>> {
    pub fn paginated(page: Paginated<T>) -> Json<Self> {
        let pagination = Pagination::from(&page);
        Json(Self {
            success: true,
            message: None,
            data: Some(page.items),
            pagination: Some(pagination),
        })
    }
}

impl ApiResponse<()> {
    pub fn message(message: &'static str) -> Json<Self> {
        Json(Self {
            success: true,
            message: Some(message),
            data: None,
            pagination: None,
        })
    }
}

// ---------------------------------------------------------------------------
// Extractors
// ---------------------------------------------------------------------------

fn rejected(status: StatusCode, text: String) -> ServerError {
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        ServerError::PayloadTooLarge(text)
    } else {
        ServerError::BadRequest(text)
    }
}

/// `Json` whose rejection answers in the API's error envelope.
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|e: JsonRejection| rejected(e.status(), e.body_text()))?;
        Ok(ApiJson(value))
    }
}

/// `Query` whose rejection answers in the API's error envelope.
pub struct ApiQuery<T>(pub T);

impl<S, T> FromRequestParts<S> for ApiQuery<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let axum::extract::Query(value) =
            axum::extract::Query::<T>::from_request_parts(parts, state)
                .await
                .map_err(|e: QueryRejection| rejected(e.status(), e.body_text()))?;
        Ok(ApiQuery(value))
    }
}

/// `?page=&limit=` with a per-route default page size.
pub fn page_of(page: Option<u32>, limit: Option<u32>, default_limit: u32) -> Page {
    Page::new(page.unwrap_or(1), limit.unwrap_or(default_limit))
}

pub fn parse_id(raw: &str) -> Result<Uuid, ServerError> {
    Uuid::parse_str(raw.trim()).map_err(|_| ValidationError::InvalidId(raw.to_string()).into())
}
