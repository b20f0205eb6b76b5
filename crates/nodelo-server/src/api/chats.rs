use axum::extract::multipart::MultipartError;
use axum::extract::{FromRequest, Multipart, Path, Request, State};
use axum::http::{header, StatusCode};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use nodelo_shared::constants::{DEFAULT_MESSAGE_PAGE_LIMIT, DEFAULT_PAGE_LIMIT};
use nodelo_shared::validate;
use nodelo_shared::ChatStatus;
use nodelo_store::chats::ChatFilter;
use nodelo_store::{Chat, Message};

use super::{
    page_of, parse_id, rate_limited, rejected, ApiJson, ApiQuery, ApiResponse, AppState,
    Pagination,
};
use crate::auth::{AdminAuth, AdminIdentity, MaybeAdmin};
use crate::engine::{
    ChatSnapshot, ChatTarget, ReadOrigin, SendInput, SenderContext, UploadedFile, Viewer,
};
use crate::error::ServerError;

pub(super) fn routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/api/chats", post(create_ad_hoc).get(list))
        .route("/api/chats/user/{email}", get(list_for_user))
        .route("/api/chats/from-contact", post(from_contact))
        .route("/api/chats/reply-contact", post(reply_contact))
        .route("/api/chats/mark-read", post(mark_read))
        .route("/api/chats/message", rate_limited(post(send_implicit), state))
        .route("/api/chats/{id}", get(show).delete(remove))
        .route("/api/chats/{id}/message", rate_limited(post(send_explicit), state))
        .route("/api/chats/{id}/status", patch(update_status))
}

// ---------------------------------------------------------------------------
// Admin chat management
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateBody {
    user_name: Option<String>,
    user_email: Option<String>,
    admin_id: Option<String>,
}

async fn create_ad_hoc(
    State(state): State<AppState>,
    AdminAuth(admin): AdminAuth,
    ApiJson(body): ApiJson<CreateBody>,
) -> Result<(StatusCode, Json<ApiResponse<Chat>>), ServerError> {
    let admin_id = optional_id(body.admin_id)?;
    let chat = state
        .engine
        .create_ad_hoc_chat(body.user_name, body.user_email, admin_id, &admin)
        .await?;
    Ok((
        StatusCode::CREATED,
        ApiResponse::with_message("Chat created successfully", chat),
    ))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListQuery {
    status: Option<String>,
    user_email: Option<String>,
    page: Option<u32>,
    limit: Option<u32>,
}

async fn list(
    State(state): State<AppState>,
    AdminAuth(_admin): AdminAuth,
    ApiQuery(query): ApiQuery<ListQuery>,
) -> Result<Json<ApiResponse<Vec<Chat>>>, ServerError> {
    let filter = ChatFilter {
        status: validate::optional(query.status)
            .map(|s| s.parse::<ChatStatus>())
            .transpose()?,
        user_email: validate::optional(query.user_email),
    };
    let page = page_of(query.page, query.limit, DEFAULT_PAGE_LIMIT);
    let chats = state.engine.list_chats(&filter, page).await?;
    Ok(ApiResponse::paginated(chats))
}

#[derive(Deserialize)]
struct PageParams {
    page: Option<u32>,
    limit: Option<u32>,
}

async fn list_for_user(
    State(state): State<AppState>,
    Path(email): Path<String>,
    ApiQuery(query): ApiQuery<PageParams>,
) -> Result<Json<ApiResponse<Vec<Chat>>>, ServerError> {
    let page = page_of(query.page, query.limit, DEFAULT_PAGE_LIMIT);
    let chats = state.engine.list_chats_for_user(&email, page).await?;
    Ok(ApiResponse::paginated(chats))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FromContactBody {
    contact_id: Option<String>,
    admin_id: Option<String>,
}

async fn from_contact(
    State(state): State<AppState>,
    AdminAuth(admin): AdminAuth,
    ApiJson(body): ApiJson<FromContactBody>,
) -> Result<(StatusCode, Json<ApiResponse<Chat>>), ServerError> {
    let contact_id = required_id(body.contact_id, "contactId")?;
    let admin_id = optional_id(body.admin_id)?;

    let (chat, created) = state
        .engine
        .promote_contact_to_chat(contact_id, admin_id, &admin)
        .await?;

    Ok(if created {
        (
            StatusCode::CREATED,
            ApiResponse::with_message("Chat created successfully", chat),
        )
    } else {
        (
            StatusCode::OK,
            ApiResponse::with_message("Chat already exists", chat),
        )
    })
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReplyBody {
    contact_id: Option<String>,
    message: Option<String>,
    chat_id: Option<String>,
}

#[derive(Serialize)]
struct Replied {
    message: Message,
    chat: Chat,
}

async fn reply_contact(
    State(state): State<AppState>,
    AdminAuth(admin): AdminAuth,
    ApiJson(body): ApiJson<ReplyBody>,
) -> Result<Json<ApiResponse<Replied>>, ServerError> {
    let contact_id = required_id(body.contact_id, "contactId")?;
    let chat_id = optional_id(body.chat_id)?;
    let message = validate::required(body.message, "message")?;

    let outcome = state
        .engine
        .reply_to_contact(contact_id, &message, &admin, chat_id)
        .await?;

    Ok(ApiResponse::with_message(
        "Reply sent successfully",
        Replied {
            message: outcome.message,
            chat: outcome.chat,
        },
    ))
}

#[derive(Deserialize)]
struct StatusBody {
    status: Option<String>,
}

async fn update_status(
    State(state): State<AppState>,
    AdminAuth(_admin): AdminAuth,
    Path(id): Path<String>,
    ApiJson(body): ApiJson<StatusBody>,
) -> Result<Json<ApiResponse<Chat>>, ServerError> {
    let id = parse_id(&id)?;
    let status: ChatStatus = validate::required(body.status, "status")?.parse()?;
    let chat = state.engine.update_chat_status(id, status).await?;
    Ok(ApiResponse::with_message("Chat status updated", chat))
}

async fn remove(
    State(state): State<AppState>,
    AdminAuth(_admin): AdminAuth,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<()>>, ServerError> {
    state.engine.delete_chat(parse_id(&id)?).await?;
    Ok(ApiResponse::message("Chat deleted successfully"))
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ShowQuery {
    user_email: Option<String>,
    page: Option<u32>,
    limit: Option<u32>,
}

#[derive(Serialize)]
struct ChatView {
    chat: Chat,
    messages: Vec<Message>,
    pagination: Pagination,
}

async fn show(
    State(state): State<AppState>,
    MaybeAdmin(admin): MaybeAdmin,
    Path(id): Path<String>,
    ApiQuery(query): ApiQuery<ShowQuery>,
) -> Result<Json<ApiResponse<ChatView>>, ServerError> {
    let id = parse_id(&id)?;
    let viewer = viewer(admin, query.user_email);
    let page = page_of(query.page, query.limit, DEFAULT_MESSAGE_PAGE_LIMIT);

    let view = state.engine.get_chat_with_messages(id, &viewer, page).await?;
    let pagination = Pagination::from(&view.messages);
    Ok(ApiResponse::ok(ChatView {
        chat: view.chat,
        messages: view.messages.items,
        pagination,
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarkReadBody {
    chat_id: Option<String>,
    message_ids: Option<Vec<String>>,
    user_email: Option<String>,
}

#[derive(Serialize)]
struct Marked {
    marked: usize,
}

async fn mark_read(
    State(state): State<AppState>,
    MaybeAdmin(admin): MaybeAdmin,
    ApiJson(body): ApiJson<MarkReadBody>,
) -> Result<Json<ApiResponse<Marked>>, ServerError> {
    let chat_id = required_id(body.chat_id, "chatId")?;
    let ids = body
        .message_ids
        .map(|ids| ids.iter().map(|id| parse_id(id)).collect::<Result<Vec<_>, _>>())
        .transpose()?;
    let viewer = viewer(admin, body.user_email);

    let marked = state
        .engine
        .mark_read(chat_id, &viewer, ids.as_deref(), ReadOrigin::Request)
        .await?;
    Ok(ApiResponse::with_message(
        "Messages marked as read",
        Marked { marked },
    ))
}

// ---------------------------------------------------------------------------
// Sending
// ---------------------------------------------------------------------------

/// Fields of a message send, from either `multipart/form-data` or JSON.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendForm {
    content: Option<String>,
    user_email: Option<String>,
    user_name: Option<String>,
    sender_name: Option<String>,
    chat_id: Option<String>,
    #[serde(skip)]
    files: Vec<UploadedFile>,
}

impl<S> FromRequest<S> for SendForm
where
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_multipart = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("multipart/form-data"));

        if !is_multipart {
            let ApiJson(form) = ApiJson::<SendForm>::from_request(req, state).await?;
            return Ok(form);
        }

        let mut multipart = Multipart::from_request(req, state)
            .await
            .map_err(|e| rejected(e.status(), e.body_text()))?;

        let mut form = SendForm::default();
        while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
            let name = field.name().unwrap_or("").to_string();
            match name.as_str() {
                "files" | "file" => {
                    let file_name = field.file_name().unwrap_or("file").to_string();
                    let mimetype = field
                        .content_type()
                        .unwrap_or("application/octet-stream")
                        .to_string();
                    let data = field.bytes().await.map_err(multipart_error)?;
                    form.files.push(UploadedFile {
                        file_name,
                        mimetype,
                        data,
                    });
                }
                "content" | "userEmail" | "userName" | "senderName" | "chatId" => {
                    let value = Some(field.text().await.map_err(multipart_error)?);
                    match name.as_str() {
                        "content" => form.content = value,
                        "userEmail" => form.user_email = value,
                        "userName" => form.user_name = value,
                        "senderName" => form.sender_name = value,
                        _ => form.chat_id = value,
                    }
                }
                other => debug!(field = other, "Ignoring unknown form field"),
            }
        }
        Ok(form)
    }
}

fn multipart_error(err: MultipartError) -> ServerError {
    rejected(err.status(), err.body_text())
}

#[derive(Serialize)]
struct Sent {
    success: bool,
    message: &'static str,
    data: Message,
    chat: ChatSnapshot,
}

async fn send_implicit(
    State(state): State<AppState>,
    MaybeAdmin(admin): MaybeAdmin,
    form: SendForm,
) -> Result<(StatusCode, Json<Sent>), ServerError> {
    let target = match validate::optional(form.chat_id.clone()) {
        Some(id) => ChatTarget::Explicit {
            chat_id: parse_id(&id)?,
            user_email: validate::optional(form.user_email.clone()),
        },
        None => ChatTarget::ByEmail {
            user_email: validate::required(form.user_email.clone(), "userEmail")?,
            user_name: validate::required(form.user_name.clone(), "userName")?,
        },
    };
    send(state, admin, target, form).await
}

async fn send_explicit(
    State(state): State<AppState>,
    MaybeAdmin(admin): MaybeAdmin,
    Path(id): Path<String>,
    form: SendForm,
) -> Result<(StatusCode, Json<Sent>), ServerError> {
    let target = ChatTarget::Explicit {
        chat_id: parse_id(&id)?,
        user_email: validate::optional(form.user_email.clone()),
    };
    send(state, admin, target, form).await
}

async fn send(
    state: AppState,
    admin: Option<AdminIdentity>,
    target: ChatTarget,
    form: SendForm,
) -> Result<(StatusCode, Json<Sent>), ServerError> {
    let sender = match admin {
        Some(admin) => SenderContext::Admin(admin),
        None => SenderContext::Visitor,
    };
    let outcome = state
        .engine
        .send(SendInput {
            target,
            sender,
            sender_name: form.sender_name,
            content: form.content,
            files: form.files,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(Sent {
            success: true,
            message: "Message sent successfully",
            data: outcome.message,
            chat: outcome.chat,
        }),
    ))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn viewer(admin: Option<AdminIdentity>, user_email: Option<String>) -> Viewer {
    match admin {
        Some(admin) => Viewer::Admin(admin),
        None => Viewer::Visitor { user_email },
    }
}

fn required_id(raw: Option<String>, field: &'static str) -> Result<Uuid, ServerError> {
    parse_id(&validate::required(raw, field)?)
}

fn optional_id(raw: Option<String>) -> Result<Option<Uuid>, ServerError> {
    validate::optional(raw).map(|id| parse_id(&id)).transpose()
}
