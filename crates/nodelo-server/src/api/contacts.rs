use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use nodelo_shared::constants::DEFAULT_PAGE_LIMIT;
use nodelo_shared::validate::{self, ContactSubmission};
use nodelo_shared::ContactStatus;
use nodelo_store::Contact;

use super::{page_of, parse_id, rate_limited, ApiJson, ApiQuery, ApiResponse, AppState};
use crate::auth::AdminAuth;
use crate::error::ServerError;

pub(super) fn routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/api/contacts", rate_limited(post(submit), state))
        .route("/api/contacts", get(list))
        .route(
            "/api/contacts/{id}",
            get(show).patch(update_status).delete(remove),
        )
}

#[derive(Serialize)]
struct Submitted {
    id: Uuid,
    name: String,
    email: String,
}

async fn submit(
    State(state): State<AppState>,
    ApiJson(submission): ApiJson<ContactSubmission>,
) -> Result<(StatusCode, Json<ApiResponse<Submitted>>), ServerError> {
    let contact = state.engine.submit_contact(submission).await?;
    Ok((
        StatusCode::CREATED,
        ApiResponse::with_message(
            "Contact form submitted successfully",
            Submitted {
                id: contact.id,
                name: contact.name,
                email: contact.email,
            },
        ),
    ))
}

#[derive(Deserialize)]
struct ListQuery {
    status: Option<String>,
    page: Option<u32>,
    limit: Option<u32>,
}

async fn list(
    State(state): State<AppState>,
    AdminAuth(_admin): AdminAuth,
    ApiQuery(query): ApiQuery<ListQuery>,
) -> Result<Json<ApiResponse<Vec<Contact>>>, ServerError> {
    let status = validate::optional(query.status)
        .map(|s| s.parse::<ContactStatus>())
        .transpose()?;
    let page = page_of(query.page, query.limit, DEFAULT_PAGE_LIMIT);
    let contacts = state.engine.list_contacts(status, page).await?;
    Ok(ApiResponse::paginated(contacts))
}

async fn show(
    State(state): State<AppState>,
    AdminAuth(_admin): AdminAuth,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<Contact>>, ServerError> {
    let contact = state.engine.get_contact(parse_id(&id)?).await?;
    Ok(ApiResponse::ok(contact))
}

#[derive(Deserialize)]
struct StatusBody {
    status: Option<String>,
}

async fn update_status(
    State(state): State<AppState>,
    AdminAuth(admin): AdminAuth,
    Path(id): Path<String>,
    ApiJson(body): ApiJson<StatusBody>,
) -> Result<Json<ApiResponse<Contact>>, ServerError> {
    let id = parse_id(&id)?;
    let status: ContactStatus = validate::required(body.status, "status")?.parse()?;
    let contact = state.engine.update_contact_status(id, status).await?;
    tracing::info!(contact = %id, status = %status, admin = %admin.id, "Contact status updated");
    Ok(ApiResponse::with_message("Contact updated successfully", contact))
}

async fn remove(
    State(state): State<AppState>,
    AdminAuth(_admin): AdminAuth,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<()>>, ServerError> {
    state.engine.delete_contact(parse_id(&id)?).await?;
    Ok(ApiResponse::message("Contact deleted successfully"))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use crate::api::test_support::*;

    fn form() -> serde_json::Value {
        json!({
            "name": "  Ada Lovelace ",
            "email": "Ada@Example.com",
            "projectType": "mvp-web-app",
            "message": "We need a new landing page for our launch."
        })
    }

    #[tokio::test]
    async fn test_submit_is_public_and_normalised() {
        let (app, _h) = app().await;
        let (status, body) = call(&app, json("POST", "/api/contacts", None, form())).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["name"], "Ada Lovelace");
        assert_eq!(body["data"]["email"], "ada@example.com");
    }

    #[tokio::test]
    async fn test_invalid_submission_names_the_field() {
        let (app, _h) = app().await;
        let mut bad = form();
        bad["budget"] = json!("a fortune");
        let (status, body) = call(&app, json("POST", "/api/contacts", None, bad)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert_eq!(body["details"]["field"], "budget");
    }

    #[tokio::test]
    async fn test_admin_routes_need_a_token() {
        let (app, _h) = app().await;
        let (status, _) = call(&app, get("/api/contacts", None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, _) = call(&app, get("/api/contacts", Some("wrong"))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_admin_lifecycle() {
        let (app, _h) = app().await;
        let (_, created) = call(&app, json("POST", "/api/contacts", None, form())).await;
        let id = created["data"]["id"].as_str().unwrap().to_string();

        let (status, body) = call(&app, get("/api/contacts?status=new", Some(TOKEN))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["pagination"]["total"], 1);
        assert_eq!(body["data"][0]["id"], id.as_str());

        let (status, body) = call(
            &app,
            json("PATCH", &format!("/api/contacts/{id}"), Some(TOKEN), json!({ "status": "archived" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "archived");

        let (status, _) = call(
            &app,
            json("PATCH", &format!("/api/contacts/{id}"), Some(TOKEN), json!({ "status": "lost" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(
            &app,
            json("DELETE", &format!("/api/contacts/{id}"), Some(TOKEN), json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = call(&app, get(&format!("/api/contacts/{id}"), Some(TOKEN))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_malformed_id_is_bad_request() {
        let (app, _h) = app().await;
        let (status, body) = call(&app, get("/api/contacts/123", Some(TOKEN))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
    }
}
