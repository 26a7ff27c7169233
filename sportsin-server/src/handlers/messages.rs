use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Path, Query, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use shared::models::{Message, SendMessageRequest, UnreadCountResponse, UnreadSenderCount};
use tracing::instrument;
use uuid::Uuid;

use crate::{
    app_state::AppState,
    http::{
        error::{ApiError, AppResult},
        problem::ProblemDetails,
    },
    middleware::request_context::RequestContext,
};

/// Query string of `GET /api/messages/unread`.
#[derive(Debug, Deserialize, Default)]
pub struct UnreadQuery {
    #[serde(rename = "groupBy")]
    group_by: Option<String>,
}

/// Send a direct message
///
/// # Errors
///
/// Returns `400` for an invalid request and `500` when the store fails.
#[utoipa::path(
    post,
    path = "/api/messages",
    request_body = SendMessageRequest,
    responses(
        (status = 201, description = "Message stored", body = Message),
        (status = 400, description = "Invalid request", body = ProblemDetails),
        (status = 401, description = "No authenticated caller", body = ProblemDetails),
        (status = 500, description = "Message store unavailable", body = ProblemDetails)
    ),
    tag = "Messages"
)]
#[instrument(skip(state, context, payload))]
pub async fn send_message(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<RequestContext>,
    payload: Result<Json<SendMessageRequest>, JsonRejection>,
) -> AppResult<impl IntoResponse> {
    let sender = context.require_user()?;
    let Json(request) = payload.map_err(|rejection| ApiError::validation(rejection.body_text()))?;

    let message = state.messaging.send(sender, request).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

/// Fetch the conversation with another user, marking their messages read
///
/// # Errors
///
/// Returns `400` when the participants do not form a valid thread and `500`
/// when the store fails. Nothing is returned if marking read fails.
#[utoipa::path(
    get,
    path = "/api/messages/{user_id}",
    params(("user_id" = Uuid, Path, description = "The other participant")),
    responses(
        (status = 200, description = "Full thread history, oldest first", body = [Message]),
        (status = 400, description = "Invalid participant", body = ProblemDetails),
        (status = 401, description = "No authenticated caller", body = ProblemDetails),
        (status = 500, description = "Message store unavailable", body = ProblemDetails)
    ),
    tag = "Messages"
)]
#[instrument(skip(state, context))]
pub async fn fetch_thread(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<RequestContext>,
    Path(user_id): Path<String>,
) -> AppResult<Json<Vec<Message>>> {
    let caller = context.require_user()?;
    let other = Uuid::parse_str(user_id.trim())
        .map_err(|_| ApiError::validation(format!("'{user_id}' is not a valid user id")))?;

    let fetch = state.messaging.fetch_and_mark_read(caller, other).await?;
    Ok(Json(fetch.messages))
}

/// Unread messages addressed to the caller
///
/// Without `groupBy` the response is `{"count": n}`. With `groupBy=sender` it
/// is a list of `{"senderId", "count"}` entries, largest first.
///
/// # Errors
///
/// Returns `400` for an unsupported `groupBy` and `500` when the store fails.
#[utoipa::path(
    get,
    path = "/api/messages/unread",
    params(("groupBy" = Option<String>, Query, description = "Set to `sender` for a per-sender breakdown")),
    responses(
        (status = 200, description = "Unread total, or per-sender breakdown when grouped", body = UnreadCountResponse),
        (status = 400, description = "Unsupported grouping", body = ProblemDetails),
        (status = 401, description = "No authenticated caller", body = ProblemDetails),
        (status = 500, description = "Message store unavailable", body = ProblemDetails)
    ),
    tag = "Messages"
)]
#[instrument(skip(state, context))]
pub async fn unread(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<RequestContext>,
    Query(query): Query<UnreadQuery>,
) -> AppResult<Response> {
    let caller = context.require_user()?;

    match query.group_by.as_deref().map(str::trim) {
        None | Some("") => {
            let count = state.messaging.total_unread(caller).await?;
            Ok(Json(UnreadCountResponse { count }).into_response())
        }
        Some("sender") => {
            let grouped: Vec<UnreadSenderCount> = state.messaging.unread_by_sender(caller).await?;
            Ok(Json(grouped).into_response())
        }
        Some(other) => Err(ApiError::validation(format!(
            "unsupported groupBy '{other}', expected 'sender'"
        ))),
    }
}
