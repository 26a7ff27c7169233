use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::{
    app_state::AppState,
    http::error::{ApiError, AppResult},
    middleware::request_context::RequestContext,
};

/// Resolves the caller from the identity header set by the upstream
/// authentication service. Requests without a valid caller get `401`.
///
/// # Errors
///
/// Returns [`ApiError::unauthorized`] when the identity header is missing or
/// not a UUID.
#[instrument(skip_all, fields(path = %req.uri().path()))]
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut req: Request<Body>,
    next: Next,
) -> AppResult<Response> {
    let header = state.config.auth.caller_header.as_str();
    let user_id = caller_from_headers(req.headers(), header)?;
    debug!(%user_id, "caller authenticated");

    if let Some(context) = req.extensions_mut().get_mut::<RequestContext>() {
        context.user_id = Some(user_id);
    } else {
        req.extensions_mut().insert(RequestContext {
            request_id: String::new(),
            user_id: Some(user_id),
        });
    }

    Ok(next.run(req).await)
}

fn caller_from_headers(headers: &HeaderMap, header: &str) -> AppResult<Uuid> {
    let raw = headers
        .get(header)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ApiError::unauthorized(format!("missing {header} header")))?;

    match Uuid::parse_str(raw) {
        Ok(user_id) if !user_id.is_nil() => Ok(user_id),
        _ => Err(ApiError::unauthorized(format!("invalid {header} header"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn caller_header_must_hold_a_uuid() {
        let mut headers = HeaderMap::new();
        assert!(caller_from_headers(&headers, "x-user-id").is_err());

        headers.insert("x-user-id", HeaderValue::from_static("not-a-uuid"));
        assert!(caller_from_headers(&headers, "x-user-id").is_err());

        headers.insert(
            "x-user-id",
            HeaderValue::from_static("00000000-0000-0000-0000-000000000000"),
        );
        assert!(caller_from_headers(&headers, "x-user-id").is_err());

        let user = Uuid::new_v4();
        headers.insert("x-user-id", HeaderValue::from_str(&user.to_string()).unwrap());
        assert_eq!(caller_from_headers(&headers, "x-user-id").unwrap(), user);
    }
}
