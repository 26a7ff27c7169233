use std::str::FromStr;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderName, HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use crate::http::error::{ApiError, AppResult};
use shared::config::Config;

/// Per-request data attached as an extension by the middleware.
#[derive(Clone, Debug, Default)]
pub struct RequestContext {
    /// Id echoed back in the configured request id header.
    pub request_id: String,
    /// Caller set by the auth middleware.
    pub user_id: Option<Uuid>,
}

impl RequestContext {
    /// The authenticated caller.
    ///
    /// # Errors
    /// Returns `401 unauthorized` when the auth middleware did not run or
    /// found no caller.
    pub fn require_user(&self) -> AppResult<Uuid> {
        self.user_id
            .ok_or_else(|| ApiError::unauthorized("authentication required"))
    }
}

/// Header name used by [`assign_request_id`].
#[derive(Clone, Debug)]
pub struct RequestIdState {
    header: HeaderName,
}

impl RequestIdState {
    /// Uses `server.request_id_header`, falling back to `x-request-id`.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        let header = HeaderName::from_str(&config.server.request_id_header)
            .unwrap_or_else(|_| HeaderName::from_static("x-request-id"));
        Self { header }
    }
}

/// Reuses the caller's request id or mints one, stores it in the
/// [`RequestContext`] and echoes it on the response.
///
/// # Errors
/// Fails only when the id cannot be encoded as a header value.
pub async fn assign_request_id(
    State(state): State<RequestIdState>,
    mut request: Request<Body>,
    next: Next,
) -> AppResult<Response> {
    let header_name = state.header.clone();
    let request_id = extract_request_id(request.headers(), &header_name)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let header_value = HeaderValue::from_str(&request_id)
        .map_err(|_| ApiError::internal_server_error("failed to encode request id"))?;

    request.extensions_mut().insert(RequestContext {
        request_id,
        user_id: None,
    });
    request
        .headers_mut()
        .insert(header_name.clone(), header_value.clone());

    let mut response = next.run(request).await;
    response.headers_mut().insert(header_name, header_value);

    Ok(response)
}

fn extract_request_id(headers: &HeaderMap, header: &HeaderName) -> Option<String> {
    headers
        .get(header)
        .and_then(|value| value.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_request_id_ignores_blank_values() {
        let header = HeaderName::from_static("x-request-id");
        let mut headers = HeaderMap::new();
        assert_eq!(extract_request_id(&headers, &header), None);

        headers.insert(header.clone(), HeaderValue::from_static("   "));
        assert_eq!(extract_request_id(&headers, &header), None);

        headers.insert(header.clone(), HeaderValue::from_static(" req-42 "));
        assert_eq!(extract_request_id(&headers, &header).as_deref(), Some("req-42"));
    }

    #[test]
    fn require_user_needs_a_caller() {
        let anonymous = RequestContext::default();
        assert_eq!(
            anonymous.require_user().unwrap_err().code(),
            "unauthorized"
        );

        let user = Uuid::new_v4();
        let context = RequestContext {
            request_id: "req-1".into(),
            user_id: Some(user),
        };
        assert_eq!(context.require_user().unwrap(), user);
    }
}
