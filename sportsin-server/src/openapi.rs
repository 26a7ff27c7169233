#![allow(clippy::needless_for_each)] // Derive macro emits a for_each internally

use shared::models::{Message, SendMessageRequest, UnreadCountResponse, UnreadSenderCount};
use utoipa::OpenApi;

use crate::http::problem::ProblemDetails;

/// `OpenAPI` description of the REST surface.
#[derive(Debug, OpenApi)]
#[openapi(
    info(
        title = "SportsIn Messaging API",
        version = "1.0.0",
        description = "Direct messages between SportsIn users. Live delivery uses the WebSocket channel at /api/messages/ws."
    ),
    paths(
        crate::handlers::messages::send_message,
        crate::handlers::messages::fetch_thread,
        crate::handlers::messages::unread,
    ),
    components(
        schemas(
            Message,
            SendMessageRequest,
            UnreadCountResponse,
            UnreadSenderCount,
            ProblemDetails,
        )
    ),
    tags(
        (name = "Messages", description = "Direct messaging endpoints")
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_messaging_paths() {
        let doc = ApiDoc::openapi();
        let paths: Vec<&String> = doc.paths.paths.keys().collect();

        assert!(paths.iter().any(|path| *path == "/api/messages"));
        assert!(paths.iter().any(|path| *path == "/api/messages/{user_id}"));
        assert!(paths.iter().any(|path| *path == "/api/messages/unread"));
        assert!(doc.to_yaml().is_ok());
    }
}
