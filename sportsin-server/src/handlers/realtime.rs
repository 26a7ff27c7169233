use std::{sync::Arc, time::Duration};

use axum::{
    body::Bytes,
    extract::{
        Extension, State,
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    app_state::AppState, http::error::AppResult, middleware::request_context::RequestContext,
    services::RealtimeSession,
};

/// Upgrades an authenticated request to the live messaging channel.
///
/// # Errors
///
/// Returns `401` when the request carries no resolved caller.
pub async fn messages_ws(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<RequestContext>,
    ws: WebSocketUpgrade,
) -> AppResult<Response> {
    let caller = context.require_user()?;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, caller)))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, caller: Uuid) {
    info!(%caller, "realtime socket opened");

    let (mut sink, mut stream) = socket.split();
    let (mut session, mut outbound) = RealtimeSession::open(caller, state.messaging.clone());
    let mut heartbeat = tokio::time::interval(Duration::from_secs(
        state.config.realtime.heartbeat_seconds.max(5),
    ));
    // The first tick completes immediately.
    heartbeat.tick().await;

    loop {
        tokio::select! {
            Some(event) = outbound.recv() => {
                let frame = match serde_json::to_string(&event) {
                    Ok(frame) => frame,
                    Err(err) => {
                        warn!(error = %err, event = event.name(), "failed to encode realtime event");
                        continue;
                    }
                };
                if sink.send(WsMessage::Text(frame.into())).await.is_err() {
                    break;
                }
            }
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(WsMessage::Text(text))) => session.handle_text(text.as_str()).await,
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        debug!(%caller, error = %err, "realtime socket error");
                        break;
                    }
                }
            }
            () = state.shutdown.cancelled() => {
                let _ = sink.send(WsMessage::Close(None)).await;
                break;
            }
            _ = heartbeat.tick() => {
                if sink.send(WsMessage::Ping(Bytes::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    session.close().await;
    info!(%caller, "realtime socket closed");
}
