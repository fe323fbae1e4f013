use crate::api::rest::{AppState, Owner};
use crate::{HubHandle, Session};
use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::State,
    response::Response,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use taskhub_core::UserId;
use tracing::debug;

/// Upgrade a notification connection. The session binds to the resolved
/// owner id for its whole lifetime.
pub async fn ws_handler(
    State(state): State<Arc<AppState>>,
    owner: Owner,
    ws: WebSocketUpgrade,
) -> Response {
    let hub = state.hub.clone();
    let buffer = state.session_buffer;
    ws.on_upgrade(move |socket| handle_socket(socket, hub, owner.0, buffer))
}

/// Per-connection loops: a writer draining the session's outbound buffer
/// onto the socket, and a reader consuming inbound frames. They run
/// concurrently and synchronize only through the buffer; the hub closing the
/// buffer is the writer's sole cancellation signal, while the reader stops
/// on transport closure.
async fn handle_socket(socket: WebSocket, hub: HubHandle, user_id: UserId, buffer: usize) {
    let (mut sink, mut stream) = socket.split();
    let (session, mut events) = Session::channel(user_id, buffer);
    let session_id = session.id();
    hub.register(session);
    debug!(session = %session_id, user = user_id, "notification session opened");

    let writer = tokio::spawn(async move {
        while let Some(payload) = events.recv().await {
            if sink.send(Message::Text(payload)).await.is_err() {
                break;
            }
        }
    });

    // Clients push nothing we act on; the read half exists to observe
    // disconnection.
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }

    hub.unregister(session_id);
    let _ = writer.await;
    debug!(session = %session_id, "notification session closed");
}
