//! Chat WebSocket handler.
//!
//! Each socket is split into a writer task draining the connection's
//! outbound queue and a reader loop dispatching inbound events to the
//! coordinator.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::chat::{ClientEvent, ConnectionId, Flow, ServerEvent, SessionCoordinator};
use crate::web::handlers::AppState;
use crate::RelayError;

/// How long queued events may take to flush after the session ends.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// WebSocket chat handler.
///
/// GET /ws
pub async fn chat_ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    let coordinator = state.coordinator.clone();
    ws.max_message_size(state.max_message_size)
        .on_upgrade(move |socket| handle_socket(socket, coordinator))
}

/// Handle a WebSocket connection.
async fn handle_socket(socket: WebSocket, coordinator: Arc<SessionCoordinator>) {
    let conn = ConnectionId::new();
    let outbound = coordinator.open(conn).await;
    tracing::debug!("WebSocket session started: {}", conn);

    let (ws_sender, mut ws_receiver) = socket.split();
    let mut writer = tokio::spawn(write_events(ws_sender, outbound));
    let mut writer_done = false;

    loop {
        tokio::select! {
            msg = ws_receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let flow = match serde_json::from_str::<ClientEvent>(&text) {
                            Ok(event) => coordinator.dispatch(conn, event).await,
                            Err(e) => {
                                tracing::debug!("Failed to parse client event: {}", e);
                                let err = RelayError::InvalidPayload(format!("malformed event: {e}"));
                                coordinator.reject(conn, &err).await
                            }
                        };
                        if flow == Flow::Close {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::debug!("WebSocket closed by client: {}", conn);
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!("WebSocket error: {}", e);
                        break;
                    }
                }
            }
            _ = &mut writer => {
                writer_done = true;
                break;
            }
        }
    }

    if let Err(e) = coordinator.disconnect(conn).await {
        tracing::error!("Failed to clean up connection {}: {}", conn, e);
        // The session stays for a later retry; only the socket's queue goes.
        coordinator.fanout().detach(conn).await;
    }

    // The queue is closed by `disconnect`, so the writer flushes what is left
    // (typically a final error event) and then sends the close frame.
    if !writer_done && tokio::time::timeout(DRAIN_TIMEOUT, writer).await.is_err() {
        tracing::debug!("Timed out flushing events for {}", conn);
    }
    tracing::debug!("WebSocket session ended: {}", conn);
}

/// Forward queued events to the socket until the queue closes.
async fn write_events(
    mut ws_sender: futures::stream::SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<ServerEvent>,
) {
    while let Some(event) = outbound.recv().await {
        let json = match serde_json::to_string(&event) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!("Failed to serialize event: {}", e);
                continue;
            }
        };
        if ws_sender.send(Message::Text(json)).await.is_err() {
            return;
        }
    }
    let _ = ws_sender.send(Message::Close(None)).await;
}
