//! Websocket live stream.
//!
//! Each connection gets a one-shot `connected` notice, then every journal
//! event appended after it joined, in order. A subscriber that falls behind
//! the bounded ring receives a `lagged` notice with the skipped count and
//! resumes from the oldest retained event; the journal is never blocked.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use tokio::sync::broadcast::error::RecvError;

use crate::control::ControlPlane;
use crate::events::StreamMessage;

pub async fn upgrade(State(control): State<Arc<ControlPlane>>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| stream_events(socket, control))
}

async fn stream_events(mut socket: WebSocket, control: Arc<ControlPlane>) {
    let mut events = control.broadcaster().subscribe();

    if send(&mut socket, &StreamMessage::connected()).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            received = events.recv() => {
                let message = match received {
                    Ok(event) => StreamMessage::Events { event },
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!("websocket subscriber lagged by {skipped} events");
                        StreamMessage::lagged(skipped)
                    }
                    Err(RecvError::Closed) => return,
                };
                if send(&mut socket, &message).await.is_err() {
                    return;
                }
            }
            incoming = socket.recv() => {
                // Clients only listen; any close or error tears down the
                // subscription.
                match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return,
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}

async fn send(socket: &mut WebSocket, message: &StreamMessage) -> Result<(), axum::Error> {
    let json = serde_json::to_string(message).unwrap_or_else(|_| "{}".to_string());
    socket.send(Message::Text(json.into())).await
}
