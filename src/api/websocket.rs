//! WebSocket handler for display clients

use std::sync::Arc;

use axum::{
    Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
    routing::get,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;

use super::ApiState;
use crate::broadcast::{Audience, ClientMessage, DeviceRegistration};
use crate::dispatch::SpeakRequest;
use crate::llm::ChatMessage;

/// Incoming WebSocket message from a display client
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DisplayIncoming {
    /// Identify the device behind this connection
    Register {
        device_id: String,
        #[serde(default)]
        device_type: Option<String>,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        streaming_mode: bool,
    },
    /// Opt in or out of raw audio chunks
    SetStreamingMode { enabled: bool },
    /// Speak a reply to this conversation
    Speak {
        messages: Vec<ChatMessage>,
        #[serde(default)]
        session_key: Option<String>,
    },
    /// Ping to keep connection alive
    Ping,
}

/// Build display WebSocket router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/display", get(ws_upgrade))
        .with_state(state)
}

/// Handle WebSocket upgrade request
async fn ws_upgrade(State(state): State<Arc<ApiState>>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle WebSocket connection
async fn handle_socket(socket: WebSocket, state: Arc<ApiState>) {
    let (mut sender, mut receiver) = socket.split();
    let router = state.pipeline.router().clone();
    let (connection_id, mut rx) = router.connect().await;

    router
        .send_to(
            &connection_id,
            &ClientMessage::Registered {
                connection_id: connection_id.clone(),
            },
        )
        .await;

    tracing::info!(connection_id = %connection_id, "display connected");

    // Forward broadcast messages to the socket
    let mut send_task = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let recv_state = Arc::clone(&state);
    let recv_connection = connection_id.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    if let Err(e) = handle_message(&text, &recv_state, &recv_connection).await {
                        tracing::warn!(connection_id = %recv_connection, error = %e, "bad display message");
                    }
                }
                Message::Ping(data) => {
                    tracing::trace!(len = data.len(), "received ping");
                }
                Message::Close(_) => {
                    tracing::info!(connection_id = %recv_connection, "display closed by client");
                    break;
                }
                _ => {}
            }
        }
    });

    // Wait for either task to complete
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    router.disconnect(&connection_id).await;
    tracing::info!(connection_id = %connection_id, "display disconnected");
}

/// Handle a single incoming message
async fn handle_message(text: &str, state: &Arc<ApiState>, connection_id: &str) -> crate::Result<()> {
    let incoming: DisplayIncoming = serde_json::from_str(text)?;
    let router = state.pipeline.router();

    match incoming {
        DisplayIncoming::Ping => {
            router.send_to(connection_id, &ClientMessage::Pong).await;
        }
        DisplayIncoming::Register {
            device_id,
            device_type,
            name,
            streaming_mode,
        } => {
            let registration = DeviceRegistration {
                device_id,
                device_type,
                name,
                streaming_mode,
            };
            if router.register_device(connection_id, registration).await.is_none() {
                return Err(crate::Error::Broadcast("connection already closed".to_string()));
            }
        }
        DisplayIncoming::SetStreamingMode { enabled } => {
            if !router.set_streaming_mode(connection_id, enabled).await {
                return Err(crate::Error::Broadcast(
                    "set_streaming_mode before register".to_string(),
                ));
            }
            tracing::debug!(connection_id = %connection_id, enabled, "streaming mode updated");
        }
        DisplayIncoming::Speak { messages, session_key } => {
            if messages.is_empty() {
                return Err(crate::Error::Broadcast("speak without messages".to_string()));
            }

            // other displays show what was said on this one
            if let Some(user) = messages.iter().rev().find(|m| m.role == "user") {
                let transcript = ClientMessage::UserTranscript {
                    text: user.content.clone(),
                };
                router.send(Audience::AllExcept(connection_id), &transcript, None).await;
            }

            let device = router.device_for_connection(connection_id).await;
            let request = SpeakRequest {
                messages,
                session_key: session_key.unwrap_or_else(|| connection_id.to_string()),
                source_device: device.map(|d| d.device_id),
            };

            // replies run on their own so pings keep flowing
            let pipeline = state.pipeline.clone();
            tokio::spawn(async move {
                pipeline.respond(request).await;
            });
        }
    }

    Ok(())
}
