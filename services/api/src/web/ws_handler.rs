//! services/api/src/web/ws_handler.rs
//!
//! The WebSocket endpoint for realtime story-completion notifications. A
//! client subscribes once, then receives a message for every terminal
//! transition on its stories; if nothing arrives within the completion
//! window it gets a timeout nudge and should fall back to fetching the
//! story state directly.

use crate::web::{
    protocol::{ClientMessage, ServerMessage},
    state::AppState,
};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
    Extension,
};
use futures::{
    stream::{SplitSink, StreamExt},
    SinkExt,
};
use std::sync::Arc;
use storyweaver_core::domain::CompletionEvent;
use storyweaver_core::ports::CompletionStream;
use tokio::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

/// The handler for upgrading HTTP requests to WebSocket connections.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, app_state, user_id))
}

async fn handle_socket(socket: WebSocket, app_state: Arc<AppState>, user_id: Uuid) {
    info!("New WebSocket connection established for user: {}", user_id);
    let (mut sender, mut receiver) = socket.split();

    // --- 1. Subscription Phase ---
    let story_filter: Option<Uuid> = match receiver.next().await {
        Some(Ok(Message::Text(json))) => match serde_json::from_str::<ClientMessage>(&json) {
            Ok(ClientMessage::Subscribe { story_id }) => story_id,
            Err(e) => {
                warn!("First message was not a valid Subscribe message: {}", e);
                let _ = send_msg(
                    &mut sender,
                    &ServerMessage::Error {
                        message: "Expected a subscribe message".to_string(),
                    },
                )
                .await;
                return;
            }
        },
        _ => {
            info!("Client disconnected before subscribing.");
            return;
        }
    };

    let mut events = match app_state.stories.subscribe(user_id).await {
        Ok(events) => events,
        Err(e) => {
            error!("Failed to open completion stream: {:?}", e);
            let _ = send_msg(
                &mut sender,
                &ServerMessage::Error {
                    message: "Failed to subscribe".to_string(),
                },
            )
            .await;
            return;
        }
    };

    if !send_msg(&mut sender, &ServerMessage::Subscribed).await {
        return;
    }

    // --- 2. Event Loop ---
    // The deadline is held across iterations: only a delivered event or a
    // timeout nudge re-arms it. Filtered events and incoming client frames
    // must not keep a quiet connection alive forever.
    let window = app_state.config.completion_timeout;
    let mut deadline = Instant::now() + window;
    loop {
        tokio::select! {
            outcome = await_completion(&mut events, deadline, story_filter) => match outcome {
                WaitOutcome::Event(event) => {
                    let msg = ServerMessage::StoryCompleted {
                        story_id: event.story_id,
                        status: event.status.to_string(),
                        title: event.title,
                        timestamp: event.timestamp,
                        source: event.source.as_str().to_string(),
                    };
                    if !send_msg(&mut sender, &msg).await {
                        break;
                    }
                    deadline = Instant::now() + window;
                }
                WaitOutcome::Closed => break,
                WaitOutcome::TimedOut => {
                    // The window elapsed with no event; the client should poll
                    // once and decide whether to keep waiting.
                    if !send_msg(&mut sender, &ServerMessage::Timeout).await {
                        break;
                    }
                    deadline = Instant::now() + window;
                }
            },
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => {
                    info!("Client closed the notification socket.");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("WebSocket receive error: {}", e);
                    break;
                }
            }
        }
    }

    info!("WebSocket connection closed for user: {}", user_id);
}

enum WaitOutcome {
    Event(CompletionEvent),
    TimedOut,
    Closed,
}

/// Waits for the next event that passes the story filter, or for the
/// deadline. Filtered events are consumed without extending the wait.
async fn await_completion(
    events: &mut CompletionStream,
    deadline: Instant,
    filter: Option<Uuid>,
) -> WaitOutcome {
    loop {
        match tokio::time::timeout_at(deadline, events.next()).await {
            Ok(Some(event)) => {
                if filter.is_some_and(|wanted| wanted != event.story_id) {
                    continue;
                }
                return WaitOutcome::Event(event);
            }
            Ok(None) => return WaitOutcome::Closed,
            Err(_) => return WaitOutcome::TimedOut,
        }
    }
}

/// Serializes and sends one server message; false means the socket is gone.
async fn send_msg(sender: &mut SplitSink<WebSocket, Message>, msg: &ServerMessage) -> bool {
    match serde_json::to_string(msg) {
        Ok(json) => sender.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            error!("Failed to serialize server message: {}", e);
            false
        }
    }
}
