//! services/api/src/web/protocol.rs
//!
//! Defines the WebSocket message protocol between the browser client and the
//! API server for realtime story-completion notifications.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

//=========================================================================================
// Messages Sent FROM the Client (Browser) TO the Server
//=========================================================================================

/// Represents the structured text messages a client can send to the server.
#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Starts listening for completions. Must be the first message on the
    /// connection. With a `story_id` the server only forwards events for that
    /// story; without one, every completion for the user is forwarded.
    Subscribe { story_id: Option<Uuid> },
}

//=========================================================================================
// Messages Sent FROM the Server TO the Client (Browser)
//=========================================================================================

/// Represents the structured text messages the server can send to the client.
#[derive(Serialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Confirms the subscription is active.
    Subscribed,

    /// A story reached a terminal state. `status` is `completed` or `error`;
    /// `source` says what ran the generation (generation, regeneration,
    /// recovery).
    StoryCompleted {
        story_id: Uuid,
        status: String,
        title: String,
        timestamp: DateTime<Utc>,
        source: String,
    },

    /// No event arrived within the completion window. The client should fall
    /// back to fetching the story state directly; the subscription stays open.
    Timeout,

    /// Reports a fatal error to the client, which should display an error message.
    Error { message: String },
}
