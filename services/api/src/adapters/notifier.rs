//! services/api/src/adapters/notifier.rs
//!
//! In-process implementation of the `CompletionNotifier` port: one broadcast
//! channel per user, created lazily on first subscribe and torn down when the
//! last subscriber is gone.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use storyweaver_core::domain::CompletionEvent;
use storyweaver_core::ports::{CompletionNotifier, CompletionStream, PortResult};
use tokio::sync::{broadcast, RwLock};
use tracing::debug;
use uuid::Uuid;

/// Capacity per user channel; a lagging subscriber skips old events rather
/// than blocking the publisher.
const CHANNEL_CAPACITY: usize = 32;

/// Routes completion events to the exact user session that initiated
/// generation, without that client polling.
#[derive(Clone, Default)]
pub struct ChannelNotifier {
    channels: Arc<RwLock<HashMap<Uuid, broadcast::Sender<CompletionEvent>>>>,
}

impl ChannelNotifier {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CompletionNotifier for ChannelNotifier {
    async fn publish(&self, event: CompletionEvent) -> PortResult<()> {
        let mut channels = self.channels.write().await;
        if let Some(sender) = channels.get(&event.user_id) {
            if sender.receiver_count() == 0 {
                // Nobody is listening anymore; drop the channel and the event.
                channels.remove(&event.user_id);
                debug!(user_id = %event.user_id, "Dropped completion event, no subscribers");
                return Ok(());
            }
            let _ = sender.send(event);
        } else {
            debug!(user_id = %event.user_id, "No channel for user, event dropped");
        }
        Ok(())
    }

    async fn subscribe(&self, user_id: Uuid) -> PortResult<CompletionStream> {
        let mut receiver = {
            let mut channels = self.channels.write().await;
            channels
                .entry(user_id)
                .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
                .subscribe()
        };

        let stream = async_stream::stream! {
            loop {
                match receiver.recv().await {
                    Ok(event) => yield event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "Completion subscriber lagged, skipping events");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        };
        Ok(Box::pin(stream))
    }
}
