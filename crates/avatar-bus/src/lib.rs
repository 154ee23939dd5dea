//! Broadcast sink for client-facing events.
//!
//! Every event serializes to the JSON object the avatar client consumes,
//! e.g. `{"action": "play", "animation": "wave"}`.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum AvatarEvent {
    Play {
        animation: String,
    },
    Background {
        name: String,
    },
    ToolCall {
        name: String,
        arguments: serde_json::Value,
    },
    Heartbeat {
        status: HeartbeatStatus,
    },
    Chat {
        content: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeartbeatStatus {
    Start,
    End,
}

impl AvatarEvent {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub enum Topic {
    Play,
    Background,
    ToolCall,
    Heartbeat,
    Chat,
}

impl Topic {
    pub fn from_event(event: &AvatarEvent) -> Self {
        match event {
            AvatarEvent::Play { .. } => Topic::Play,
            AvatarEvent::Background { .. } => Topic::Background,
            AvatarEvent::ToolCall { .. } => Topic::ToolCall,
            AvatarEvent::Heartbeat { .. } => Topic::Heartbeat,
            AvatarEvent::Chat { .. } => Topic::Chat,
        }
    }

    pub fn all() -> [Topic; 5] {
        [
            Topic::Play,
            Topic::Background,
            Topic::ToolCall,
            Topic::Heartbeat,
            Topic::Chat,
        ]
    }
}

type Subscriber = mpsc::Sender<AvatarEvent>;
type SubscriberMap = Arc<RwLock<HashMap<Topic, Vec<Subscriber>>>>;

pub struct EventBus {
    subscribers: SubscriberMap,
    capacity: usize,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            capacity,
        }
    }

    pub async fn subscribe(&self, topic: Topic) -> mpsc::Receiver<AvatarEvent> {
        let (tx, rx) = mpsc::channel(self.capacity);
        let mut subs = self.subscribers.write().await;
        subs.entry(topic).or_default().push(tx);
        rx
    }

    /// One receiver for every topic, in publish order.
    pub async fn subscribe_all(&self) -> mpsc::Receiver<AvatarEvent> {
        let (tx, rx) = mpsc::channel(self.capacity);
        let mut subs = self.subscribers.write().await;
        for topic in Topic::all() {
            subs.entry(topic).or_default().push(tx.clone());
        }
        rx
    }

    pub async fn publish(&self, event: AvatarEvent) -> Result<()> {
        publish_to(&self.subscribers, event).await
    }

    pub fn publisher(&self) -> BusPublisher {
        BusPublisher {
            subscribers: self.subscribers.clone(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[derive(Clone)]
pub struct BusPublisher {
    subscribers: SubscriberMap,
}

impl BusPublisher {
    pub async fn publish(&self, event: AvatarEvent) -> Result<()> {
        publish_to(&self.subscribers, event).await
    }
}

async fn publish_to(subscribers: &SubscriberMap, event: AvatarEvent) -> Result<()> {
    let topic = Topic::from_event(&event);
    let mut subs = subscribers.write().await;
    if let Some(list) = subs.get_mut(&topic) {
        // Disconnected clients are dropped, full ones just miss the event.
        list.retain(|tx| !tx.is_closed());
        for tx in list.iter() {
            if tx.try_send(event.clone()).is_err() {
                tracing::debug!(?topic, "subscriber lagging, event dropped");
            }
        }
    }
    Ok(())
}
