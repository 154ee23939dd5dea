use std::sync::Arc;
use std::time::Duration;

use avatar_bus::{AvatarEvent, BusPublisher, HeartbeatStatus};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::HeartbeatConfig;
use crate::engine::ConversationEngine;

/// Idle tracking shared between the scheduler and the foreground chat path.
#[derive(Debug, Default)]
struct Activity {
    last_user_interaction: Option<Instant>,
    waiting_for_user: bool,
}

#[derive(Clone, Default)]
pub struct ActivityTracker {
    inner: Arc<Mutex<Activity>>,
}

impl ActivityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset the idle clock and allow the next heartbeat to speak again.
    pub async fn record_user_interaction(&self) {
        let mut activity = self.inner.lock().await;
        activity.last_user_interaction = Some(Instant::now());
        activity.waiting_for_user = false;
    }

    pub async fn is_waiting_for_user(&self) -> bool {
        self.inner.lock().await.waiting_for_user
    }

    async fn set_waiting_for_user(&self) {
        self.inner.lock().await.waiting_for_user = true;
    }

    /// No interaction yet counts as idle forever.
    async fn is_idle(&self, threshold: Duration) -> bool {
        match self.inner.lock().await.last_user_interaction {
            None => true,
            Some(at) => at.elapsed() >= threshold,
        }
    }
}

pub struct HeartbeatScheduler {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl HeartbeatScheduler {
    /// `None` when heartbeats are disabled.
    pub fn start(
        config: &HeartbeatConfig,
        engine: Arc<ConversationEngine>,
        activity: ActivityTracker,
        publisher: BusPublisher,
    ) -> Option<Self> {
        if !config.enabled {
            return None;
        }
        let interval = Duration::from_secs(config.interval_secs.max(1));
        let idle_threshold = Duration::from_secs(config.idle_threshold_secs);
        info!(
            interval_secs = interval.as_secs(),
            idle_threshold_secs = idle_threshold.as_secs(),
            "Heartbeat enabled"
        );

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                if activity.is_waiting_for_user().await {
                    debug!("heartbeat skipped: waiting for user");
                    continue;
                }
                if !activity.is_idle(idle_threshold).await {
                    debug!("heartbeat skipped: user active");
                    continue;
                }
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = run_heartbeat(&engine, &activity, &publisher) => {}
                }
            }
            debug!("heartbeat loop stopped");
        });

        Some(Self { cancel, handle })
    }

    /// Cancel the loop and wait for it to finish.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            warn!("heartbeat task ended abnormally: {e}");
        }
    }
}

async fn publish(publisher: &BusPublisher, event: AvatarEvent) {
    if let Err(e) = publisher.publish(event).await {
        warn!("failed to publish heartbeat event: {e}");
    }
}

/// One heartbeat: bracket with start/end events, then deliver what was sent.
pub async fn run_heartbeat(
    engine: &ConversationEngine,
    activity: &ActivityTracker,
    publisher: &BusPublisher,
) {
    publish(
        publisher,
        AvatarEvent::Heartbeat {
            status: HeartbeatStatus::Start,
        },
    )
    .await;
    let sent = engine.heartbeat().await;
    publish(
        publisher,
        AvatarEvent::Heartbeat {
            status: HeartbeatStatus::End,
        },
    )
    .await;

    let Some(sent) = sent else {
        return;
    };
    for text in sent {
        info!(chars = text.len(), "Heartbeat message");
        publish(publisher, AvatarEvent::Chat { content: text }).await;
    }
    activity.set_waiting_for_user().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn idle_tracking() {
        let activity = ActivityTracker::new();
        assert!(activity.is_idle(Duration::from_secs(60)).await);

        activity.record_user_interaction().await;
        assert!(!activity.is_idle(Duration::from_secs(60)).await);
        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(activity.is_idle(Duration::from_secs(60)).await);

        activity.set_waiting_for_user().await;
        assert!(activity.is_waiting_for_user().await);
        activity.record_user_interaction().await;
        assert!(!activity.is_waiting_for_user().await);
    }
}
