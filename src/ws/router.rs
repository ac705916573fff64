use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::{Config, DEDUP_WINDOW_MS};
use crate::gql::TwitchApi;
use crate::prediction::PredictionTracker;
use crate::refresh::ChannelRefresher;
use crate::state::ChannelStore;
use crate::types::now_ms;
use crate::ws::messages::{parse_frame, InboundFrame, PubSubEvent, PubSubMessage};

/// What the connection should do after a frame was handled.
#[derive(Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    Continue,
    Pong,
    /// Tear the connection down; its topics are resubscribed elsewhere.
    Reconnect(String),
}

/// Drops a message identical to the one seen just before it within the window.
/// One per connection.
#[derive(Debug)]
pub struct Deduplicator {
    window: Duration,
    last: Option<(String, Instant)>,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self { window: Duration::from_millis(DEDUP_WINDOW_MS), last: None }
    }

    pub fn is_duplicate(&mut self, identity: &str, now: Instant) -> bool {
        let duplicate = matches!(
            &self.last,
            Some((prev, at)) if prev == identity && now.saturating_duration_since(*at) < self.window
        );
        self.last = Some((identity.to_string(), now));
        duplicate
    }
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RouterSettings {
    pub claim_bonus: bool,
    pub follow_raid: bool,
    pub make_predictions: bool,
}

impl RouterSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            claim_bonus: cfg.claim_bonus,
            follow_raid: cfg.follow_raid,
            make_predictions: cfg.make_predictions,
        }
    }
}

/// Applies decoded pub/sub events to channel state and fires collaborator calls.
pub struct EventRouter {
    store: Arc<ChannelStore>,
    api: Arc<dyn TwitchApi>,
    refresher: Arc<ChannelRefresher>,
    predictions: Arc<PredictionTracker>,
    settings: RouterSettings,
}

impl EventRouter {
    pub fn new(
        store: Arc<ChannelStore>,
        api: Arc<dyn TwitchApi>,
        refresher: Arc<ChannelRefresher>,
        predictions: Arc<PredictionTracker>,
        settings: RouterSettings,
    ) -> Self {
        Self { store, api, refresher, predictions, settings }
    }

    pub async fn handle_frame(&self, text: &str, dedup: &mut Deduplicator, now: Instant) -> FrameOutcome {
        match parse_frame(text) {
            Some(InboundFrame::Message(msg)) => {
                if dedup.is_duplicate(&msg.identifier(), now) {
                    debug!(id = %msg.identifier(), "duplicate message dropped");
                } else {
                    self.dispatch(msg).await;
                }
                FrameOutcome::Continue
            }
            Some(InboundFrame::Response { error: Some(e) }) => FrameOutcome::Reconnect(format!("LISTEN rejected: {e}")),
            Some(InboundFrame::Response { error: None }) => FrameOutcome::Continue,
            Some(InboundFrame::Reconnect) => FrameOutcome::Reconnect("server requested reconnect".to_string()),
            Some(InboundFrame::Pong) => FrameOutcome::Pong,
            None => FrameOutcome::Continue,
        }
    }

    async fn dispatch(&self, msg: PubSubMessage) {
        let channel_id = msg.channel_id;
        let Some(login) = self.store.login(&channel_id) else {
            debug!(channel_id, kind = %msg.kind, "message for untracked channel");
            return;
        };

        match msg.event {
            PubSubEvent::PointsEarned { earned, reason_code, balance } => {
                self.store.update(&channel_id, |c| {
                    c.points_balance = balance;
                    c.update_history(&reason_code, earned, 1);
                });
                info!(channel = %login, balance, "+{earned} → {login} - Reason: {reason_code}");
            }
            PubSubEvent::ClaimAvailable { claim_id } => {
                if self.settings.claim_bonus {
                    info!(channel = %login, "claiming bonus points");
                    if let Err(e) = self.api.claim_bonus(&channel_id, &claim_id).await {
                        warn!(channel = %login, "bonus claim failed: {e}");
                    }
                }
            }
            PubSubEvent::StreamUp => {
                self.store.update(&channel_id, |c| c.stream_up_at = Some(now_ms()));
            }
            PubSubEvent::StreamDown => {
                self.store.update(&channel_id, |c| c.set_offline(now_ms()));
            }
            PubSubEvent::Viewcount { .. } => {
                let settled = self
                    .store
                    .update(&channel_id, |c| c.stream_up_elapsed(now_ms()))
                    .unwrap_or(false);
                if settled {
                    let refresher = Arc::clone(&self.refresher);
                    tokio::spawn(async move {
                        if let Err(e) = refresher.check_online(&channel_id).await {
                            warn!(channel = %login, "liveness check failed: {e}");
                        }
                    });
                }
            }
            PubSubEvent::RaidUpdate(raid) => {
                if !self.settings.follow_raid {
                    return;
                }
                let raid_id = raid.raid_id.clone();
                let target = raid.target_login.clone();
                if self.store.update(&channel_id, |c| c.set_raid(raid)) == Some(true) {
                    info!(channel = %login, "Joining raid from {login} to {target}!");
                    if let Err(e) = self.api.join_raid(&raid_id).await {
                        warn!(channel = %login, "join raid failed: {e}");
                    }
                }
            }
            PubSubEvent::PredictionCreated(event) => {
                if self.settings.make_predictions {
                    self.predictions.on_created(&event, msg.timestamp.as_deref());
                }
            }
            PubSubEvent::PredictionUpdated(event) => self.predictions.on_updated(&event),
            PubSubEvent::PredictionMade { event_id } => self.predictions.on_made(&event_id),
            PubSubEvent::PredictionResult { event_id, result } => {
                self.predictions.on_result(&event_id, &result)
            }
            PubSubEvent::Unhandled => {}
        }
    }
}
