use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{MAX_WATCHED_CHANNELS, WATCH_ROUND_SECS, WATCH_SLEEP_CHUNKS};
use crate::gql::TwitchApi;
use crate::refresh::ChannelRefresher;
use crate::state::{Channel, ChannelStore};
use crate::types::{now_ms, Priority};

/// Sends minute-watched heartbeats for up to two channels at a time.
pub struct MinuteWatcher {
    store: Arc<ChannelStore>,
    api: Arc<dyn TwitchApi>,
    refresher: Arc<ChannelRefresher>,
    priority: Vec<Priority>,
    watch_streak: bool,
    shutdown: CancellationToken,
}

impl MinuteWatcher {
    pub fn new(
        store: Arc<ChannelStore>,
        api: Arc<dyn TwitchApi>,
        refresher: Arc<ChannelRefresher>,
        priority: Vec<Priority>,
        watch_streak: bool,
        shutdown: CancellationToken,
    ) -> Self {
        Self { store, api, refresher, priority, watch_streak, shutdown }
    }

    pub async fn run(self) {
        let round = Duration::from_secs(WATCH_ROUND_SECS);

        while !self.shutdown.is_cancelled() {
            self.refresh_stale().await;

            let selected = self.select(&self.store.snapshot(), now_ms());
            if selected.is_empty() {
                self.sleep_chunked(round).await;
                continue;
            }

            debug!(channels = ?selected, "watching");
            let slot = round / selected.len() as u32;
            for channel_id in &selected {
                if self.shutdown.is_cancelled() {
                    break;
                }
                self.send_heartbeat(channel_id).await;
                self.sleep_chunked(slot).await;
            }
        }
        info!("minute watcher stopped");
    }

    /// Candidates with outdated stream info get a liveness re-check before selection.
    async fn refresh_stale(&self) {
        let now = now_ms();
        let stale: Vec<String> = self
            .store
            .snapshot()
            .into_iter()
            .filter(|c| c.is_watch_candidate(now) && c.stream_info_stale(now))
            .map(|c| c.id)
            .collect();

        for channel_id in stale {
            if let Err(e) = self.refresher.check_online(&channel_id).await {
                warn!(channel_id, "liveness re-check failed: {e}");
            }
        }
    }

    /// Picks at most two channels, walking the priority list in order.
    pub fn select(&self, channels: &[Channel], now: u64) -> Vec<String> {
        let candidates: Vec<&Channel> = channels
            .iter()
            .filter(|c| c.is_watch_candidate(now) && c.heartbeat_target().is_some())
            .collect();

        let mut selected: Vec<String> = Vec::with_capacity(MAX_WATCHED_CHANNELS);
        for priority in &self.priority {
            if selected.len() >= MAX_WATCHED_CHANNELS {
                break;
            }

            let mut ranked: Vec<&Channel> = match priority {
                Priority::Streak if self.watch_streak => candidates
                    .iter()
                    .copied()
                    .filter(|c| c.needs_watch_streak(now))
                    .collect(),
                Priority::Streak => continue,
                Priority::Order => candidates.clone(),
                Priority::PointsAscending | Priority::PointsDescending => {
                    let mut by_points = candidates.clone();
                    by_points.sort_by_key(|c| c.points_balance);
                    if *priority == Priority::PointsDescending {
                        by_points.reverse();
                    }
                    by_points
                }
            };

            ranked.retain(|c| !selected.contains(&c.id));
            let room = MAX_WATCHED_CHANNELS - selected.len();
            selected.extend(ranked.into_iter().take(room).map(|c| c.id.clone()));
        }
        selected
    }

    /// One heartbeat; minutes advance only when the side channel accepted it.
    pub async fn send_heartbeat(&self, channel_id: &str) {
        let Some(channel) = self.store.get(channel_id) else {
            return;
        };
        let Some((url, payload)) = channel.heartbeat_target() else {
            debug!(channel = %channel.login, "no heartbeat target yet");
            return;
        };

        match self.api.send_heartbeat(&url, &payload).await {
            Ok(true) => {
                self.store.update(channel_id, |c| c.record_heartbeat(now_ms()));
                debug!(channel = %channel.login, "minute watched");
            }
            Ok(false) => debug!(channel = %channel.login, "heartbeat not accepted"),
            Err(e) => warn!(channel = %channel.login, "heartbeat failed: {e}"),
        }
    }

    async fn sleep_chunked(&self, total: Duration) {
        let chunk = total / WATCH_SLEEP_CHUNKS;
        for _ in 0..WATCH_SLEEP_CHUNKS {
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = tokio::time::sleep(chunk) => {}
            }
        }
    }
}
