use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::{AppError, Result};
use crate::gql::TwitchApi;
use crate::state::ChannelStore;
use crate::types::{now_ms, Liveness};

/// Pulls liveness and point balances from the API into the channel store.
pub struct ChannelRefresher {
    store: Arc<ChannelStore>,
    api: Arc<dyn TwitchApi>,
}

impl ChannelRefresher {
    pub fn new(store: Arc<ChannelStore>, api: Arc<dyn TwitchApi>) -> Self {
        Self { store, api }
    }

    /// Re-reads liveness unless the channel went offline less than a minute ago
    /// or its stream info is still inside the refresh window. The heartbeat
    /// endpoint is only resolved when a stream is first seen.
    pub async fn check_online(&self, channel_id: &str) -> Result<()> {
        let Some(channel) = self.store.get(channel_id) else {
            return Ok(());
        };
        let now = now_ms();
        if channel.liveness_check_suppressed(now) {
            debug!(channel = %channel.login, "liveness check suppressed after going offline");
            return Ok(());
        }
        if !channel.stream_refresh_due(now) {
            debug!(channel = %channel.login, "stream info still fresh");
            return Ok(());
        }

        let liveness = match self.api.fetch_liveness(&channel.id, &channel.login).await {
            Ok(Liveness::Online(mut info)) => {
                info.spade_url = match channel.cached_spade_url() {
                    Some(url) => Some(url),
                    None => Some(self.api.fetch_spade_url(&channel.login).await?),
                };
                Liveness::Online(info)
            }
            Ok(Liveness::Offline) | Err(AppError::StreamOffline(_)) => Liveness::Offline,
            Err(e) => return Err(e),
        };

        self.store.update(channel_id, |c| match liveness {
            Liveness::Online(info) => {
                debug!(
                    channel = %c.login,
                    broadcast_id = %info.broadcast_id,
                    title = %info.title,
                    game = info.game.as_deref().unwrap_or("-"),
                    viewers = info.viewers,
                    "stream info updated"
                );
                c.stream = Some(info);
                c.set_online(now);
            }
            Liveness::Offline => {
                c.set_offline(now);
            }
        });
        Ok(())
    }

    /// Loads the balance and claims a pending bonus when `claim` is set.
    pub async fn load_channel_points(&self, channel_id: &str, claim: bool) -> Result<()> {
        let Some(login) = self.store.login(channel_id) else {
            return Ok(());
        };
        let state = self.api.fetch_channel_state(&login).await?;
        self.store.update(channel_id, |c| c.points_balance = state.balance);
        info!(channel = %login, balance = state.balance, "channel points loaded");

        if let (true, Some(claim_id)) = (claim, state.pending_claim_id) {
            info!(channel = %login, "claiming bonus points");
            if let Err(e) = self.api.claim_bonus(channel_id, &claim_id).await {
                warn!(channel = %login, "bonus claim failed: {e}");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Channel;
    use crate::testing::{live_stream, ApiCall, FakeApi};
    use crate::types::ChannelPointsState;

    fn setup() -> (Arc<FakeApi>, Arc<ChannelStore>, ChannelRefresher) {
        let api = FakeApi::new();
        let store = ChannelStore::new(vec![Channel::new("1", "alpha")]);
        let refresher = ChannelRefresher::new(store.clone(), api.clone());
        (api, store, refresher)
    }

    #[tokio::test]
    async fn online_liveness_stores_stream_info() {
        let (api, store, refresher) = setup();
        api.set_liveness("1", Liveness::Online(live_stream(now_ms())));

        refresher.check_online("1").await.unwrap();

        let c = store.get("1").unwrap();
        assert!(c.is_online);
        assert!(c.heartbeat_target().is_some());
    }

    #[tokio::test]
    async fn spade_url_is_resolved_once_per_stream() {
        let (api, store, refresher) = setup();
        api.set_liveness("1", Liveness::Online(live_stream(now_ms())));

        refresher.check_online("1").await.unwrap();
        // Age the stream info past the refresh window.
        store.update("1", |c| {
            if let Some(s) = c.stream.as_mut() {
                s.updated_at_ms -= 121_000;
            }
        });
        refresher.check_online("1").await.unwrap();

        assert_eq!(api.count(|c| matches!(c, ApiCall::Liveness(_))), 2);
        assert_eq!(api.count(|c| matches!(c, ApiCall::SpadeUrl(_))), 1);
        assert!(store.get("1").unwrap().heartbeat_target().is_some());
    }

    #[tokio::test]
    async fn fresh_stream_info_skips_the_liveness_call() {
        let (api, store, refresher) = setup();
        store.update("1", |c| {
            c.stream = Some(live_stream(now_ms()));
            c.set_online(now_ms());
        });

        for _ in 0..5 {
            refresher.check_online("1").await.unwrap();
        }

        assert_eq!(api.count(|c| matches!(c, ApiCall::Liveness(_))), 0);
        assert_eq!(api.count(|c| matches!(c, ApiCall::SpadeUrl(_))), 0);
    }

    #[tokio::test]
    async fn recheck_is_suppressed_right_after_going_offline() {
        let (api, store, refresher) = setup();
        store.update("1", |c| {
            c.set_online(now_ms());
            c.set_offline(now_ms());
        });
        api.set_liveness("1", Liveness::Online(live_stream(now_ms())));

        refresher.check_online("1").await.unwrap();

        assert!(!store.get("1").unwrap().is_online);
        assert_eq!(api.count(|c| matches!(c, ApiCall::Liveness(_))), 0);
    }

    #[tokio::test]
    async fn loads_balance_and_claims_bonus() {
        let (api, store, refresher) = setup();
        api.set_state(
            "alpha",
            ChannelPointsState { balance: 900, pending_claim_id: Some("claim-1".to_string()) },
        );

        refresher.load_channel_points("1", true).await.unwrap();

        assert_eq!(store.balance("1"), Some(900));
        assert!(api.calls().contains(&ApiCall::Claim {
            channel_id: "1".to_string(),
            claim_id: "claim-1".to_string(),
        }));
    }

    #[tokio::test]
    async fn bonus_is_left_alone_when_claiming_disabled() {
        let (api, _store, refresher) = setup();
        api.set_state(
            "alpha",
            ChannelPointsState { balance: 5, pending_claim_id: Some("claim-1".to_string()) },
        );

        refresher.load_channel_points("1", false).await.unwrap();
        assert_eq!(api.count(|c| matches!(c, ApiCall::Claim { .. })), 0);
    }
}
