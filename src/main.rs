mod bet;
mod config;
mod error;
mod gql;
mod prediction;
mod refresh;
mod state;
mod types;
mod watcher;
mod ws;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::bet::BetEngine;
use crate::config::Config;
use crate::error::{AppError, Result};
use crate::gql::{GqlClient, TwitchApi};
use crate::prediction::PredictionTracker;
use crate::refresh::ChannelRefresher;
use crate::state::{Channel, ChannelStore};
use crate::watcher::MinuteWatcher;
use crate::ws::{startup_topics, EventRouter, RouterSettings, WsPool};

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    let api: Arc<dyn TwitchApi> = Arc::new(GqlClient::new(&cfg)?);

    // --- Resolve channel logins ---
    let channels = resolve_channels(api.as_ref(), &cfg.channels).await;
    if channels.is_empty() {
        return Err(AppError::Config("none of the configured channels exist".to_string()));
    }
    let store = ChannelStore::new(channels);
    info!("Loaded {} channel(s): {}", store.len(), cfg.channels.join(", "));

    // --- Startup refresh: balances, bonus claims, liveness ---
    let refresher = Arc::new(ChannelRefresher::new(Arc::clone(&store), Arc::clone(&api)));
    for channel_id in store.ids() {
        if let Err(e) = refresher.load_channel_points(channel_id, cfg.claim_bonus).await {
            warn!(channel_id, "loading channel points failed: {e}");
        }
        if let Err(e) = refresher.check_online(channel_id).await {
            warn!(channel_id, "liveness check failed: {e}");
        }
    }
    info!("{} of {} channel(s) online", store.online_count(), store.len());

    let shutdown = CancellationToken::new();

    // --- Prediction tracker + event router ---
    info!("Bet strategy: {} ({:?})", cfg.bet.strategy, cfg.bet);
    let predictions = PredictionTracker::new(
        Arc::clone(&store),
        Arc::clone(&api),
        BetEngine::new(cfg.bet.clone()),
        shutdown.clone(),
    );
    let router = Arc::new(EventRouter::new(
        Arc::clone(&store),
        Arc::clone(&api),
        Arc::clone(&refresher),
        predictions,
        RouterSettings::from_config(&cfg),
    ));

    // --- Minute watcher ---
    let watcher = MinuteWatcher::new(
        Arc::clone(&store),
        Arc::clone(&api),
        Arc::clone(&refresher),
        cfg.priority.clone(),
        cfg.watch_streak,
        shutdown.clone(),
    );
    let watcher_task = tokio::spawn(watcher.run());

    // --- Pub/sub pool ---
    let pool = WsPool::new(cfg.ws_url.clone(), cfg.auth_token.clone(), router, shutdown.clone());
    let topics = startup_topics(&cfg.user_id, store.ids(), cfg.follow_raid, cfg.make_predictions);
    let topic_count = topics.len();
    for topic in topics {
        pool.submit(topic);
    }
    info!("Submitted {topic_count} topic(s) over {} connection(s)", pool.connection_count());

    tokio::signal::ctrl_c().await?;
    info!("CTRL+C detected, shutting down");
    shutdown.cancel();
    if let Err(e) = watcher_task.await {
        warn!("watcher task ended abnormally: {e}");
    }

    for channel in store.snapshot() {
        let report = channel.history_report();
        if !report.is_empty() {
            info!("{channel}, Total Points Gained: {report}");
        }
    }
    Ok(())
}

/// Looks up channel ids; logins that do not exist are logged and dropped.
async fn resolve_channels(api: &dyn TwitchApi, logins: &[String]) -> Vec<Channel> {
    let mut channels = Vec::with_capacity(logins.len());
    for login in logins {
        match api.resolve_channel_id(login).await {
            Ok(Some(id)) => channels.push(Channel::new(id, login.as_str())),
            Ok(None) => info!("Channel {login} does not exist"),
            Err(e) => warn!(login, "channel lookup failed: {e}"),
        }
    }
    channels
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeApi;

    #[tokio::test]
    async fn unknown_logins_are_dropped() {
        let api = FakeApi::new();
        let logins = vec!["alpha".to_string(), "missing-one".to_string(), "beta".to_string()];
        let channels = resolve_channels(api.as_ref(), &logins).await;

        let ids: Vec<&str> = channels.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["id-alpha", "id-beta"]);
        assert_eq!(channels[1].login, "beta");
    }
}
