use std::str::FromStr;

use crate::bet::{BetSettings, DelayMode, FilterCondition, Strategy};
use crate::error::{AppError, Result};
use crate::types::Priority;

pub const WS_URL: &str = "wss://pubsub-edge.twitch.tv/v1";
pub const GQL_URL: &str = "https://gql.twitch.tv/gql";
pub const CHANNEL_PAGE_URL: &str = "https://www.twitch.tv";
pub const CLIENT_ID: &str = "kimne78kx3ncx6brgo4mv6wki5h1ko";

/// Hard server-side limit on LISTEN topics per pub/sub connection.
pub const MAX_TOPICS_PER_CONNECTION: usize = 50;

/// Keepalive PING interval (seconds), measured from the open handshake.
pub const WS_PING_INTERVAL_SECS: u64 = 30;

/// Fixed delay before the topics of a dead connection are resubmitted.
pub const RECONNECT_DELAY_SECS: u64 = 30;

/// Two frames with the same identity inside this window are one delivery.
pub const DEDUP_WINDOW_MS: u64 = 100;

/// Service limit on channels earning watch time simultaneously.
pub const MAX_WATCHED_CHANNELS: usize = 2;

/// One heartbeat round per minute, split across the selected channels.
pub const WATCH_ROUND_SECS: u64 = 60;

/// Sub-sleeps per scheduler pause so shutdown is observed promptly.
pub const WATCH_SLEEP_CHUNKS: u32 = 3;

/// A channel is a candidate again once this long has passed since its last heartbeat.
pub const WATCH_IDLE_SECS: u64 = 30;

/// Streak bonus needs this long offline between broadcasts.
pub const STREAK_OFFLINE_MINUTES: u64 = 30;

/// Above this many watched minutes the streak bonus should already have landed.
pub const STREAK_MAX_MINUTES_WATCHED: f64 = 7.0;

/// Liveness checks right after going offline would read stale API state.
pub const OFFLINE_RECHECK_SUPPRESS_SECS: u64 = 60;

/// `viewcount` frames only trigger a liveness check this long after `stream-up`.
pub const STREAM_UP_SETTLE_SECS: u64 = 120;

/// Stream info refreshed more recently than this is reused as is.
pub const STREAM_INFO_REFRESH_SECS: u64 = 120;

/// Stream info older than this forces a liveness re-check before watching.
pub const STREAM_INFO_STALE_SECS: u64 = 600;

/// The service rejects predictions below this stake.
pub const MIN_BET_POINTS: u64 = 10;

#[derive(Debug, Clone)]
pub struct Config {
    pub ws_url: String,
    pub gql_url: String,
    pub log_level: String,
    /// Bearer credential (AUTH_TOKEN)
    pub auth_token: String,
    /// Numeric account id (USER_ID)
    pub user_id: String,
    /// Channel logins in priority order, highest first (CHANNELS, comma-separated).
    pub channels: Vec<String>,
    /// Watch selection order (WATCH_PRIORITY, comma-separated).
    pub priority: Vec<Priority>,
    pub watch_streak: bool,
    pub follow_raid: bool,
    pub make_predictions: bool,
    pub claim_bonus: bool,
    pub bet: BetSettings,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let channels = dedup_logins(&required("CHANNELS")?);
        if channels.is_empty() {
            return Err(AppError::Config("CHANNELS must name at least one channel".to_string()));
        }

        let priority = match std::env::var("WATCH_PRIORITY") {
            Ok(raw) => parse_list::<Priority>(&raw)?,
            Err(_) => vec![Priority::Streak, Priority::Order],
        };

        Ok(Self {
            ws_url: std::env::var("WS_URL").unwrap_or_else(|_| WS_URL.to_string()),
            gql_url: std::env::var("GQL_URL").unwrap_or_else(|_| GQL_URL.to_string()),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            auth_token: required("AUTH_TOKEN")?,
            user_id: required("USER_ID")?,
            channels,
            priority,
            watch_streak: env_parse("WATCH_STREAK", true)?,
            follow_raid: env_parse("FOLLOW_RAID", true)?,
            make_predictions: env_parse("MAKE_PREDICTIONS", true)?,
            claim_bonus: env_parse("CLAIM_BONUS", true)?,
            bet: bet_settings_from_env()?,
        })
    }
}

fn bet_settings_from_env() -> Result<BetSettings> {
    let defaults = BetSettings::default();
    let filter_condition = match std::env::var("BET_FILTER") {
        Ok(raw) if !raw.trim().is_empty() => Some(raw.parse::<FilterCondition>()?),
        _ => None,
    };

    Ok(BetSettings {
        strategy: env_parse::<Strategy>("BET_STRATEGY", defaults.strategy)?,
        percentage: env_parse("BET_PERCENTAGE", defaults.percentage)?,
        max_points: env_parse("BET_MAX_POINTS", defaults.max_points)?,
        minimum_points: env_parse("BET_MINIMUM_POINTS", defaults.minimum_points)?,
        only_doubt: env_parse("BET_ONLY_DOUBT", defaults.only_doubt)?,
        stealth_mode: env_parse("BET_STEALTH_MODE", defaults.stealth_mode)?,
        percentage_gap: env_parse("BET_PERCENTAGE_GAP", defaults.percentage_gap)?,
        target_odd: env_parse("BET_TARGET_ODD", defaults.target_odd)?,
        always_bet: env_parse("BET_ALWAYS_BET", defaults.always_bet)?,
        delay: env_parse("BET_DELAY", defaults.delay)?,
        delay_mode: env_parse::<DelayMode>("BET_DELAY_MODE", defaults.delay_mode)?,
        filter_condition,
    })
}

fn required(name: &str) -> Result<String> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(AppError::Config(format!("{name} must be set"))),
    }
}

fn env_parse<T: FromStr>(name: &str, default: T) -> Result<T> {
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map_err(|_| AppError::Config(format!("{name} has an invalid value: {raw}"))),
        _ => Ok(default),
    }
}

fn parse_list<T: FromStr>(raw: &str) -> Result<Vec<T>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<T>()
                .map_err(|_| AppError::Config(format!("unrecognized list entry: {s}")))
        })
        .collect()
}

/// Lowercases, trims and drops repeated logins while keeping first-seen order.
fn dedup_logins(raw: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for login in raw.split(',').map(|s| s.trim().to_lowercase()) {
        if !login.is_empty() && !out.contains(&login) {
            out.push(login);
        }
    }
    out
}
