use std::collections::BTreeMap;

use tracing::info;

use crate::config::{
    OFFLINE_RECHECK_SUPPRESS_SECS, STREAK_MAX_MINUTES_WATCHED, STREAK_OFFLINE_MINUTES,
    STREAM_INFO_REFRESH_SECS, STREAM_INFO_STALE_SECS, STREAM_UP_SETTLE_SECS, WATCH_IDLE_SECS,
};
use crate::types::{Raid, StreamInfo};

/// Reason code the service attaches to the watch-streak reward.
pub const WATCH_STREAK_REASON: &str = "WATCH_STREAK";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryEntry {
    pub counter: i64,
    pub amount: i64,
}

/// One monitored broadcaster. All timestamps are unix milliseconds.
#[derive(Debug, Clone)]
pub struct Channel {
    pub id: String,
    pub login: String,
    pub points_balance: u64,
    pub is_online: bool,
    pub online_at: Option<u64>,
    pub offline_at: Option<u64>,
    /// Last `stream-up` frame; the API lags behind it.
    pub stream_up_at: Option<u64>,
    pub watch_streak_missing: bool,
    pub minutes_watched: f64,
    pub last_heartbeat_at: Option<u64>,
    /// reason code → (times, points)
    pub history: BTreeMap<String, HistoryEntry>,
    pub raid: Option<Raid>,
    pub stream: Option<StreamInfo>,
}

impl Channel {
    pub fn new(id: impl Into<String>, login: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            login: login.into(),
            points_balance: 0,
            is_online: false,
            online_at: None,
            offline_at: None,
            stream_up_at: None,
            watch_streak_missing: true,
            minutes_watched: 0.0,
            last_heartbeat_at: None,
            history: BTreeMap::new(),
            raid: None,
            stream: None,
        }
    }

    /// Returns true on a real offline → online transition.
    pub fn set_online(&mut self, now: u64) -> bool {
        if self.is_online {
            return false;
        }
        self.is_online = true;
        self.online_at = Some(now);
        self.init_watch_streak();
        info!(channel = %self.login, points = self.points_balance, "{} is Online!", self.login);
        true
    }

    /// Returns true on a real online → offline transition.
    pub fn set_offline(&mut self, now: u64) -> bool {
        if !self.is_online {
            return false;
        }
        self.is_online = false;
        self.offline_at = Some(now);
        let online_minutes = self.online_at.map_or(0, |t| now.saturating_sub(t) / 60_000);
        info!(
            channel = %self.login,
            points = self.points_balance,
            online_minutes,
            "{} is Offline!",
            self.login
        );
        true
    }

    fn init_watch_streak(&mut self) {
        self.watch_streak_missing = true;
        self.minutes_watched = 0.0;
        self.last_heartbeat_at = None;
    }

    /// A liveness check right after going offline would read stale API state.
    pub fn liveness_check_suppressed(&self, now: u64) -> bool {
        self.offline_at
            .is_some_and(|t| now < t + OFFLINE_RECHECK_SUPPRESS_SECS * 1000)
    }

    pub fn stream_up_elapsed(&self, now: u64) -> bool {
        self.stream_up_at
            .map_or(true, |t| now.saturating_sub(t) > STREAM_UP_SETTLE_SECS * 1000)
    }

    pub fn update_history(&mut self, reason_code: &str, earned: i64, counter: i64) {
        let entry = self.history.entry(reason_code.to_string()).or_default();
        entry.counter += counter;
        entry.amount += earned;

        if reason_code == WATCH_STREAK_REASON {
            self.watch_streak_missing = false;
        }
    }

    /// Undoes one earlier `update_history` for `reason_code`, if any was recorded.
    pub fn retract_history(&mut self, reason_code: &str, amount: i64) -> bool {
        match self.history.get_mut(reason_code) {
            Some(entry) if entry.counter > 0 => {
                entry.counter -= 1;
                entry.amount -= amount;
                true
            }
            _ => false,
        }
    }

    /// Advances the minutes counter by the wall time since the previous accepted heartbeat.
    pub fn record_heartbeat(&mut self, now: u64) {
        if let Some(prev) = self.last_heartbeat_at {
            let minutes = now.saturating_sub(prev) as f64 / 60_000.0;
            self.minutes_watched += (minutes * 100_000.0).round() / 100_000.0;
        }
        self.last_heartbeat_at = Some(now);
    }

    /// Stores the raid; false when this raid id was already seen.
    pub fn set_raid(&mut self, raid: Raid) -> bool {
        if self.raid.as_ref().is_some_and(|r| r.raid_id == raid.raid_id) {
            return false;
        }
        self.raid = Some(raid);
        true
    }

    pub fn is_watch_candidate(&self, now: u64) -> bool {
        self.is_online
            && self
                .last_heartbeat_at
                .map_or(true, |t| now.saturating_sub(t) >= WATCH_IDLE_SECS * 1000)
    }

    pub fn needs_watch_streak(&self, now: u64) -> bool {
        self.watch_streak_missing
            && self.offline_at.map_or(true, |t| {
                now.saturating_sub(t) >= STREAK_OFFLINE_MINUTES * 60 * 1000
            })
            && self.minutes_watched < STREAK_MAX_MINUTES_WATCHED
    }

    pub fn stream_info_stale(&self, now: u64) -> bool {
        self.stream
            .as_ref()
            .map_or(true, |s| now.saturating_sub(s.updated_at_ms) > STREAM_INFO_STALE_SECS * 1000)
    }

    /// Online channels re-read stream info at most once per refresh window.
    pub fn stream_refresh_due(&self, now: u64) -> bool {
        if !self.is_online {
            return true;
        }
        self.stream.as_ref().map_or(true, |s| {
            now.saturating_sub(s.updated_at_ms) >= STREAM_INFO_REFRESH_SECS * 1000
        })
    }

    /// Heartbeat endpoint resolved on an earlier check of the current stream.
    pub fn cached_spade_url(&self) -> Option<String> {
        if !self.is_online {
            return None;
        }
        self.stream.as_ref()?.spade_url.clone()
    }

    /// `(url, payload)` for the watch-time side channel, if the stream was resolved.
    pub fn heartbeat_target(&self) -> Option<(String, String)> {
        let stream = self.stream.as_ref()?;
        Some((stream.spade_url.clone()?, stream.payload.clone()?))
    }

    pub fn history_report(&self) -> String {
        self.history
            .iter()
            .filter(|(_, e)| e.counter != 0)
            .map(|(reason, e)| format!("{reason}({} times, {} gained)", e.counter, e.amount))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({} points)", self.login, self.points_balance)
    }
}
