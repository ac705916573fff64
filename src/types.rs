use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

// ---------------------------------------------------------------------------
// Topic
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopicKind {
    CommunityPointsUser,
    PredictionsUser,
    VideoPlayback,
    Raid,
    PredictionsChannel,
}

impl TopicKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TopicKind::CommunityPointsUser => "community-points-user-v1",
            TopicKind::PredictionsUser => "predictions-user-v1",
            TopicKind::VideoPlayback => "video-playback-by-id",
            TopicKind::Raid => "raid",
            TopicKind::PredictionsChannel => "predictions-channel-v1",
        }
    }
}

impl FromStr for TopicKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "community-points-user-v1" => Ok(TopicKind::CommunityPointsUser),
            "predictions-user-v1" => Ok(TopicKind::PredictionsUser),
            "video-playback-by-id" => Ok(TopicKind::VideoPlayback),
            "raid" => Ok(TopicKind::Raid),
            "predictions-channel-v1" => Ok(TopicKind::PredictionsChannel),
            other => Err(format!("unknown topic kind: {other}")),
        }
    }
}

impl std::fmt::Display for TopicKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TopicScope {
    /// Scoped to the account; LISTEN frames carry the bearer credential.
    User(String),
    Channel(String),
}

/// One subscribable event stream. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Topic {
    pub kind: TopicKind,
    pub scope: TopicScope,
}

impl Topic {
    pub fn user(kind: TopicKind, user_id: &str) -> Self {
        Self { kind, scope: TopicScope::User(user_id.to_string()) }
    }

    pub fn channel(kind: TopicKind, channel_id: &str) -> Self {
        Self { kind, scope: TopicScope::Channel(channel_id.to_string()) }
    }

    pub fn is_user_topic(&self) -> bool {
        matches!(self.scope, TopicScope::User(_))
    }

    pub fn scope_id(&self) -> &str {
        match &self.scope {
            TopicScope::User(id) | TopicScope::Channel(id) => id,
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.kind, self.scope_id())
    }
}

// ---------------------------------------------------------------------------
// Watch priority
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    /// Channels still missing this broadcast's watch-streak bonus.
    Streak,
    /// Configured channel order.
    Order,
    PointsAscending,
    PointsDescending,
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "STREAK" => Ok(Priority::Streak),
            "ORDER" => Ok(Priority::Order),
            "POINTS_ASCENDING" => Ok(Priority::PointsAscending),
            "POINTS_DESCENDING" => Ok(Priority::PointsDescending),
            other => Err(format!("unknown priority: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Collaborator payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Raid {
    pub raid_id: String,
    pub target_login: String,
}

/// Live broadcast metadata plus the pre-encoded heartbeat target for it.
#[derive(Debug, Clone, Default)]
pub struct StreamInfo {
    pub broadcast_id: String,
    pub title: String,
    pub game: Option<String>,
    pub viewers: u64,
    pub spade_url: Option<String>,
    /// Opaque heartbeat body; sent verbatim.
    pub payload: Option<String>,
    pub updated_at_ms: u64,
}

#[derive(Debug, Clone)]
pub enum Liveness {
    Online(StreamInfo),
    Offline,
}

#[derive(Debug, Clone, Default)]
pub struct ChannelPointsState {
    pub balance: u64,
    pub pending_claim_id: Option<String>,
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
