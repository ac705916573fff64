use std::sync::atomic::{AtomicU64, Ordering};

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use crate::bet::RawOutcome;
use crate::error::{AppError, Result};
use crate::types::{Raid, Topic, TopicKind};

static PARSE_FAILURES: AtomicU64 = AtomicU64::new(0);

const NONCE_LEN: usize = 30;

// ---------------------------------------------------------------------------
// Raw wire shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Option<RawEnvelopeData>,
    #[serde(default)]
    error: Option<String>,
}

/// `message` is itself a JSON document serialized as a string.
#[derive(Debug, Deserialize)]
struct RawEnvelopeData {
    topic: String,
    message: String,
}

#[derive(Debug, Deserialize)]
struct RawInner {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Option<Value>,
    /// Raid messages carry their body at the top level.
    #[serde(default)]
    raid: Option<RawRaid>,
    /// Video-playback messages carry their fields at the top level.
    #[serde(default)]
    viewers: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawRaid {
    id: String,
    target_login: String,
}

#[derive(Debug, Deserialize)]
struct PointsEarnedData {
    #[serde(default)]
    timestamp: Option<String>,
    point_gain: PointGain,
    balance: BalanceData,
}

#[derive(Debug, Deserialize)]
struct PointGain {
    total_points: i64,
    reason_code: String,
}

#[derive(Debug, Deserialize)]
struct BalanceData {
    channel_id: String,
    balance: u64,
}

#[derive(Debug, Deserialize)]
struct ClaimData {
    #[serde(default)]
    timestamp: Option<String>,
    claim: Claim,
}

#[derive(Debug, Deserialize)]
struct Claim {
    id: String,
    channel_id: String,
}

#[derive(Debug, Deserialize)]
struct PredictionChannelData {
    #[serde(default)]
    timestamp: Option<String>,
    event: PredictionEvent,
}

#[derive(Debug, Deserialize)]
struct PredictionUserData {
    #[serde(default)]
    timestamp: Option<String>,
    prediction: UserPrediction,
}

#[derive(Debug, Deserialize)]
struct UserPrediction {
    event_id: String,
    channel_id: String,
    #[serde(default)]
    result: Option<PredictionResult>,
}

// ---------------------------------------------------------------------------
// Decoded events
// ---------------------------------------------------------------------------

/// Snapshot of a prediction event as broadcast on the channel topic.
#[derive(Debug, Clone, Deserialize)]
pub struct PredictionEvent {
    pub id: String,
    pub channel_id: String,
    #[serde(default)]
    pub title: String,
    pub status: String,
    /// RFC 3339.
    pub created_at: String,
    pub prediction_window_seconds: f64,
    pub outcomes: Vec<RawOutcome>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResultKind {
    Win,
    Lose,
    Refund,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PredictionResult {
    #[serde(rename = "type")]
    pub kind: ResultKind,
    #[serde(default)]
    pub points_won: Option<u64>,
}

#[derive(Debug, Clone)]
pub enum PubSubEvent {
    PointsEarned { earned: i64, reason_code: String, balance: u64 },
    ClaimAvailable { claim_id: String },
    StreamUp,
    StreamDown,
    Viewcount { viewers: u64 },
    RaidUpdate(Raid),
    PredictionCreated(PredictionEvent),
    PredictionUpdated(PredictionEvent),
    PredictionMade { event_id: String },
    PredictionResult { event_id: String, result: PredictionResult },
    /// Known topic, message type we do not act on.
    Unhandled,
}

#[derive(Debug, Clone)]
pub struct PubSubMessage {
    pub topic: TopicKind,
    /// Inner message type, e.g. `points-earned`.
    pub kind: String,
    pub channel_id: String,
    pub timestamp: Option<String>,
    pub event: PubSubEvent,
}

impl PubSubMessage {
    /// Identity used for duplicate suppression.
    pub fn identifier(&self) -> String {
        format!("{}.{}.{}", self.kind, self.topic, self.channel_id)
    }
}

#[derive(Debug)]
pub enum InboundFrame {
    Message(PubSubMessage),
    /// Reply to a LISTEN; an empty error string means success.
    Response { error: Option<String> },
    Reconnect,
    Pong,
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Parse a raw text frame. Unrecognized or malformed frames are logged and dropped.
pub fn parse_frame(raw: &str) -> Option<InboundFrame> {
    match decode_frame(raw) {
        Ok(frame) => frame,
        Err(e) => {
            let count = PARSE_FAILURES.fetch_add(1, Ordering::Relaxed) + 1;
            if count <= 10 || count % 1000 == 0 {
                let sample: String = raw.chars().take(500).collect();
                warn!(count, "[WS PARSE] {e}: {sample}");
            }
            None
        }
    }
}

fn decode_frame(raw: &str) -> Result<Option<InboundFrame>> {
    let envelope: RawEnvelope = serde_json::from_str(raw)?;
    let frame = match envelope.kind.as_str() {
        "MESSAGE" => {
            let data = envelope
                .data
                .ok_or_else(|| AppError::Decode("MESSAGE without data".to_string()))?;
            InboundFrame::Message(decode_message(&data.topic, &data.message)?)
        }
        "RESPONSE" => InboundFrame::Response {
            error: envelope.error.filter(|e| !e.is_empty()),
        },
        "RECONNECT" => InboundFrame::Reconnect,
        "PONG" => InboundFrame::Pong,
        _ => return Ok(None),
    };
    Ok(Some(frame))
}

fn decode_message(topic: &str, message: &str) -> Result<PubSubMessage> {
    let (kind_str, scope_id) = topic
        .rsplit_once('.')
        .ok_or_else(|| AppError::Decode(format!("malformed topic {topic}")))?;
    let topic_kind: TopicKind = kind_str.parse().map_err(AppError::Decode)?;
    let inner: RawInner = serde_json::from_str(message)?;

    let mut channel_id = scope_id.to_string();
    let mut timestamp = None;

    let event = match (topic_kind, inner.kind.as_str()) {
        (TopicKind::CommunityPointsUser, "points-earned") => {
            let d: PointsEarnedData = serde_json::from_value(required_data(inner.data)?)?;
            channel_id = d.balance.channel_id;
            timestamp = d.timestamp;
            PubSubEvent::PointsEarned {
                earned: d.point_gain.total_points,
                reason_code: d.point_gain.reason_code,
                balance: d.balance.balance,
            }
        }
        (TopicKind::CommunityPointsUser, "claim-available") => {
            let d: ClaimData = serde_json::from_value(required_data(inner.data)?)?;
            channel_id = d.claim.channel_id;
            timestamp = d.timestamp;
            PubSubEvent::ClaimAvailable { claim_id: d.claim.id }
        }
        (TopicKind::VideoPlayback, "stream-up") => PubSubEvent::StreamUp,
        (TopicKind::VideoPlayback, "stream-down") => PubSubEvent::StreamDown,
        (TopicKind::VideoPlayback, "viewcount") => PubSubEvent::Viewcount {
            viewers: inner.viewers.unwrap_or(0),
        },
        (TopicKind::Raid, "raid_update_v2") => {
            let raid = inner
                .raid
                .ok_or_else(|| AppError::Decode("raid_update_v2 without raid".to_string()))?;
            PubSubEvent::RaidUpdate(Raid { raid_id: raid.id, target_login: raid.target_login })
        }
        (TopicKind::PredictionsChannel, kind @ ("event-created" | "event-updated")) => {
            let d: PredictionChannelData = serde_json::from_value(required_data(inner.data)?)?;
            channel_id = d.event.channel_id.clone();
            timestamp = d.timestamp;
            if kind == "event-created" {
                PubSubEvent::PredictionCreated(d.event)
            } else {
                PubSubEvent::PredictionUpdated(d.event)
            }
        }
        (TopicKind::PredictionsUser, kind @ ("prediction-made" | "prediction-result")) => {
            let d: PredictionUserData = serde_json::from_value(required_data(inner.data)?)?;
            channel_id = d.prediction.channel_id;
            timestamp = d.timestamp;
            let event_id = d.prediction.event_id;
            match (kind, d.prediction.result) {
                ("prediction-result", Some(result)) => PubSubEvent::PredictionResult { event_id, result },
                ("prediction-result", None) => {
                    return Err(AppError::Decode("prediction-result without result".to_string()))
                }
                _ => PubSubEvent::PredictionMade { event_id },
            }
        }
        _ => PubSubEvent::Unhandled,
    };

    Ok(PubSubMessage { topic: topic_kind, kind: inner.kind, channel_id, timestamp, event })
}

fn required_data(data: Option<Value>) -> Result<Value> {
    data.ok_or_else(|| AppError::Decode("message without data".to_string()))
}

// ---------------------------------------------------------------------------
// Outbound frames
// ---------------------------------------------------------------------------

/// LISTEN request for a single topic; user-scoped topics carry the credential.
pub fn build_listen_msg(topic: &Topic, auth_token: &str) -> String {
    let mut data = json!({ "topics": [topic.to_string()] });
    if topic.is_user_topic() {
        data["auth_token"] = json!(auth_token);
    }
    json!({ "type": "LISTEN", "nonce": create_nonce(), "data": data }).to_string()
}

pub fn build_ping_msg() -> String {
    json!({ "type": "PING" }).to_string()
}

pub fn create_nonce() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(NONCE_LEN)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wrap(topic: &str, inner: Value) -> String {
        json!({
            "type": "MESSAGE",
            "data": { "topic": topic, "message": inner.to_string() }
        })
        .to_string()
    }

    fn message(raw: &str) -> PubSubMessage {
        match parse_frame(raw) {
            Some(InboundFrame::Message(m)) => m,
            other => panic!("expected Message, got {other:?}"),
        }
    }

    #[test]
    fn parses_points_earned() {
        let raw = wrap(
            "community-points-user-v1.42",
            json!({
                "type": "points-earned",
                "data": {
                    "timestamp": "2024-01-01T00:00:00Z",
                    "point_gain": { "total_points": 10, "reason_code": "WATCH" },
                    "balance": { "channel_id": "777", "balance": 1234 }
                }
            }),
        );
        let msg = message(&raw);
        assert_eq!(msg.channel_id, "777");
        assert_eq!(msg.identifier(), "points-earned.community-points-user-v1.777");
        match msg.event {
            PubSubEvent::PointsEarned { earned, reason_code, balance } => {
                assert_eq!(earned, 10);
                assert_eq!(reason_code, "WATCH");
                assert_eq!(balance, 1234);
            }
            other => panic!("expected PointsEarned, got {other:?}"),
        }
    }

    #[test]
    fn parses_claim_available() {
        let raw = wrap(
            "community-points-user-v1.42",
            json!({ "type": "claim-available", "data": { "claim": { "id": "c1", "channel_id": "777" } } }),
        );
        let msg = message(&raw);
        assert_eq!(msg.channel_id, "777");
        assert!(matches!(msg.event, PubSubEvent::ClaimAvailable { ref claim_id } if claim_id == "c1"));
    }

    #[test]
    fn video_playback_uses_topic_scope_as_channel() {
        let raw = wrap("video-playback-by-id.555", json!({ "type": "viewcount", "viewers": 88 }));
        let msg = message(&raw);
        assert_eq!(msg.channel_id, "555");
        assert!(matches!(msg.event, PubSubEvent::Viewcount { viewers: 88 }));

        let raw = wrap("video-playback-by-id.555", json!({ "type": "stream-down" }));
        assert!(matches!(message(&raw).event, PubSubEvent::StreamDown));
    }

    #[test]
    fn parses_raid_update() {
        let raw = wrap(
            "raid.555",
            json!({ "type": "raid_update_v2", "raid": { "id": "r9", "target_login": "friend" } }),
        );
        match message(&raw).event {
            PubSubEvent::RaidUpdate(raid) => {
                assert_eq!(raid.raid_id, "r9");
                assert_eq!(raid.target_login, "friend");
            }
            other => panic!("expected RaidUpdate, got {other:?}"),
        }
    }

    #[test]
    fn parses_prediction_created() {
        let raw = wrap(
            "predictions-channel-v1.555",
            json!({
                "type": "event-created",
                "data": {
                    "timestamp": "2024-01-01T00:00:05Z",
                    "event": {
                        "id": "e1",
                        "channel_id": "555",
                        "title": "Win?",
                        "status": "ACTIVE",
                        "created_at": "2024-01-01T00:00:00Z",
                        "prediction_window_seconds": 120,
                        "outcomes": [
                            { "id": "o1", "title": "Yes", "color": "BLUE", "total_users": 0, "total_points": 0, "top_predictors": [] },
                            { "id": "o2", "title": "No", "color": "PINK", "total_users": 0, "total_points": 0, "top_predictors": [] }
                        ]
                    }
                }
            }),
        );
        let msg = message(&raw);
        assert_eq!(msg.timestamp.as_deref(), Some("2024-01-01T00:00:05Z"));
        match msg.event {
            PubSubEvent::PredictionCreated(event) => {
                assert_eq!(event.id, "e1");
                assert_eq!(event.outcomes.len(), 2);
                assert!((event.prediction_window_seconds - 120.0).abs() < 1e-9);
            }
            other => panic!("expected PredictionCreated, got {other:?}"),
        }
    }

    #[test]
    fn parses_prediction_result() {
        let raw = wrap(
            "predictions-user-v1.42",
            json!({
                "type": "prediction-result",
                "data": { "prediction": {
                    "event_id": "e1",
                    "channel_id": "555",
                    "result": { "type": "WIN", "points_won": 300 }
                } }
            }),
        );
        let msg = message(&raw);
        assert_eq!(msg.channel_id, "555");
        match msg.event {
            PubSubEvent::PredictionResult { event_id, result } => {
                assert_eq!(event_id, "e1");
                assert_eq!(result.kind, ResultKind::Win);
                assert_eq!(result.points_won, Some(300));
            }
            other => panic!("expected PredictionResult, got {other:?}"),
        }
    }

    #[test]
    fn unhandled_type_on_known_topic() {
        let raw = wrap("community-points-user-v1.42", json!({ "type": "reward-redeemed", "data": {} }));
        assert!(matches!(message(&raw).event, PubSubEvent::Unhandled));
    }

    #[test]
    fn control_frames() {
        assert!(matches!(parse_frame(r#"{"type":"PONG"}"#), Some(InboundFrame::Pong)));
        assert!(matches!(parse_frame(r#"{"type":"RECONNECT"}"#), Some(InboundFrame::Reconnect)));
        assert!(matches!(
            parse_frame(r#"{"type":"RESPONSE","error":"","nonce":"x"}"#),
            Some(InboundFrame::Response { error: None })
        ));
        assert!(matches!(
            parse_frame(r#"{"type":"RESPONSE","error":"ERR_BADAUTH","nonce":"x"}"#),
            Some(InboundFrame::Response { error: Some(ref e) }) if e == "ERR_BADAUTH"
        ));
    }

    #[test]
    fn garbage_and_unknown_topics_are_dropped() {
        assert!(parse_frame("not json").is_none());
        assert!(parse_frame(r#"{"type":"SOMETHING"}"#).is_none());
        let raw = wrap("whispers.42", json!({ "type": "whisper" }));
        assert!(parse_frame(&raw).is_none());
    }

    #[test]
    fn listen_includes_credential_only_for_user_topics() {
        let user: Value = serde_json::from_str(&build_listen_msg(
            &Topic::user(TopicKind::CommunityPointsUser, "42"),
            "secret",
        ))
        .unwrap();
        assert_eq!(user["type"], "LISTEN");
        assert_eq!(user["data"]["topics"][0], "community-points-user-v1.42");
        assert_eq!(user["data"]["auth_token"], "secret");
        assert_eq!(user["nonce"].as_str().unwrap().len(), NONCE_LEN);

        let channel: Value =
            serde_json::from_str(&build_listen_msg(&Topic::channel(TopicKind::Raid, "555"), "secret"))
                .unwrap();
        assert_eq!(channel["data"]["topics"][0], "raid.555");
        assert!(channel["data"].get("auth_token").is_none());
    }

    #[test]
    fn nonce_is_alphanumeric() {
        let nonce = create_nonce();
        assert_eq!(nonce.len(), NONCE_LEN);
        assert!(nonce.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(nonce, create_nonce());
    }
}
