use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use rand::Rng;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::{Config, CHANNEL_PAGE_URL, CLIENT_ID};
use crate::error::{AppError, Result};
use crate::types::{now_ms, ChannelPointsState, Liveness, StreamInfo};

const CHANNEL_POINTS_CONTEXT: (&str, &str) = (
    "ChannelPointsContext",
    "9988086babc615a918a1e9a722ff41d98847acac822645209ac7379eecb27152",
);
const CLAIM_COMMUNITY_POINTS: (&str, &str) = (
    "ClaimCommunityPoints",
    "46aaeebe02c99afdf4fc97c7c0cba964124bf6b0af229395f1f6d1feed05b3d0",
);
const STREAM_INFO_OVERLAY: (&str, &str) = (
    "VideoPlayerStreamInfoOverlayChannel",
    "a5f2e34d626a9f4f5c0204f910bab2194948a9502089be558bb6e779a9e1b3d2",
);
const JOIN_RAID: (&str, &str) = (
    "JoinRaid",
    "c6a332a86d1087fbbb1a8623aa01bd1313d2386e7c63be60fdb2d1901f01a4ae",
);

// No persisted hash is published for these two operations, so they go out as inline documents.
const USER_ID_QUERY: &str = "query GetIDFromLogin($login: String!) { user(login: $login) { id } }";
const MAKE_PREDICTION_MUTATION: &str =
    "mutation MakePrediction($input: MakePredictionInput!) { makePrediction(input: $input) { error { code } } }";

/// Side-effecting calls the core makes against the streaming service.
#[async_trait]
pub trait TwitchApi: Send + Sync {
    /// `None` when no such login exists.
    async fn resolve_channel_id(&self, login: &str) -> Result<Option<String>>;

    async fn fetch_channel_state(&self, login: &str) -> Result<ChannelPointsState>;

    async fn claim_bonus(&self, channel_id: &str, claim_id: &str) -> Result<()>;

    /// Stream metadata only; `spade_url` is left unset.
    async fn fetch_liveness(&self, channel_id: &str, login: &str) -> Result<Liveness>;

    /// Heartbeat endpoint advertised in the channel page's settings script.
    async fn fetch_spade_url(&self, login: &str) -> Result<String>;

    /// `Ok(true)` only when the side channel accepted the heartbeat.
    async fn send_heartbeat(&self, url: &str, payload: &str) -> Result<bool>;

    async fn submit_prediction(&self, event_id: &str, outcome_id: &str, amount: u64) -> Result<()>;

    async fn join_raid(&self, raid_id: &str) -> Result<()>;
}

/// GQL-over-HTTPS implementation authenticated with the bearer credential.
pub struct GqlClient {
    http: reqwest::Client,
    gql_url: String,
    auth_token: String,
    user_id: String,
}

impl GqlClient {
    pub fn new(cfg: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            http,
            gql_url: cfg.gql_url.clone(),
            auth_token: cfg.auth_token.clone(),
            user_id: cfg.user_id.clone(),
        })
    }

    async fn post(&self, body: Value) -> Result<Value> {
        let resp: Value = self
            .http
            .post(&self.gql_url)
            .header("Authorization", format!("OAuth {}", self.auth_token))
            .header("Client-Id", CLIENT_ID)
            .json(&body)
            .send()
            .await?
            .json()
            .await?;

        debug!(operation = %body["operationName"], "GQL response: {resp}");

        if let Some(errors) = resp.get("errors").and_then(Value::as_array) {
            if !errors.is_empty() {
                return Err(AppError::Upstream(format!(
                    "{} failed: {}",
                    body["operationName"], errors[0]["message"]
                )));
            }
        }
        Ok(resp)
    }
}

#[async_trait]
impl TwitchApi for GqlClient {
    async fn resolve_channel_id(&self, login: &str) -> Result<Option<String>> {
        let body = json!({
            "operationName": "GetIDFromLogin",
            "query": USER_ID_QUERY,
            "variables": { "login": login },
        });
        let resp = self.post(body).await?;
        Ok(resp["data"]["user"]["id"].as_str().map(str::to_string))
    }

    async fn fetch_channel_state(&self, login: &str) -> Result<ChannelPointsState> {
        let resp = self
            .post(persisted(CHANNEL_POINTS_CONTEXT, json!({ "channelLogin": login })))
            .await?;
        let community = &resp["data"]["community"];
        if community.is_null() {
            return Err(AppError::Upstream(format!("channel {login} does not exist")));
        }
        let points = &community["channel"]["self"]["communityPoints"];
        let balance = points["balance"]
            .as_u64()
            .ok_or_else(|| AppError::Decode("communityPoints.balance missing".to_string()))?;
        Ok(ChannelPointsState {
            balance,
            pending_claim_id: points["availableClaim"]["id"].as_str().map(str::to_string),
        })
    }

    async fn claim_bonus(&self, channel_id: &str, claim_id: &str) -> Result<()> {
        let vars = json!({ "input": { "channelID": channel_id, "claimID": claim_id } });
        self.post(persisted(CLAIM_COMMUNITY_POINTS, vars)).await?;
        Ok(())
    }

    async fn fetch_liveness(&self, channel_id: &str, login: &str) -> Result<Liveness> {
        let resp = self
            .post(persisted(STREAM_INFO_OVERLAY, json!({ "channel": login })))
            .await?;
        let (user, broadcast_id) = match live_stream(&resp, login) {
            Ok(found) => found,
            Err(AppError::StreamOffline(_)) => return Ok(Liveness::Offline),
            Err(e) => return Err(e),
        };
        let stream = &user["stream"];
        let payload = encode_heartbeat(&json!([{
            "event": "minute-watched",
            "properties": {
                "channel_id": channel_id,
                "broadcast_id": broadcast_id,
                "player": "site",
                "user_id": self.user_id,
                "live": true,
                "channel": login,
            }
        }]));

        Ok(Liveness::Online(StreamInfo {
            broadcast_id,
            title: user["broadcastSettings"]["title"].as_str().unwrap_or_default().trim().to_string(),
            game: user["broadcastSettings"]["game"]["name"].as_str().map(str::to_string),
            viewers: stream["viewersCount"].as_u64().unwrap_or(0),
            spade_url: None,
            payload: Some(payload),
            updated_at_ms: now_ms(),
        }))
    }

    async fn fetch_spade_url(&self, login: &str) -> Result<String> {
        let page = self
            .http
            .get(format!("{CHANNEL_PAGE_URL}/{login}"))
            .send()
            .await?
            .text()
            .await?;
        let settings_url = extract_settings_url(&page)
            .ok_or_else(|| AppError::Upstream(format!("no settings script on {login}'s page")))?;

        let settings = self.http.get(settings_url).send().await?.text().await?;
        extract_between(&settings, "\"spade_url\":\"", "\"")
            .map(str::to_string)
            .ok_or_else(|| AppError::Upstream("spade_url missing from settings script".to_string()))
    }

    async fn send_heartbeat(&self, url: &str, payload: &str) -> Result<bool> {
        let resp = self
            .http
            .post(url)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(payload.to_string())
            .send()
            .await?;
        debug!(status = %resp.status(), "minute-watched heartbeat sent");
        Ok(resp.status() == reqwest::StatusCode::NO_CONTENT)
    }

    async fn submit_prediction(&self, event_id: &str, outcome_id: &str, amount: u64) -> Result<()> {
        let body = json!({
            "operationName": "MakePrediction",
            "query": MAKE_PREDICTION_MUTATION,
            "variables": {
                "input": {
                    "eventID": event_id,
                    "outcomeID": outcome_id,
                    "points": amount,
                    "transactionID": transaction_id(),
                }
            },
        });
        let resp = self.post(body).await?;
        match resp["data"]["makePrediction"]["error"]["code"].as_str() {
            Some(code) => Err(AppError::Upstream(format!("prediction rejected: {code}"))),
            None => Ok(()),
        }
    }

    async fn join_raid(&self, raid_id: &str) -> Result<()> {
        self.post(persisted(JOIN_RAID, json!({ "input": { "raidID": raid_id } })))
            .await?;
        Ok(())
    }
}

/// The `user` node and broadcast id of a live stream.
fn live_stream<'a>(resp: &'a Value, login: &str) -> Result<(&'a Value, String)> {
    let user = &resp["data"]["user"];
    let stream = &user["stream"];
    if stream.is_null() {
        return Err(AppError::StreamOffline(login.to_string()));
    }
    let broadcast_id = stream["id"]
        .as_str()
        .ok_or_else(|| AppError::Decode("stream.id missing".to_string()))?;
    Ok((user, broadcast_id.to_string()))
}

fn persisted((operation, hash): (&str, &str), variables: Value) -> Value {
    json!({
        "operationName": operation,
        "variables": variables,
        "extensions": { "persistedQuery": { "version": 1, "sha256Hash": hash } },
    })
}

/// Form body `data=<base64(json)>` expected by the heartbeat endpoint.
fn encode_heartbeat(event: &Value) -> String {
    let encoded = general_purpose::STANDARD.encode(event.to_string());
    url::form_urlencoded::Serializer::new(String::new())
        .append_pair("data", &encoded)
        .finish()
}

fn transaction_id() -> String {
    let mut rng = rand::thread_rng();
    (0..16).map(|_| format!("{:02x}", rng.gen::<u8>())).collect()
}

fn extract_settings_url(page: &str) -> Option<&str> {
    const PREFIX: &str = "https://static.twitchcdn.net/config/settings";
    let start = page.find(PREFIX)?;
    let rest = &page[start..];
    let end = rest.find(".js")? + ".js".len();
    Some(&rest[..end])
}

fn extract_between<'a>(haystack: &'a str, open: &str, close: &str) -> Option<&'a str> {
    let start = haystack.find(open)? + open.len();
    let len = haystack[start..].find(close)?;
    Some(&haystack[start..start + len])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_url_is_pulled_from_page() {
        let page = r#"<script src="https://static.twitchcdn.net/config/settings.abc123.js" crossorigin></script>"#;
        assert_eq!(
            extract_settings_url(page),
            Some("https://static.twitchcdn.net/config/settings.abc123.js")
        );
        assert_eq!(extract_settings_url("<html></html>"), None);
    }

    #[test]
    fn spade_url_is_pulled_from_settings() {
        let js = r#"window.__twilightSettings = {"foo":1,"spade_url":"https://video-edge.example/v1/segment","bar":2}"#;
        assert_eq!(
            extract_between(js, "\"spade_url\":\"", "\""),
            Some("https://video-edge.example/v1/segment")
        );
    }

    #[test]
    fn heartbeat_body_is_form_encoded_base64() {
        let body = encode_heartbeat(&json!([{ "event": "minute-watched" }]));
        let encoded = body.strip_prefix("data=").unwrap();
        assert!(!encoded.contains('+') && !encoded.contains('/') && !encoded.contains('='));
        let decoded: String = url::form_urlencoded::parse(body.as_bytes())
            .find(|(k, _)| k == "data")
            .map(|(_, v)| v.into_owned())
            .unwrap();
        let raw = general_purpose::STANDARD.decode(decoded).unwrap();
        assert_eq!(String::from_utf8(raw).unwrap(), r#"[{"event":"minute-watched"}]"#);
    }

    #[test]
    fn null_stream_reads_as_offline() {
        let offline = json!({ "data": { "user": { "stream": null } } });
        assert!(matches!(live_stream(&offline, "alpha"), Err(AppError::StreamOffline(l)) if l == "alpha"));

        let live = json!({ "data": { "user": { "stream": { "id": "b1", "viewersCount": 3 } } } });
        let (user, broadcast_id) = live_stream(&live, "alpha").unwrap();
        assert_eq!(broadcast_id, "b1");
        assert_eq!(user["stream"]["viewersCount"], 3);
    }

    #[test]
    fn persisted_query_carries_hash() {
        let body = persisted(JOIN_RAID, json!({ "input": { "raidID": "r1" } }));
        assert_eq!(body["operationName"], "JoinRaid");
        assert_eq!(body["extensions"]["persistedQuery"]["sha256Hash"], JOIN_RAID.1);
        assert_eq!(body["variables"]["input"]["raidID"], "r1");
    }

    #[test]
    fn transaction_id_is_32_hex_chars() {
        let id = transaction_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
