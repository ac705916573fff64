//! In-memory `TwitchApi` that records every call.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::{AppError, Result};
use crate::gql::TwitchApi;
use crate::types::{ChannelPointsState, Liveness, StreamInfo};

#[derive(Debug, Clone, PartialEq)]
pub enum ApiCall {
    ResolveId(String),
    FetchState(String),
    Claim { channel_id: String, claim_id: String },
    Liveness(String),
    SpadeUrl(String),
    Heartbeat { url: String, payload: String },
    Submit { event_id: String, outcome_id: String, amount: u64 },
    JoinRaid(String),
}

pub struct FakeApi {
    calls: Mutex<Vec<ApiCall>>,
    liveness: Mutex<HashMap<String, Liveness>>,
    states: Mutex<HashMap<String, ChannelPointsState>>,
    pub heartbeat_accepted: AtomicBool,
}

impl FakeApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            liveness: Mutex::new(HashMap::new()),
            states: Mutex::new(HashMap::new()),
            heartbeat_accepted: AtomicBool::new(true),
        })
    }

    pub fn set_liveness(&self, channel_id: &str, liveness: Liveness) {
        self.liveness.lock().unwrap().insert(channel_id.to_string(), liveness);
    }

    pub fn set_state(&self, login: &str, state: ChannelPointsState) {
        self.states.lock().unwrap().insert(login.to_string(), state);
    }

    pub fn calls(&self) -> Vec<ApiCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&ApiCall) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| pred(c)).count()
    }

    fn record(&self, call: ApiCall) {
        self.calls.lock().unwrap().push(call);
    }
}

/// Stream info with a resolvable heartbeat target.
pub fn live_stream(updated_at_ms: u64) -> StreamInfo {
    StreamInfo {
        broadcast_id: "b1".to_string(),
        title: "live".to_string(),
        spade_url: Some("https://spade.test/track".to_string()),
        payload: Some("data=abc".to_string()),
        updated_at_ms,
        ..StreamInfo::default()
    }
}

#[async_trait]
impl TwitchApi for FakeApi {
    async fn resolve_channel_id(&self, login: &str) -> Result<Option<String>> {
        self.record(ApiCall::ResolveId(login.to_string()));
        if login.starts_with("missing") {
            return Ok(None);
        }
        Ok(Some(format!("id-{login}")))
    }

    async fn fetch_channel_state(&self, login: &str) -> Result<ChannelPointsState> {
        self.record(ApiCall::FetchState(login.to_string()));
        self.states
            .lock()
            .unwrap()
            .get(login)
            .cloned()
            .ok_or_else(|| AppError::Upstream(format!("channel {login} does not exist")))
    }

    async fn claim_bonus(&self, channel_id: &str, claim_id: &str) -> Result<()> {
        self.record(ApiCall::Claim {
            channel_id: channel_id.to_string(),
            claim_id: claim_id.to_string(),
        });
        Ok(())
    }

    async fn fetch_liveness(&self, channel_id: &str, _login: &str) -> Result<Liveness> {
        self.record(ApiCall::Liveness(channel_id.to_string()));
        Ok(self
            .liveness
            .lock()
            .unwrap()
            .get(channel_id)
            .cloned()
            .unwrap_or(Liveness::Offline))
    }

    async fn fetch_spade_url(&self, login: &str) -> Result<String> {
        self.record(ApiCall::SpadeUrl(login.to_string()));
        Ok("https://spade.test/track".to_string())
    }

    async fn send_heartbeat(&self, url: &str, payload: &str) -> Result<bool> {
        self.record(ApiCall::Heartbeat { url: url.to_string(), payload: payload.to_string() });
        Ok(self.heartbeat_accepted.load(Ordering::SeqCst))
    }

    async fn submit_prediction(&self, event_id: &str, outcome_id: &str, amount: u64) -> Result<()> {
        self.record(ApiCall::Submit {
            event_id: event_id.to_string(),
            outcome_id: outcome_id.to_string(),
            amount,
        });
        Ok(())
    }

    async fn join_raid(&self, raid_id: &str) -> Result<()> {
        self.record(ApiCall::JoinRaid(raid_id.to_string()));
        Ok(())
    }
}
