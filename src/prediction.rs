use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bet::{BetEngine, Decision, Outcomes};
use crate::config::MIN_BET_POINTS;
use crate::error::Result;
use crate::gql::TwitchApi;
use crate::state::ChannelStore;
use crate::ws::messages::{PredictionEvent, PredictionResult, ResultKind};

const STATUS_ACTIVE: &str = "ACTIVE";
const STATUS_RESOLVED: &str = "RESOLVED";
const STATUS_CANCELED: &str = "CANCELED";
const PREDICTION_REASON: &str = "PREDICTION";
const REFUND_REASON: &str = "REFUND";

/// Tracked state of one open prediction.
#[derive(Debug, Clone)]
pub struct EventPrediction {
    pub channel_id: String,
    pub title: String,
    pub status: String,
    pub outcomes: Outcomes,
    pub decision: Option<Decision>,
    pub bet_placed: bool,
    pub bet_confirmed: bool,
}

/// Registry of open predictions plus the bet timers scheduled for them.
pub struct PredictionTracker {
    events: DashMap<String, EventPrediction>,
    store: Arc<ChannelStore>,
    api: Arc<dyn TwitchApi>,
    engine: BetEngine,
    shutdown: CancellationToken,
}

impl PredictionTracker {
    pub fn new(
        store: Arc<ChannelStore>,
        api: Arc<dyn TwitchApi>,
        engine: BetEngine,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self { events: DashMap::new(), store, api, engine, shutdown })
    }

    pub fn get(&self, event_id: &str) -> Option<EventPrediction> {
        self.events.get(event_id).map(|e| e.clone())
    }

    /// Registers a new event and schedules its bet.
    pub fn on_created(self: &Arc<Self>, event: &PredictionEvent, frame_ts: Option<&str>) {
        let Some(wait) = self.register(event, frame_ts) else {
            return;
        };

        let tracker = Arc::clone(self);
        let event_id = event.id.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tracker.shutdown.cancelled() => return,
                _ = tokio::time::sleep(wait) => {}
            }
            if let Err(e) = tracker.place_bet(&event_id).await {
                warn!(event_id, "prediction submit failed: {e}");
            }
        });
    }

    /// Returns the wait until the bet instant when the event was accepted.
    fn register(&self, event: &PredictionEvent, frame_ts: Option<&str>) -> Option<Duration> {
        if event.status != STATUS_ACTIVE || self.events.contains_key(&event.id) {
            return None;
        }
        let channel = self.store.get(&event.channel_id)?;
        if !channel.is_online {
            debug!(channel = %channel.login, "ignoring prediction on offline channel");
            return None;
        }

        let created_at = match parse_ts(&event.created_at) {
            Some(t) => t,
            None => {
                warn!(event_id = %event.id, "unparseable created_at {}", event.created_at);
                return None;
            }
        };
        let now = frame_ts.and_then(parse_ts).unwrap_or_else(Utc::now);

        let settings = self.engine.settings();
        let offset = settings
            .delay_mode
            .bet_offset_secs(settings.delay, event.prediction_window_seconds);
        let elapsed = (now - created_at).num_milliseconds() as f64 / 1000.0;
        let wait = offset - elapsed;
        if wait <= 0.0 {
            info!(channel = %channel.login, title = %event.title, "prediction window already passed");
            return None;
        }

        if channel.points_balance < settings.minimum_points {
            info!(
                channel = %channel.login,
                balance = channel.points_balance,
                minimum = settings.minimum_points,
                "balance below minimum_points, skipping prediction"
            );
            return None;
        }

        let outcomes = match Outcomes::from_raw(&event.outcomes) {
            Ok(o) => o,
            Err(e) => {
                warn!(event_id = %event.id, "{e}");
                return None;
            }
        };

        info!(
            channel = %channel.login,
            title = %event.title,
            "placing bet in {wait:.2}s"
        );
        self.events.insert(
            event.id.clone(),
            EventPrediction {
                channel_id: event.channel_id.clone(),
                title: event.title.clone(),
                status: event.status.clone(),
                outcomes,
                decision: None,
                bet_placed: false,
                bet_confirmed: false,
            },
        );
        Some(Duration::from_secs_f64(wait))
    }

    /// Events that close without a bet of ours are forgotten here; a placed
    /// bet keeps its entry until the user-topic result settles it.
    pub fn on_updated(&self, event: &PredictionEvent) {
        let closed_without_bet = {
            let Some(mut tracked) = self.events.get_mut(&event.id) else {
                return;
            };
            tracked.status = event.status.clone();
            if !tracked.bet_placed {
                if let Err(e) = tracked.outcomes.update(&event.outcomes) {
                    warn!(event_id = %event.id, "{e}");
                }
            }
            !tracked.bet_placed && matches!(event.status.as_str(), STATUS_RESOLVED | STATUS_CANCELED)
        };
        if closed_without_bet {
            self.events.remove(&event.id);
            debug!(event_id = %event.id, status = %event.status, "event closed without a bet");
        }
    }

    /// Decides and submits at the bet instant.
    pub async fn place_bet(&self, event_id: &str) -> Result<()> {
        let Some(event) = self.get(event_id) else {
            return Ok(());
        };
        let balance = self.store.balance(&event.channel_id).unwrap_or(0);
        let decision = self.engine.calculate(&event.outcomes, balance);
        if let Some(mut tracked) = self.events.get_mut(event_id) {
            tracked.decision = Some(decision.clone());
        }

        if event.status != STATUS_ACTIVE {
            info!(title = %event.title, status = %event.status, "event is not active anymore");
            return Ok(());
        }

        let (skip, observed) = self.engine.skip(&event.outcomes, &decision);
        if skip {
            match &self.engine.settings().filter_condition {
                Some(filter) => info!(title = %event.title, "Skip betting: {filter} not met, observed {observed}"),
                None => info!(title = %event.title, "Skip betting"),
            }
            return Ok(());
        }

        let (Some(choice), Some(outcome_id)) = (decision.choice, decision.outcome_id.as_deref()) else {
            info!(title = %event.title, "no outcome chosen");
            return Ok(());
        };
        if decision.amount < MIN_BET_POINTS {
            info!(amount = decision.amount, "bet won't be placed, amount below {MIN_BET_POINTS}");
            return Ok(());
        }

        info!(
            title = %event.title,
            total_users = event.outcomes.total_users,
            total_points = event.outcomes.total_points,
            "Place {} channel points on {choice}: {}",
            decision.amount,
            event.outcomes.get(choice)
        );
        self.api.submit_prediction(event_id, outcome_id, decision.amount).await?;

        if let Some(mut tracked) = self.events.get_mut(event_id) {
            tracked.bet_placed = true;
        }
        Ok(())
    }

    pub fn on_made(&self, event_id: &str) {
        if let Some(mut tracked) = self.events.get_mut(event_id) {
            tracked.bet_confirmed = true;
        }
    }

    /// Settles a confirmed bet into the channel history and forgets the event.
    pub fn on_result(&self, event_id: &str, result: &PredictionResult) {
        let Some((_, event)) = self.events.remove(event_id) else {
            return;
        };
        let Some(decision) = event.decision.filter(|_| event.bet_confirmed) else {
            return;
        };

        let placed = decision.amount as i64;
        let won = result.points_won.unwrap_or(0) as i64;
        let gained = match result.kind {
            ResultKind::Refund => 0,
            ResultKind::Win | ResultKind::Lose => won - placed,
        };

        self.store.update(&event.channel_id, |c| {
            match result.kind {
                ResultKind::Win => c.retract_history(PREDICTION_REASON, won),
                ResultKind::Refund => c.retract_history(REFUND_REASON, placed),
                ResultKind::Lose => false,
            };
            c.update_history(PREDICTION_REASON, gained, 1);
        });
        info!(title = %event.title, result = ?result.kind, gained, "prediction settled");
    }
}

fn parse_ts(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw).ok().map(|t| t.with_timezone(&Utc))
}
