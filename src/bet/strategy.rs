use rand::Rng;
use tracing::{debug, info};

use crate::bet::outcome::{Choice, Outcomes};
use crate::bet::settings::{BetSettings, OutcomeKey, Strategy};
use crate::config::MIN_BET_POINTS;

/// Smallest stake SmartHighOdds places when nobody backs the high-odds side yet.
const SHO_EMPTY_SIDE_STAKE: i64 = 50;
/// SmartHighOdds stake when `always_bet` forces a bet on unattractive odds.
const SHO_FORCED_STAKE: i64 = 10;
/// Stealth reduction never pushes the stake under this.
const STEALTH_FLOOR: f64 = 10.0;

/// Result of one `calculate` call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Decision {
    pub choice: Option<Choice>,
    pub outcome_id: Option<String>,
    pub amount: u64,
}

/// Strategy plus its settings. Stateless: every call reads only its arguments.
#[derive(Debug, Clone)]
pub struct BetEngine {
    settings: BetSettings,
}

impl BetEngine {
    pub fn new(settings: BetSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &BetSettings {
        &self.settings
    }

    pub fn calculate(&self, outcomes: &Outcomes, balance: u64) -> Decision {
        self.calculate_with_rng(outcomes, balance, &mut rand::thread_rng())
    }

    pub fn calculate_with_rng<R: Rng + ?Sized>(
        &self,
        outcomes: &Outcomes,
        balance: u64,
        rng: &mut R,
    ) -> Decision {
        let (choice, computed) = self.pick(outcomes);
        let choice = if self.settings.only_doubt { Some(Choice::B) } else { choice };

        let Some(choice) = choice else {
            return Decision::default();
        };
        let outcome = outcomes.get(choice);

        let mut amount = self.cap(computed, balance);

        if self.settings.stealth_mode && amount >= outcome.top_points {
            let margin: f64 = rng.gen_range(1.0..=5.0);
            let top = outcome.top_points as f64;
            let reduced = top - margin;
            let reduced = if reduced < STEALTH_FLOOR && top > STEALTH_FLOOR {
                STEALTH_FLOOR
            } else {
                reduced.max(0.0)
            };
            debug!(
                before = amount,
                top_points = outcome.top_points,
                "stealth mode lowered stake below the top predictor"
            );
            amount = reduced as u64;
            if amount < MIN_BET_POINTS {
                debug!(
                    amount,
                    top_points = outcome.top_points,
                    "stealth mode left a stake under {MIN_BET_POINTS}, bet will be dropped"
                );
            }
        }

        Decision {
            choice: Some(choice),
            outcome_id: Some(outcome.id.clone()),
            amount,
        }
    }

    /// `min(computed, balance * percentage / 100, max_points)` over the non-zero caps.
    fn cap(&self, computed: i64, balance: u64) -> u64 {
        let mut caps: Vec<i64> = Vec::with_capacity(3);
        if computed != 0 {
            caps.push(computed);
        }
        if self.settings.percentage > 0 {
            caps.push((balance as f64 * self.settings.percentage as f64 / 100.0) as i64);
        }
        if self.settings.max_points > 0 {
            caps.push(self.settings.max_points as i64);
        }
        caps.into_iter().min().unwrap_or(0).max(0) as u64
    }

    fn pick(&self, outcomes: &Outcomes) -> (Option<Choice>, i64) {
        match self.settings.strategy {
            Strategy::MostVoted => (Some(higher(outcomes, OutcomeKey::TotalUsers)), 0),
            Strategy::HighOdds => (Some(higher(outcomes, OutcomeKey::Odds)), 0),
            Strategy::Percentage => (Some(higher(outcomes, OutcomeKey::OddsPercentage)), 0),
            Strategy::Smart => {
                let gap = (outcomes.a().percentage_users - outcomes.b().percentage_users).abs();
                let key = if gap < self.settings.percentage_gap {
                    OutcomeKey::Odds
                } else {
                    OutcomeKey::TotalUsers
                };
                (Some(higher(outcomes, key)), 0)
            }
            Strategy::SmartHighOdds => {
                let choice = higher(outcomes, OutcomeKey::Odds);
                (Some(choice), self.smart_high_odds_stake(outcomes, choice))
            }
        }
    }

    fn smart_high_odds_stake(&self, outcomes: &Outcomes, choice: Choice) -> i64 {
        let chosen = outcomes.get(choice);
        let other = &outcomes.items[1 - choice.index()];

        if self.both_odds_too_low(outcomes) || self.only_doubt_too_low(outcomes) {
            return SHO_FORCED_STAKE;
        }
        if chosen.total_points <= SHO_EMPTY_SIDE_STAKE as u64 {
            return SHO_EMPTY_SIDE_STAKE;
        }

        let mut target_odd = self.settings.target_odd;
        if chosen.odds > target_odd * 2.0 {
            target_odd = chosen.odds / 2.0;
        }
        if target_odd <= 1.0 {
            return 0;
        }
        (other.total_points as f64 / (target_odd - 1.0) - chosen.total_points as f64) as i64
    }

    fn both_odds_too_low(&self, outcomes: &Outcomes) -> bool {
        let target = self.settings.target_odd;
        outcomes.a().odds <= target && outcomes.b().odds <= target
    }

    fn only_doubt_too_low(&self, outcomes: &Outcomes) -> bool {
        self.settings.only_doubt && outcomes.b().odds <= self.settings.target_odd
    }

    /// Returns `(should_skip, observed_value)`. Call after `calculate`: decision fields
    /// read the chosen outcome, which defaults to B when nothing was chosen.
    pub fn skip(&self, outcomes: &Outcomes, decision: &Decision) -> (bool, f64) {
        if self.settings.strategy == Strategy::SmartHighOdds {
            if let Some(verdict) = self.smart_high_odds_skip(outcomes) {
                return verdict;
            }
        }

        let Some(filter) = &self.settings.filter_condition else {
            return (false, 0.0);
        };

        let observed = if filter.by.is_total() {
            field(outcomes, 0, filter.by) + field(outcomes, 1, filter.by)
        } else {
            let index = decision.choice.unwrap_or(Choice::B).index();
            field(outcomes, index, filter.by)
        };

        (!filter.condition.holds(observed, filter.value), observed)
    }

    fn smart_high_odds_skip(&self, outcomes: &Outcomes) -> Option<(bool, f64)> {
        if self.settings.always_bet {
            info!("always_bet activated");
            return Some((false, 0.0));
        }

        let (a_points, b_points) = (outcomes.a().total_points, outcomes.b().total_points);
        if a_points > 0 && b_points == 0 {
            info!("No bet on B");
            return Some((true, 0.0));
        }
        if a_points == 0 && b_points > 0 && !self.settings.only_doubt {
            info!("No bet on A");
            return Some((true, 0.0));
        }

        if self.both_odds_too_low(outcomes) {
            info!(target_odd = self.settings.target_odd, "Odd is too low");
            return Some((true, 0.0));
        }
        if self.only_doubt_too_low(outcomes) {
            info!(target_odd = self.settings.target_odd, "Odd is too low and only_doubt activated");
            return Some((true, 0.0));
        }
        None
    }
}

/// A wins only on a strictly larger value; ties go to B.
fn higher(outcomes: &Outcomes, key: OutcomeKey) -> Choice {
    if field(outcomes, 0, key) > field(outcomes, 1, key) {
        Choice::A
    } else {
        Choice::B
    }
}

fn field(outcomes: &Outcomes, index: usize, key: OutcomeKey) -> f64 {
    let o = &outcomes.items[index];
    match key {
        OutcomeKey::PercentageUsers => o.percentage_users,
        OutcomeKey::OddsPercentage => o.odds_percentage,
        OutcomeKey::Odds => o.odds,
        OutcomeKey::TopPoints => o.top_points as f64,
        OutcomeKey::TotalUsers | OutcomeKey::DecisionUsers => o.total_users as f64,
        OutcomeKey::TotalPoints | OutcomeKey::DecisionPoints => o.total_points as f64,
    }
}
