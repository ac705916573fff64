use std::str::FromStr;

use crate::error::AppError;

// ---------------------------------------------------------------------------
// Strategy
// ---------------------------------------------------------------------------

/// Closed set of stake-selection strategies. Validated once from config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    MostVoted,
    HighOdds,
    Percentage,
    Smart,
    SmartHighOdds,
}

impl FromStr for Strategy {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "mostvoted" => Ok(Strategy::MostVoted),
            "highodds" => Ok(Strategy::HighOdds),
            "percentage" => Ok(Strategy::Percentage),
            "smart" => Ok(Strategy::Smart),
            "smarthighodds" => Ok(Strategy::SmartHighOdds),
            _ => Err(AppError::Config(format!("unknown bet strategy: {s}"))),
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Strategy::MostVoted => "MostVoted",
            Strategy::HighOdds => "HighOdds",
            Strategy::Percentage => "Percentage",
            Strategy::Smart => "Smart",
            Strategy::SmartHighOdds => "SmartHighOdds",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Delay
// ---------------------------------------------------------------------------

/// How the bet instant is placed inside the prediction window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelayMode {
    /// `delay` seconds after the window opens.
    FromStart,
    /// `delay` seconds before the window closes.
    FromEnd,
    /// `delay` is a fraction of the window.
    Percentage,
}

impl FromStr for DelayMode {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "FROM_START" => Ok(DelayMode::FromStart),
            "FROM_END" => Ok(DelayMode::FromEnd),
            "PERCENTAGE" => Ok(DelayMode::Percentage),
            _ => Err(AppError::Config(format!("unknown delay mode: {s}"))),
        }
    }
}

impl DelayMode {
    /// Seconds after the window opens at which the bet should go out.
    pub fn bet_offset_secs(&self, delay: f64, window_secs: f64) -> f64 {
        match self {
            DelayMode::FromStart => delay.min(window_secs),
            DelayMode::FromEnd => (window_secs - delay).max(0.0),
            DelayMode::Percentage => window_secs * delay,
        }
    }
}

// ---------------------------------------------------------------------------
// Skip filter
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKey {
    PercentageUsers,
    OddsPercentage,
    Odds,
    TopPoints,
    /// Summed across both outcomes.
    TotalUsers,
    /// Summed across both outcomes.
    TotalPoints,
    /// Users on the chosen outcome.
    DecisionUsers,
    /// Points on the chosen outcome.
    DecisionPoints,
}

impl OutcomeKey {
    pub fn is_total(&self) -> bool {
        matches!(self, OutcomeKey::TotalUsers | OutcomeKey::TotalPoints)
    }
}

impl FromStr for OutcomeKey {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PERCENTAGE_USERS" => Ok(OutcomeKey::PercentageUsers),
            "ODDS_PERCENTAGE" => Ok(OutcomeKey::OddsPercentage),
            "ODDS" => Ok(OutcomeKey::Odds),
            "TOP_POINTS" => Ok(OutcomeKey::TopPoints),
            "TOTAL_USERS" => Ok(OutcomeKey::TotalUsers),
            "TOTAL_POINTS" => Ok(OutcomeKey::TotalPoints),
            "DECISION_USERS" => Ok(OutcomeKey::DecisionUsers),
            "DECISION_POINTS" => Ok(OutcomeKey::DecisionPoints),
            _ => Err(AppError::Config(format!("unknown filter key: {s}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    Gt,
    Lt,
    Gte,
    Lte,
}

impl Condition {
    pub fn holds(&self, observed: f64, threshold: f64) -> bool {
        match self {
            Condition::Gt => observed > threshold,
            Condition::Lt => observed < threshold,
            Condition::Gte => observed >= threshold,
            Condition::Lte => observed <= threshold,
        }
    }
}

impl FromStr for Condition {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GT" | ">" => Ok(Condition::Gt),
            "LT" | "<" => Ok(Condition::Lt),
            "GTE" | ">=" => Ok(Condition::Gte),
            "LTE" | "<=" => Ok(Condition::Lte),
            _ => Err(AppError::Config(format!("unknown filter condition: {s}"))),
        }
    }
}

/// Bet only when `by <where> value` holds; otherwise skip.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterCondition {
    pub by: OutcomeKey,
    pub condition: Condition,
    pub value: f64,
}

impl FromStr for FilterCondition {
    type Err = AppError;

    /// Parses `"<by>,<where>,<value>"`, e.g. `"ODDS,GT,2.6"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(',').collect();
        let [by, condition, value] = parts.as_slice() else {
            return Err(AppError::Config(format!("malformed filter condition: {s}")));
        };
        let value = value
            .trim()
            .parse::<f64>()
            .map_err(|_| AppError::Config(format!("filter value is not a number: {value}")))?;
        Ok(Self {
            by: by.parse()?,
            condition: condition.parse()?,
            value,
        })
    }
}

impl std::fmt::Display for FilterCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "FilterCondition(by={:?}, where={:?}, value={})", self.by, self.condition, self.value)
    }
}

// ---------------------------------------------------------------------------
// BetSettings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct BetSettings {
    pub strategy: Strategy,
    /// Stake cap as a percentage of the current balance.
    pub percentage: u32,
    /// Absolute stake cap. 0 disables it.
    pub max_points: u64,
    /// Balance required before a prediction is considered at all.
    pub minimum_points: u64,
    /// Always back outcome B.
    pub only_doubt: bool,
    pub stealth_mode: bool,
    /// Smart: below this users-percentage gap, fall back to odds.
    pub percentage_gap: f64,
    /// SmartHighOdds: odds both sides must beat before betting.
    pub target_odd: f64,
    /// SmartHighOdds: bet even when odds are too low.
    pub always_bet: bool,
    pub delay: f64,
    pub delay_mode: DelayMode,
    pub filter_condition: Option<FilterCondition>,
}

impl Default for BetSettings {
    fn default() -> Self {
        Self {
            strategy: Strategy::Smart,
            percentage: 5,
            max_points: 50_000,
            minimum_points: 0,
            only_doubt: false,
            stealth_mode: false,
            percentage_gap: 20.0,
            target_odd: 3.0,
            always_bet: false,
            delay: 6.0,
            delay_mode: DelayMode::FromEnd,
            filter_condition: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_names_accept_both_spellings() {
        assert_eq!("SmartHighOdds".parse::<Strategy>().unwrap(), Strategy::SmartHighOdds);
        assert_eq!("MOST_VOTED".parse::<Strategy>().unwrap(), Strategy::MostVoted);
        assert!(matches!("Random".parse::<Strategy>(), Err(AppError::Config(_))));
    }

    #[test]
    fn filter_condition_parses_triplet() {
        let f: FilterCondition = "odds, GT, 2.6".parse().unwrap();
        assert_eq!(f.by, OutcomeKey::Odds);
        assert_eq!(f.condition, Condition::Gt);
        assert!((f.value - 2.6).abs() < 1e-9);
    }

    #[test]
    fn malformed_filter_condition_is_a_config_error() {
        assert!("ODDS,GT".parse::<FilterCondition>().is_err());
        assert!("ODDS,ABOUT,2".parse::<FilterCondition>().is_err());
        assert!("ODDS,GT,high".parse::<FilterCondition>().is_err());
    }

    #[test]
    fn delay_modes_place_bet_inside_window() {
        assert_eq!(DelayMode::FromStart.bet_offset_secs(6.0, 120.0), 6.0);
        assert_eq!(DelayMode::FromStart.bet_offset_secs(600.0, 120.0), 120.0);
        assert_eq!(DelayMode::FromEnd.bet_offset_secs(6.0, 120.0), 114.0);
        assert_eq!(DelayMode::FromEnd.bet_offset_secs(600.0, 120.0), 0.0);
        assert_eq!(DelayMode::Percentage.bet_offset_secs(0.5, 120.0), 60.0);
    }
}
