use serde::Deserialize;

use crate::error::{AppError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Choice {
    A,
    B,
}

impl Choice {
    pub fn index(&self) -> usize {
        match self {
            Choice::A => 0,
            Choice::B => 1,
        }
    }
}

impl std::fmt::Display for Choice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Choice::A => write!(f, "A"),
            Choice::B => write!(f, "B"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TopPredictor {
    #[serde(default)]
    pub points: u64,
}

/// Outcome as it arrives inside a prediction event.
#[derive(Debug, Clone, Deserialize)]
pub struct RawOutcome {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub color: String,
    pub total_users: u64,
    pub total_points: u64,
    #[serde(default)]
    pub top_predictors: Vec<TopPredictor>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Outcome {
    pub id: String,
    pub title: String,
    pub color: String,
    pub total_users: u64,
    pub total_points: u64,
    /// Largest single stake on this side.
    pub top_points: u64,
    pub percentage_users: f64,
    pub odds: f64,
    pub odds_percentage: f64,
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({}), Points: {}, Users: {} ({}%), Odds: {} ({}%)",
            self.title,
            self.color,
            self.total_points,
            self.total_users,
            self.percentage_users,
            self.odds,
            self.odds_percentage
        )
    }
}

/// Exactly two outcomes plus their totals. Derived fields are recomputed on every update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Outcomes {
    pub items: [Outcome; 2],
    pub total_users: u64,
    pub total_points: u64,
}

impl Outcomes {
    pub fn from_raw(raw: &[RawOutcome]) -> Result<Self> {
        let mut outcomes = Self::default();
        outcomes.update(raw)?;
        Ok(outcomes)
    }

    /// Applies fresh raw totals. On malformed input the previous state is kept.
    pub fn update(&mut self, raw: &[RawOutcome]) -> Result<()> {
        let [raw_a, raw_b] = raw else {
            return Err(AppError::Decode(format!(
                "prediction must carry exactly 2 outcomes, got {}",
                raw.len()
            )));
        };

        let mut items = [self.merge(0, raw_a), self.merge(1, raw_b)];
        let total_users = items[0].total_users + items[1].total_users;
        let total_points = items[0].total_points + items[1].total_points;

        let defined = total_users > 0 && items.iter().all(|o| o.total_points > 0);
        for item in items.iter_mut() {
            if defined {
                item.percentage_users = float_round(100.0 * item.total_users as f64 / total_users as f64);
                item.odds = float_round(total_points as f64 / item.total_points as f64);
                item.odds_percentage = float_round(100.0 / item.odds);
            } else {
                item.percentage_users = 0.0;
                item.odds = 0.0;
                item.odds_percentage = 0.0;
            }
        }

        self.items = items;
        self.total_users = total_users;
        self.total_points = total_points;
        Ok(())
    }

    /// Keeps the previous `top_points` when the update carries no top predictors.
    fn merge(&self, index: usize, raw: &RawOutcome) -> Outcome {
        let top_points = raw
            .top_predictors
            .iter()
            .map(|p| p.points)
            .max()
            .unwrap_or(self.items[index].top_points);
        Outcome {
            id: raw.id.clone(),
            title: raw.title.trim().to_string(),
            color: raw.color.clone(),
            total_users: raw.total_users,
            total_points: raw.total_points,
            top_points,
            ..Outcome::default()
        }
    }

    pub fn get(&self, choice: Choice) -> &Outcome {
        &self.items[choice.index()]
    }

    pub fn a(&self) -> &Outcome {
        &self.items[0]
    }

    pub fn b(&self) -> &Outcome {
        &self.items[1]
    }
}

fn float_round(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
