pub mod outcome;
pub mod settings;
pub mod strategy;

pub use outcome::{Outcomes, RawOutcome};
pub use settings::{BetSettings, DelayMode, FilterCondition, Strategy};
pub use strategy::{BetEngine, Decision};
