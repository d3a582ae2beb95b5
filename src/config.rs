use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Error;

pub const DEFAULT_HALF_LIFE_DAYS: f64 = 21.0;
pub const DEFAULT_PRIOR_MEAN: f64 = 3.0;
pub const DEFAULT_PRIOR_N: f64 = 5.0;
pub const DEFAULT_LOW_RATED_THRESHOLD: f64 = 2.6;

/// Tuning knobs for graph building, routing and rating aggregation.
///
/// Every field has a default, so a TOML file only needs the keys it overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Decimal places kept when snapping segment endpoints into nodes.
    pub coordinate_precision: u32,
    /// Days after which an observation weighs half as much.
    pub half_life_days: f64,
    /// Score every segment is shrunk towards.
    pub prior_mean: f64,
    /// Pseudo-observations backing the prior.
    pub prior_n: f64,
    /// Cap on the rolling 30-day window weight.
    pub window_max_weight: f64,
    /// Weight added by an "agree" nudge.
    pub agree_increment: f64,
    /// `sum_w` ceiling an "agree" nudge can reach.
    pub agree_cap: f64,
    /// Synthetic score increment of a "feels safer" nudge.
    pub feels_safer_step: f64,
    /// Bump applied to `delta_30d` by a "feels safer" nudge.
    pub feels_safer_trend_bump: f64,
    /// Number of entries kept in `top_tags`.
    pub top_tags_limit: usize,
    /// Segments whose mean is below this count as low-rated.
    pub low_rated_threshold: f64,
    /// Penalty factor used when a path query does not supply one.
    pub default_penalty_factor: f64,
    /// Multiplier applied when the alternative route equals the base route.
    pub penalty_escalation: f64,
    /// How many times the penalty factor may be escalated.
    pub max_escalations: u32,
    /// Walking speed in meters per second.
    pub walk_speed_mps: f64,
    /// Cycling speed in meters per second.
    pub bike_speed_mps: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            coordinate_precision: 6,
            half_life_days: DEFAULT_HALF_LIFE_DAYS,
            prior_mean: DEFAULT_PRIOR_MEAN,
            prior_n: DEFAULT_PRIOR_N,
            window_max_weight: 100.0,
            agree_increment: 0.3,
            agree_cap: 50.0,
            feels_safer_step: 0.1,
            feels_safer_trend_bump: 0.05,
            top_tags_limit: 3,
            low_rated_threshold: DEFAULT_LOW_RATED_THRESHOLD,
            default_penalty_factor: 1.2,
            penalty_escalation: 2.0,
            max_escalations: 2,
            walk_speed_mps: 1.4,
            bike_speed_mps: 4.2,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, Error> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and validates a TOML config file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, does not parse, or holds
    /// values no formula can work with.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    fn validate(&self) -> Result<(), Error> {
        let positive = [
            ("half_life_days", self.half_life_days),
            ("window_max_weight", self.window_max_weight),
            ("walk_speed_mps", self.walk_speed_mps),
            ("bike_speed_mps", self.bike_speed_mps),
        ];
        for (name, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(Error::InvalidConfig(format!(
                    "{name} must be a positive number, got {value}"
                )));
            }
        }

        let non_negative = [
            ("prior_n", self.prior_n),
            ("agree_increment", self.agree_increment),
            ("agree_cap", self.agree_cap),
            ("feels_safer_step", self.feels_safer_step),
            ("default_penalty_factor", self.default_penalty_factor),
        ];
        for (name, value) in non_negative {
            if !value.is_finite() || value < 0.0 {
                return Err(Error::InvalidConfig(format!(
                    "{name} must be zero or positive, got {value}"
                )));
            }
        }

        if !(1.0..=5.0).contains(&self.prior_mean) {
            return Err(Error::InvalidConfig(format!(
                "prior_mean must lie in [1, 5], got {}",
                self.prior_mean
            )));
        }
        if !self.penalty_escalation.is_finite() || self.penalty_escalation < 1.0 {
            return Err(Error::InvalidConfig(format!(
                "penalty_escalation must be at least 1, got {}",
                self.penalty_escalation
            )));
        }
        if !self.low_rated_threshold.is_finite() {
            return Err(Error::InvalidConfig(format!(
                "low_rated_threshold must be a finite number, got {}",
                self.low_rated_threshold
            )));
        }
        if self.top_tags_limit == 0 {
            return Err(Error::InvalidConfig("top_tags_limit must be at least 1".to_string()));
        }
        if self.coordinate_precision > 9 {
            return Err(Error::InvalidConfig(format!(
                "coordinate_precision above 9 overflows node keys, got {}",
                self.coordinate_precision
            )));
        }
        Ok(())
    }
}
