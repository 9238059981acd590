use crate::error::{ModelError, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Strategy used to estimate team strengths
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FitMethod {
    /// Per-team rate decomposition against the league average
    ClosedForm,
    /// Poisson maximum likelihood over all coefficients
    Mle,
}

impl FromStr for FitMethod {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "closed-form" | "closed_form" | "closedform" => Ok(FitMethod::ClosedForm),
            "mle" => Ok(FitMethod::Mle),
            _ => Err(ModelError::InvalidConfig {
                field: "fit_method",
                value: s.to_string(),
                reason: "expected `mle` or `closed-form`",
            }),
        }
    }
}

/// What to do when a fixture names a team that has no rating
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnknownTeamPolicy {
    /// Fail with `UnknownTeam`
    Strict,
    /// Use attack = defence = 0
    Neutral,
}

impl FromStr for UnknownTeamPolicy {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "strict" => Ok(UnknownTeamPolicy::Strict),
            "neutral" => Ok(UnknownTeamPolicy::Neutral),
            _ => Err(ModelError::InvalidConfig {
                field: "unknown_team_policy",
                value: s.to_string(),
                reason: "expected `strict` or `neutral`",
            }),
        }
    }
}

/// Every tunable of the pipeline. Passed explicitly into each call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BettingConfig {
    /// Fit on expected goals instead of actual goals
    pub use_xg: bool,
    /// How much we trust the model vs the market
    pub model_weight: f64,
    /// Minimum edge to recommend a bet
    pub min_edge: f64,
    /// Fraction of full Kelly actually staked
    pub kelly_fraction: f64,
    /// Scoreline enumeration cutoff
    pub max_goals: u32,
    pub fit_method: FitMethod,
    /// Use the closed-form fit when the MLE does not converge
    pub fallback_to_closed_form: bool,
    pub unknown_team_policy: UnknownTeamPolicy,
    pub max_iterations: usize,
    pub tolerance: f64,
    pub n_simulations: usize,
    pub seed: u64,
}

impl Default for BettingConfig {
    fn default() -> Self {
        Self {
            use_xg: false,
            model_weight: 0.30,
            min_edge: 0.03,
            kelly_fraction: 0.25,
            max_goals: 10,
            fit_method: FitMethod::Mle,
            fallback_to_closed_form: false,
            unknown_team_policy: UnknownTeamPolicy::Strict,
            max_iterations: 500,
            tolerance: 1e-6,
            n_simulations: 20_000,
            seed: 42,
        }
    }
}

pub const MIN_MAX_GOALS: u32 = 5;

impl BettingConfig {
    /// Defaults overridden by `EPL_*` environment variables (and `.env`)
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(v) = lookup("EPL_USE_XG") {
            config.use_xg = parse_bool("use_xg", &v)?;
        }
        if let Some(v) = lookup("EPL_MODEL_WEIGHT") {
            config.model_weight = parse_value("model_weight", &v)?;
        }
        if let Some(v) = lookup("EPL_MIN_EDGE") {
            config.min_edge = parse_value("min_edge", &v)?;
        }
        if let Some(v) = lookup("EPL_KELLY_FRACTION") {
            config.kelly_fraction = parse_value("kelly_fraction", &v)?;
        }
        if let Some(v) = lookup("EPL_MAX_GOALS") {
            config.max_goals = parse_value("max_goals", &v)?;
        }
        if let Some(v) = lookup("EPL_FIT_METHOD") {
            config.fit_method = v.parse()?;
        }
        if let Some(v) = lookup("EPL_FALLBACK") {
            config.fallback_to_closed_form = parse_bool("fallback_to_closed_form", &v)?;
        }
        if let Some(v) = lookup("EPL_UNKNOWN_TEAM") {
            config.unknown_team_policy = v.parse()?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject out-of-range values. Nothing is clamped.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.model_weight) {
            return Err(invalid("model_weight", self.model_weight, "must be in [0, 1]"));
        }
        if !(self.kelly_fraction > 0.0 && self.kelly_fraction <= 1.0) {
            return Err(invalid("kelly_fraction", self.kelly_fraction, "must be in (0, 1]"));
        }
        if !self.min_edge.is_finite() {
            return Err(invalid("min_edge", self.min_edge, "must be finite"));
        }
        if self.max_goals < MIN_MAX_GOALS {
            return Err(invalid("max_goals", self.max_goals, "must be at least 5"));
        }
        if self.max_iterations == 0 {
            return Err(invalid("max_iterations", self.max_iterations, "must be at least 1"));
        }
        if !(self.tolerance > 0.0 && self.tolerance.is_finite()) {
            return Err(invalid("tolerance", self.tolerance, "must be positive"));
        }
        if self.n_simulations == 0 {
            return Err(invalid("n_simulations", self.n_simulations, "must be at least 1"));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, value: impl ToString, reason: &'static str) -> ModelError {
    ModelError::InvalidConfig {
        field,
        value: value.to_string(),
        reason,
    }
}

fn parse_value<T: FromStr>(field: &'static str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| invalid(field, raw, "not a valid number"))
}

fn parse_bool(field: &'static str, raw: &str) -> Result<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        _ => Err(invalid(field, raw, "expected true/false or 1/0")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        let config = BettingConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.unknown_team_policy, UnknownTeamPolicy::Strict);
        assert_eq!(config.max_goals, 10);
    }

    #[test]
    fn test_out_of_range_values_are_rejected() {
        let config = BettingConfig {
            model_weight: 1.2,
            ..BettingConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ModelError::InvalidConfig { field: "model_weight", .. })
        ));

        let config = BettingConfig {
            kelly_fraction: 0.0,
            ..BettingConfig::default()
        };
        assert!(config.validate().is_err());

        let config = BettingConfig {
            max_goals: 4,
            ..BettingConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_lookup_overrides() {
        let env: HashMap<&str, &str> = [
            ("EPL_USE_XG", "1"),
            ("EPL_MODEL_WEIGHT", "0.5"),
            ("EPL_FIT_METHOD", "closed-form"),
            ("EPL_UNKNOWN_TEAM", "neutral"),
        ]
        .into_iter()
        .collect();
        let config =
            BettingConfig::from_lookup(|key| env.get(key).map(|v| v.to_string())).unwrap();
        assert!(config.use_xg);
        assert_eq!(config.model_weight, 0.5);
        assert_eq!(config.fit_method, FitMethod::ClosedForm);
        assert_eq!(config.unknown_team_policy, UnknownTeamPolicy::Neutral);
        assert_eq!(config.kelly_fraction, 0.25);
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        let result = BettingConfig::from_lookup(|key| {
            (key == "EPL_MIN_EDGE").then(|| "three percent".to_string())
        });
        assert!(matches!(
            result,
            Err(ModelError::InvalidConfig { field: "min_edge", .. })
        ));

        let result =
            BettingConfig::from_lookup(|key| (key == "EPL_KELLY_FRACTION").then(|| "2".to_string()));
        assert!(result.is_err());
    }
}
