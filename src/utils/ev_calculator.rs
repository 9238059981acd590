use crate::error::{ModelError, Result};
use crate::models::{DecimalOdds, ProbabilityTriple};

/// Raw implied probability of a decimal odd (1 / odds).
/// Decimal odds of 2.50 pay 2.50 back per unit staked, stake included.
pub fn decimal_odds_to_probability(odds: f64) -> Result<f64> {
    if !odds.is_finite() || odds < 1.0 {
        return Err(ModelError::InvalidOdds { odds });
    }
    Ok(1.0 / odds)
}

/// Bookmaker margin: sum of raw implied probabilities minus 1
pub fn overround(odds: &DecimalOdds) -> Result<f64> {
    let total = decimal_odds_to_probability(odds.home)?
        + decimal_odds_to_probability(odds.draw)?
        + decimal_odds_to_probability(odds.away)?;
    Ok(total - 1.0)
}

/// Convert 1X2 decimal odds into probabilities with the overround removed
pub fn implied_probs(odds_home: f64, odds_draw: f64, odds_away: f64) -> Result<ProbabilityTriple> {
    let inv_home = decimal_odds_to_probability(odds_home)?;
    let inv_draw = decimal_odds_to_probability(odds_draw)?;
    let inv_away = decimal_odds_to_probability(odds_away)?;

    // Dividing by the total strips the bookmaker's margin.
    ProbabilityTriple::normalized(inv_home, inv_draw, inv_away)
}

pub fn market_probs(odds: &DecimalOdds) -> Result<ProbabilityTriple> {
    implied_probs(odds.home, odds.draw, odds.away)
}

/// Expected profit per unit staked: p * odds - 1
pub fn calculate_expected_value(prob: f64, odds: f64) -> f64 {
    prob * odds - 1.0
}

/// Full Kelly fraction for a single outcome at decimal odds.
///
/// f* = (p * odds - 1) / (odds - 1), floored at zero. Odds of 1 or less
/// can never pay out, so they are a non-bet.
pub fn kelly_fraction(prob: f64, odds: f64) -> f64 {
    if odds <= 1.0 {
        return 0.0;
    }
    let ev = calculate_expected_value(prob, odds);
    if ev <= 0.0 {
        return 0.0;
    }
    ev / (odds - 1.0)
}
