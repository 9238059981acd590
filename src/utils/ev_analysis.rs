use crate::config::BettingConfig;
use crate::error::{ModelError, Result};
use crate::models::{DecimalOdds, EdgeRecord, FixtureOdds, Outcome, OutcomeEdge, ProbabilityTriple, RatingTable};
use crate::utils::ev_calculator::{kelly_fraction, market_probs};
use crate::utils::score_distribution::fixture_probs;
use tracing::{debug, warn};

/// Blend model and market probabilities:
/// posterior = w * model + (1 - w) * market, renormalised
pub fn blend(model: &ProbabilityTriple, market: &ProbabilityTriple, weight: f64) -> Result<ProbabilityTriple> {
    if !(0.0..=1.0).contains(&weight) {
        return Err(ModelError::InvalidConfig {
            field: "model_weight",
            value: weight.to_string(),
            reason: "must be in [0, 1]",
        });
    }
    ProbabilityTriple::normalized(
        weight * model.home + (1.0 - weight) * market.home,
        weight * model.draw + (1.0 - weight) * market.draw,
        weight * model.away + (1.0 - weight) * market.away,
    )
}

/// Evaluate all three outcomes of a fixture.
///
/// Edge and stake are driven off the blended posterior, never the raw model.
/// Outcomes below `min_edge` are still returned, flagged as not recommended.
pub fn evaluate(
    model: &ProbabilityTriple,
    market: &ProbabilityTriple,
    odds: &DecimalOdds,
    config: &BettingConfig,
) -> Result<[OutcomeEdge; 3]> {
    config.validate()?;
    let posterior = blend(model, market, config.model_weight)?;

    Ok(Outcome::ALL.map(|side| {
        let odd = odds.get(side);
        let p_final = posterior.get(side);
        let p_market = market.get(side);
        let edge = p_final - p_market;
        let kelly_full = kelly_fraction(p_final, odd);

        OutcomeEdge {
            bet_side: side,
            odds: odd,
            p_model: model.get(side),
            p_market,
            p_final,
            edge,
            kelly_full,
            stake_fraction: config.kelly_fraction * kelly_full,
            recommended: edge >= config.min_edge,
        }
    }))
}

/// Full pipeline for one fixture: ratings -> model probs, odds -> market probs,
/// then edges and stakes
pub fn evaluate_fixture(
    ratings: &RatingTable,
    fixture: &FixtureOdds,
    config: &BettingConfig,
) -> Result<Vec<EdgeRecord>> {
    let model = fixture_probs(
        ratings,
        &fixture.home_team,
        &fixture.away_team,
        config.max_goals,
        config.unknown_team_policy,
    )?;
    let market = market_probs(&fixture.odds)?;
    let outcomes = evaluate(&model, &market, &fixture.odds, config)?;

    debug!(
        home = %fixture.home_team,
        away = %fixture.away_team,
        p_home = model.home,
        p_draw = model.draw,
        p_away = model.away,
        "fixture evaluated"
    );

    Ok(outcomes
        .iter()
        .map(|outcome| EdgeRecord::from_outcome(fixture, outcome))
        .collect())
}

/// Evaluate every fixture independently. A failure for one fixture is
/// returned in its slot and does not affect the others.
pub fn evaluate_fixtures(
    ratings: &RatingTable,
    fixtures: &[FixtureOdds],
    config: &BettingConfig,
) -> Vec<Result<Vec<EdgeRecord>>> {
    fixtures
        .iter()
        .map(|fixture| {
            let result = evaluate_fixture(ratings, fixture, config);
            if let Err(e) = &result {
                warn!(
                    home = %fixture.home_team,
                    away = %fixture.away_team,
                    error = %e,
                    "skipping fixture"
                );
            }
            result
        })
        .collect()
}

/// Flatten per-fixture results and sort by edge (descending)
pub fn collect_edges(results: Vec<Result<Vec<EdgeRecord>>>) -> Vec<EdgeRecord> {
    let mut all_edges: Vec<EdgeRecord> = results.into_iter().flatten().flatten().collect();
    sort_by_edge(&mut all_edges);
    all_edges
}

pub fn sort_by_edge(edges: &mut [EdgeRecord]) {
    edges.sort_by(|a, b| b.edge.partial_cmp(&a.edge).unwrap_or(std::cmp::Ordering::Equal));
}

/// Only the outcomes that clear the minimum edge
pub fn recommended(edges: &[EdgeRecord]) -> Vec<EdgeRecord> {
    edges.iter().filter(|e| e.recommended).cloned().collect()
}
