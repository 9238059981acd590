pub mod config;
pub mod error;
pub mod models;
pub mod utils;

pub use config::*;
pub use error::{ModelError, Result};
pub use models::*;
pub use utils::*;

use serde::{Deserialize, Serialize};
use tracing::info;
use utils::ev_analysis::{evaluate_fixtures, sort_by_edge};
use utils::strength::{fit, FitReport};

/// A fixture that could not be evaluated, with the reason
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureFailure {
    pub home_team: String,
    pub away_team: String,
    pub reason: String,
}

/// Everything produced by one prediction run
#[derive(Debug, Clone)]
pub struct PredictionRun {
    pub fit: Option<FitReport>,
    pub ratings: RatingTable,
    /// All outcomes of every evaluated fixture, sorted by edge (descending)
    pub edges: Vec<EdgeRecord>,
    pub failures: Vec<FixtureFailure>,
}

impl PredictionRun {
    /// Only the outcomes that clear the minimum edge, still sorted by edge
    pub fn recommended(&self) -> Vec<EdgeRecord> {
        utils::ev_analysis::recommended(&self.edges)
    }
}

/// Fit ratings on completed matches, then price every fixture
pub fn predict_fixtures(
    matches: &[HistoricalMatch],
    fixtures: &[FixtureOdds],
    config: &BettingConfig,
) -> Result<PredictionRun> {
    config.validate()?;
    let corpus: Vec<MatchRecord> = matches.iter().map(|m| m.record.clone()).collect();
    let report = fit(&corpus, config)?;
    let ratings = report.ratings.clone();

    let mut run = predict_with_ratings(ratings, fixtures, config)?;
    run.fit = Some(report);
    Ok(run)
}

/// Price fixtures against an existing rating table
pub fn predict_with_ratings(
    ratings: RatingTable,
    fixtures: &[FixtureOdds],
    config: &BettingConfig,
) -> Result<PredictionRun> {
    config.validate()?;
    let results = evaluate_fixtures(&ratings, fixtures, config);

    let mut edges = Vec::new();
    let mut failures = Vec::new();
    for (fixture, result) in fixtures.iter().zip(results) {
        match result {
            Ok(records) => edges.extend(records),
            Err(e) => failures.push(FixtureFailure {
                home_team: fixture.home_team.clone(),
                away_team: fixture.away_team.clone(),
                reason: e.to_string(),
            }),
        }
    }
    sort_by_edge(&mut edges);

    info!(
        fixtures = fixtures.len(),
        failed = failures.len(),
        recommended = edges.iter().filter(|e| e.recommended).count(),
        "prediction run finished"
    );

    Ok(PredictionRun {
        fit: None,
        ratings,
        edges,
        failures,
    })
}
