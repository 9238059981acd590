use crate::config::BettingConfig;
use crate::error::{ModelError, Result};
use crate::models::{DecimalOdds, EdgeRecord, FixtureOdds, HistoricalMatch, MatchRecord, Outcome, ProbabilityTriple, RatingTable};
use crate::utils::ev_analysis::evaluate_fixture;
use crate::utils::ev_calculator::market_probs;
use crate::utils::score_distribution::fixture_probs;
use crate::utils::strength::fit;
use chrono::NaiveDate;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// A bet that has been placed and resolved
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettledBet {
    pub date: Option<NaiveDate>,
    pub home_team: String,
    pub away_team: String,
    pub bet_side: Outcome,
    pub odds: f64,
    /// Fraction of bankroll staked
    pub stake: f64,
    pub won: bool,
}

impl SettledBet {
    pub fn profit(&self) -> f64 {
        let payout = if self.won { self.odds } else { 0.0 };
        self.stake * (payout - 1.0)
    }
}

/// Profit divided by total staked; 0 when nothing was staked
pub fn compute_roi(bets: &[SettledBet]) -> f64 {
    let total_staked: f64 = bets.iter().map(|b| b.stake).sum();
    if total_staked <= 0.0 {
        return 0.0;
    }
    let profit: f64 = bets.iter().map(SettledBet::profit).sum();
    profit / total_staked
}

/// Cumulative profit ordered by date (undated bets first, input order kept on ties)
pub fn equity_curve(bets: &[SettledBet]) -> Vec<(Option<NaiveDate>, f64)> {
    let mut ordered: Vec<&SettledBet> = bets.iter().collect();
    ordered.sort_by_key(|b| b.date);

    let mut running = 0.0;
    ordered
        .into_iter()
        .map(|b| {
            running += b.profit();
            (b.date, running)
        })
        .collect()
}

/// Scoring of probabilistic forecasts against realised outcomes
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub samples: usize,
    pub brier: f64,
    pub log_loss: f64,
    pub accuracy: f64,
}

impl Metrics {
    pub fn empty() -> Self {
        Self {
            samples: 0,
            brier: 0.0,
            log_loss: 0.0,
            accuracy: 0.0,
        }
    }
}

pub fn evaluate_probs(predictions: &[ProbabilityTriple], outcomes: &[Outcome]) -> Metrics {
    let n = predictions.len().min(outcomes.len());
    if n == 0 {
        return Metrics::empty();
    }

    let mut brier = 0.0;
    let mut log_loss = 0.0;
    let mut correct = 0usize;
    for (p, outcome) in predictions.iter().zip(outcomes).take(n) {
        for side in Outcome::ALL {
            let y = if side == *outcome { 1.0 } else { 0.0 };
            brier += (p.get(side) - y).powi(2);
        }
        log_loss -= p.get(*outcome).max(1e-15).ln();
        if argmax(p) == *outcome {
            correct += 1;
        }
    }

    let n_f = n as f64;
    Metrics {
        samples: n,
        brier: brier / n_f,
        log_loss: log_loss / n_f,
        accuracy: correct as f64 / n_f,
    }
}

fn argmax(p: &ProbabilityTriple) -> Outcome {
    if p.home >= p.draw && p.home >= p.away {
        Outcome::Home
    } else if p.draw >= p.away {
        Outcome::Draw
    } else {
        Outcome::Away
    }
}

/// Model against market for one historical match
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketComparison {
    pub date: Option<NaiveDate>,
    pub home_team: String,
    pub away_team: String,
    pub odds: DecimalOdds,
    pub model: ProbabilityTriple,
    pub market: ProbabilityTriple,
    /// Raw model minus market, per outcome
    pub edge_home: f64,
    pub edge_draw: f64,
    pub edge_away: f64,
    pub result: Option<Outcome>,
}

/// Compare model and market probabilities for each historical match.
/// Matches without odds fail in their own slot.
pub fn compare_model_to_market(
    ratings: &RatingTable,
    history: &[HistoricalMatch],
    config: &BettingConfig,
) -> Vec<Result<MarketComparison>> {
    history
        .iter()
        .enumerate()
        .map(|(row, m)| {
            let odds = m.odds.ok_or_else(|| ModelError::MissingColumn {
                column: "odds_home".to_string(),
                row: Some(row),
            })?;
            let record = &m.record;
            let model = fixture_probs(
                ratings,
                &record.home_team,
                &record.away_team,
                config.max_goals,
                config.unknown_team_policy,
            )?;
            let market = market_probs(&odds)?;
            Ok(MarketComparison {
                date: record.date,
                home_team: record.home_team.clone(),
                away_team: record.away_team.clone(),
                odds,
                model,
                market,
                edge_home: model.home - market.home,
                edge_draw: model.draw - market.draw,
                edge_away: model.away - market.away,
                result: record.result(),
            })
        })
        .collect()
}

/// Walk-forward schedule: train on everything before `start`, test the next
/// `step` matches, then advance by `step`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WalkForward {
    pub min_train: usize,
    pub step: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestReport {
    pub windows: usize,
    pub skipped_windows: usize,
    pub fixtures_evaluated: usize,
    pub bets: Vec<SettledBet>,
    pub total_staked: f64,
    pub profit: f64,
    pub roi: f64,
    pub model_metrics: Metrics,
    pub market_metrics: Metrics,
}

#[derive(Debug, Default)]
struct WindowResult {
    bets: Vec<SettledBet>,
    model: Vec<ProbabilityTriple>,
    market: Vec<ProbabilityTriple>,
    outcomes: Vec<Outcome>,
}

/// Walk-forward backtest. Every window fits its own ratings, so windows run in
/// parallel without sharing state.
pub fn walk_forward(
    history: &[HistoricalMatch],
    plan: WalkForward,
    config: &BettingConfig,
) -> Result<BacktestReport> {
    config.validate()?;
    if plan.min_train == 0 || plan.step == 0 {
        return Err(ModelError::InvalidConfig {
            field: "walk_forward",
            value: format!("min_train={}, step={}", plan.min_train, plan.step),
            reason: "min_train and step must be at least 1",
        });
    }
    if history.len() <= plan.min_train {
        return Err(ModelError::InsufficientData {
            reason: format!(
                "{} matches is not enough for a {}-match training window",
                history.len(),
                plan.min_train
            ),
        });
    }

    let mut ordered: Vec<&HistoricalMatch> = history.iter().collect();
    ordered.sort_by_key(|m| m.record.date);

    let starts: Vec<usize> = (plan.min_train..ordered.len()).step_by(plan.step).collect();
    let results: Vec<Result<WindowResult>> = starts
        .par_iter()
        .map(|&start| {
            let end = (start + plan.step).min(ordered.len());
            run_window(&ordered[..start], &ordered[start..end], config)
        })
        .collect();

    let windows = results.len();
    let mut skipped_windows = 0;
    let mut merged = WindowResult::default();
    for (start, result) in starts.iter().zip(results) {
        match result {
            Ok(window) => {
                merged.bets.extend(window.bets);
                merged.model.extend(window.model);
                merged.market.extend(window.market);
                merged.outcomes.extend(window.outcomes);
            }
            Err(e) => {
                warn!(start, error = %e, "skipping backtest window");
                skipped_windows += 1;
            }
        }
    }

    let total_staked: f64 = merged.bets.iter().map(|b| b.stake).sum();
    let profit: f64 = merged.bets.iter().map(SettledBet::profit).sum();
    let report = BacktestReport {
        windows,
        skipped_windows,
        fixtures_evaluated: merged.outcomes.len(),
        roi: compute_roi(&merged.bets),
        bets: merged.bets,
        total_staked,
        profit,
        model_metrics: evaluate_probs(&merged.model, &merged.outcomes),
        market_metrics: evaluate_probs(&merged.market, &merged.outcomes),
    };

    info!(
        windows = report.windows,
        skipped = report.skipped_windows,
        bets = report.bets.len(),
        roi = report.roi,
        "walk-forward backtest finished"
    );

    Ok(report)
}

fn run_window(
    train: &[&HistoricalMatch],
    test: &[&HistoricalMatch],
    config: &BettingConfig,
) -> Result<WindowResult> {
    let corpus: Vec<MatchRecord> = train.iter().map(|m| m.record.clone()).collect();
    let ratings = fit(&corpus, config)?.ratings;

    let mut out = WindowResult::default();
    for m in test {
        let (Some(odds), Some(result)) = (m.odds, m.record.result()) else {
            continue;
        };
        let fixture = FixtureOdds {
            date: m.record.date,
            home_team: m.record.home_team.clone(),
            away_team: m.record.away_team.clone(),
            odds,
        };
        let records = match evaluate_fixture(&ratings, &fixture, config) {
            Ok(records) => records,
            Err(e) => {
                // Typically a side with no matches in the training window.
                warn!(home = %fixture.home_team, away = %fixture.away_team, error = %e, "fixture skipped");
                continue;
            }
        };

        out.model.push(triple_from(&records, |r| r.p_model));
        out.market.push(triple_from(&records, |r| r.p_market));
        out.outcomes.push(result);
        out.bets.extend(
            records
                .iter()
                .filter(|r| r.recommended && r.stake_fraction > 0.0)
                .map(|r| SettledBet {
                    date: r.date,
                    home_team: r.home_team.clone(),
                    away_team: r.away_team.clone(),
                    bet_side: r.bet_side,
                    odds: r.odds,
                    stake: r.stake_fraction,
                    won: r.bet_side == result,
                }),
        );
    }
    Ok(out)
}

/// Rebuild a triple from the three per-outcome records of one fixture
fn triple_from(records: &[EdgeRecord], value: impl Fn(&EdgeRecord) -> f64) -> ProbabilityTriple {
    let mut p = ProbabilityTriple {
        home: 0.0,
        draw: 0.0,
        away: 0.0,
    };
    for r in records {
        match r.bet_side {
            Outcome::Home => p.home = value(r),
            Outcome::Draw => p.draw = value(r),
            Outcome::Away => p.away = value(r),
        }
    }
    p
}
