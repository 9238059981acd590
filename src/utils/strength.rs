use crate::config::{BettingConfig, FitMethod};
use crate::error::{ModelError, Result};
use crate::models::{MatchRecord, RatingTable, TeamRating};
use crate::utils::optimizer::Bfgs;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{info, warn};

/// Keeps rates away from zero before taking logs
pub const RATE_EPSILON: f64 = 1e-8;

/// Weight of the sum-to-zero identification penalty in the MLE objective
const IDENTIFICATION_PENALTY: f64 = 1.0;

/// Optimizer outcome attached to an MLE fit
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Convergence {
    pub converged: bool,
    pub iterations: usize,
    pub gradient_norm: f64,
    /// Poisson log-likelihood without the constant `-ln(y!)` terms
    pub log_likelihood: f64,
}

/// Ratings plus how they were obtained
#[derive(Debug, Clone)]
pub struct FitReport {
    pub ratings: RatingTable,
    /// Strategy that produced `ratings`
    pub method: FitMethod,
    /// Present whenever the MLE was attempted
    pub convergence: Option<Convergence>,
    /// MLE failed to converge and the closed-form table was returned instead
    pub fell_back: bool,
    pub matches: usize,
}

/// Ratings from a single MLE run, converged or not
#[derive(Debug, Clone)]
pub struct MleFit {
    pub ratings: RatingTable,
    pub convergence: Convergence,
}

/// Fit ratings with the configured strategy.
///
/// Both strategies share one convention: a side's goal rate is
/// `exp(intercept + attack[for] - defence[against] + home_advantage * is_home)`,
/// so a higher `defence` means fewer goals conceded.
///
/// A non-converged MLE is an error unless `fallback_to_closed_form` is set,
/// in which case the closed-form table is returned with `fell_back = true`.
pub fn fit(matches: &[MatchRecord], config: &BettingConfig) -> Result<FitReport> {
    match config.fit_method {
        FitMethod::ClosedForm => {
            let ratings = fit_closed_form(matches, config.use_xg)?;
            Ok(FitReport {
                ratings,
                method: FitMethod::ClosedForm,
                convergence: None,
                fell_back: false,
                matches: matches.len(),
            })
        }
        FitMethod::Mle => {
            let mle = fit_mle(matches, config.use_xg, config.max_iterations, config.tolerance)?;
            if mle.convergence.converged {
                return Ok(FitReport {
                    ratings: mle.ratings,
                    method: FitMethod::Mle,
                    convergence: Some(mle.convergence),
                    fell_back: false,
                    matches: matches.len(),
                });
            }

            if !config.fallback_to_closed_form {
                return Err(ModelError::OptimizerNonConvergence {
                    iterations: mle.convergence.iterations,
                    gradient_norm: mle.convergence.gradient_norm,
                });
            }

            warn!(
                iterations = mle.convergence.iterations,
                gradient_norm = mle.convergence.gradient_norm,
                "MLE did not converge, falling back to closed-form ratings"
            );
            let ratings = fit_closed_form(matches, config.use_xg)?;
            Ok(FitReport {
                ratings,
                method: FitMethod::ClosedForm,
                convergence: Some(mle.convergence),
                fell_back: true,
                matches: matches.len(),
            })
        }
    }
}

/// Per-team rate decomposition against the league average.
///
/// The intercept is `ln(league_avg) - home_advantage / 2`, not `ln(league_avg)`:
/// the venue split is centred so that an average home side and an average away
/// side straddle the league rate. MLE intercepts carry the level of the centred
/// coefficients instead, so the two are not directly comparable.
pub fn fit_closed_form(matches: &[MatchRecord], use_xg: bool) -> Result<RatingTable> {
    fit_closed_form_with_roster(matches, use_xg, &[])
}

/// Closed-form fit that also rates an explicit roster of teams.
///
/// Roster teams without any appearance in `matches` (e.g. promoted sides) get a
/// neutral rating.
pub fn fit_closed_form_with_roster(
    matches: &[MatchRecord],
    use_xg: bool,
    roster: &[&str],
) -> Result<RatingTable> {
    let corpus = Corpus::build(matches, use_xg)?;

    let n_obs = corpus.observations.len() as f64;
    let home_total: f64 = corpus.observations.iter().map(|o| o.home_value).sum();
    let away_total: f64 = corpus.observations.iter().map(|o| o.away_value).sum();

    let league_avg = (home_total + away_total) / (2.0 * n_obs);
    let mean_home = home_total / n_obs;
    let mean_away = away_total / n_obs;
    if mean_home <= 0.0 || mean_away <= 0.0 {
        return Err(ModelError::InsufficientData {
            reason: "home and away sides must both have scored to estimate home advantage".to_string(),
        });
    }
    let home_advantage = (mean_home / mean_away).ln();

    let n_teams = corpus.teams.len();
    let mut games = vec![0usize; n_teams];
    let mut scored = vec![0.0; n_teams];
    let mut conceded = vec![0.0; n_teams];
    for obs in &corpus.observations {
        games[obs.home] += 1;
        games[obs.away] += 1;
        scored[obs.home] += obs.home_value;
        conceded[obs.home] += obs.away_value;
        scored[obs.away] += obs.away_value;
        conceded[obs.away] += obs.home_value;
    }

    let mut teams = BTreeMap::new();
    for (idx, name) in corpus.teams.iter().enumerate() {
        // Every corpus team has at least one appearance.
        let played = games[idx] as f64;
        let for_rate = (scored[idx] / played).max(RATE_EPSILON);
        let against_rate = (conceded[idx] / played).max(RATE_EPSILON);
        teams.insert(
            name.clone(),
            TeamRating {
                attack: (for_rate / league_avg).ln(),
                defence: (league_avg / against_rate).ln(),
            },
        );
    }
    for team in roster {
        teams.entry(team.to_string()).or_insert(TeamRating::NEUTRAL);
    }

    // Centre the venue split on the league average.
    let intercept = league_avg.ln() - home_advantage / 2.0;

    info!(
        teams = teams.len(),
        matches = matches.len(),
        league_avg,
        home_advantage,
        "closed-form team strengths fitted"
    );

    Ok(RatingTable::new(teams, intercept, home_advantage))
}

/// Poisson maximum-likelihood fit of every coefficient.
///
/// Always returns the optimizer's final point together with its convergence
/// flag; deciding what to do with a non-converged fit is left to the caller.
pub fn fit_mle(
    matches: &[MatchRecord],
    use_xg: bool,
    max_iterations: usize,
    tolerance: f64,
) -> Result<MleFit> {
    let corpus = Corpus::build(matches, use_xg)?;
    let n_teams = corpus.teams.len();
    let layout = Layout { n_teams };

    let total: f64 = corpus
        .observations
        .iter()
        .map(|o| o.home_value + o.away_value)
        .sum();
    let league_avg = total / (2.0 * corpus.observations.len() as f64);

    let mut x0 = vec![0.0; layout.len()];
    x0[layout.intercept()] = league_avg.ln();

    let minimum = Bfgs::new(max_iterations, tolerance)
        .minimize(|params, grad| negative_log_likelihood(&corpus, layout, params, grad), x0);

    let params = &minimum.x;
    let attack_mean = params[..n_teams].iter().sum::<f64>() / n_teams as f64;
    let defence_mean = params[n_teams..2 * n_teams].iter().sum::<f64>() / n_teams as f64;

    let mut teams = BTreeMap::new();
    for (idx, name) in corpus.teams.iter().enumerate() {
        teams.insert(
            name.clone(),
            TeamRating {
                attack: params[layout.attack(idx)] - attack_mean,
                defence: params[layout.defence(idx)] - defence_mean,
            },
        );
    }
    // Centring is absorbed here so every rate is unchanged.
    let intercept = params[layout.intercept()] + attack_mean - defence_mean;
    let home_advantage = params[layout.home()];

    let convergence = Convergence {
        converged: minimum.converged,
        iterations: minimum.iterations,
        gradient_norm: minimum.gradient_norm,
        log_likelihood: -minimum.value,
    };

    info!(
        teams = n_teams,
        matches = matches.len(),
        converged = convergence.converged,
        iterations = convergence.iterations,
        log_likelihood = convergence.log_likelihood,
        home_advantage,
        "MLE team strengths fitted"
    );

    Ok(MleFit {
        ratings: RatingTable::new(teams, intercept, home_advantage),
        convergence,
    })
}

/// Index-resolved observation
#[derive(Debug, Clone, Copy)]
struct Observation {
    home: usize,
    away: usize,
    home_value: f64,
    away_value: f64,
}

struct Corpus {
    teams: Vec<String>,
    observations: Vec<Observation>,
}

impl Corpus {
    fn build(matches: &[MatchRecord], use_xg: bool) -> Result<Self> {
        if matches.is_empty() {
            return Err(ModelError::InsufficientData {
                reason: "match corpus is empty".to_string(),
            });
        }

        let mut values = Vec::with_capacity(matches.len());
        let mut names = BTreeSet::new();
        for (row, record) in matches.iter().enumerate() {
            values.push(record.scoring_values(use_xg, row)?);
            names.insert(record.home_team.as_str());
            names.insert(record.away_team.as_str());
        }

        let teams: Vec<String> = names.into_iter().map(str::to_string).collect();
        let index: HashMap<&str, usize> = teams
            .iter()
            .enumerate()
            .map(|(i, name)| (name.as_str(), i))
            .collect();

        let observations: Vec<Observation> = matches
            .iter()
            .zip(values)
            .map(|(record, (home_value, away_value))| Observation {
                home: index[record.home_team.as_str()],
                away: index[record.away_team.as_str()],
                home_value,
                away_value,
            })
            .collect();

        let total: f64 = observations.iter().map(|o| o.home_value + o.away_value).sum();
        if total <= 0.0 {
            return Err(ModelError::InsufficientData {
                reason: "no goals recorded in the corpus".to_string(),
            });
        }

        Ok(Self {
            teams,
            observations,
        })
    }
}

/// Flat parameter vector: attacks, defences, home advantage, intercept
#[derive(Debug, Clone, Copy)]
struct Layout {
    n_teams: usize,
}

impl Layout {
    fn len(&self) -> usize {
        2 * self.n_teams + 2
    }

    fn attack(&self, team: usize) -> usize {
        team
    }

    fn defence(&self, team: usize) -> usize {
        self.n_teams + team
    }

    fn home(&self) -> usize {
        2 * self.n_teams
    }

    fn intercept(&self) -> usize {
        2 * self.n_teams + 1
    }
}

/// Negative Poisson log-likelihood and its gradient.
///
/// Attack and defence are only identified up to a shared shift, so a penalty on
/// their sums pins both to zero without changing any rate.
fn negative_log_likelihood(corpus: &Corpus, layout: Layout, params: &[f64], grad: &mut [f64]) -> f64 {
    grad.iter_mut().for_each(|g| *g = 0.0);
    let intercept = params[layout.intercept()];
    let home_adv = params[layout.home()];
    let mut nll = 0.0;

    for obs in &corpus.observations {
        let sides = [
            (obs.home, obs.away, obs.home_value, 1.0),
            (obs.away, obs.home, obs.away_value, 0.0),
        ];
        for (scorer, opponent, goals, is_home) in sides {
            let eta = intercept + params[layout.attack(scorer)] - params[layout.defence(opponent)]
                + home_adv * is_home;
            let rate = eta.exp();
            nll += rate - goals * (rate + RATE_EPSILON).ln();

            // d/d(eta) of [rate - y ln(rate + eps)]
            let d_eta = rate - goals * rate / (rate + RATE_EPSILON);
            grad[layout.attack(scorer)] += d_eta;
            grad[layout.defence(opponent)] -= d_eta;
            grad[layout.home()] += d_eta * is_home;
            grad[layout.intercept()] += d_eta;
        }
    }

    let n = layout.n_teams;
    let attack_sum: f64 = params[..n].iter().sum();
    let defence_sum: f64 = params[n..2 * n].iter().sum();
    nll += IDENTIFICATION_PENALTY * (attack_sum * attack_sum + defence_sum * defence_sum);
    for team in 0..n {
        grad[layout.attack(team)] += 2.0 * IDENTIFICATION_PENALTY * attack_sum;
        grad[layout.defence(team)] += 2.0 * IDENTIFICATION_PENALTY * defence_sum;
    }

    nll
}
