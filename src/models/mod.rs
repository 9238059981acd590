use crate::error::{ModelError, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// One completed fixture from the fit corpus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub date: Option<NaiveDate>,
    pub home_team: String,
    pub away_team: String,
    pub home_goals: Option<f64>,
    pub away_goals: Option<f64>,
    pub home_xg: Option<f64>,
    pub away_xg: Option<f64>,
}

impl MatchRecord {
    /// Completed match with actual goals only
    pub fn with_goals(home_team: &str, away_team: &str, home_goals: u32, away_goals: u32) -> Self {
        Self {
            date: None,
            home_team: home_team.to_string(),
            away_team: away_team.to_string(),
            home_goals: Some(home_goals as f64),
            away_goals: Some(away_goals as f64),
            home_xg: None,
            away_xg: None,
        }
    }

    /// The (home, away) "for" values used by a fit, either goals or expected goals.
    /// `row` is only used to locate the record in error messages.
    pub fn scoring_values(&self, use_xg: bool, row: usize) -> Result<(f64, f64)> {
        if self.home_team.trim().is_empty() {
            return Err(ModelError::MissingColumn {
                column: "home_team_name".to_string(),
                row: Some(row),
            });
        }
        if self.away_team.trim().is_empty() {
            return Err(ModelError::MissingColumn {
                column: "away_team_name".to_string(),
                row: Some(row),
            });
        }

        let (home, away, home_col, away_col) = if use_xg {
            (self.home_xg, self.away_xg, "home_xg", "away_xg")
        } else {
            (self.home_goals, self.away_goals, "home_goals", "away_goals")
        };

        let home = home.ok_or_else(|| ModelError::MissingColumn {
            column: home_col.to_string(),
            row: Some(row),
        })?;
        let away = away.ok_or_else(|| ModelError::MissingColumn {
            column: away_col.to_string(),
            row: Some(row),
        })?;

        for (value, col) in [(home, home_col), (away, away_col)] {
            if !value.is_finite() || value < 0.0 {
                return Err(ModelError::InvalidRecord {
                    row,
                    reason: format!("{} must be a non-negative number, got {}", col, value),
                });
            }
        }

        Ok((home, away))
    }

    /// Actual result, if goals were recorded
    pub fn result(&self) -> Option<Outcome> {
        let (h, a) = (self.home_goals?, self.away_goals?);
        Some(if h > a {
            Outcome::Home
        } else if h < a {
            Outcome::Away
        } else {
            Outcome::Draw
        })
    }
}

/// A completed match with its closing odds, when known
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalMatch {
    pub record: MatchRecord,
    pub odds: Option<DecimalOdds>,
}

/// Log-scale strength coefficients for one team.
/// Higher `defence` means the team concedes fewer goals.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TeamRating {
    pub attack: f64,
    pub defence: f64,
}

impl TeamRating {
    pub const NEUTRAL: TeamRating = TeamRating {
        attack: 0.0,
        defence: 0.0,
    };
}

/// Immutable rating table produced by a single fit.
///
/// Contains exactly the teams observed in the fit corpus. A re-fit builds a new
/// table rather than patching this one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingTable {
    teams: BTreeMap<String, TeamRating>,
    intercept: f64,
    home_advantage: f64,
}

impl RatingTable {
    pub fn new(teams: BTreeMap<String, TeamRating>, intercept: f64, home_advantage: f64) -> Self {
        Self {
            teams,
            intercept,
            home_advantage,
        }
    }

    pub fn intercept(&self) -> f64 {
        self.intercept
    }

    pub fn home_advantage(&self) -> f64 {
        self.home_advantage
    }

    /// Look up a team, failing when it was never seen in the fit
    pub fn get(&self, team: &str) -> Result<TeamRating> {
        self.teams
            .get(team)
            .copied()
            .ok_or_else(|| ModelError::UnknownTeam {
                team: team.to_string(),
            })
    }

    pub fn contains(&self, team: &str) -> bool {
        self.teams.contains_key(team)
    }

    pub fn len(&self) -> usize {
        self.teams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.teams.is_empty()
    }

    /// Teams in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &TeamRating)> {
        self.teams.iter().map(|(name, rating)| (name.as_str(), rating))
    }

    /// Copy of this table with one team's rating replaced, for what-if analysis.
    /// The original table is left untouched.
    pub fn with_rating(&self, team: &str, rating: TeamRating) -> Result<Self> {
        if !self.contains(team) {
            return Err(ModelError::UnknownTeam {
                team: team.to_string(),
            });
        }
        let mut teams = self.teams.clone();
        teams.insert(team.to_string(), rating);
        Ok(Self {
            teams,
            intercept: self.intercept,
            home_advantage: self.home_advantage,
        })
    }

    pub fn top_attacks(&self, n: usize) -> Vec<(&str, f64)> {
        self.ranked(n, |r| r.attack, true)
    }

    pub fn best_defences(&self, n: usize) -> Vec<(&str, f64)> {
        self.ranked(n, |r| r.defence, true)
    }

    pub fn worst_defences(&self, n: usize) -> Vec<(&str, f64)> {
        self.ranked(n, |r| r.defence, false)
    }

    fn ranked(&self, n: usize, key: impl Fn(&TeamRating) -> f64, descending: bool) -> Vec<(&str, f64)> {
        let mut rows: Vec<(&str, f64)> = self.iter().map(|(name, r)| (name, key(r))).collect();
        rows.sort_by(|a, b| {
            let ord = a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal);
            if descending {
                ord.reverse()
            } else {
                ord
            }
        });
        rows.truncate(n);
        rows
    }
}

/// Poisson rates for one fixture
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExpectedGoals {
    pub lambda_home: f64,
    pub lambda_away: f64,
}

/// Match outcome, also used as the bet side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    Home,
    Draw,
    Away,
}

impl Outcome {
    pub const ALL: [Outcome; 3] = [Outcome::Home, Outcome::Draw, Outcome::Away];
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Outcome::Home => "Home",
            Outcome::Draw => "Draw",
            Outcome::Away => "Away",
        };
        f.write_str(label)
    }
}

/// Home/Draw/Away probabilities that always sum to 1
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProbabilityTriple {
    pub home: f64,
    pub draw: f64,
    pub away: f64,
}

impl ProbabilityTriple {
    /// Rescale three non-negative weights so they sum to 1
    pub fn normalized(home: f64, draw: f64, away: f64) -> Result<Self> {
        let total = home + draw + away;
        if ![home, draw, away].iter().all(|p| p.is_finite() && *p >= 0.0)
            || !total.is_finite()
            || total <= 0.0
        {
            return Err(ModelError::DegenerateProbabilities);
        }
        Ok(Self {
            home: home / total,
            draw: draw / total,
            away: away / total,
        })
    }

    pub fn uniform() -> Self {
        Self {
            home: 1.0 / 3.0,
            draw: 1.0 / 3.0,
            away: 1.0 / 3.0,
        }
    }

    pub fn get(&self, outcome: Outcome) -> f64 {
        match outcome {
            Outcome::Home => self.home,
            Outcome::Draw => self.draw,
            Outcome::Away => self.away,
        }
    }

    pub fn sum(&self) -> f64 {
        self.home + self.draw + self.away
    }
}

/// Decimal 1X2 odds for one fixture
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecimalOdds {
    pub home: f64,
    pub draw: f64,
    pub away: f64,
}

impl DecimalOdds {
    pub fn new(home: f64, draw: f64, away: f64) -> Self {
        Self { home, draw, away }
    }

    pub fn get(&self, outcome: Outcome) -> f64 {
        match outcome {
            Outcome::Home => self.home,
            Outcome::Draw => self.draw,
            Outcome::Away => self.away,
        }
    }
}

/// An upcoming (or historical) fixture with bookmaker odds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixtureOdds {
    pub date: Option<NaiveDate>,
    pub home_team: String,
    pub away_team: String,
    pub odds: DecimalOdds,
}

/// Evaluation of one outcome of one fixture
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OutcomeEdge {
    pub bet_side: Outcome,
    pub odds: f64,
    pub p_model: f64,
    pub p_market: f64,
    pub p_final: f64,
    pub edge: f64,
    pub kelly_full: f64,
    pub stake_fraction: f64,
    pub recommended: bool,
}

/// Output row per fixture and outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub date: Option<NaiveDate>,
    pub home_team: String,
    pub away_team: String,
    pub bet_side: Outcome,
    pub odds: f64,
    pub p_model: f64,
    pub p_market: f64,
    pub p_final: f64,
    pub edge: f64,
    pub edge_pct: f64,
    pub kelly_full: f64,
    pub stake_fraction: f64,
    pub recommended: bool,
}

impl EdgeRecord {
    pub fn from_outcome(fixture: &FixtureOdds, outcome: &OutcomeEdge) -> Self {
        Self {
            date: fixture.date,
            home_team: fixture.home_team.clone(),
            away_team: fixture.away_team.clone(),
            bet_side: outcome.bet_side,
            odds: outcome.odds,
            p_model: outcome.p_model,
            p_market: outcome.p_market,
            p_final: outcome.p_final,
            edge: outcome.edge,
            edge_pct: outcome.edge * 100.0,
            kelly_full: outcome.kelly_full,
            stake_fraction: outcome.stake_fraction,
            recommended: outcome.recommended,
        }
    }

    /// Format the edge as a readable string
    pub fn format(&self) -> String {
        let date = self
            .date
            .map(|d| d.to_string())
            .unwrap_or_else(|| "-".to_string());
        format!(
            "{} - {} vs {} | Bet: {} @ {:.2} | Edge: {:+.1}% | Model: {:.1}% | Market: {:.1}% | Final: {:.1}% | Stake: {:.3} bankroll",
            date,
            self.home_team,
            self.away_team,
            self.bet_side,
            self.odds,
            self.edge_pct,
            self.p_model * 100.0,
            self.p_market * 100.0,
            self.p_final * 100.0,
            self.stake_fraction
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> RatingTable {
        let mut teams = BTreeMap::new();
        teams.insert("Arsenal".to_string(), TeamRating { attack: 0.3, defence: 0.2 });
        teams.insert("Burnley".to_string(), TeamRating { attack: -0.4, defence: -0.3 });
        teams.insert("Chelsea".to_string(), TeamRating { attack: 0.1, defence: 0.4 });
        RatingTable::new(teams, 0.25, 0.2)
    }

    #[test]
    fn test_unknown_team_lookup_fails() {
        let table = table();
        assert!(table.get("Arsenal").is_ok());
        match table.get("Luton") {
            Err(ModelError::UnknownTeam { team }) => assert_eq!(team, "Luton"),
            other => panic!("expected UnknownTeam, got {:?}", other),
        }
    }

    #[test]
    fn test_with_rating_leaves_original_untouched() {
        let table = table();
        let bumped = table
            .with_rating("Burnley", TeamRating { attack: 1.0, defence: 0.0 })
            .unwrap();
        assert_eq!(table.get("Burnley").unwrap().attack, -0.4);
        assert_eq!(bumped.get("Burnley").unwrap().attack, 1.0);
        assert!(table.with_rating("Luton", TeamRating::NEUTRAL).is_err());
    }

    #[test]
    fn test_rankings() {
        let table = table();
        assert_eq!(table.top_attacks(1)[0].0, "Arsenal");
        assert_eq!(table.best_defences(1)[0].0, "Chelsea");
        assert_eq!(table.worst_defences(1)[0].0, "Burnley");
        assert_eq!(table.top_attacks(10).len(), 3);
    }

    #[test]
    fn test_normalized_triple() {
        let p = ProbabilityTriple::normalized(2.0, 1.0, 1.0).unwrap();
        assert!((p.sum() - 1.0).abs() < 1e-12);
        assert!((p.home - 0.5).abs() < 1e-12);
        assert!(ProbabilityTriple::normalized(0.0, 0.0, 0.0).is_err());
        assert!(ProbabilityTriple::normalized(-0.1, 0.5, 0.6).is_err());
    }

    #[test]
    fn test_scoring_values_requires_selected_columns() {
        let record = MatchRecord::with_goals("Arsenal", "Chelsea", 2, 1);
        assert_eq!(record.scoring_values(false, 0).unwrap(), (2.0, 1.0));
        match record.scoring_values(true, 4) {
            Err(ModelError::MissingColumn { column, row }) => {
                assert_eq!(column, "home_xg");
                assert_eq!(row, Some(4));
            }
            other => panic!("expected MissingColumn, got {:?}", other),
        }

        let mut negative = record.clone();
        negative.away_goals = Some(-1.0);
        assert!(matches!(
            negative.scoring_values(false, 0),
            Err(ModelError::InvalidRecord { .. })
        ));
    }

    #[test]
    fn test_result() {
        assert_eq!(MatchRecord::with_goals("A", "B", 2, 1).result(), Some(Outcome::Home));
        assert_eq!(MatchRecord::with_goals("A", "B", 1, 1).result(), Some(Outcome::Draw));
        assert_eq!(MatchRecord::with_goals("A", "B", 0, 3).result(), Some(Outcome::Away));
    }
}
