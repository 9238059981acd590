use crate::config::{UnknownTeamPolicy, MIN_MAX_GOALS};
use crate::error::{ModelError, Result};
use crate::models::{ExpectedGoals, ProbabilityTriple, RatingTable, TeamRating};
use rand::distributions::Distribution;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use statrs::distribution::{Discrete, Poisson};
use tracing::warn;

/// Expected goals for a fixture; both teams must be rated
pub fn expected_goals(ratings: &RatingTable, home: &str, away: &str) -> Result<ExpectedGoals> {
    expected_goals_with_policy(ratings, home, away, UnknownTeamPolicy::Strict)
}

/// Expected goals with an explicit policy for unrated teams
pub fn expected_goals_with_policy(
    ratings: &RatingTable,
    home: &str,
    away: &str,
    policy: UnknownTeamPolicy,
) -> Result<ExpectedGoals> {
    let h = lookup(ratings, home, policy)?;
    let a = lookup(ratings, away, policy)?;

    Ok(ExpectedGoals {
        lambda_home: (ratings.intercept() + h.attack - a.defence + ratings.home_advantage()).exp(),
        lambda_away: (ratings.intercept() + a.attack - h.defence).exp(),
    })
}

fn lookup(ratings: &RatingTable, team: &str, policy: UnknownTeamPolicy) -> Result<TeamRating> {
    match (ratings.get(team), policy) {
        (Ok(rating), _) => Ok(rating),
        (Err(ModelError::UnknownTeam { .. }), UnknownTeamPolicy::Neutral) => {
            warn!(team, "no rating for team, using neutral strength");
            Ok(TeamRating::NEUTRAL)
        }
        (Err(err), _) => Err(err),
    }
}

/// P(goals = k) for k in 0..=max_goals
fn poisson_pmf_table(lambda: f64, max_goals: u32) -> Result<Vec<f64>> {
    if !lambda.is_finite() || lambda < 0.0 {
        return Err(ModelError::DegenerateProbabilities);
    }
    if lambda == 0.0 {
        // Point mass at zero goals.
        let mut table = vec![0.0; max_goals as usize + 1];
        table[0] = 1.0;
        return Ok(table);
    }
    let dist = Poisson::new(lambda).map_err(|_| ModelError::DegenerateProbabilities)?;
    Ok((0..=max_goals as u64).map(|k| dist.pmf(k)).collect())
}

fn check_max_goals(max_goals: u32) -> Result<()> {
    if max_goals < MIN_MAX_GOALS {
        return Err(ModelError::InvalidConfig {
            field: "max_goals",
            value: max_goals.to_string(),
            reason: "must be at least 5",
        });
    }
    Ok(())
}

/// Joint scoreline probabilities; `grid[i][j]` is P(home = i, away = j).
/// Not renormalised, so the tail beyond `max_goals` is missing mass.
pub fn scoreline_grid(xg: ExpectedGoals, max_goals: u32) -> Result<Vec<Vec<f64>>> {
    check_max_goals(max_goals)?;
    let home = poisson_pmf_table(xg.lambda_home, max_goals)?;
    let away = poisson_pmf_table(xg.lambda_away, max_goals)?;
    Ok(home
        .iter()
        .map(|p_h| away.iter().map(|p_a| p_h * p_a).collect())
        .collect())
}

/// Home/Draw/Away probabilities from the truncated scoreline grid,
/// renormalised to sum to 1
pub fn outcome_probs(xg: ExpectedGoals, max_goals: u32) -> Result<ProbabilityTriple> {
    let grid = scoreline_grid(xg, max_goals)?;

    let mut p_home = 0.0;
    let mut p_draw = 0.0;
    let mut p_away = 0.0;
    for (i, row) in grid.iter().enumerate() {
        for (j, p) in row.iter().enumerate() {
            if i > j {
                p_home += p;
            } else if i == j {
                p_draw += p;
            } else {
                p_away += p;
            }
        }
    }

    ProbabilityTriple::normalized(p_home, p_draw, p_away)
}

/// Model probabilities for a named fixture
pub fn fixture_probs(
    ratings: &RatingTable,
    home: &str,
    away: &str,
    max_goals: u32,
    policy: UnknownTeamPolicy,
) -> Result<ProbabilityTriple> {
    let xg = expected_goals_with_policy(ratings, home, away, policy)?;
    outcome_probs(xg, max_goals)
}

/// Monte Carlo estimate of a fixture
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Simulation {
    pub probs: ProbabilityTriple,
    pub expected_goals: ExpectedGoals,
    pub n_simulations: usize,
}

/// Simulate a fixture by sampling independent Poisson goal counts.
/// Deterministic for a given seed. Unrated teams follow `policy`.
pub fn simulate_match(
    ratings: &RatingTable,
    home: &str,
    away: &str,
    n_simulations: usize,
    seed: u64,
    policy: UnknownTeamPolicy,
) -> Result<Simulation> {
    if n_simulations == 0 {
        return Err(ModelError::InvalidConfig {
            field: "n_simulations",
            value: "0".to_string(),
            reason: "must be at least 1",
        });
    }
    let xg = expected_goals_with_policy(ratings, home, away, policy)?;
    let home_goals = goal_sampler(xg.lambda_home)?;
    let away_goals = goal_sampler(xg.lambda_away)?;
    let mut rng = StdRng::seed_from_u64(seed);

    let (mut home_wins, mut draws, mut away_wins) = (0usize, 0usize, 0usize);
    for _ in 0..n_simulations {
        let h = draw_goals(home_goals.as_ref(), &mut rng);
        let a = draw_goals(away_goals.as_ref(), &mut rng);
        match h.cmp(&a) {
            std::cmp::Ordering::Greater => home_wins += 1,
            std::cmp::Ordering::Equal => draws += 1,
            std::cmp::Ordering::Less => away_wins += 1,
        }
    }

    Ok(Simulation {
        probs: ProbabilityTriple::normalized(home_wins as f64, draws as f64, away_wins as f64)?,
        expected_goals: xg,
        n_simulations,
    })
}

/// `None` for a zero rate, which always scores nothing
fn goal_sampler(lambda: f64) -> Result<Option<Poisson>> {
    if !lambda.is_finite() || lambda < 0.0 {
        return Err(ModelError::DegenerateProbabilities);
    }
    if lambda == 0.0 {
        return Ok(None);
    }
    Poisson::new(lambda)
        .map(Some)
        .map_err(|_| ModelError::DegenerateProbabilities)
}

fn draw_goals(dist: Option<&Poisson>, rng: &mut StdRng) -> u64 {
    dist.map_or(0, |d| Distribution::<u64>::sample(d, rng))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn ratings(home_advantage: f64) -> RatingTable {
        let mut teams = BTreeMap::new();
        teams.insert("A".to_string(), TeamRating::NEUTRAL);
        teams.insert("B".to_string(), TeamRating::NEUTRAL);
        teams.insert("C".to_string(), TeamRating { attack: 0.4, defence: 0.2 });
        RatingTable::new(teams, 0.0, home_advantage)
    }

    #[test]
    fn test_identical_teams_no_home_edge() {
        let table = ratings(0.0);
        let xg = expected_goals(&table, "A", "B").unwrap();
        assert!((xg.lambda_home - 1.0).abs() < 1e-12);
        assert!((xg.lambda_away - 1.0).abs() < 1e-12);

        let p = outcome_probs(xg, 10).unwrap();
        // P(draw) = e^-2 * sum 1/(k!)^2 at lambda = 1 for both sides
        assert!((p.draw - 0.3085).abs() < 1e-4, "draw {}", p.draw);
        assert!((p.home - 0.3457).abs() < 1e-4, "home {}", p.home);
        assert!((p.home - p.away).abs() < 1e-12);
        assert!((p.sum() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_home_advantage_direction() {
        let table = ratings(0.3);
        let forward = expected_goals(&table, "C", "A").unwrap();
        let reversed = expected_goals(&table, "A", "C").unwrap();
        // C at home scores more than C away against the same opponent
        assert!(forward.lambda_home > reversed.lambda_away);
        // and swapping venue is not a plain swap of rates
        assert!((forward.lambda_home - reversed.lambda_away).abs() > 1e-6);
        assert!((forward.lambda_away - reversed.lambda_home).abs() > 1e-6);

        let neutral = ratings(0.0);
        let forward = expected_goals(&neutral, "C", "A").unwrap();
        let reversed = expected_goals(&neutral, "A", "C").unwrap();
        assert!((forward.lambda_home - reversed.lambda_away).abs() < 1e-12);
        assert!((forward.lambda_away - reversed.lambda_home).abs() < 1e-12);
    }

    #[test]
    fn test_attack_increases_win_probability() {
        let base = ratings(0.2);
        let p_before = fixture_probs(&base, "A", "C", 10, UnknownTeamPolicy::Strict).unwrap();
        let stronger = base
            .with_rating("A", TeamRating { attack: 0.3, defence: 0.0 })
            .unwrap();
        let p_after = fixture_probs(&stronger, "A", "C", 10, UnknownTeamPolicy::Strict).unwrap();
        assert!(p_after.home > p_before.home);

        // same for the away side
        let p_before = fixture_probs(&base, "C", "A", 10, UnknownTeamPolicy::Strict).unwrap();
        let p_after = fixture_probs(&stronger, "C", "A", 10, UnknownTeamPolicy::Strict).unwrap();
        assert!(p_after.away > p_before.away);
    }

    #[test]
    fn test_probabilities_sum_to_one() {
        for (lh, la) in [(0.2, 3.5), (1.4, 1.1), (2.8, 0.6), (0.0, 1.3), (4.0, 4.0)] {
            let p = outcome_probs(
                ExpectedGoals {
                    lambda_home: lh,
                    lambda_away: la,
                },
                10,
            )
            .unwrap();
            assert!((p.sum() - 1.0).abs() < 1e-9);
            for v in [p.home, p.draw, p.away] {
                assert!((0.0..=1.0).contains(&v));
            }
        }
    }

    #[test]
    fn test_cutoff_is_stable() {
        let xg = ExpectedGoals {
            lambda_home: 1.7,
            lambda_away: 1.2,
        };
        let p10 = outcome_probs(xg, 10).unwrap();
        let p15 = outcome_probs(xg, 15).unwrap();
        assert!((p10.home - p15.home).abs() < 1e-5);
        assert!((p10.draw - p15.draw).abs() < 1e-5);
        assert!(outcome_probs(xg, 4).is_err());
    }

    #[test]
    fn test_unknown_team_policy() {
        let table = ratings(0.0);
        assert!(matches!(
            expected_goals(&table, "A", "Luton"),
            Err(ModelError::UnknownTeam { .. })
        ));
        let xg =
            expected_goals_with_policy(&table, "A", "Luton", UnknownTeamPolicy::Neutral).unwrap();
        assert!((xg.lambda_home - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_simulation_is_seeded_and_close_to_exact() {
        let table = ratings(0.25);
        let first = simulate_match(&table, "C", "B", 20_000, 7, UnknownTeamPolicy::Strict).unwrap();
        let second = simulate_match(&table, "C", "B", 20_000, 7, UnknownTeamPolicy::Strict).unwrap();
        assert_eq!(first, second);

        let exact = fixture_probs(&table, "C", "B", 10, UnknownTeamPolicy::Strict).unwrap();
        assert!((first.probs.home - exact.home).abs() < 0.02);
        assert!((first.probs.draw - exact.draw).abs() < 0.02);
        assert!((first.probs.sum() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_simulation_follows_unknown_team_policy() {
        let table = ratings(0.0);
        assert!(matches!(
            simulate_match(&table, "A", "Luton", 1_000, 3, UnknownTeamPolicy::Strict),
            Err(ModelError::UnknownTeam { .. })
        ));

        // a neutral stand-in makes this the A vs B fixture
        let neutral = simulate_match(&table, "A", "Luton", 5_000, 3, UnknownTeamPolicy::Neutral).unwrap();
        let same = simulate_match(&table, "A", "B", 5_000, 3, UnknownTeamPolicy::Strict).unwrap();
        assert_eq!(neutral.probs, same.probs);
        assert!((neutral.expected_goals.lambda_away - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_simulation_with_zero_rate() {
        let mut teams = BTreeMap::new();
        teams.insert("A".to_string(), TeamRating::NEUTRAL);
        teams.insert("B".to_string(), TeamRating::NEUTRAL);
        let table = RatingTable::new(teams, f64::NEG_INFINITY, 0.0);
        let sim = simulate_match(&table, "A", "B", 500, 1, UnknownTeamPolicy::Strict).unwrap();
        assert_eq!(sim.probs.draw, 1.0);
    }
}
