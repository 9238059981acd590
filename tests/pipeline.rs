use epl_betting_ev::data::{
    load_fixtures, load_matches, load_ratings_from_json, save_edges_to_csv, save_ratings_to_json,
};
use epl_betting_ev::strength::fit;
use epl_betting_ev::{predict_fixtures, predict_with_ratings, BettingConfig, MatchRecord};
use std::fmt::Write as _;
use std::path::PathBuf;

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("epl_betting_ev_{}_{}", name, std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn season_csv() -> String {
    let teams = ["Arsenal", "Brighton", "Chelsea", "Fulham", "Everton"];
    let scores = [(2, 1), (1, 1), (0, 2), (3, 0), (1, 0), (2, 2), (0, 1)];
    let mut csv = String::from("date,home_team_name,away_team_name,home_goals,away_goals,home_xg,away_xg\n");
    let mut k = 0;
    for home in teams {
        for away in teams {
            if home == away {
                continue;
            }
            let (h, a) = scores[k % scores.len()];
            writeln!(
                csv,
                "2024-{:02}-{:02},{},{},{},{},{:.2},{:.2}",
                8 + k / 28,
                1 + k % 28,
                home,
                away,
                h,
                a,
                h as f64 * 0.8 + 0.3,
                a as f64 * 0.8 + 0.2
            )
            .unwrap();
            k += 1;
        }
    }
    csv
}

const FIXTURES_CSV: &str = "date,home_team,away_team,odds_home,odds_draw,odds_away\n\
2025-05-01,Arsenal,Everton,1.7,3.9,5.0\n\
2025-05-01,Chelsea,Fulham,2.2,3.4,3.3\n\
2025-05-02,Brighton,Wolves,2.0,3.5,3.8\n";

#[test]
fn test_fit_predict_and_write_outputs() {
    let dir = scratch_dir("predict");
    let matches_path = dir.join("matches.csv");
    let fixtures_path = dir.join("fixtures.csv");
    std::fs::write(&matches_path, season_csv()).unwrap();
    std::fs::write(&fixtures_path, FIXTURES_CSV).unwrap();

    let history = load_matches(&matches_path).unwrap();
    let fixtures = load_fixtures(&fixtures_path).unwrap();
    assert_eq!(history.len(), 20);
    assert_eq!(fixtures.len(), 3);

    let config = BettingConfig::default();
    let run = predict_fixtures(&history, &fixtures, &config).unwrap();
    let report = run.fit.as_ref().unwrap();
    assert!(report.convergence.unwrap().converged);

    // Wolves never played in the corpus
    assert_eq!(run.edges.len(), 6);
    assert_eq!(run.failures.len(), 1);
    assert_eq!(run.failures[0].away_team, "Wolves");

    for fixture in ["Arsenal", "Chelsea"] {
        let rows: Vec<_> = run.edges.iter().filter(|e| e.home_team == fixture).collect();
        assert_eq!(rows.len(), 3);
        let model: f64 = rows.iter().map(|r| r.p_model).sum();
        let posterior: f64 = rows.iter().map(|r| r.p_final).sum();
        assert!((model - 1.0).abs() < 1e-9);
        assert!((posterior - 1.0).abs() < 1e-9);
    }

    let all_path = dir.join("edges_all.csv");
    save_edges_to_csv(&run.edges, &all_path).unwrap();
    let written = std::fs::read_to_string(&all_path).unwrap();
    assert_eq!(written.lines().count(), 7);
    assert!(written.starts_with("date,home_team,away_team,bet_side,odds"));

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_saved_ratings_reproduce_predictions() {
    let dir = scratch_dir("ratings");
    let matches_path = dir.join("matches.csv");
    std::fs::write(&matches_path, season_csv()).unwrap();

    let config = BettingConfig {
        use_xg: true,
        ..BettingConfig::default()
    };
    let corpus: Vec<MatchRecord> = load_matches(&matches_path)
        .unwrap()
        .into_iter()
        .map(|m| m.record)
        .collect();
    let ratings = fit(&corpus, &config).unwrap().ratings;

    let json_path = dir.join("ratings.json");
    save_ratings_to_json(&ratings, &json_path).unwrap();
    let restored = load_ratings_from_json(&json_path).unwrap();
    assert_eq!(restored.len(), ratings.len());

    let fixtures_path = dir.join("fixtures.csv");
    std::fs::write(&fixtures_path, FIXTURES_CSV).unwrap();
    let fixtures = load_fixtures(&fixtures_path).unwrap();

    let direct = predict_with_ratings(ratings, &fixtures, &config).unwrap();
    let reloaded = predict_with_ratings(restored, &fixtures, &config).unwrap();
    assert_eq!(direct.edges.len(), reloaded.edges.len());
    for (a, b) in direct.edges.iter().zip(&reloaded.edges) {
        assert_eq!(a.bet_side, b.bet_side);
        assert!((a.p_model - b.p_model).abs() < 1e-9);
    }

    std::fs::remove_dir_all(&dir).ok();
}
