use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use epl_betting_ev::backtest::{compare_model_to_market, equity_curve, evaluate_probs, walk_forward, WalkForward};
use epl_betting_ev::data::{
    load_fixtures, load_matches, load_ratings_from_json, save_edges_to_csv, save_ratings_to_json,
};
use epl_betting_ev::score_distribution::simulate_match;
use epl_betting_ev::strength::fit;
use epl_betting_ev::{
    predict_fixtures, predict_with_ratings, BettingConfig, FitMethod, MatchRecord, RatingTable,
    UnknownTeamPolicy,
};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "epl-betting")]
#[command(about = "Poisson team ratings and value bets for league football", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    overrides: ConfigOverrides,
}

/// Command-line overrides on top of the `EPL_*` environment
#[derive(Args)]
struct ConfigOverrides {
    /// Fit on expected goals instead of actual goals
    #[arg(long, global = true)]
    use_xg: bool,

    /// Weight of the model in the model/market blend
    #[arg(long, global = true)]
    model_weight: Option<f64>,

    /// Minimum edge for a bet to be recommended
    #[arg(long, global = true)]
    min_edge: Option<f64>,

    /// Fraction of full Kelly to stake (0.25 = quarter Kelly)
    #[arg(long, global = true)]
    kelly_fraction: Option<f64>,

    /// Scoreline grid cutoff per side
    #[arg(long, global = true)]
    max_goals: Option<u32>,

    /// Fitting strategy: mle or closed-form
    #[arg(long, global = true)]
    method: Option<FitMethod>,

    /// Use closed-form ratings when the MLE does not converge
    #[arg(long, global = true)]
    fallback: bool,

    /// Unknown team handling: strict or neutral
    #[arg(long, global = true)]
    unknown_team: Option<UnknownTeamPolicy>,
}

impl ConfigOverrides {
    fn apply(&self, mut config: BettingConfig) -> Result<BettingConfig> {
        if self.use_xg {
            config.use_xg = true;
        }
        if let Some(w) = self.model_weight {
            config.model_weight = w;
        }
        if let Some(e) = self.min_edge {
            config.min_edge = e;
        }
        if let Some(k) = self.kelly_fraction {
            config.kelly_fraction = k;
        }
        if let Some(g) = self.max_goals {
            config.max_goals = g;
        }
        if let Some(m) = self.method {
            config.fit_method = m;
        }
        if self.fallback {
            config.fallback_to_closed_form = true;
        }
        if let Some(p) = self.unknown_team {
            config.unknown_team_policy = p;
        }
        config.validate()?;
        Ok(config)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Fit team ratings and save them as JSON
    Fit {
        /// Match corpus CSV
        #[arg(short, long)]
        matches: PathBuf,

        /// Output JSON file
        #[arg(short, long, default_value = "ratings.json")]
        out: PathBuf,

        /// Number of teams to show in each ranking
        #[arg(long, default_value = "5")]
        top: usize,
    },

    /// Price fixtures and write edge CSVs
    Predict {
        /// Match corpus CSV to fit on
        #[arg(short, long, conflicts_with = "ratings")]
        matches: Option<PathBuf>,

        /// Previously saved ratings JSON
        #[arg(short, long)]
        ratings: Option<PathBuf>,

        /// Fixtures CSV with 1X2 decimal odds
        #[arg(short, long)]
        fixtures: PathBuf,

        /// Directory for the output CSVs
        #[arg(short, long, default_value = "output")]
        out_dir: PathBuf,
    },

    /// Simulate a single fixture by Monte Carlo
    Simulate {
        #[arg(short, long)]
        matches: PathBuf,

        #[arg(long)]
        home: String,

        #[arg(long)]
        away: String,

        /// Overrides the configured simulation count
        #[arg(long)]
        n: Option<usize>,

        #[arg(long)]
        seed: Option<u64>,
    },

    /// Score model and market probabilities on matches with closing odds
    Evaluate {
        #[arg(short, long)]
        matches: PathBuf,
    },

    /// Walk-forward backtest on matches with closing odds
    Backtest {
        #[arg(short, long)]
        matches: PathBuf,

        /// Matches in the first training window
        #[arg(long, default_value = "100")]
        min_train: usize,

        /// Matches evaluated per window
        #[arg(long, default_value = "10")]
        step: usize,
    },
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = cli
        .overrides
        .apply(BettingConfig::from_env().context("Failed to read EPL_* settings")?)?;

    match cli.command {
        Commands::Fit { matches, out, top } => run_fit(&matches, &out, top, &config),
        Commands::Predict {
            matches,
            ratings,
            fixtures,
            out_dir,
        } => run_predict(matches.as_deref(), ratings.as_deref(), &fixtures, &out_dir, &config),
        Commands::Simulate {
            matches,
            home,
            away,
            n,
            seed,
        } => run_simulate(&matches, &home, &away, n, seed, &config),
        Commands::Evaluate { matches } => run_evaluate(&matches, &config),
        Commands::Backtest {
            matches,
            min_train,
            step,
        } => run_backtest(&matches, WalkForward { min_train, step }, &config),
    }
}

fn load_corpus(path: &Path) -> Result<Vec<MatchRecord>> {
    let matches = load_matches(path)
        .with_context(|| format!("Failed to load matches from {}", path.display()))?;
    Ok(matches.into_iter().map(|m| m.record).collect())
}

fn run_fit(matches: &Path, out: &Path, top: usize, config: &BettingConfig) -> Result<()> {
    let corpus = load_corpus(matches)?;
    let report = fit(&corpus, config).context("Failed to fit ratings")?;
    let ratings = &report.ratings;

    println!("Fitted {} teams on {} matches ({:?})", ratings.len(), report.matches, report.method);
    if let Some(c) = report.convergence {
        println!(
            "MLE: converged={} iterations={} log-likelihood={:.3}",
            c.converged, c.iterations, c.log_likelihood
        );
    }
    if report.fell_back {
        println!("MLE did not converge, closed-form ratings used instead");
    }
    println!(
        "Intercept: {:.4} | Home advantage: {:.4}\n",
        ratings.intercept(),
        ratings.home_advantage()
    );

    print_ranking("TOP ATTACKS", &ratings.top_attacks(top));
    print_ranking("BEST DEFENCES", &ratings.best_defences(top));
    print_ranking("WORST DEFENCES", &ratings.worst_defences(top));

    save_ratings_to_json(ratings, out)
        .with_context(|| format!("Failed to save ratings to {}", out.display()))?;
    println!("Saved ratings to {}", out.display());
    Ok(())
}

fn print_ranking(title: &str, rows: &[(&str, f64)]) {
    println!("{}\n", title);
    for (i, (team, value)) in rows.iter().enumerate() {
        println!("{}. {:<24} {:+.3}", i + 1, team, value);
    }
    println!();
}

fn run_predict(
    matches: Option<&Path>,
    ratings: Option<&Path>,
    fixtures: &Path,
    out_dir: &Path,
    config: &BettingConfig,
) -> Result<()> {
    let fixture_odds = load_fixtures(fixtures)
        .with_context(|| format!("Failed to load fixtures from {}", fixtures.display()))?;

    let run = match (matches, ratings) {
        (Some(path), _) => {
            let history = load_matches(path)
                .with_context(|| format!("Failed to load matches from {}", path.display()))?;
            predict_fixtures(&history, &fixture_odds, config)?
        }
        (None, Some(path)) => {
            let table: RatingTable = load_ratings_from_json(path)
                .with_context(|| format!("Failed to load ratings from {}", path.display()))?;
            predict_with_ratings(table, &fixture_odds, config)?
        }
        (None, None) => bail!("either --matches or --ratings is required"),
    };

    for failure in &run.failures {
        eprintln!(
            "Skipped {} vs {}: {}",
            failure.home_team, failure.away_team, failure.reason
        );
    }

    let recommended = run.recommended();
    if recommended.is_empty() {
        println!("No bets clear the minimum edge of {:.1}%.", config.min_edge * 100.0);
    } else {
        println!("{} Recommended Bets:\n", recommended.len());
        for (i, bet) in recommended.iter().enumerate() {
            println!("{}. {}", i + 1, bet.format());
        }
    }

    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create {}", out_dir.display()))?;
    let all_path = out_dir.join("edges_all.csv");
    let rec_path = out_dir.join("edges_recommended.csv");
    save_edges_to_csv(&run.edges, &all_path)?;
    save_edges_to_csv(&recommended, &rec_path)?;
    println!("\nSaved {} edges to {}", run.edges.len(), all_path.display());
    println!("Saved {} recommended bets to {}", recommended.len(), rec_path.display());
    Ok(())
}

fn run_simulate(
    matches: &Path,
    home: &str,
    away: &str,
    n: Option<usize>,
    seed: Option<u64>,
    config: &BettingConfig,
) -> Result<()> {
    let corpus = load_corpus(matches)?;
    let ratings = fit(&corpus, config)?.ratings;
    let sim = simulate_match(
        &ratings,
        home,
        away,
        n.unwrap_or(config.n_simulations),
        seed.unwrap_or(config.seed),
        config.unknown_team_policy,
    )?;

    println!(
        "{} vs {} | xG {:.2} - {:.2} | {} simulations",
        home, away, sim.expected_goals.lambda_home, sim.expected_goals.lambda_away, sim.n_simulations
    );
    println!(
        "Home: {:.1}% | Draw: {:.1}% | Away: {:.1}%",
        sim.probs.home * 100.0,
        sim.probs.draw * 100.0,
        sim.probs.away * 100.0
    );
    Ok(())
}

fn run_evaluate(matches: &Path, config: &BettingConfig) -> Result<()> {
    let history = load_matches(matches)
        .with_context(|| format!("Failed to load matches from {}", matches.display()))?;
    let corpus: Vec<MatchRecord> = history.iter().map(|m| m.record.clone()).collect();
    let ratings = fit(&corpus, config)?.ratings;

    let mut model = Vec::new();
    let mut market = Vec::new();
    let mut outcomes = Vec::new();
    for comparison in compare_model_to_market(&ratings, &history, config).into_iter().flatten() {
        if let Some(result) = comparison.result {
            model.push(comparison.model);
            market.push(comparison.market);
            outcomes.push(result);
        }
    }

    // In-sample: the ratings were fitted on these same matches.
    let model_metrics = evaluate_probs(&model, &outcomes);
    let market_metrics = evaluate_probs(&market, &outcomes);
    println!("{} matches with closing odds (in-sample)\n", model_metrics.samples);
    println!("{:<8} {:>8} {:>9} {:>9}", "", "Brier", "LogLoss", "Accuracy");
    for (name, m) in [("Model", model_metrics), ("Market", market_metrics)] {
        println!("{:<8} {:>8.4} {:>9.4} {:>8.1}%", name, m.brier, m.log_loss, m.accuracy * 100.0);
    }
    Ok(())
}

fn run_backtest(matches: &Path, plan: WalkForward, config: &BettingConfig) -> Result<()> {
    let history = load_matches(matches)
        .with_context(|| format!("Failed to load matches from {}", matches.display()))?;
    let report = walk_forward(&history, plan, config).context("Backtest failed")?;

    println!(
        "{} windows ({} skipped) | {} fixtures evaluated | {} bets",
        report.windows,
        report.skipped_windows,
        report.fixtures_evaluated,
        report.bets.len()
    );
    println!(
        "Staked: {:.3} bankroll | Profit: {:+.3} | ROI: {:+.2}%",
        report.total_staked,
        report.profit,
        report.roi * 100.0
    );
    println!(
        "Model Brier {:.4} vs Market Brier {:.4}",
        report.model_metrics.brier, report.market_metrics.brier
    );

    if let Some((date, equity)) = equity_curve(&report.bets).last() {
        let date = date.map(|d| d.to_string()).unwrap_or_else(|| "-".to_string());
        println!("Final equity: {:+.3} on {}", equity, date);
    }
    Ok(())
}
