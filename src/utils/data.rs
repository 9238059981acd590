use crate::error::{ModelError, Result};
use crate::models::{DecimalOdds, EdgeRecord, FixtureOdds, HistoricalMatch, MatchRecord, RatingTable};
use chrono::NaiveDate;
use serde::Deserialize;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

/// One row of a match corpus CSV
#[derive(Debug, Deserialize)]
struct MatchRow {
    #[serde(default)]
    date: Option<NaiveDate>,
    home_team_name: String,
    away_team_name: String,
    #[serde(default)]
    home_goals: Option<f64>,
    #[serde(default)]
    away_goals: Option<f64>,
    #[serde(default)]
    home_xg: Option<f64>,
    #[serde(default)]
    away_xg: Option<f64>,
    #[serde(default)]
    odds_home: Option<f64>,
    #[serde(default)]
    odds_draw: Option<f64>,
    #[serde(default)]
    odds_away: Option<f64>,
}

/// One row of a fixture odds CSV
#[derive(Debug, Deserialize)]
struct FixtureRow {
    #[serde(default)]
    date: Option<NaiveDate>,
    home_team: String,
    away_team: String,
    odds_home: f64,
    odds_draw: f64,
    odds_away: f64,
}

fn csv_reader<R: Read>(reader: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader)
}

/// Fail with `MissingColumn` unless one of `names` is a header
fn require_column(headers: &csv::StringRecord, names: &[&str]) -> Result<()> {
    if names.iter().any(|name| headers.iter().any(|h| h == *name)) {
        Ok(())
    } else {
        Err(ModelError::MissingColumn {
            column: names[0].to_string(),
            row: None,
        })
    }
}

fn has_column(headers: &csv::StringRecord, name: &str) -> bool {
    headers.iter().any(|h| h == name)
}

/// Rename `alias` columns to their canonical name. When a file carries both,
/// the canonical column is read and the alias column is ignored.
fn normalize_headers<R: Read>(rdr: &mut csv::Reader<R>, aliases: &[(&str, &str)]) -> Result<csv::StringRecord> {
    let headers = rdr.headers()?.clone();
    let renamed: csv::StringRecord = headers
        .iter()
        .map(|h| {
            aliases
                .iter()
                .find(|(_, alias)| *alias == h)
                .filter(|(canonical, _)| !has_column(&headers, canonical))
                .map_or(h, |(canonical, _)| *canonical)
        })
        .collect();
    rdr.set_headers(renamed.clone());
    Ok(renamed)
}

/// Read a match corpus. Needs team names and either goals or xG columns;
/// odds columns are optional.
pub fn read_matches<R: Read>(reader: R) -> Result<Vec<HistoricalMatch>> {
    let mut rdr = csv_reader(reader);
    let headers = normalize_headers(
        &mut rdr,
        &[("home_team_name", "home_team"), ("away_team_name", "away_team")],
    )?;
    require_column(&headers, &["home_team_name"])?;
    require_column(&headers, &["away_team_name"])?;

    let has_goals = has_column(&headers, "home_goals") && has_column(&headers, "away_goals");
    let has_xg = has_column(&headers, "home_xg") && has_column(&headers, "away_xg");
    if !has_goals && !has_xg {
        let column = if has_column(&headers, "home_goals") { "away_goals" } else { "home_goals" };
        return Err(ModelError::MissingColumn {
            column: column.to_string(),
            row: None,
        });
    }

    let mut matches = Vec::new();
    for row in rdr.deserialize() {
        let row: MatchRow = row?;
        let odds = match (row.odds_home, row.odds_draw, row.odds_away) {
            (Some(h), Some(d), Some(a)) => Some(DecimalOdds::new(h, d, a)),
            _ => None,
        };
        matches.push(HistoricalMatch {
            record: MatchRecord {
                date: row.date,
                home_team: row.home_team_name,
                away_team: row.away_team_name,
                home_goals: row.home_goals,
                away_goals: row.away_goals,
                home_xg: row.home_xg,
                away_xg: row.away_xg,
            },
            odds,
        });
    }
    Ok(matches)
}

/// Read fixtures with 1X2 decimal odds
pub fn read_fixtures<R: Read>(reader: R) -> Result<Vec<FixtureOdds>> {
    let mut rdr = csv_reader(reader);
    let headers = normalize_headers(
        &mut rdr,
        &[("home_team", "home_team_name"), ("away_team", "away_team_name")],
    )?;
    require_column(&headers, &["home_team"])?;
    require_column(&headers, &["away_team"])?;
    for column in ["odds_home", "odds_draw", "odds_away"] {
        require_column(&headers, &[column])?;
    }

    let mut fixtures = Vec::new();
    for row in rdr.deserialize() {
        let row: FixtureRow = row?;
        fixtures.push(FixtureOdds {
            date: row.date,
            home_team: row.home_team,
            away_team: row.away_team,
            odds: DecimalOdds::new(row.odds_home, row.odds_draw, row.odds_away),
        });
    }
    Ok(fixtures)
}

pub fn load_matches(path: impl AsRef<Path>) -> Result<Vec<HistoricalMatch>> {
    read_matches(File::open(path)?)
}

pub fn load_fixtures(path: impl AsRef<Path>) -> Result<Vec<FixtureOdds>> {
    read_fixtures(File::open(path)?)
}

/// Write edge records as CSV
pub fn write_edges<W: Write>(records: &[EdgeRecord], writer: W) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    for record in records {
        wtr.serialize(record)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Save edge records to a CSV file
pub fn save_edges_to_csv(records: &[EdgeRecord], filename: impl AsRef<Path>) -> Result<()> {
    write_edges(records, File::create(filename)?)
}

/// Save a rating table to a JSON file
pub fn save_ratings_to_json(ratings: &RatingTable, filename: impl AsRef<Path>) -> Result<()> {
    let json = serde_json::to_string_pretty(ratings)?;
    std::fs::write(filename, json)?;
    Ok(())
}

/// Load a rating table from JSON
pub fn load_ratings_from_json(filename: impl AsRef<Path>) -> Result<RatingTable> {
    let json = std::fs::read_to_string(filename)?;
    Ok(serde_json::from_str(&json)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Outcome;

    #[test]
    fn test_read_matches_with_aliases_and_optional_columns() {
        let csv = "date,home_team,away_team,home_goals,away_goals,odds_home,odds_draw,odds_away\n\
                   2024-08-16,Man Utd,Fulham,1,0,1.6,4.2,5.5\n\
                   2024-08-17,Ipswich,Liverpool,0,2,,,\n";
        let matches = read_matches(csv.as_bytes()).unwrap();
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].record.home_team, "Man Utd");
        assert_eq!(matches[0].record.home_goals, Some(1.0));
        assert_eq!(matches[0].record.home_xg, None);
        assert_eq!(matches[0].odds, Some(DecimalOdds::new(1.6, 4.2, 5.5)));
        assert_eq!(matches[1].odds, None);
        assert_eq!(matches[1].record.result(), Some(Outcome::Away));
        assert_eq!(matches[1].record.date.unwrap().to_string(), "2024-08-17");
    }

    #[test]
    fn test_read_matches_xg_only() {
        let csv = "home_team_name,away_team_name,home_xg,away_xg\nArsenal,Wolves,2.1,0.4\n";
        let matches = read_matches(csv.as_bytes()).unwrap();
        assert_eq!(matches[0].record.home_xg, Some(2.1));
        assert_eq!(matches[0].record.home_goals, None);
    }

    #[test]
    fn test_read_matches_missing_columns() {
        let csv = "home_team_name,home_goals,away_goals\nArsenal,1,0\n";
        assert!(matches!(
            read_matches(csv.as_bytes()),
            Err(ModelError::MissingColumn { .. })
        ));

        let csv = "home_team_name,away_team_name,home_goals\nArsenal,Wolves,1\n";
        match read_matches(csv.as_bytes()) {
            Err(ModelError::MissingColumn { column, .. }) => assert_eq!(column, "away_goals"),
            other => panic!("expected MissingColumn, got {:?}", other),
        }
    }

    #[test]
    fn test_canonical_team_column_wins_over_alias() {
        let csv = "home_team_name,home_team,away_team_name,away_team,home_goals,away_goals\n\
                   Man City,MCI,Spurs,TOT,2,0\n";
        let matches = read_matches(csv.as_bytes()).unwrap();
        assert_eq!(matches[0].record.home_team, "Man City");
        assert_eq!(matches[0].record.away_team, "Spurs");

        let csv = "home_team,home_team_name,away_team,odds_home,odds_draw,odds_away\n\
                   Chelsea,Chelsea FC,Spurs,2.1,3.5,3.3\n";
        let fixtures = read_fixtures(csv.as_bytes()).unwrap();
        assert_eq!(fixtures[0].home_team, "Chelsea");
    }

    #[test]
    fn test_read_fixtures() {
        let csv = "home_team,away_team,odds_home,odds_draw,odds_away\nChelsea,Spurs,2.1,3.5,3.3\n";
        let fixtures = read_fixtures(csv.as_bytes()).unwrap();
        assert_eq!(fixtures.len(), 1);
        assert_eq!(fixtures[0].date, None);
        assert_eq!(fixtures[0].odds.draw, 3.5);

        let csv = "home_team,away_team,odds_home,odds_away\nChelsea,Spurs,2.1,3.3\n";
        match read_fixtures(csv.as_bytes()) {
            Err(ModelError::MissingColumn { column, .. }) => assert_eq!(column, "odds_draw"),
            other => panic!("expected MissingColumn, got {:?}", other),
        }
    }

    #[test]
    fn test_write_edges_header() {
        let record = EdgeRecord {
            date: None,
            home_team: "Chelsea".to_string(),
            away_team: "Spurs".to_string(),
            bet_side: Outcome::Draw,
            odds: 3.5,
            p_model: 0.3,
            p_market: 0.28,
            p_final: 0.286,
            edge: 0.006,
            edge_pct: 0.6,
            kelly_full: 0.0,
            stake_fraction: 0.0,
            recommended: false,
        };
        let mut buf = Vec::new();
        write_edges(&[record], &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "date,home_team,away_team,bet_side,odds,p_model,p_market,p_final,edge,edge_pct,kelly_full,stake_fraction,recommended"
        );
        assert!(lines.next().unwrap().starts_with(",Chelsea,Spurs,Draw,3.5,"));
    }
}
