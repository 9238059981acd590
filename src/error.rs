/// Errors raised by the rating, probability and staking pipeline.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("insufficient data: {reason}")]
    InsufficientData { reason: String },

    #[error("missing required column `{column}`{}", row_suffix(.row))]
    MissingColumn { column: String, row: Option<usize> },

    #[error("invalid match record at row {row}: {reason}")]
    InvalidRecord { row: usize, reason: String },

    #[error("no rating for team `{team}`")]
    UnknownTeam { team: String },

    #[error("invalid decimal odds {odds}: must be a finite value >= 1")]
    InvalidOdds { odds: f64 },

    #[error("optimizer did not converge after {iterations} iterations (gradient norm {gradient_norm:.3e})")]
    OptimizerNonConvergence {
        iterations: usize,
        gradient_norm: f64,
    },

    #[error("invalid config `{field}` = {value}: {reason}")]
    InvalidConfig {
        field: &'static str,
        value: String,
        reason: &'static str,
    },

    #[error("probability triple has no usable mass")]
    DegenerateProbabilities,

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn row_suffix(row: &Option<usize>) -> String {
    match row {
        Some(row) => format!(" at row {}", row),
        None => String::new(),
    }
}

pub type Result<T> = std::result::Result<T, ModelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_column_display() {
        let err = ModelError::MissingColumn {
            column: "home_xg".to_string(),
            row: Some(3),
        };
        assert_eq!(err.to_string(), "missing required column `home_xg` at row 3");

        let err = ModelError::MissingColumn {
            column: "odds_draw".to_string(),
            row: None,
        };
        assert_eq!(err.to_string(), "missing required column `odds_draw`");
    }

    #[test]
    fn test_unknown_team_display() {
        let err = ModelError::UnknownTeam {
            team: "Luton".to_string(),
        };
        assert!(err.to_string().contains("Luton"));
    }
}
