pub mod backtest;
pub mod data;
pub mod ev_analysis;
pub mod ev_calculator;
pub mod optimizer;
pub mod score_distribution;
pub mod strength;
