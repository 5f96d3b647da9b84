use portfolio_aggregation::AnalysisError;
use portfolio_core::ConfigError;
use thiserror::Error;

/// Fatal errors at the run boundary. Source failures never surface here.
#[derive(Error, Debug)]
pub enum RunError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid analysis settings: {0}")]
    Analysis(#[from] AnalysisError),
}

pub type Result<T> = std::result::Result<T, RunError>;
