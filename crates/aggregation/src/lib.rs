//! Ledger aggregation and exposure analysis.

pub mod engine;
pub mod exposure;

pub use engine::{AggregatedPosition, AggregationEngine, PortfolioLedger, SourceSummary};
pub use exposure::{
    analyze, AnalysisError, ConcentrationAlert, DirectionalExposure, ExposureAnalyzer,
    ExposureReport,
};
