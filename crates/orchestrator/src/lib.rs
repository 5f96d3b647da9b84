//! Run orchestration: concurrent source fan-out, aggregation and exposure.

pub mod error;
pub mod orchestrator;
pub mod report;

pub use error::{Result, RunError};
pub use orchestrator::Orchestrator;
pub use report::{RunReport, StatusCounts};
