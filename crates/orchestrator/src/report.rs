use chrono::{DateTime, Utc};
use portfolio_aggregation::{ExposureReport, PortfolioLedger};
use portfolio_core::{OutcomeStatus, SourceId, SourceOutcome};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Immutable result of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// True if the run deadline cancelled at least one source.
    pub timed_out: bool,
    /// One outcome per configured source, sorted by source id.
    pub outcomes: Vec<SourceOutcome>,
    pub ledger: PortfolioLedger,
    pub exposure: ExposureReport,
}

/// Count of outcomes per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub ok: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl RunReport {
    #[must_use]
    pub fn outcome(&self, source: &SourceId) -> Option<&SourceOutcome> {
        self.outcomes
            .binary_search_by(|o| o.source_id().cmp(source))
            .ok()
            .map(|idx| &self.outcomes[idx])
    }

    #[must_use]
    pub fn status_counts(&self) -> StatusCounts {
        self.outcomes
            .iter()
            .fold(StatusCounts::default(), |mut counts, outcome| {
                match outcome.status() {
                    OutcomeStatus::Ok => counts.ok += 1,
                    OutcomeStatus::Failed => counts.failed += 1,
                    OutcomeStatus::Skipped => counts.skipped += 1,
                }
                counts
            })
    }

    /// True when every queried source succeeded.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.timed_out && self.status_counts().failed == 0
    }

    #[must_use]
    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}
