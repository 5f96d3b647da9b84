//! Merges per-source outcomes into one canonical ledger.

use chrono::{DateTime, Utc};
use portfolio_core::{AliasTable, FailureReason, OutcomeStatus, SourceId, SourceOutcome};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// Net holding of one canonical symbol across every source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatedPosition {
    pub canonical_symbol: String,
    /// Sum of signed quantities; shorts and debts net against longs.
    pub net_quantity: Decimal,
    /// Sum of signed USD values.
    pub gross_usd_value: Decimal,
    pub contributing_sources: BTreeSet<SourceId>,
    pub usd_by_source: BTreeMap<SourceId, Decimal>,
}

impl AggregatedPosition {
    fn empty(canonical_symbol: String) -> Self {
        Self {
            canonical_symbol,
            net_quantity: Decimal::ZERO,
            gross_usd_value: Decimal::ZERO,
            contributing_sources: BTreeSet::new(),
            usd_by_source: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn is_short(&self) -> bool {
        self.net_quantity < Decimal::ZERO
    }
}

/// Per-source status line kept on the ledger for reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSummary {
    pub status: OutcomeStatus,
    pub failure_reason: Option<FailureReason>,
    pub detail: Option<String>,
    pub record_count: usize,
    pub attempts: u32,
}

impl From<&SourceOutcome> for SourceSummary {
    fn from(outcome: &SourceOutcome) -> Self {
        Self {
            status: outcome.status(),
            failure_reason: outcome.failure_reason(),
            detail: outcome.detail().map(str::to_string),
            record_count: outcome.records().len(),
            attempts: outcome.attempts(),
        }
    }
}

impl SourceSummary {
    /// Combines two outcomes reported under one source id.
    ///
    /// Counts add up; status, reason and detail come from the lower of the two
    /// by `(status, failure_reason, detail)`, so the result is independent of
    /// the order outcomes arrive in.
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        let record_count = self.record_count.saturating_add(other.record_count);
        let attempts = self.attempts.saturating_add(other.attempts);
        let primary = if (other.status, &other.failure_reason, &other.detail)
            < (self.status, &self.failure_reason, &self.detail)
        {
            other
        } else {
            self
        };
        Self {
            record_count,
            attempts,
            ..primary
        }
    }
}

/// Canonical view of every position in one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortfolioLedger {
    pub positions: BTreeMap<String, AggregatedPosition>,
    pub total_usd: Decimal,
    pub offset_usd: Decimal,
    /// `total_usd - offset_usd`, not clamped at zero.
    pub net_usd: Decimal,
    pub generated_at: DateTime<Utc>,
    pub sources: BTreeMap<SourceId, SourceSummary>,
}

impl PortfolioLedger {
    #[must_use]
    pub fn position(&self, symbol: &str) -> Option<&AggregatedPosition> {
        self.positions.get(symbol)
    }

    /// Sources whose outcome had the given status.
    pub fn sources_with(&self, status: OutcomeStatus) -> impl Iterator<Item = &SourceId> {
        self.sources
            .iter()
            .filter(move |(_, summary)| summary.status == status)
            .map(|(id, _)| id)
    }
}

// =============================================================================
// AggregationEngine
// =============================================================================

/// Stateless aside from its alias table; the same outcomes always produce the
/// same ledger regardless of their order.
#[derive(Debug, Clone, Default)]
pub struct AggregationEngine {
    aliases: AliasTable,
}

impl AggregationEngine {
    #[must_use]
    pub fn new(aliases: AliasTable) -> Self {
        Self { aliases }
    }

    #[must_use]
    pub fn aliases(&self) -> &AliasTable {
        &self.aliases
    }

    #[must_use]
    pub fn aggregate(&self, outcomes: &[SourceOutcome], offset_usd: Decimal) -> PortfolioLedger {
        let mut positions: BTreeMap<String, AggregatedPosition> = BTreeMap::new();
        let mut sources = BTreeMap::new();
        let mut generated_at = DateTime::<Utc>::UNIX_EPOCH;

        for outcome in outcomes {
            let summary = SourceSummary::from(outcome);
            let summary = match sources.remove(outcome.source_id()) {
                Some(previous) => {
                    warn!(source = %outcome.source_id(), "Source id reported more than once, merging");
                    SourceSummary::merge(previous, summary)
                }
                None => summary,
            };
            sources.insert(outcome.source_id().clone(), summary);
            generated_at = generated_at.max(outcome.fetched_at());
            if !outcome.is_ok() {
                continue;
            }

            for record in outcome.records() {
                let symbol = self.aliases.canonicalize(&record.symbol);
                if symbol.is_empty() {
                    debug!(source = %record.source_id, raw = %record.symbol, "Dropping record with empty symbol");
                    continue;
                }
                let position = positions
                    .entry(symbol.clone())
                    .or_insert_with(|| AggregatedPosition::empty(symbol));
                // Saturate instead of panicking on values past Decimal's range.
                position.net_quantity = position.net_quantity.saturating_add(record.quantity);
                position.gross_usd_value = position.gross_usd_value.saturating_add(record.usd_value);
                position.contributing_sources.insert(record.source_id.clone());
                let by_source = position
                    .usd_by_source
                    .entry(record.source_id.clone())
                    .or_insert(Decimal::ZERO);
                *by_source = by_source.saturating_add(record.usd_value);
            }
        }

        positions.retain(|_, p| !(p.net_quantity.is_zero() && p.gross_usd_value.is_zero()));

        let total_usd = positions
            .values()
            .fold(Decimal::ZERO, |total, p| total.saturating_add(p.gross_usd_value));
        debug!(
            positions = positions.len(),
            sources = sources.len(),
            total_usd = %total_usd,
            "Ledger aggregated"
        );

        PortfolioLedger {
            positions,
            total_usd,
            offset_usd,
            net_usd: total_usd.saturating_sub(offset_usd),
            generated_at,
            sources,
        }
    }
}
