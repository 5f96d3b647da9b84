//! Concentration, stable split and directional exposure over a ledger.

use crate::engine::PortfolioLedger;
use portfolio_core::StableSet;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AnalysisError {
    #[error("concentration threshold must be non-negative, got {0}")]
    NegativeThreshold(Decimal),
}

/// A position whose share of the portfolio exceeds the threshold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcentrationAlert {
    pub symbol: String,
    pub pct_of_total: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectionalExposure {
    pub symbol: String,
    pub net_quantity: Decimal,
    pub usd_value: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExposureReport {
    pub stable_pct: Decimal,
    pub non_stable_pct: Decimal,
    pub stable_usd: Decimal,
    pub non_stable_usd: Decimal,
    /// Ordered by share descending, then symbol.
    pub concentration_alerts: Vec<ConcentrationAlert>,
    /// Ordered by absolute USD value descending, then symbol.
    pub largest_directional: Vec<DirectionalExposure>,
    pub asset_count: usize,
    pub stable_asset_count: usize,
}

/// Pure function of its inputs; analyzing the same ledger twice yields equal reports.
#[derive(Debug, Clone)]
pub struct ExposureAnalyzer {
    stable: StableSet,
    threshold_pct: Decimal,
}

impl ExposureAnalyzer {
    pub fn new(stable: StableSet, threshold_pct: Decimal) -> Result<Self, AnalysisError> {
        if threshold_pct < Decimal::ZERO {
            return Err(AnalysisError::NegativeThreshold(threshold_pct));
        }
        Ok(Self {
            stable,
            threshold_pct,
        })
    }

    #[must_use]
    pub fn threshold_pct(&self) -> Decimal {
        self.threshold_pct
    }

    /// Stable split and alerts against a positive `total`.
    fn shares(
        &self,
        ledger: &PortfolioLedger,
        stable_usd: Decimal,
        total: Decimal,
    ) -> Option<(Decimal, Decimal, Vec<ConcentrationAlert>)> {
        let stable_pct = share_pct(stable_usd, total)?;
        let non_stable_pct = Decimal::ONE_HUNDRED.checked_sub(stable_pct)?;
        let mut alerts = Vec::new();
        for position in ledger.positions.values() {
            let pct = share_pct(position.gross_usd_value, total)?;
            if pct > self.threshold_pct {
                alerts.push(ConcentrationAlert {
                    symbol: position.canonical_symbol.clone(),
                    pct_of_total: pct,
                });
            }
        }
        Some((stable_pct, non_stable_pct, alerts))
    }

    #[must_use]
    pub fn analyze(&self, ledger: &PortfolioLedger) -> ExposureReport {
        let total = ledger.total_usd;

        let mut stable_usd = Decimal::ZERO;
        let mut stable_asset_count = 0;
        for position in ledger.positions.values() {
            if self.stable.is_stable(&position.canonical_symbol) {
                stable_usd = stable_usd.saturating_add(position.gross_usd_value);
                stable_asset_count += 1;
            }
        }
        let non_stable_usd = total.saturating_sub(stable_usd);

        let shares = if total > Decimal::ZERO {
            let shares = self.shares(ledger, stable_usd, total);
            if shares.is_none() {
                warn!(total_usd = %total, "Portfolio shares not representable, reporting zero percentages");
            }
            shares
        } else {
            None
        };
        let (stable_pct, non_stable_pct, mut concentration_alerts) =
            shares.unwrap_or((Decimal::ZERO, Decimal::ZERO, Vec::new()));
        concentration_alerts.sort_by(|a, b| {
            b.pct_of_total
                .cmp(&a.pct_of_total)
                .then_with(|| a.symbol.cmp(&b.symbol))
        });

        let mut largest_directional = ledger
            .positions
            .values()
            .map(|p| DirectionalExposure {
                symbol: p.canonical_symbol.clone(),
                net_quantity: p.net_quantity,
                usd_value: p.gross_usd_value,
            })
            .collect::<Vec<_>>();
        largest_directional.sort_by(|a, b| match b.usd_value.abs().cmp(&a.usd_value.abs()) {
            Ordering::Equal => a.symbol.cmp(&b.symbol),
            other => other,
        });

        debug!(
            stable_pct = %stable_pct,
            alerts = concentration_alerts.len(),
            "Exposure analyzed"
        );

        ExposureReport {
            stable_pct,
            non_stable_pct,
            stable_usd,
            non_stable_usd,
            concentration_alerts,
            largest_directional,
            asset_count: ledger.positions.len(),
            stable_asset_count,
        }
    }
}

/// `value` as a percentage of `total`, `None` when the result overflows.
fn share_pct(value: Decimal, total: Decimal) -> Option<Decimal> {
    value.checked_div(total)?.checked_mul(Decimal::ONE_HUNDRED)
}

/// One-shot form of [`ExposureAnalyzer::analyze`].
pub fn analyze(
    ledger: &PortfolioLedger,
    stable: &StableSet,
    threshold_pct: Decimal,
) -> Result<ExposureReport, AnalysisError> {
    Ok(ExposureAnalyzer::new(stable.clone(), threshold_pct)?.analyze(ledger))
}
