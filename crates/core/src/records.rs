//! Normalized balance records and per-source outcomes.
//!
//! Every source adapter, whatever its wire format, ends up producing
//! [`BalanceRecord`]s wrapped in exactly one [`SourceOutcome`] per run.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// =============================================================================
// Identifiers
// =============================================================================

/// Identifier of one configured source (e.g. `okx`, `solana-main`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(String);

impl SourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SourceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for SourceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Kind of account a balance was reported from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    Spot,
    Funding,
    Futures,
    Margin,
    Wallet,
    Perp,
    Earn,
    Other,
}

impl fmt::Display for AccountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Spot => "spot",
            Self::Funding => "funding",
            Self::Futures => "futures",
            Self::Margin => "margin",
            Self::Wallet => "wallet",
            Self::Perp => "perp",
            Self::Earn => "earn",
            Self::Other => "other",
        };
        f.write_str(name)
    }
}

// =============================================================================
// BalanceRecord
// =============================================================================

/// One normalized holding or position as reported by a single source.
///
/// `quantity` and `usd_value` are signed: liabilities and shorts are negative so
/// that aggregation can net them by plain summation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceRecord {
    pub source_id: SourceId,
    pub account_type: AccountType,
    /// Raw symbol in source-native casing.
    pub symbol: String,
    pub quantity: Decimal,
    pub usd_value: Decimal,
    pub is_liability: bool,
    /// Source-specific details, opaque to aggregation.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl BalanceRecord {
    /// Creates a record; the liability flag follows the sign of `quantity`.
    pub fn new(
        source_id: SourceId,
        account_type: AccountType,
        symbol: impl Into<String>,
        quantity: Decimal,
        usd_value: Decimal,
    ) -> Self {
        Self {
            source_id,
            account_type,
            symbol: symbol.into(),
            quantity,
            usd_value,
            is_liability: quantity < Decimal::ZERO,
            metadata: BTreeMap::new(),
        }
    }

    /// Creates a liability record (borrowed balance, short leg).
    ///
    /// Both `quantity` and `usd_value` are forced negative regardless of the sign
    /// the source reported them with.
    pub fn liability(
        source_id: SourceId,
        account_type: AccountType,
        symbol: impl Into<String>,
        quantity: Decimal,
        usd_value: Decimal,
    ) -> Self {
        Self {
            source_id,
            account_type,
            symbol: symbol.into(),
            quantity: -quantity.abs(),
            usd_value: -usd_value.abs(),
            is_liability: true,
            metadata: BTreeMap::new(),
        }
    }

    /// Attaches a metadata entry.
    #[must_use]
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Returns true if the USD value could not be resolved and was degraded to zero.
    #[must_use]
    pub fn price_unavailable(&self) -> bool {
        self.metadata.get(META_PRICE_UNAVAILABLE).map(String::as_str) == Some("true")
    }
}

/// Metadata key set on records whose price could not be resolved.
pub const META_PRICE_UNAVAILABLE: &str = "price_unavailable";

// =============================================================================
// SourceOutcome
// =============================================================================

/// Terminal status of one adapter invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Ok,
    Failed,
    Skipped,
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => f.write_str("ok"),
            Self::Failed => f.write_str("failed"),
            Self::Skipped => f.write_str("skipped"),
        }
    }
}

/// Classified reason for a failed source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    Timeout,
    RateLimited,
    AuthError,
    ParseError,
    Unavailable,
    /// Non-retryable client error other than auth or rate limiting.
    Rejected,
}

impl FailureReason {
    /// Human-readable category shown next to the source in run summaries.
    #[must_use]
    pub fn describe(&self) -> &'static str {
        match self {
            Self::Timeout => "timed out",
            Self::RateLimited => "rate limited",
            Self::AuthError => "authentication failed",
            Self::ParseError => "unexpected response",
            Self::Unavailable => "source unavailable",
            Self::Rejected => "request rejected",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// Result of one adapter invocation within a run.
///
/// Fields are private so `records` can only be non-empty for `Ok` and
/// `failure_reason` is present exactly when the status is `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceOutcome {
    source_id: SourceId,
    status: OutcomeStatus,
    records: Vec<BalanceRecord>,
    failure_reason: Option<FailureReason>,
    detail: Option<String>,
    attempts: u32,
    fetched_at: DateTime<Utc>,
}

impl SourceOutcome {
    /// Successful fetch. Records reported under another source id are re-tagged.
    pub fn ok(source_id: SourceId, records: Vec<BalanceRecord>) -> Self {
        let records = records
            .into_iter()
            .map(|mut record| {
                if record.source_id != source_id {
                    record.source_id = source_id.clone();
                }
                record
            })
            .collect();
        Self {
            source_id,
            status: OutcomeStatus::Ok,
            records,
            failure_reason: None,
            detail: None,
            attempts: 0,
            fetched_at: Utc::now(),
        }
    }

    /// Failed fetch with a classified reason.
    pub fn failed(source_id: SourceId, reason: FailureReason, detail: impl Into<String>) -> Self {
        Self {
            source_id,
            status: OutcomeStatus::Failed,
            records: Vec::new(),
            failure_reason: Some(reason),
            detail: Some(detail.into()),
            attempts: 0,
            fetched_at: Utc::now(),
        }
    }

    /// Source was not queried (disabled, no credentials, missing collaborator).
    pub fn skipped(source_id: SourceId, detail: impl Into<String>) -> Self {
        Self {
            source_id,
            status: OutcomeStatus::Skipped,
            records: Vec::new(),
            failure_reason: None,
            detail: Some(detail.into()),
            attempts: 0,
            fetched_at: Utc::now(),
        }
    }

    /// Sets the number of physical calls made.
    #[must_use]
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    /// Overrides the fetch timestamp.
    #[must_use]
    pub fn with_fetched_at(mut self, fetched_at: DateTime<Utc>) -> Self {
        self.fetched_at = fetched_at;
        self
    }

    #[must_use]
    pub fn source_id(&self) -> &SourceId {
        &self.source_id
    }

    #[must_use]
    pub fn status(&self) -> OutcomeStatus {
        self.status
    }

    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status == OutcomeStatus::Ok
    }

    #[must_use]
    pub fn records(&self) -> &[BalanceRecord] {
        &self.records
    }

    #[must_use]
    pub fn failure_reason(&self) -> Option<FailureReason> {
        self.failure_reason
    }

    #[must_use]
    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    #[must_use]
    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn src(id: &str) -> SourceId {
        SourceId::new(id)
    }

    #[test]
    fn test_new_record_derives_liability_from_sign() {
        let long = BalanceRecord::new(src("okx"), AccountType::Spot, "ETH", dec!(2), dec!(6000));
        assert!(!long.is_liability);

        let short = BalanceRecord::new(src("okx"), AccountType::Perp, "ETH", dec!(-2), dec!(-6000));
        assert!(short.is_liability);
    }

    #[test]
    fn test_liability_forces_negative_values() {
        let debt =
            BalanceRecord::liability(src("okx"), AccountType::Margin, "USDT", dec!(500), dec!(500));
        assert_eq!(debt.quantity, dec!(-500));
        assert_eq!(debt.usd_value, dec!(-500));
        assert!(debt.is_liability);

        let already_negative =
            BalanceRecord::liability(src("okx"), AccountType::Margin, "USDT", dec!(-5), dec!(-5));
        assert_eq!(already_negative.quantity, dec!(-5));
    }

    #[test]
    fn test_price_unavailable_flag() {
        let record = BalanceRecord::new(src("manual"), AccountType::Wallet, "XYZ", dec!(10), dec!(0))
            .with_meta(META_PRICE_UNAVAILABLE, "true");
        assert!(record.price_unavailable());

        let priced = BalanceRecord::new(src("manual"), AccountType::Wallet, "BTC", dec!(1), dec!(1));
        assert!(!priced.price_unavailable());
    }

    #[test]
    fn test_ok_outcome_retags_foreign_records() {
        let record = BalanceRecord::new(src("other"), AccountType::Spot, "BTC", dec!(1), dec!(1));
        let outcome = SourceOutcome::ok(src("okx"), vec![record]);

        assert!(outcome.is_ok());
        assert_eq!(outcome.records()[0].source_id, src("okx"));
        assert!(outcome.failure_reason().is_none());
    }

    #[test]
    fn test_failed_outcome_has_reason_and_no_records() {
        let outcome = SourceOutcome::failed(src("bybit"), FailureReason::AuthError, "invalid key")
            .with_attempts(1);

        assert_eq!(outcome.status(), OutcomeStatus::Failed);
        assert_eq!(outcome.failure_reason(), Some(FailureReason::AuthError));
        assert!(outcome.records().is_empty());
        assert_eq!(outcome.detail(), Some("invalid key"));
        assert_eq!(outcome.attempts(), 1);
    }

    #[test]
    fn test_skipped_outcome_has_no_reason() {
        let outcome = SourceOutcome::skipped(src("okx"), "no credentials");
        assert_eq!(outcome.status(), OutcomeStatus::Skipped);
        assert!(outcome.failure_reason().is_none());
    }

    #[test]
    fn test_source_id_serializes_transparently() {
        let json = serde_json::to_string(&src("solana-main")).unwrap();
        assert_eq!(json, "\"solana-main\"");
    }

    #[test]
    fn test_failure_reason_display() {
        assert_eq!(FailureReason::RateLimited.to_string(), "rate limited");
        assert_eq!(FailureReason::Timeout.to_string(), "timed out");
    }
}
