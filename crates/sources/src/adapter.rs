//! The capability every integrated source implements.

use crate::context::SourceContext;
use async_trait::async_trait;
use portfolio_core::{BalanceRecord, Credential, RateLimitConfig, SourceId, SourceOutcome};
use portfolio_fetch::FetchError;
use std::sync::Arc;
use tracing::{info, warn};

/// One integrated source.
///
/// `fetch` never panics on ordinary failures and never propagates them: every
/// failure is classified into the returned outcome.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source_id(&self) -> &SourceId;

    /// Short kind name (`okx`, `solana`, ...).
    fn kind(&self) -> &'static str;

    fn requires_credentials(&self) -> bool {
        false
    }

    /// Equivalent endpoints in priority order, for sources that fail over.
    fn endpoints(&self) -> Vec<String> {
        Vec::new()
    }

    async fn fetch(&self, ctx: &SourceContext, credential: Option<&Credential>) -> SourceOutcome;
}

/// An adapter together with its configured rate limit override.
#[derive(Clone)]
pub struct ConfiguredSource {
    pub adapter: Arc<dyn SourceAdapter>,
    pub rate_limit: Option<RateLimitConfig>,
}

impl ConfiguredSource {
    pub fn new(adapter: Arc<dyn SourceAdapter>) -> Self {
        Self {
            adapter,
            rate_limit: None,
        }
    }

    #[must_use]
    pub fn with_rate_limit(mut self, rate_limit: Option<RateLimitConfig>) -> Self {
        self.rate_limit = rate_limit;
        self
    }
}

/// Converts an adapter's collected records or error into its outcome.
pub(crate) fn finish(
    source: &SourceId,
    ctx: &SourceContext,
    result: Result<Vec<BalanceRecord>, FetchError>,
) -> SourceOutcome {
    let attempts = ctx.executor.physical_calls(source);
    match result {
        Ok(records) => {
            info!(source = %source, records = records.len(), attempts, "Source fetched");
            SourceOutcome::ok(source.clone(), records).with_attempts(attempts)
        }
        Err(e) => {
            let reason = e.failure_reason();
            warn!(source = %source, reason = %reason, attempts, error = %e, "Source failed");
            SourceOutcome::failed(source.clone(), reason, e.to_string()).with_attempts(attempts)
        }
    }
}

/// Skipped outcome for a missing collaborator or credential.
pub(crate) fn skip(source: &SourceId, detail: &str) -> SourceOutcome {
    info!(source = %source, detail, "Source skipped");
    SourceOutcome::skipped(source.clone(), detail)
}
