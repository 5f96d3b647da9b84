//! Fans out to every configured source and folds the outcomes into a report.

use crate::error::Result;
use crate::report::RunReport;
use chrono::Utc;
use portfolio_aggregation::{AggregationEngine, ExposureAnalyzer};
use portfolio_core::{
    AppConfig, ConfigError, CredentialProvider, FailureReason, OffsetProvider, PriceSource,
    SourceId, SourceOutcome,
};
use portfolio_sources::{ConfiguredSource, SourceContext};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Runs every source concurrently and aggregates whatever came back.
///
/// Each run builds a fresh [`SourceContext`] unless one is supplied, so rate
/// limiter windows, endpoint health and cached values never carry over.
pub struct Orchestrator {
    config: AppConfig,
    sources: Vec<ConfiguredSource>,
    credentials: Arc<dyn CredentialProvider>,
    offset: Arc<dyn OffsetProvider>,
    pricing: Option<Arc<dyn PriceSource>>,
    engine: AggregationEngine,
    analyzer: ExposureAnalyzer,
}

impl Orchestrator {
    /// # Errors
    ///
    /// Returns [`crate::RunError`] if the configuration is invalid or two
    /// adapters share a source id.
    pub fn new(
        config: AppConfig,
        sources: Vec<ConfiguredSource>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Self> {
        config.validate()?;
        let mut seen = HashSet::new();
        for source in &sources {
            let id = source.adapter.source_id();
            if !seen.insert(id) {
                return Err(ConfigError::DuplicateSource(id.clone()).into());
            }
        }
        let analyzer = ExposureAnalyzer::new(
            config.exposure.stable_set(),
            config.exposure.concentration_threshold_pct,
        )?;
        Ok(Self {
            engine: AggregationEngine::new(config.aliases.table()),
            offset: Arc::new(config.run.offset_usd),
            pricing: None,
            analyzer,
            credentials,
            sources,
            config,
        })
    }

    /// Replaces the configured pricing chain.
    #[must_use]
    pub fn with_pricing(mut self, pricing: Arc<dyn PriceSource>) -> Self {
        self.pricing = Some(pricing);
        self
    }

    /// Replaces the configured `run.offset_usd`.
    #[must_use]
    pub fn with_offset(mut self, offset: Arc<dyn OffsetProvider>) -> Self {
        self.offset = offset;
        self
    }

    #[must_use]
    pub fn sources(&self) -> &[ConfiguredSource] {
        &self.sources
    }

    /// Runs all sources with a fresh context.
    pub async fn run(&self) -> RunReport {
        let ctx = SourceContext::for_run(&self.config, self.pricing.clone());
        self.run_with_context(ctx).await
    }

    /// Runs all sources against `ctx`.
    pub async fn run_with_context(&self, ctx: SourceContext) -> RunReport {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let deadline = self.config.run.timeout().map(|t| Instant::now() + t);
        let semaphore = Arc::new(Semaphore::new(self.config.run.max_concurrency));

        info!(
            %run_id,
            sources = self.sources.len(),
            max_concurrency = self.config.run.max_concurrency,
            timeout_secs = self.config.run.timeout_secs,
            "Starting portfolio run"
        );

        let mut outcomes = Vec::with_capacity(self.sources.len());
        let mut pending: Vec<(SourceId, JoinHandle<SourceOutcome>)> = Vec::new();

        for source in &self.sources {
            let id = source.adapter.source_id().clone();
            let credential = self.credentials.get_secret(&id);
            if source.adapter.requires_credentials() && credential.is_none() {
                info!(source = %id, "No credentials, skipping source");
                outcomes.push(SourceOutcome::skipped(id, "no credentials"));
                continue;
            }

            ctx.prepare(source);
            let adapter = Arc::clone(&source.adapter);
            let ctx = ctx.clone();
            let semaphore = Arc::clone(&semaphore);
            let task_id = id.clone();
            let handle = tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return SourceOutcome::failed(
                        task_id,
                        FailureReason::Unavailable,
                        "concurrency limiter closed",
                    );
                };
                debug!(source = %task_id, kind = adapter.kind(), "Fetching source");
                adapter.fetch(&ctx, credential.as_deref()).await
            });
            pending.push((id, handle));
        }

        let mut timed_out = false;
        for (id, mut handle) in pending {
            let joined = match deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, &mut handle).await,
                None => Ok((&mut handle).await),
            };
            let outcome = match joined {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(e)) if e.is_panic() => {
                    error!(source = %id, "Source adapter panicked");
                    SourceOutcome::failed(id.clone(), FailureReason::Unavailable, "adapter panicked")
                        .with_attempts(ctx.executor.physical_calls(&id))
                }
                Ok(Err(e)) => {
                    warn!(source = %id, error = %e, "Source task cancelled");
                    SourceOutcome::failed(id.clone(), FailureReason::Unavailable, e.to_string())
                        .with_attempts(ctx.executor.physical_calls(&id))
                }
                Err(_) => {
                    handle.abort();
                    timed_out = true;
                    warn!(source = %id, "Run deadline reached, cancelling source");
                    SourceOutcome::failed(id.clone(), FailureReason::Timeout, "run deadline exceeded")
                        .with_attempts(ctx.executor.physical_calls(&id))
                }
            };
            outcomes.push(outcome);
        }

        outcomes.sort_by(|a, b| a.source_id().cmp(b.source_id()));

        let ledger = self.engine.aggregate(&outcomes, self.offset.offset_usd());
        let exposure = self.analyzer.analyze(&ledger);
        let finished_at = Utc::now();

        let report = RunReport {
            run_id,
            started_at,
            finished_at,
            timed_out,
            outcomes,
            ledger,
            exposure,
        };
        let counts = report.status_counts();
        info!(
            %run_id,
            ok = counts.ok,
            failed = counts.failed,
            skipped = counts.skipped,
            timed_out,
            total_usd = %report.ledger.total_usd,
            net_usd = %report.ledger.net_usd,
            elapsed_ms = report.elapsed().num_milliseconds(),
            "Portfolio run finished"
        );
        report
    }
}
