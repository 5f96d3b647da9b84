//! Per-run shared state handed to every adapter.

use crate::adapter::ConfiguredSource;
use crate::pricing::{self, CachedPrices};
use portfolio_core::{AliasTable, AppConfig, FetchConfig, PriceSource, SourceId};
use portfolio_fetch::{BatchLimits, RequestExecutor, RetryPolicy, TtlCache};
use std::sync::Arc;
use std::time::Duration;

/// Rate limiters, pool, rotator, cache and pricing for one run.
///
/// Built fresh for every run so no state leaks between runs.
#[derive(Clone)]
pub struct SourceContext {
    pub executor: RequestExecutor,
    pub cache: Arc<TtlCache>,
    pub pricing: Arc<dyn PriceSource>,
    /// Wrapped and staked assets are priced through their canonical symbol.
    pub aliases: AliasTable,
    pub cache_ttl: Duration,
    pub batch_window: Duration,
    pub max_batch_size: usize,
}

impl SourceContext {
    /// Context with the given pricing collaborator, memoized through the run cache.
    #[must_use]
    pub fn new(executor: RequestExecutor, fetch: &FetchConfig, pricing: Arc<dyn PriceSource>) -> Self {
        let cache = Arc::new(TtlCache::new());
        let pricing: Arc<dyn PriceSource> =
            Arc::new(CachedPrices::new(pricing, Arc::clone(&cache), fetch.cache_ttl()));
        Self {
            executor,
            cache,
            pricing,
            aliases: AliasTable::with_defaults(),
            cache_ttl: fetch.cache_ttl(),
            batch_window: fetch.batch_window(),
            max_batch_size: fetch.max_batch_size.max(1),
        }
    }

    /// Context for one run of `config`. `pricing` overrides the configured chain.
    #[must_use]
    pub fn for_run(config: &AppConfig, pricing: Option<Arc<dyn PriceSource>>) -> Self {
        let executor = RequestExecutor::from_config(&config.fetch);
        let pricing = pricing.unwrap_or_else(|| {
            pricing::default_chain(&config.pricing, config.exposure.stable_set(), executor.clone())
        });
        Self::new(executor, &config.fetch, pricing).with_aliases(config.aliases.table())
    }

    #[must_use]
    pub fn with_aliases(mut self, aliases: AliasTable) -> Self {
        self.aliases = aliases;
        self
    }

    /// Installs a source's rate limit and endpoints before it runs.
    pub fn prepare(&self, source: &ConfiguredSource) {
        let id = source.adapter.source_id();
        if let Some(limit) = source.rate_limit {
            self.executor.limiter().configure(id, limit);
        }
        let endpoints = source.adapter.endpoints();
        if !endpoints.is_empty() {
            self.executor.rotator().register(id, endpoints);
        }
    }

    /// Batch settings for `source`; the retry budget covers every endpoint.
    #[must_use]
    pub fn batch_limits(&self, source: &SourceId) -> BatchLimits {
        BatchLimits {
            limiter: Arc::clone(self.executor.limiter()),
            retry: self.executor.rotating_policy(source),
            window: self.batch_window,
        }
    }

    #[must_use]
    pub fn retry(&self) -> &RetryPolicy {
        self.executor.retry()
    }
}
