//! Price collaborators used to value balances that arrive without a USD value.

use async_trait::async_trait;
use portfolio_core::{normalize_symbol, PriceSource, PricingConfig, SourceId, StableSet};
use portfolio_fetch::{RequestExecutor, TtlCache};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

// =============================================================================
// PegPrices
// =============================================================================

/// Prices every stablecoin at exactly one dollar.
#[derive(Debug, Clone)]
pub struct PegPrices {
    stable: StableSet,
}

impl PegPrices {
    #[must_use]
    pub fn new(stable: StableSet) -> Self {
        Self { stable }
    }
}

#[async_trait]
impl PriceSource for PegPrices {
    async fn price_of(&self, symbol: &str) -> Option<Decimal> {
        self.stable.is_stable(symbol).then_some(Decimal::ONE)
    }

    fn name(&self) -> &str {
        "peg"
    }
}

// =============================================================================
// BinanceTickerPrices
// =============================================================================

#[derive(Debug, Deserialize)]
struct TickerPrice {
    price: String,
}

/// Spot prices from the Binance ticker endpoint, quoted in a stablecoin.
pub struct BinanceTickerPrices {
    executor: RequestExecutor,
    base_url: String,
    quote_asset: String,
    source_id: SourceId,
}

impl BinanceTickerPrices {
    #[must_use]
    pub fn new(executor: RequestExecutor, base_url: impl Into<String>, quote_asset: &str) -> Self {
        Self {
            executor,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            quote_asset: normalize_symbol(quote_asset),
            source_id: SourceId::new("binance-prices"),
        }
    }
}

#[async_trait]
impl PriceSource for BinanceTickerPrices {
    async fn price_of(&self, symbol: &str) -> Option<Decimal> {
        let symbol = normalize_symbol(symbol);
        if symbol.is_empty() || !symbol.chars().all(|c| c.is_ascii_alphanumeric()) {
            return None;
        }
        if symbol == self.quote_asset {
            return Some(Decimal::ONE);
        }
        let url = format!(
            "{}/api/v3/ticker/price?symbol={symbol}{}",
            self.base_url, self.quote_asset
        );
        match self.executor.get_json::<TickerPrice>(&self.source_id, &url).await {
            Ok(ticker) => Decimal::from_str(&ticker.price).ok(),
            Err(e) => {
                debug!(symbol = %symbol, error = %e, "Ticker price unavailable");
                None
            }
        }
    }

    fn name(&self) -> &str {
        "binance"
    }
}

// =============================================================================
// FallbackPrices
// =============================================================================

/// Asks each source in order; the first price wins.
#[derive(Clone, Default)]
pub struct FallbackPrices {
    sources: Vec<Arc<dyn PriceSource>>,
}

impl FallbackPrices {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, source: Arc<dyn PriceSource>) -> Self {
        self.sources.push(source);
        self
    }
}

#[async_trait]
impl PriceSource for FallbackPrices {
    async fn price_of(&self, symbol: &str) -> Option<Decimal> {
        for source in &self.sources {
            if let Some(price) = source.price_of(symbol).await {
                return Some(price);
            }
        }
        None
    }

    fn name(&self) -> &str {
        "fallback"
    }
}

// =============================================================================
// CachedPrices
// =============================================================================

/// Memoizes another price source through the run's cache. Misses are not cached.
pub struct CachedPrices {
    inner: Arc<dyn PriceSource>,
    cache: Arc<TtlCache>,
    ttl: Duration,
    cache_source: SourceId,
}

impl CachedPrices {
    #[must_use]
    pub fn new(inner: Arc<dyn PriceSource>, cache: Arc<TtlCache>, ttl: Duration) -> Self {
        Self {
            inner,
            cache,
            ttl,
            cache_source: SourceId::new("pricing"),
        }
    }
}

#[async_trait]
impl PriceSource for CachedPrices {
    async fn price_of(&self, symbol: &str) -> Option<Decimal> {
        let key = normalize_symbol(symbol);
        self.cache
            .get_or_fetch(&self.cache_source, &key, self.ttl, || async {
                self.inner.price_of(&key).await.ok_or(())
            })
            .await
            .ok()
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

/// Stablecoin peg first, then the Binance ticker when enabled.
#[must_use]
pub fn default_chain(
    config: &PricingConfig,
    stable: StableSet,
    executor: RequestExecutor,
) -> Arc<dyn PriceSource> {
    let mut chain = FallbackPrices::new().with(Arc::new(PegPrices::new(stable)));
    if config.enabled {
        chain = chain.with(Arc::new(BinanceTickerPrices::new(
            executor,
            config.binance_base_url.clone(),
            &config.quote_asset,
        )));
    }
    Arc::new(chain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use portfolio_core::StaticPrices;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicU32, Ordering};
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Counting {
        calls: AtomicU32,
    }

    #[async_trait]
    impl PriceSource for Counting {
        async fn price_of(&self, symbol: &str) -> Option<Decimal> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (symbol == "ETH").then_some(dec!(3000))
        }

        fn name(&self) -> &str {
            "counting"
        }
    }

    #[tokio::test]
    async fn test_peg_prices_stablecoins() {
        let peg = PegPrices::new(StableSet::with_defaults());
        assert_eq!(peg.price_of("USDC").await, Some(Decimal::ONE));
        assert_eq!(peg.price_of("USDC+USDT").await, Some(Decimal::ONE));
        assert_eq!(peg.price_of("ETH").await, None);
    }

    #[tokio::test]
    async fn test_fallback_prefers_first_answer() {
        let chain = FallbackPrices::new()
            .with(Arc::new(PegPrices::new(StableSet::with_defaults())))
            .with(Arc::new(StaticPrices::new().with("USDT", dec!(0.99)).with("BTC", dec!(60000))));

        assert_eq!(chain.price_of("USDT").await, Some(Decimal::ONE));
        assert_eq!(chain.price_of("BTC").await, Some(dec!(60000)));
        assert_eq!(chain.price_of("DOGE").await, None);
    }

    #[tokio::test]
    async fn test_cached_prices_memoize_hits_only() {
        let inner = Arc::new(Counting { calls: AtomicU32::new(0) });
        let cached = CachedPrices::new(inner.clone(), Arc::new(TtlCache::new()), Duration::from_secs(60));

        assert_eq!(cached.price_of("eth").await, Some(dec!(3000)));
        assert_eq!(cached.price_of("ETH").await, Some(dec!(3000)));
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);

        assert_eq!(cached.price_of("XYZ").await, None);
        assert_eq!(cached.price_of("XYZ").await, None);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_binance_ticker_prices() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v3/ticker/price"))
            .and(query_param("symbol", "ETHUSDT"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"symbol": "ETHUSDT", "price": "3012.50000000"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v3/ticker/price"))
            .and(query_param("symbol", "NOPEUSDT"))
            .respond_with(ResponseTemplate::new(400).set_body_string("Invalid symbol."))
            .mount(&server)
            .await;

        let prices = BinanceTickerPrices::new(RequestExecutor::default(), server.uri(), "USDT");
        assert_eq!(prices.price_of("eth").await, Some(dec!(3012.5)));
        assert_eq!(prices.price_of("NOPE").await, None);
        assert_eq!(prices.price_of("USDT").await, Some(Decimal::ONE));
    }
}
