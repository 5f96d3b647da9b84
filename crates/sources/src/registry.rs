//! Builds adapters from configuration.

use crate::adapter::{ConfiguredSource, SourceAdapter};
use crate::binance::BinanceAdapter;
use crate::bitcoin::BitcoinAdapter;
use crate::bybit::BybitAdapter;
use crate::dashboard::{DashboardAdapter, DashboardScraper};
use crate::hyperliquid::HyperliquidAdapter;
use crate::manual::ManualAdapter;
use crate::okx::OkxAdapter;
use crate::signer::RequestSigner;
use crate::solana::SolanaAdapter;
use portfolio_core::{AppConfig, SourceConfig, SourceKind};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Out-of-process collaborators adapters may need.
///
/// Signers are keyed by source kind (`okx`, `binance`, `bybit`).
#[derive(Default, Clone)]
pub struct Collaborators {
    signers: HashMap<&'static str, Arc<dyn RequestSigner>>,
    scraper: Option<Arc<dyn DashboardScraper>>,
}

impl Collaborators {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_signer(mut self, kind: &'static str, signer: Arc<dyn RequestSigner>) -> Self {
        self.signers.insert(kind, signer);
        self
    }

    #[must_use]
    pub fn with_scraper(mut self, scraper: Arc<dyn DashboardScraper>) -> Self {
        self.scraper = Some(scraper);
        self
    }

    fn signer(&self, kind: &str) -> Option<Arc<dyn RequestSigner>> {
        self.signers.get(kind).cloned()
    }
}

/// Adapter for one source entry.
pub fn build_source(config: &SourceConfig, collaborators: &Collaborators) -> ConfiguredSource {
    let id = config.id.clone();
    let adapter: Arc<dyn SourceAdapter> = match &config.kind {
        SourceKind::Okx { base_url } => Arc::new(
            OkxAdapter::new(id, collaborators.signer("okx")).with_base_url(base_url.as_str()),
        ),
        SourceKind::Binance {
            base_url,
            futures_base_url,
            include_futures,
        } => Arc::new(
            BinanceAdapter::new(id, collaborators.signer("binance"))
                .with_base_url(base_url.as_str())
                .with_futures_url(futures_base_url.as_str())
                .with_futures(*include_futures),
        ),
        SourceKind::Bybit {
            base_url,
            settle_coins,
        } => Arc::new(
            BybitAdapter::new(id, collaborators.signer("bybit"))
                .with_base_url(base_url.as_str())
                .with_settle_coins(settle_coins.clone()),
        ),
        SourceKind::Hyperliquid {
            base_url,
            addresses,
        } => Arc::new(HyperliquidAdapter::new(id, addresses.clone()).with_base_url(base_url.as_str())),
        SourceKind::Solana {
            endpoints,
            addresses,
        } => Arc::new(SolanaAdapter::new(id, endpoints.clone(), addresses.clone())),
        SourceKind::Bitcoin {
            endpoints,
            addresses,
        } => Arc::new(BitcoinAdapter::new(id, endpoints.clone(), addresses.clone())),
        SourceKind::Manual { holdings } => Arc::new(ManualAdapter::new(id, holdings.clone())),
        SourceKind::Dashboard { addresses } => Arc::new(DashboardAdapter::new(
            id,
            addresses.clone(),
            collaborators.scraper.clone(),
        )),
    };
    debug!(source = %config.id, kind = config.kind.name(), "Source adapter built");
    ConfiguredSource::new(adapter).with_rate_limit(config.rate_limit)
}

/// Adapters for every enabled source, in configuration order.
pub fn build_sources(config: &AppConfig, collaborators: &Collaborators) -> Vec<ConfiguredSource> {
    config
        .enabled_sources()
        .map(|source| build_source(source, collaborators))
        .collect()
}
