//! Holdings scraped from a web portfolio dashboard.
//!
//! Browser automation lives behind [`DashboardScraper`]; this adapter rate
//! limits, retries and caches its results per address for the run.

use crate::adapter::{finish, skip, SourceAdapter};
use crate::context::SourceContext;
use async_trait::async_trait;
use portfolio_core::{AccountType, BalanceRecord, Credential, SourceId, SourceOutcome};
use portfolio_fetch::FetchError;
use rust_decimal::Decimal;
use std::sync::Arc;

/// One row of a scraped dashboard.
#[derive(Debug, Clone, PartialEq)]
pub struct ScrapedHolding {
    pub symbol: String,
    pub quantity: Decimal,
    pub usd_value: Decimal,
    /// Borrowed positions (lending protocol debt).
    pub is_debt: bool,
    /// Protocol or chain the row was listed under.
    pub location: Option<String>,
}

#[async_trait]
pub trait DashboardScraper: Send + Sync {
    /// Scrapes all holdings listed for `address`.
    async fn scrape(&self, address: &str) -> Result<Vec<ScrapedHolding>, FetchError>;
}

pub struct DashboardAdapter {
    source_id: SourceId,
    addresses: Vec<String>,
    scraper: Option<Arc<dyn DashboardScraper>>,
}

impl DashboardAdapter {
    pub fn new(
        source_id: SourceId,
        addresses: Vec<String>,
        scraper: Option<Arc<dyn DashboardScraper>>,
    ) -> Self {
        Self {
            source_id,
            addresses,
            scraper,
        }
    }

    async fn scrape_address(
        &self,
        ctx: &SourceContext,
        scraper: &dyn DashboardScraper,
        address: &str,
    ) -> Result<Vec<ScrapedHolding>, FetchError> {
        ctx.cache
            .get_or_fetch(&self.source_id, address, ctx.cache_ttl, || {
                ctx.executor
                    .execute_limited(&self.source_id, || scraper.scrape(address))
            })
            .await
    }

    async fn collect(
        &self,
        ctx: &SourceContext,
        scraper: &dyn DashboardScraper,
    ) -> Result<Vec<BalanceRecord>, FetchError> {
        let mut records = Vec::new();
        for address in &self.addresses {
            for holding in self.scrape_address(ctx, scraper, address).await? {
                let record = if holding.is_debt {
                    BalanceRecord::liability(
                        self.source_id.clone(),
                        AccountType::Other,
                        holding.symbol,
                        holding.quantity,
                        holding.usd_value,
                    )
                } else {
                    BalanceRecord::new(
                        self.source_id.clone(),
                        AccountType::Wallet,
                        holding.symbol,
                        holding.quantity,
                        holding.usd_value,
                    )
                };
                let record = record.with_meta("address", address.as_str());
                records.push(match holding.location {
                    Some(location) => record.with_meta("location", location),
                    None => record,
                });
            }
        }
        Ok(records)
    }
}

#[async_trait]
impl SourceAdapter for DashboardAdapter {
    fn source_id(&self) -> &SourceId {
        &self.source_id
    }

    fn kind(&self) -> &'static str {
        "dashboard"
    }

    async fn fetch(&self, ctx: &SourceContext, _credential: Option<&Credential>) -> SourceOutcome {
        let Some(scraper) = self.scraper.as_deref() else {
            return skip(&self.source_id, "no dashboard scraper configured");
        };
        let result = self.collect(ctx, scraper).await;
        finish(&self.source_id, ctx, result)
    }
}
