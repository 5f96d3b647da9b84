use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;

/// Pricing collaborator used by adapters to value non-USD balances.
///
/// `None` means the price is unavailable; callers degrade the affected record's
/// USD value to zero instead of failing.
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn price_of(&self, symbol: &str) -> Option<Decimal>;

    fn name(&self) -> &str;
}

#[async_trait]
impl<P: PriceSource + ?Sized> PriceSource for Arc<P> {
    async fn price_of(&self, symbol: &str) -> Option<Decimal> {
        (**self).price_of(symbol).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Fixed price table.
#[derive(Debug, Clone, Default)]
pub struct StaticPrices {
    prices: HashMap<String, Decimal>,
}

impl StaticPrices {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a price; the symbol is normalized.
    #[must_use]
    pub fn with(mut self, symbol: &str, price: Decimal) -> Self {
        self.prices.insert(crate::symbols::normalize_symbol(symbol), price);
        self
    }
}

#[async_trait]
impl PriceSource for StaticPrices {
    async fn price_of(&self, symbol: &str) -> Option<Decimal> {
        self.prices.get(&crate::symbols::normalize_symbol(symbol)).copied()
    }

    fn name(&self) -> &str {
        "static"
    }
}

/// Supplies the manual USD offset applied once at ledger level.
pub trait OffsetProvider: Send + Sync {
    fn offset_usd(&self) -> Decimal;
}

impl OffsetProvider for Decimal {
    fn offset_usd(&self) -> Decimal {
        *self
    }
}
