//! Source adapters.
//!
//! Each adapter queries one external source through the shared
//! [`portfolio_fetch::RequestExecutor`] and reports exactly one
//! [`portfolio_core::SourceOutcome`].

pub mod adapter;
pub mod binance;
pub mod bitcoin;
pub mod bybit;
pub mod context;
pub mod dashboard;
pub mod hyperliquid;
pub mod manual;
pub mod normalize;
pub mod okx;
pub mod pricing;
pub mod registry;
pub mod signer;
pub mod solana;

pub use adapter::{ConfiguredSource, SourceAdapter};
pub use binance::BinanceAdapter;
pub use bitcoin::BitcoinAdapter;
pub use bybit::BybitAdapter;
pub use context::SourceContext;
pub use dashboard::{DashboardAdapter, DashboardScraper, ScrapedHolding};
pub use hyperliquid::HyperliquidAdapter;
pub use manual::ManualAdapter;
pub use okx::OkxAdapter;
pub use pricing::{BinanceTickerPrices, CachedPrices, FallbackPrices, PegPrices};
pub use registry::{build_source, build_sources, Collaborators};
pub use signer::{RequestSigner, SignableRequest};
pub use solana::SolanaAdapter;
