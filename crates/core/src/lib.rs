//! Shared types for the portfolio aggregator: normalized balance records,
//! per-source outcomes, symbol canonicalization, collaborator traits and
//! configuration.

pub mod config;
pub mod config_loader;
pub mod credentials;
pub mod records;
pub mod symbols;
pub mod traits;

pub use config::{
    AliasConfig, AppConfig, ConfigError, ExposureConfig, FetchConfig, ManualHolding, PoolConfig,
    PricingConfig, RateLimitConfig, RetryConfig, RunConfig, SourceConfig, SourceKind,
};
pub use config_loader::ConfigLoader;
pub use credentials::{Credential, CredentialProvider, EnvCredentials, StaticCredentials};
pub use records::{
    AccountType, BalanceRecord, FailureReason, OutcomeStatus, SourceId, SourceOutcome,
    META_PRICE_UNAVAILABLE,
};
pub use symbols::{normalize_symbol, AliasTable, StableSet};
pub use traits::{OffsetProvider, PriceSource, StaticPrices};
