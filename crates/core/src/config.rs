//! Application configuration.
//!
//! Every section has defaults so a minimal TOML file only needs to list its
//! `[[sources]]`. See [`crate::config_loader::ConfigLoader`] for merge order.

use crate::records::{AccountType, SourceId};
use crate::symbols::{AliasTable, StableSet, DEFAULT_ALIASES, DEFAULT_STABLE_SYMBOLS};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::num::NonZeroU32;
use std::time::Duration;
use thiserror::Error;

/// Invalid configuration values.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("run.max_concurrency must be at least 1")]
    ZeroConcurrency,

    #[error("exposure.concentration_threshold_pct must not be negative: {0}")]
    NegativeThreshold(Decimal),

    #[error("fetch.retry.max_attempts must be at least 1")]
    ZeroAttempts,

    #[error("fetch.retry.jitter must be within [0, 1]: {0}")]
    InvalidJitter(String),

    #[error("rate limit window for {0} must be greater than zero")]
    ZeroWindow(String),

    #[error("source {0} has no endpoints")]
    NoEndpoints(SourceId),

    #[error("duplicate source id: {0}")]
    DuplicateSource(SourceId),
}

// =============================================================================
// Top level
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub run: RunConfig,
    pub exposure: ExposureConfig,
    pub aliases: AliasConfig,
    pub fetch: FetchConfig,
    pub pricing: PricingConfig,
    pub sources: Vec<SourceConfig>,
}

impl AppConfig {
    /// Checks invariants serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns the first violated constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.run.max_concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if self.exposure.concentration_threshold_pct < Decimal::ZERO {
            return Err(ConfigError::NegativeThreshold(
                self.exposure.concentration_threshold_pct,
            ));
        }
        if self.fetch.retry.max_attempts == 0 {
            return Err(ConfigError::ZeroAttempts);
        }
        if !(0.0..=1.0).contains(&self.fetch.retry.jitter) {
            return Err(ConfigError::InvalidJitter(self.fetch.retry.jitter.to_string()));
        }
        if self.fetch.default_rate_limit.window_ms == 0 {
            return Err(ConfigError::ZeroWindow("fetch.default_rate_limit".to_string()));
        }

        let mut seen = HashSet::new();
        for source in &self.sources {
            if !seen.insert(source.id.clone()) {
                return Err(ConfigError::DuplicateSource(source.id.clone()));
            }
            if let Some(limit) = &source.rate_limit {
                if limit.window_ms == 0 {
                    return Err(ConfigError::ZeroWindow(source.id.to_string()));
                }
            }
            match &source.kind {
                SourceKind::Solana { endpoints, .. } | SourceKind::Bitcoin { endpoints, .. }
                    if endpoints.is_empty() =>
                {
                    return Err(ConfigError::NoEndpoints(source.id.clone()));
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Sources with `enabled = true`.
    pub fn enabled_sources(&self) -> impl Iterator<Item = &SourceConfig> {
        self.sources.iter().filter(|s| s.enabled)
    }
}

// =============================================================================
// Run / exposure
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Global ceiling on concurrently running adapters.
    pub max_concurrency: usize,
    /// Whole-run deadline; 0 disables it.
    pub timeout_secs: u64,
    /// Manual USD adjustment (e.g. an outstanding loan) subtracted from the total.
    pub offset_usd: Decimal,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 8,
            timeout_secs: 120,
            offset_usd: Decimal::ZERO,
        }
    }
}

impl RunConfig {
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExposureConfig {
    pub stable_symbols: Vec<String>,
    /// Percent of total value above which a position raises an alert.
    pub concentration_threshold_pct: Decimal,
}

impl Default for ExposureConfig {
    fn default() -> Self {
        Self {
            stable_symbols: DEFAULT_STABLE_SYMBOLS.iter().map(|s| (*s).to_string()).collect(),
            concentration_threshold_pct: Decimal::from(25),
        }
    }
}

impl ExposureConfig {
    #[must_use]
    pub fn stable_set(&self) -> StableSet {
        StableSet::new(&self.stable_symbols)
    }
}

/// Raw → canonical symbol table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct AliasConfig(pub BTreeMap<String, String>);

impl Default for AliasConfig {
    fn default() -> Self {
        Self(
            DEFAULT_ALIASES
                .iter()
                .map(|(raw, canonical)| ((*raw).to_string(), (*canonical).to_string()))
                .collect(),
        )
    }
}

impl AliasConfig {
    #[must_use]
    pub fn table(&self) -> AliasTable {
        AliasTable::new(self.0.iter())
    }
}

// =============================================================================
// Fetch layer
// =============================================================================

/// Requests allowed per rolling window.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub max_requests: NonZeroU32,
    pub window_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: NonZeroU32::MIN.saturating_add(9),
            window_ms: 1_000,
        }
    }
}

impl RateLimitConfig {
    #[must_use]
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    /// Fraction of the delay added or removed at random.
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 10_000,
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub max_connections_per_host: usize,
    pub request_timeout_secs: u64,
    pub idle_timeout_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections_per_host: 4,
            request_timeout_secs: 15,
            idle_timeout_secs: 90,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub default_rate_limit: RateLimitConfig,
    pub retry: RetryConfig,
    pub pool: PoolConfig,
    pub endpoint_cooldown_secs: u64,
    pub cache_ttl_secs: u64,
    pub batch_window_ms: u64,
    pub max_batch_size: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            default_rate_limit: RateLimitConfig::default(),
            retry: RetryConfig::default(),
            pool: PoolConfig::default(),
            endpoint_cooldown_secs: 60,
            cache_ttl_secs: 60,
            batch_window_ms: 25,
            max_batch_size: 50,
        }
    }
}

impl FetchConfig {
    #[must_use]
    pub fn endpoint_cooldown(&self) -> Duration {
        Duration::from_secs(self.endpoint_cooldown_secs)
    }

    #[must_use]
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    #[must_use]
    pub fn batch_window(&self) -> Duration {
        Duration::from_millis(self.batch_window_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingConfig {
    pub enabled: bool,
    pub binance_base_url: String,
    pub quote_asset: String,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            binance_base_url: "https://api.binance.com".to_string(),
            quote_asset: "USDT".to_string(),
        }
    }
}

// =============================================================================
// Sources
// =============================================================================

/// One configured source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub id: SourceId,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Overrides `fetch.default_rate_limit` for this source.
    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,
    #[serde(flatten)]
    pub kind: SourceKind,
}

fn default_enabled() -> bool {
    true
}

/// Closed set of supported source kinds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceKind {
    Okx {
        #[serde(default = "default_okx_url")]
        base_url: String,
    },
    Binance {
        #[serde(default = "default_binance_url")]
        base_url: String,
        #[serde(default = "default_binance_futures_url")]
        futures_base_url: String,
        /// Also read the USD-M futures wallet and positions.
        #[serde(default = "default_enabled")]
        include_futures: bool,
    },
    Bybit {
        #[serde(default = "default_bybit_url")]
        base_url: String,
        #[serde(default = "default_settle_coins")]
        settle_coins: Vec<String>,
    },
    Hyperliquid {
        #[serde(default = "default_hyperliquid_url")]
        base_url: String,
        addresses: Vec<String>,
    },
    Solana {
        #[serde(default = "default_solana_endpoints")]
        endpoints: Vec<String>,
        addresses: Vec<String>,
    },
    Bitcoin {
        #[serde(default = "default_bitcoin_endpoints")]
        endpoints: Vec<String>,
        addresses: Vec<String>,
    },
    Manual {
        holdings: Vec<ManualHolding>,
    },
    Dashboard {
        addresses: Vec<String>,
    },
}

impl SourceKind {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Okx { .. } => "okx",
            Self::Binance { .. } => "binance",
            Self::Bybit { .. } => "bybit",
            Self::Hyperliquid { .. } => "hyperliquid",
            Self::Solana { .. } => "solana",
            Self::Bitcoin { .. } => "bitcoin",
            Self::Manual { .. } => "manual",
            Self::Dashboard { .. } => "dashboard",
        }
    }
}

/// Manually tracked holding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ManualHolding {
    pub symbol: String,
    pub quantity: Decimal,
    #[serde(default = "default_manual_account")]
    pub account_type: AccountType,
}

fn default_manual_account() -> AccountType {
    AccountType::Wallet
}

fn default_okx_url() -> String {
    "https://www.okx.com".to_string()
}

fn default_binance_url() -> String {
    "https://api.binance.com".to_string()
}

fn default_binance_futures_url() -> String {
    "https://fapi.binance.com".to_string()
}

fn default_bybit_url() -> String {
    "https://api.bybit.com".to_string()
}

fn default_settle_coins() -> Vec<String> {
    vec!["USDT".to_string()]
}

fn default_hyperliquid_url() -> String {
    "https://api.hyperliquid.xyz".to_string()
}

fn default_solana_endpoints() -> Vec<String> {
    [
        "https://solana-rpc.publicnode.com",
        "https://api.mainnet-beta.solana.com",
        "https://rpc.ankr.com/solana",
        "https://solana.drpc.org",
    ]
    .iter()
    .map(|s| (*s).to_string())
    .collect()
}

fn default_bitcoin_endpoints() -> Vec<String> {
    ["https://blockstream.info/api", "https://mempool.space/api"]
        .iter()
        .map(|s| (*s).to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn source(id: &str, kind: SourceKind) -> SourceConfig {
        SourceConfig {
            id: SourceId::new(id),
            enabled: true,
            rate_limit: None,
            kind,
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.run.max_concurrency, 8);
        assert_eq!(config.fetch.retry.max_attempts, 3);
        assert_eq!(config.fetch.default_rate_limit.max_requests.get(), 10);
        assert_eq!(config.aliases.table().canonicalize("WETH"), "ETH");
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let mut config = AppConfig::default();
        config.run.max_concurrency = 0;
        assert_eq!(config.validate(), Err(ConfigError::ZeroConcurrency));
    }

    #[test]
    fn test_validate_rejects_negative_threshold() {
        let mut config = AppConfig::default();
        config.exposure.concentration_threshold_pct = dec!(-1);
        assert_eq!(config.validate(), Err(ConfigError::NegativeThreshold(dec!(-1))));
    }

    #[test]
    fn test_validate_rejects_bad_jitter() {
        let mut config = AppConfig::default();
        config.fetch.retry.jitter = 1.5;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidJitter(_))));
    }

    #[test]
    fn test_validate_rejects_duplicate_sources() {
        let mut config = AppConfig::default();
        config.sources = vec![
            source("wallet", SourceKind::Manual { holdings: vec![] }),
            source("wallet", SourceKind::Dashboard { addresses: vec![] }),
        ];
        assert_eq!(
            config.validate(),
            Err(ConfigError::DuplicateSource(SourceId::new("wallet")))
        );
    }

    #[test]
    fn test_validate_rejects_empty_endpoint_list() {
        let mut config = AppConfig::default();
        config.sources = vec![source(
            "btc",
            SourceKind::Bitcoin {
                endpoints: vec![],
                addresses: vec!["bc1q".to_string()],
            },
        )];
        assert_eq!(
            config.validate(),
            Err(ConfigError::NoEndpoints(SourceId::new("btc")))
        );
    }

    #[test]
    fn test_source_config_deserializes_tagged_kind() {
        let json = serde_json::json!({
            "id": "sol-main",
            "kind": "solana",
            "addresses": ["9xQeWvG816bUx9EPjHmaT23yvVM2ZWbrrpZb9PusVFin"]
        });
        let config: SourceConfig = serde_json::from_value(json).unwrap();

        assert!(config.enabled);
        assert_eq!(config.kind.name(), "solana");
        match config.kind {
            SourceKind::Solana { endpoints, addresses } => {
                assert_eq!(endpoints.len(), 4);
                assert_eq!(addresses.len(), 1);
            }
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn test_binance_kind_defaults() {
        let json = serde_json::json!({ "id": "binance", "kind": "binance" });
        let config: SourceConfig = serde_json::from_value(json).unwrap();

        assert_eq!(config.kind.name(), "binance");
        assert_eq!(
            config.kind,
            SourceKind::Binance {
                base_url: "https://api.binance.com".to_string(),
                futures_base_url: "https://fapi.binance.com".to_string(),
                include_futures: true,
            }
        );
    }

    #[test]
    fn test_manual_holding_defaults_to_wallet() {
        let json = serde_json::json!({ "symbol": "JUP", "quantity": "1200.5" });
        let holding: ManualHolding = serde_json::from_value(json).unwrap();
        assert_eq!(holding.account_type, AccountType::Wallet);
        assert_eq!(holding.quantity, dec!(1200.5));
    }

    #[test]
    fn test_run_timeout_zero_disables() {
        let mut run = RunConfig::default();
        assert_eq!(run.timeout(), Some(Duration::from_secs(120)));
        run.timeout_secs = 0;
        assert_eq!(run.timeout(), None);
    }
}
