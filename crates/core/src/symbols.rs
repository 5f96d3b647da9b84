//! Symbol normalization, alias resolution and stablecoin classification.

use std::collections::{BTreeMap, BTreeSet};

/// Normalizes a raw source symbol for comparison.
///
/// Drops decorations sources append to tickers (`"USDC (Bridged)"`, `"USDC.e"`),
/// removes whitespace and upper-cases the result.
#[must_use]
pub fn normalize_symbol(raw: &str) -> String {
    let mut cleaned = raw.trim();
    if let Some(idx) = cleaned.find('(') {
        cleaned = &cleaned[..idx];
    }
    if let Some(idx) = cleaned.find('.') {
        cleaned = &cleaned[..idx];
    }
    cleaned
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ')')
        .collect::<String>()
        .to_uppercase()
}

/// Default wrapped/liquid-staking aliases.
pub const DEFAULT_ALIASES: &[(&str, &str)] = &[
    ("WETH", "ETH"),
    ("WBTC", "BTC"),
    ("WSOL", "SOL"),
    ("STETH", "ETH"),
    ("CBETH", "ETH"),
    ("RETH", "ETH"),
];

/// Default stablecoin set.
pub const DEFAULT_STABLE_SYMBOLS: &[&str] = &[
    "USDT", "USDC", "DAI", "BUSD", "TUSD", "USDP", "FRAX", "FDUSD", "USDD", "LUSD", "SUSD",
    "MIM", "HUSD", "USDE", "USDAI", "USDT0", "USDR", "USDL", "USDX", "USDM", "EUSD", "PYUSD",
    "GUSD", "CRVUSD", "CUSDC", "USD",
    // Mixed stablecoin bucket reported by EVM wallet dashboards.
    "STABLECOINS_EVM",
];

// =============================================================================
// AliasTable
// =============================================================================

/// Static raw → canonical symbol mapping, loaded once per run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AliasTable {
    aliases: BTreeMap<String, String>,
}

impl AliasTable {
    /// Builds a table; keys and values are normalized.
    pub fn new<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let aliases = entries
            .into_iter()
            .map(|(raw, canonical)| (normalize_symbol(raw.as_ref()), normalize_symbol(canonical.as_ref())))
            .collect();
        Self { aliases }
    }

    /// Table populated with [`DEFAULT_ALIASES`].
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_ALIASES.iter().copied())
    }

    /// Resolves a raw symbol to its canonical form.
    ///
    /// Unknown symbols canonicalize to their normalized form.
    #[must_use]
    pub fn canonicalize(&self, raw: &str) -> String {
        let normalized = normalize_symbol(raw);
        match self.aliases.get(&normalized) {
            Some(canonical) => canonical.clone(),
            None => normalized,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.aliases.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }
}

// =============================================================================
// StableSet
// =============================================================================

/// Set of canonical symbols treated as USD-stable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StableSet {
    symbols: BTreeSet<String>,
}

impl StableSet {
    pub fn new<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            symbols: symbols
                .into_iter()
                .map(|s| normalize_symbol(s.as_ref()))
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }

    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_STABLE_SYMBOLS.iter().copied())
    }

    /// Returns true if a canonical symbol counts as stable.
    ///
    /// Besides direct membership, `STABLE_*`/`*_STABLE` buckets and `+`-joined
    /// pairs made only of stable symbols (stable LP positions) are stable.
    #[must_use]
    pub fn is_stable(&self, symbol: &str) -> bool {
        let clean = normalize_symbol(symbol);
        if clean.is_empty() {
            return false;
        }
        if self.symbols.contains(&clean) {
            return true;
        }
        if clean.starts_with("STABLE_") || clean.ends_with("_STABLE") {
            return true;
        }
        if clean.contains('+') {
            let mut parts = clean.split('+').filter(|p| !p.is_empty()).peekable();
            return parts.peek().is_some() && parts.all(|p| self.symbols.contains(p));
        }
        false
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.symbols.iter().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_decorations() {
        assert_eq!(normalize_symbol(" eth "), "ETH");
        assert_eq!(normalize_symbol("USDC.e"), "USDC");
        assert_eq!(normalize_symbol("USDC (Bridged)"), "USDC");
        assert_eq!(normalize_symbol("stETH"), "STETH");
        assert_eq!(normalize_symbol(""), "");
    }

    #[test]
    fn test_alias_resolution() {
        let table = AliasTable::with_defaults();
        assert_eq!(table.canonicalize("WETH"), "ETH");
        assert_eq!(table.canonicalize("weth"), "ETH");
        assert_eq!(table.canonicalize("stETH"), "ETH");
        assert_eq!(table.canonicalize("ETH"), "ETH");
    }

    #[test]
    fn test_unknown_symbol_canonicalizes_to_itself() {
        let table = AliasTable::with_defaults();
        assert_eq!(table.canonicalize("PEPE"), "PEPE");
        assert_eq!(table.canonicalize("jup"), "JUP");
    }

    #[test]
    fn test_custom_alias_table_normalizes_entries() {
        let table = AliasTable::new([("usdc.e", "usdc")]);
        assert_eq!(table.len(), 1);
        assert_eq!(table.canonicalize("USDC.E"), "USDC");
    }

    #[test]
    fn test_stable_membership() {
        let stable = StableSet::with_defaults();
        assert!(stable.is_stable("USDT"));
        assert!(stable.is_stable("usdc"));
        assert!(!stable.is_stable("ETH"));
        assert!(!stable.is_stable(""));
    }

    #[test]
    fn test_stable_buckets_and_pairs() {
        let stable = StableSet::with_defaults();
        assert!(stable.is_stable("STABLE_EVM"));
        assert!(stable.is_stable("LP_STABLE"));
        assert!(stable.is_stable("USDC+USDT"));
        assert!(!stable.is_stable("USDC+ETH"));
        assert!(!stable.is_stable("+"));
    }

    #[test]
    fn test_evm_stablecoin_bucket_is_stable() {
        let stable = StableSet::with_defaults();
        assert!(stable.is_stable("STABLECOINS_EVM"));
        assert!(stable.is_stable("stablecoins_evm"));
    }
}
