//! `check-config`: load, validate and describe the configuration.

use anyhow::Result;
use clap::Args;
use portfolio_core::AppConfig;
use std::fmt::Write;

#[derive(Args, Debug, Clone)]
pub struct CheckConfigArgs {
    /// Config file path
    #[arg(short, long, env = "PORTFOLIO_CONFIG")]
    pub config: Option<String>,
}

/// # Errors
/// Returns an error if the configuration cannot be loaded or is invalid.
pub fn run_check_config(args: &CheckConfigArgs) -> Result<()> {
    let config = super::load_config(args.config.as_deref())?;
    print!("{}", describe(&config));
    Ok(())
}

fn describe(config: &AppConfig) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Configuration OK");
    let _ = writeln!(
        out,
        "  run: max_concurrency={} timeout_secs={} offset_usd={}",
        config.run.max_concurrency, config.run.timeout_secs, config.run.offset_usd
    );
    let _ = writeln!(
        out,
        "  exposure: threshold={}% stable_symbols={}",
        config.exposure.concentration_threshold_pct,
        config.exposure.stable_symbols.len()
    );
    let _ = writeln!(out, "  sources ({}):", config.sources.len());
    for source in &config.sources {
        let _ = writeln!(
            out,
            "    {:<20} {:<12} {}",
            source.id,
            source.kind.name(),
            if source.enabled { "enabled" } else { "disabled" }
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use portfolio_core::{SourceConfig, SourceId, SourceKind};

    #[test]
    fn test_describe_lists_sources() {
        let mut config = AppConfig::default();
        config.sources.push(SourceConfig {
            id: SourceId::new("cold-wallet"),
            enabled: false,
            rate_limit: None,
            kind: SourceKind::Manual { holdings: vec![] },
        });

        let text = describe(&config);
        assert!(text.contains("sources (1)"));
        assert!(text.contains("cold-wallet"));
        assert!(text.contains("manual"));
        assert!(text.contains("disabled"));
    }
}
