use crate::config::AppConfig;
use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Json, Serialized, Toml},
    Figment,
};
use std::path::Path;

/// Default config file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/Config.toml";

/// Prefix for environment overrides; nested keys are separated by `__`,
/// e.g. `PORTFOLIO_RUN__TIMEOUT_SECS=30`.
pub const ENV_PREFIX: &str = "PORTFOLIO_";

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads configuration from [`DEFAULT_CONFIG_PATH`].
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be parsed or the result fails validation.
    pub fn load() -> Result<AppConfig> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Merges built-in defaults, the TOML file at `path`, a sibling
    /// `Config.json` if present, and `PORTFOLIO_*` environment variables.
    ///
    /// A missing file is not an error; defaults and environment still apply.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration cannot be parsed or fails validation.
    pub fn load_from(path: impl AsRef<Path>) -> Result<AppConfig> {
        let path = path.as_ref();
        let json_path = path.with_extension("json");

        let config: AppConfig = Self::figment(path, &json_path)
            .extract()
            .with_context(|| format!("failed to load configuration from {}", path.display()))?;

        config.validate().context("invalid configuration")?;
        tracing::debug!(
            path = %path.display(),
            sources = config.sources.len(),
            "Configuration loaded"
        );
        Ok(config)
    }

    fn figment(toml_path: &Path, json_path: &Path) -> Figment {
        Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(toml_path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .join(Json::file(json_path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SourceKind;
    use figment::Jail;
    use rust_decimal_macros::dec;

    #[test]
    fn test_missing_file_yields_defaults() {
        Jail::expect_with(|_jail| {
            let config = ConfigLoader::load_from("does/not/exist.toml").expect("defaults");
            assert_eq!(config.run.max_concurrency, 8);
            assert!(config.sources.is_empty());
            Ok(())
        });
    }

    #[test]
    fn test_toml_sources_and_overrides() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "Config.toml",
                r#"
                [run]
                max_concurrency = 2
                offset_usd = "1500"

                [exposure]
                concentration_threshold_pct = "40"

                [[sources]]
                id = "okx-main"
                kind = "okx"

                [[sources]]
                id = "cold"
                kind = "manual"
                holdings = [{ symbol = "BTC", quantity = "0.5" }]

                [[sources]]
                id = "btc"
                kind = "bitcoin"
                addresses = ["bc1qexample"]
                rate_limit = { max_requests = 2, window_ms = 1000 }
                "#,
            )?;

            let config = ConfigLoader::load_from("Config.toml").expect("config");
            assert_eq!(config.run.max_concurrency, 2);
            assert_eq!(config.run.offset_usd, dec!(1500));
            assert_eq!(config.exposure.concentration_threshold_pct, dec!(40));
            assert_eq!(config.sources.len(), 3);
            assert_eq!(config.sources[0].kind.name(), "okx");
            assert_eq!(
                config.sources[2].rate_limit.map(|r| r.max_requests.get()),
                Some(2)
            );
            match &config.sources[1].kind {
                SourceKind::Manual { holdings } => assert_eq!(holdings[0].quantity, dec!(0.5)),
                other => panic!("unexpected kind: {other:?}"),
            }
            Ok(())
        });
    }

    #[test]
    fn test_env_overrides_toml() {
        Jail::expect_with(|jail| {
            jail.create_file("Config.toml", "[run]\ntimeout_secs = 60\n")?;
            jail.set_env("PORTFOLIO_RUN__TIMEOUT_SECS", "5");
            jail.set_env("PORTFOLIO_FETCH__RETRY__MAX_ATTEMPTS", "7");

            let config = ConfigLoader::load_from("Config.toml").expect("config");
            assert_eq!(config.run.timeout_secs, 5);
            assert_eq!(config.fetch.retry.max_attempts, 7);
            Ok(())
        });
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        Jail::expect_with(|jail| {
            jail.create_file("Config.toml", "[run]\nmax_concurrency = 0\n")?;
            let err = ConfigLoader::load_from("Config.toml").unwrap_err();
            assert!(format!("{err:#}").contains("max_concurrency"));
            Ok(())
        });
    }
}
