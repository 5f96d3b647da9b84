//! Binance spot account plus the USD-M futures wallet and positions.

use crate::adapter::{finish, skip, SourceAdapter};
use crate::context::SourceContext;
use crate::normalize::{parse_decimal, perp_legs, priced_record, split_multiplier};
use crate::signer::{signed_get, RequestSigner};
use async_trait::async_trait;
use portfolio_core::{AccountType, BalanceRecord, Credential, SourceId, SourceOutcome};
use portfolio_fetch::{http, FetchError};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;

pub const BINANCE_API_URL: &str = "https://api.binance.com";
pub const BINANCE_FUTURES_URL: &str = "https://fapi.binance.com";
pub const SPOT_ACCOUNT_PATH: &str = "/api/v3/account?omitZeroBalances=true";
pub const FUTURES_BALANCE_PATH: &str = "/fapi/v2/balance";
pub const POSITION_RISK_PATH: &str = "/fapi/v2/positionRisk";

/// Settlement assets of USD-M contracts.
const SETTLE_ASSETS: &[&str] = &["USDT", "USDC", "BUSD"];

#[derive(Debug, Deserialize)]
struct SpotAccount {
    #[serde(default)]
    balances: Vec<SpotBalance>,
}

#[derive(Debug, Deserialize)]
struct SpotBalance {
    asset: String,
    #[serde(default)]
    free: String,
    #[serde(default)]
    locked: String,
}

#[derive(Debug, Deserialize)]
struct FuturesBalance {
    asset: String,
    #[serde(default)]
    balance: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PositionRisk {
    symbol: String,
    #[serde(default)]
    position_amt: String,
    #[serde(default)]
    notional: String,
}

/// HTTP 418 is Binance's IP ban after ignored 429s.
fn ban_as_rate_limit(error: FetchError) -> FetchError {
    match error {
        FetchError::Api { status_code: 418, .. } => FetchError::rate_limit(None),
        other => other,
    }
}

fn split_settle(symbol: &str) -> (&str, &str) {
    SETTLE_ASSETS
        .iter()
        .find_map(|settle| symbol.strip_suffix(settle).map(|base| (base, *settle)))
        .unwrap_or((symbol, "USDT"))
}

pub struct BinanceAdapter {
    source_id: SourceId,
    base_url: String,
    futures_url: String,
    include_futures: bool,
    signer: Option<Arc<dyn RequestSigner>>,
}

impl BinanceAdapter {
    pub fn new(source_id: SourceId, signer: Option<Arc<dyn RequestSigner>>) -> Self {
        Self {
            source_id,
            base_url: BINANCE_API_URL.to_string(),
            futures_url: BINANCE_FUTURES_URL.to_string(),
            include_futures: true,
            signer,
        }
    }

    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    #[must_use]
    pub fn with_futures_url(mut self, url: impl Into<String>) -> Self {
        self.futures_url = url.into().trim_end_matches('/').to_string();
        self
    }

    #[must_use]
    pub fn with_futures(mut self, include: bool) -> Self {
        self.include_futures = include;
        self
    }

    async fn get<T: DeserializeOwned>(
        &self,
        ctx: &SourceContext,
        signer: &dyn RequestSigner,
        credential: &Credential,
        base_url: &str,
        path: &str,
    ) -> Result<T, FetchError> {
        let url = format!("{base_url}{path}");
        ctx.executor
            .execute(&self.source_id, &url, |client| async move {
                let request = signed_get(&client, base_url, path, signer, credential)?;
                http::send_json(request).await.map_err(ban_as_rate_limit)
            })
            .await
    }

    async fn collect(
        &self,
        ctx: &SourceContext,
        signer: &dyn RequestSigner,
        credential: &Credential,
    ) -> Result<Vec<BalanceRecord>, FetchError> {
        let mut records = Vec::new();

        let account: SpotAccount = self
            .get(ctx, signer, credential, &self.base_url, SPOT_ACCOUNT_PATH)
            .await?;
        for balance in account.balances {
            let free = parse_decimal("free", &balance.free)?;
            let locked = parse_decimal("locked", &balance.locked)?;
            let quantity = free
                .checked_add(locked)
                .ok_or_else(|| FetchError::parse(format!("{} balance out of range", balance.asset)))?;
            if quantity.is_zero() {
                continue;
            }
            records.push(
                priced_record(ctx, &self.source_id, AccountType::Spot, &balance.asset, quantity).await,
            );
        }

        if !self.include_futures {
            return Ok(records);
        }

        let wallet: Vec<FuturesBalance> = self
            .get(ctx, signer, credential, &self.futures_url, FUTURES_BALANCE_PATH)
            .await?;
        for balance in wallet {
            let quantity = parse_decimal("balance", &balance.balance)?;
            if quantity.is_zero() {
                continue;
            }
            records.push(
                priced_record(ctx, &self.source_id, AccountType::Futures, &balance.asset, quantity)
                    .await,
            );
        }

        let positions: Vec<PositionRisk> = self
            .get(ctx, signer, credential, &self.futures_url, POSITION_RISK_PATH)
            .await?;
        for position in positions {
            let amount = parse_decimal("positionAmt", &position.position_amt)?;
            if amount.is_zero() {
                continue;
            }
            let notional = parse_decimal("notional", &position.notional)?;
            let (contract, settle) = split_settle(&position.symbol);
            let (base, multiplier) = split_multiplier(contract);
            let size = amount.checked_mul(multiplier).ok_or_else(|| {
                FetchError::parse(format!("positionAmt of {} out of range", position.symbol))
            })?;
            records.extend(perp_legs(&self.source_id, base, settle, size, notional));
        }

        Ok(records)
    }
}

#[async_trait]
impl SourceAdapter for BinanceAdapter {
    fn source_id(&self) -> &SourceId {
        &self.source_id
    }

    fn kind(&self) -> &'static str {
        "binance"
    }

    fn requires_credentials(&self) -> bool {
        true
    }

    async fn fetch(&self, ctx: &SourceContext, credential: Option<&Credential>) -> SourceOutcome {
        let Some(signer) = self.signer.as_deref() else {
            return skip(&self.source_id, "no request signer configured");
        };
        let Some(credential) = credential else {
            return skip(&self.source_id, "no credentials");
        };
        let result = self.collect(ctx, signer, credential).await;
        finish(&self.source_id, ctx, result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signer::testing::QuerySigner;
    use portfolio_core::{FailureReason, FetchConfig, OutcomeStatus, StaticPrices};
    use portfolio_fetch::RequestExecutor;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param, query_param_is_missing};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn ctx() -> SourceContext {
        let fetch = FetchConfig::default();
        SourceContext::new(
            RequestExecutor::from_config(&fetch),
            &fetch,
            Arc::new(
                StaticPrices::new()
                    .with("BTC", dec!(60000))
                    .with("ETH", dec!(3000))
                    .with("USDT", dec!(1)),
            ),
        )
    }

    fn adapter(server: &MockServer) -> BinanceAdapter {
        BinanceAdapter::new(SourceId::new("binance"), Some(Arc::new(QuerySigner)))
            .with_base_url(server.uri())
            .with_futures_url(server.uri())
    }

    #[tokio::test]
    async fn test_spot_futures_wallet_and_positions() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v3/account"))
            .and(query_param("omitZeroBalances", "true"))
            .and(query_param("signature", "test-signature"))
            .and(header("X-MBX-APIKEY", "key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "balances": [
                    {"asset": "BTC", "free": "0.1", "locked": "0.05"},
                    {"asset": "WETH", "free": "1", "locked": "0"},
                    {"asset": "BNB", "free": "0", "locked": "0"}
                ]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/fapi/v2/balance"))
            .and(header("X-MBX-APIKEY", "key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"asset": "USDT", "balance": "2500.5"},
                {"asset": "BNB", "balance": "0"}
            ])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/fapi/v2/positionRisk"))
            .and(header("X-MBX-APIKEY", "key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"symbol": "ETHUSDT", "positionAmt": "-2", "notional": "-6000"},
                {"symbol": "1000PEPEUSDC", "positionAmt": "300", "notional": "3.3"},
                {"symbol": "BTCUSDT", "positionAmt": "0", "notional": "0"}
            ])))
            .mount(&server)
            .await;

        let credential = Credential::new("key", "secret");
        let outcome = adapter(&server).fetch(&ctx(), Some(&credential)).await;

        assert!(outcome.is_ok(), "{:?}", outcome.detail());
        assert_eq!(outcome.attempts(), 3);
        let records = outcome.records();
        assert_eq!(records.len(), 7);

        assert_eq!((records[0].symbol.as_str(), records[0].quantity), ("BTC", dec!(0.15)));
        assert_eq!(records[0].usd_value, dec!(9000));
        assert_eq!(records[1].usd_value, dec!(3000));
        assert_eq!(records[2].account_type, AccountType::Futures);
        assert_eq!(records[2].usd_value, dec!(2500.5));

        assert_eq!((records[3].symbol.as_str(), records[3].quantity), ("ETH", dec!(-2)));
        assert_eq!(records[3].usd_value, dec!(-6000));
        assert_eq!((records[4].symbol.as_str(), records[4].usd_value), ("USDT", dec!(6000)));

        assert_eq!((records[5].symbol.as_str(), records[5].quantity), ("PEPE", dec!(300000)));
        assert_eq!((records[6].symbol.as_str(), records[6].usd_value), ("USDC", dec!(-3.3)));
        let perp_total: Decimal = records[3..].iter().map(|r| r.usd_value).sum();
        assert_eq!(perp_total, dec!(0));
    }

    #[tokio::test]
    async fn test_spot_only_skips_futures_endpoints() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v3/account"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "balances": [{"asset": "USDT", "free": "10", "locked": "0"}]
            })))
            .mount(&server)
            .await;

        let credential = Credential::new("key", "secret");
        let outcome = adapter(&server).with_futures(false).fetch(&ctx(), Some(&credential)).await;

        assert!(outcome.is_ok());
        assert_eq!(outcome.records().len(), 1);
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_key_is_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_json(json!({"code": -2015, "msg": "Invalid API-key, IP, or permissions for action."})),
            )
            .mount(&server)
            .await;

        let credential = Credential::new("key", "secret");
        let outcome = adapter(&server).fetch(&ctx(), Some(&credential)).await;

        assert_eq!(outcome.failure_reason(), Some(FailureReason::AuthError));
        assert_eq!(outcome.attempts(), 1);
    }

    #[tokio::test]
    async fn test_unsigned_request_is_never_sent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param_is_missing("signature"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let no_signer = BinanceAdapter::new(SourceId::new("binance"), None).with_base_url(server.uri());
        let credential = Credential::new("key", "secret");
        assert_eq!(no_signer.fetch(&ctx(), Some(&credential)).await.status(), OutcomeStatus::Skipped);

        let no_credential = adapter(&server);
        assert_eq!(no_credential.fetch(&ctx(), None).await.status(), OutcomeStatus::Skipped);
    }

    #[test]
    fn test_settle_asset_split() {
        assert_eq!(split_settle("ETHUSDT"), ("ETH", "USDT"));
        assert_eq!(split_settle("SOLUSDC"), ("SOL", "USDC"));
        assert_eq!(split_settle("BTCDOMUSDT"), ("BTCDOM", "USDT"));
    }

    #[test]
    fn test_ip_ban_counts_as_rate_limit() {
        assert_eq!(ban_as_rate_limit(FetchError::api(418, "banned")), FetchError::rate_limit(None));
        assert_eq!(ban_as_rate_limit(FetchError::api(400, "bad")), FetchError::api(400, "bad"));
    }
}
