//! Bybit unified trading account: wallet balances and linear positions.

use crate::adapter::{finish, skip, SourceAdapter};
use crate::context::SourceContext;
use crate::normalize::{parse_decimal, perp_legs, split_multiplier};
use crate::signer::{signed_get, RequestSigner};
use async_trait::async_trait;
use portfolio_core::{AccountType, BalanceRecord, Credential, SourceId, SourceOutcome};
use portfolio_fetch::{http, FetchError};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;

pub const BYBIT_API_URL: &str = "https://api.bybit.com";
pub const WALLET_BALANCE_PATH: &str = "/v5/account/wallet-balance?accountType=UNIFIED";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope<T> {
    ret_code: i64,
    #[serde(default)]
    ret_msg: String,
    result: Option<T>,
}

impl<T> Envelope<T> {
    fn into_result(self) -> Result<T, FetchError> {
        match self.ret_code {
            0 => self
                .result
                .ok_or_else(|| FetchError::parse("Bybit response without result")),
            10006 | 10018 => Err(FetchError::rate_limit(None)),
            code @ (10003 | 10004 | 10005 | 10007 | 33004) => Err(FetchError::Authentication(
                format!("Bybit {code}: {}", self.ret_msg),
            )),
            code => Err(FetchError::api(400, format!("Bybit {code}: {}", self.ret_msg))),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ListResult<T> {
    #[serde(default = "Vec::new")]
    list: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct WalletAccount {
    #[serde(default)]
    coin: Vec<WalletCoin>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WalletCoin {
    coin: String,
    #[serde(default)]
    equity: String,
    #[serde(default)]
    usd_value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LinearPosition {
    symbol: String,
    #[serde(default)]
    side: String,
    #[serde(default)]
    size: String,
    #[serde(default)]
    position_value: String,
}

pub struct BybitAdapter {
    source_id: SourceId,
    base_url: String,
    settle_coins: Vec<String>,
    signer: Option<Arc<dyn RequestSigner>>,
}

impl BybitAdapter {
    pub fn new(source_id: SourceId, signer: Option<Arc<dyn RequestSigner>>) -> Self {
        Self {
            source_id,
            base_url: BYBIT_API_URL.to_string(),
            settle_coins: vec!["USDT".to_string()],
            signer,
        }
    }

    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    #[must_use]
    pub fn with_settle_coins(mut self, coins: Vec<String>) -> Self {
        self.settle_coins = coins;
        self
    }

    async fn get<T: DeserializeOwned>(
        &self,
        ctx: &SourceContext,
        signer: &dyn RequestSigner,
        credential: &Credential,
        path: &str,
    ) -> Result<T, FetchError> {
        let url = format!("{}{path}", self.base_url);
        let envelope: Envelope<T> = ctx
            .executor
            .execute(&self.source_id, &url, |client| async move {
                let request = signed_get(&client, &self.base_url, path, signer, credential)?;
                http::send_json(request).await
            })
            .await?;
        envelope.into_result()
    }

    async fn collect(
        &self,
        ctx: &SourceContext,
        signer: &dyn RequestSigner,
        credential: &Credential,
    ) -> Result<Vec<BalanceRecord>, FetchError> {
        let mut records = Vec::new();

        let wallet: ListResult<WalletAccount> =
            self.get(ctx, signer, credential, WALLET_BALANCE_PATH).await?;
        for coin in wallet.list.into_iter().flat_map(|a| a.coin) {
            let quantity = parse_decimal("equity", &coin.equity)?;
            if quantity.is_zero() {
                continue;
            }
            let usd = parse_decimal("usdValue", &coin.usd_value)?;
            records.push(BalanceRecord::new(
                self.source_id.clone(),
                AccountType::Spot,
                coin.coin,
                quantity,
                usd,
            ));
        }

        for settle in &self.settle_coins {
            let path = format!("/v5/position/list?category=linear&settleCoin={settle}");
            let positions: ListResult<LinearPosition> =
                self.get(ctx, signer, credential, &path).await?;
            for position in positions.list {
                let size = parse_decimal("size", &position.size)?;
                if size.is_zero() {
                    continue;
                }
                let signed_size = if position.side == "Sell" { -size.abs() } else { size.abs() };
                let notional = parse_decimal("positionValue", &position.position_value)?;
                let contract = position
                    .symbol
                    .strip_suffix(settle.as_str())
                    .unwrap_or(&position.symbol);
                // `1000PEPEUSDT` sizes are in units of 1000 PEPE.
                let (base, multiplier) = split_multiplier(contract);
                let base_size = signed_size.checked_mul(multiplier).ok_or_else(|| {
                    FetchError::parse(format!("size of {} out of range", position.symbol))
                })?;
                records.extend(perp_legs(&self.source_id, base, settle, base_size, notional));
            }
        }

        Ok(records)
    }
}

#[async_trait]
impl SourceAdapter for BybitAdapter {
    fn source_id(&self) -> &SourceId {
        &self.source_id
    }

    fn kind(&self) -> &'static str {
        "bybit"
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
