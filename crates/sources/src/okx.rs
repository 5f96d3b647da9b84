//! OKX unified account: trading balances, funding balances and swap positions.

use crate::adapter::{finish, skip, SourceAdapter};
use crate::context::SourceContext;
use crate::normalize::{parse_decimal, perp_legs, priced_record};
use crate::signer::{signed_get, RequestSigner};
use async_trait::async_trait;
use portfolio_core::{AccountType, BalanceRecord, Credential, SourceId, SourceOutcome};
use portfolio_fetch::{http, FetchError};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;

pub const OKX_API_URL: &str = "https://www.okx.com";
pub const ACCOUNT_BALANCE_PATH: &str = "/api/v5/account/balance";
pub const ASSET_BALANCES_PATH: &str = "/api/v5/asset/balances";
pub const POSITIONS_PATH: &str = "/api/v5/account/positions?instType=SWAP";

/// Envelope of every OKX v5 response.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: String,
    #[serde(default)]
    msg: String,
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

impl<T> Envelope<T> {
    fn into_data(self) -> Result<Vec<T>, FetchError> {
        match self.code.as_str() {
            "0" => Ok(self.data),
            "50011" | "50061" => Err(FetchError::rate_limit(None)),
            code if code.starts_with("501") => {
                Err(FetchError::Authentication(format!("OKX {code}: {}", self.msg)))
            }
            code => Err(FetchError::api(400, format!("OKX {code}: {}", self.msg))),
        }
    }
}

#[derive(Debug, Deserialize)]
struct AccountBalance {
    #[serde(default)]
    details: Vec<BalanceDetail>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BalanceDetail {
    ccy: String,
    #[serde(default)]
    eq: String,
    #[serde(default)]
    eq_usd: String,
}

#[derive(Debug, Deserialize)]
struct AssetBalance {
    ccy: String,
    #[serde(default)]
    bal: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Position {
    inst_id: String,
    #[serde(default)]
    pos: String,
    #[serde(default)]
    pos_side: String,
    #[serde(default)]
    notional_usd: String,
}

pub struct OkxAdapter {
    source_id: SourceId,
    base_url: String,
    signer: Option<Arc<dyn RequestSigner>>,
}

impl OkxAdapter {
    pub fn new(source_id: SourceId, signer: Option<Arc<dyn RequestSigner>>) -> Self {
        Self {
            source_id,
            base_url: OKX_API_URL.to_string(),
            signer,
        }
    }

    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    async fn get<T: DeserializeOwned>(
        &self,
        ctx: &SourceContext,
        signer: &dyn RequestSigner,
        credential: &Credential,
        path: &str,
    ) -> Result<Vec<T>, FetchError> {
        let url = format!("{}{path}", self.base_url);
        let envelope: Envelope<T> = ctx
            .executor
            .execute(&self.source_id, &url, |client| async move {
                let request = signed_get(&client, &self.base_url, path, signer, credential)?;
                http::send_json(request).await
            })
            .await?;
        envelope.into_data()
    }

    async fn collect(
        &self,
        ctx: &SourceContext,
        signer: &dyn RequestSigner,
        credential: &Credential,
    ) -> Result<Vec<BalanceRecord>, FetchError> {
        let mut records = Vec::new();

        let accounts: Vec<AccountBalance> =
            self.get(ctx, signer, credential, ACCOUNT_BALANCE_PATH).await?;
        for detail in accounts.into_iter().flat_map(|a| a.details) {
            let quantity = parse_decimal("eq", &detail.eq)?;
            if quantity.is_zero() {
                continue;
            }
            let usd = parse_decimal("eqUsd", &detail.eq_usd)?;
            records.push(BalanceRecord::new(
                self.source_id.clone(),
                AccountType::Spot,
                detail.ccy,
                quantity,
                usd,
            ));
        }

        let funding: Vec<AssetBalance> = self.get(ctx, signer, credential, ASSET_BALANCES_PATH).await?;
        for balance in funding {
            let quantity = parse_decimal("bal", &balance.bal)?;
            if quantity.is_zero() {
                continue;
            }
            records.push(
                priced_record(ctx, &self.source_id, AccountType::Funding, &balance.ccy, quantity)
                    .await,
            );
        }

        let positions: Vec<Position> = self.get(ctx, signer, credential, POSITIONS_PATH).await?;
        for position in positions {
            let size = parse_decimal("pos", &position.pos)?;
            if size.is_zero() {
                continue;
            }
            let signed_size = if position.pos_side == "short" { -size.abs() } else { size };
            let notional = parse_decimal("notionalUsd", &position.notional_usd)?;
            let mut parts = position.inst_id.split('-');
            let base = parts.next().unwrap_or_default();
            let settle = parts.next().unwrap_or("USDT");
            records.extend(perp_legs(&self.source_id, base, settle, signed_size, notional));
        }

        Ok(records)
    }
}

#[async_trait]
impl SourceAdapter for OkxAdapter {
    fn source_id(&self) -> &SourceId {
        &self.source_id
    }

    fn kind(&self) -> &'static str {
        "okx"
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
