//! Hyperliquid public info API: perp margin accounts and spot balances per address.

use crate::adapter::{finish, SourceAdapter};
use crate::context::SourceContext;
use crate::normalize::{parse_decimal, perp_legs, priced_record};
use async_trait::async_trait;
use portfolio_core::{AccountType, BalanceRecord, Credential, SourceId, SourceOutcome};
use portfolio_fetch::FetchError;
use serde::Deserialize;
use serde_json::json;

pub const HYPERLIQUID_API_URL: &str = "https://api.hyperliquid.xyz";

/// Perps on Hyperliquid settle in USDC.
const SETTLE_ASSET: &str = "USDC";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClearinghouseState {
    margin_summary: MarginSummary,
    #[serde(default)]
    asset_positions: Vec<AssetPosition>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarginSummary {
    account_value: String,
}

#[derive(Debug, Deserialize)]
struct AssetPosition {
    position: PerpPosition,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PerpPosition {
    coin: String,
    szi: String,
    #[serde(default)]
    position_value: String,
}

#[derive(Debug, Deserialize)]
struct SpotState {
    #[serde(default)]
    balances: Vec<SpotBalance>,
}

#[derive(Debug, Deserialize)]
struct SpotBalance {
    coin: String,
    total: String,
}

/// Margin, perp and spot state of every configured address.
///
/// All-or-nothing across addresses: if any one address fails, the outcome
/// fails and no records are returned, so a partial balance is never reported.
pub struct HyperliquidAdapter {
    source_id: SourceId,
    base_url: String,
    addresses: Vec<String>,
}

impl HyperliquidAdapter {
    pub fn new(source_id: SourceId, addresses: Vec<String>) -> Self {
        Self {
            source_id,
            base_url: HYPERLIQUID_API_URL.to_string(),
            addresses,
        }
    }

    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    async fn collect_address(
        &self,
        ctx: &SourceContext,
        address: &str,
    ) -> Result<Vec<BalanceRecord>, FetchError> {
        let url = format!("{}/info", self.base_url);
        let mut records = Vec::new();

        let perp: ClearinghouseState = ctx
            .executor
            .post_json(
                &self.source_id,
                &url,
                &json!({"type": "clearinghouseState", "user": address}),
            )
            .await?;

        let account_value = parse_decimal("accountValue", &perp.margin_summary.account_value)?;
        if !account_value.is_zero() {
            records.push(
                BalanceRecord::new(
                    self.source_id.clone(),
                    AccountType::Margin,
                    SETTLE_ASSET,
                    account_value,
                    account_value,
                )
                .with_meta("address", address),
            );
        }
        for asset in perp.asset_positions {
            let size = parse_decimal("szi", &asset.position.szi)?;
            if size.is_zero() {
                continue;
            }
            let notional = parse_decimal("positionValue", &asset.position.position_value)?;
            records.extend(
                perp_legs(&self.source_id, &asset.position.coin, SETTLE_ASSET, size, notional)
                    .map(|r| r.with_meta("address", address)),
            );
        }

        let spot: SpotState = ctx
            .executor
            .post_json(
                &self.source_id,
                &url,
                &json!({"type": "spotClearinghouseState", "user": address}),
            )
            .await?;
        for balance in spot.balances {
            let quantity = parse_decimal("total", &balance.total)?;
            if quantity.is_zero() {
                continue;
            }
            records.push(
                priced_record(ctx, &self.source_id, AccountType::Spot, &balance.coin, quantity)
                    .await
                    .with_meta("address", address),
            );
        }

        Ok(records)
    }

    async fn collect(&self, ctx: &SourceContext) -> Result<Vec<BalanceRecord>, FetchError> {
        let per_address = futures_util::future::join_all(
            self.addresses.iter().map(|address| self.collect_address(ctx, address)),
        )
        .await;

        let mut records = Vec::new();
        for result in per_address {
            records.extend(result?);
        }
        Ok(records)
    }
}

#[async_trait]
impl SourceAdapter for HyperliquidAdapter {
    fn source_id(&self) -> &SourceId {
        &self.source_id
    }

    fn kind(&self) -> &'static str {
        "hyperliquid"
    }

    async fn fetch(&self, ctx: &SourceContext, _credential: Option<&Credential>) -> SourceOutcome {
        let result = self.collect(ctx).await;
        finish(&self.source_id, ctx, result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portfolio_core::{FailureReason, FetchConfig, StaticPrices};
    use portfolio_fetch::RequestExecutor;
    use rust_decimal_macros::dec;
    use std::sync::Arc;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn ctx() -> SourceContext {
        let fetch = FetchConfig::default();
        SourceContext::new(
            RequestExecutor::from_config(&fetch),
            &fetch,
            Arc::new(StaticPrices::new().with("USDC", dec!(1)).with("HYPE", dec!(40))),
        )
    }

    #[tokio::test]
    async fn test_margin_positions_and_spot() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/info"))
            .and(body_partial_json(json!({"type": "clearinghouseState"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "marginSummary": {"accountValue": "2500.25", "totalNtlPos": "3000"},
                "assetPositions": [
                    {"type": "oneWay", "position": {"coin": "ETH", "szi": "-1.0", "positionValue": "3000.0"}}
                ]
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/info"))
            .and(body_partial_json(json!({"type": "spotClearinghouseState"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "balances": [
                    {"coin": "HYPE", "total": "10", "hold": "0"},
                    {"coin": "PURR", "total": "5", "hold": "0"}
                ]
            })))
            .mount(&server)
            .await;

        let adapter = HyperliquidAdapter::new(SourceId::new("hl"), vec!["0xabc".to_string()])
            .with_base_url(server.uri());
        let outcome = adapter.fetch(&ctx(), None).await;

        assert!(outcome.is_ok());
        let records = outcome.records();
        assert_eq!(records.len(), 5);
        assert_eq!((records[0].account_type, records[0].usd_value), (AccountType::Margin, dec!(2500.25)));
        assert_eq!((records[1].symbol.as_str(), records[1].usd_value), ("ETH", dec!(-3000)));
        assert_eq!((records[2].symbol.as_str(), records[2].usd_value), ("USDC", dec!(3000)));
        assert_eq!(records[3].usd_value, dec!(400));
        assert!(records[4].price_unavailable());
        assert_eq!(records[0].metadata.get("address").map(String::as_str), Some("0xabc"));
    }

    #[tokio::test]
    async fn test_missing_margin_summary_is_parse_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"assetPositions": []})))
            .mount(&server)
            .await;

        let adapter = HyperliquidAdapter::new(SourceId::new("hl"), vec!["0xabc".to_string()])
            .with_base_url(server.uri());
        let outcome = adapter.fetch(&ctx(), None).await;
        assert_eq!(outcome.failure_reason(), Some(FailureReason::ParseError));
    }

    #[tokio::test]
    async fn test_one_failing_address_fails_the_source() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"user": "0xbad"})))
            .respond_with(ResponseTemplate::new(422).set_body_string("bad address"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"type": "clearinghouseState"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "marginSummary": {"accountValue": "100", "totalNtlPos": "0"},
                "assetPositions": []
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"type": "spotClearinghouseState"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"balances": []})))
            .mount(&server)
            .await;

        let adapter = HyperliquidAdapter::new(
            SourceId::new("hl"),
            vec!["0xabc".to_string(), "0xbad".to_string()],
        )
        .with_base_url(server.uri());
        let outcome = adapter.fetch(&ctx(), None).await;

        assert_eq!(outcome.failure_reason(), Some(FailureReason::Rejected));
        assert!(outcome.records().is_empty());
    }
}
