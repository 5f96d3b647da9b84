//! Bitcoin addresses via Esplora-compatible indexers (Blockstream, mempool.space).

use crate::adapter::{finish, SourceAdapter};
use crate::context::SourceContext;
use crate::normalize::priced_record;
use async_trait::async_trait;
use portfolio_core::{AccountType, BalanceRecord, Credential, SourceId, SourceOutcome};
use portfolio_fetch::{http, BatchProtocol, BatchScheduler, FetchError, RequestExecutor};
use rust_decimal::Decimal;
use serde::Deserialize;

const SATS_PER_BTC: u64 = 100_000_000;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TxoStats {
    #[serde(default)]
    pub funded_txo_sum: i64,
    #[serde(default)]
    pub spent_txo_sum: i64,
}

impl TxoStats {
    fn net(&self) -> i64 {
        self.funded_txo_sum - self.spent_txo_sum
    }
}

/// `GET /address/{addr}` response.
#[derive(Debug, Clone, Deserialize)]
pub struct AddressStats {
    pub chain_stats: TxoStats,
    #[serde(default)]
    pub mempool_stats: TxoStats,
}

impl AddressStats {
    /// Confirmed plus unconfirmed balance in satoshis.
    #[must_use]
    pub fn balance_sats(&self) -> i64 {
        self.chain_stats.net() + self.mempool_stats.net()
    }
}

/// Esplora has no batch endpoint; lookups pass through one at a time.
pub struct EsploraLookup {
    source_id: SourceId,
    executor: RequestExecutor,
}

#[async_trait]
impl BatchProtocol for EsploraLookup {
    type Request = String;
    type Response = AddressStats;

    fn max_batch_size(&self) -> usize {
        1
    }

    async fn execute_batch(&self, addresses: Vec<String>) -> Result<Vec<AddressStats>, FetchError> {
        let mut stats = Vec::with_capacity(addresses.len());
        for address in &addresses {
            let reply: AddressStats = self
                .executor
                .attempt_rotating(&self.source_id, |client, endpoint| async move {
                    http::send_json(client.get(format!("{endpoint}/address/{address}"))).await
                })
                .await?;
            stats.push(reply);
        }
        Ok(stats)
    }
}

/// On-chain balances of every configured address; one failing address fails the source.
pub struct BitcoinAdapter {
    source_id: SourceId,
    endpoints: Vec<String>,
    addresses: Vec<String>,
}

impl BitcoinAdapter {
    pub fn new(source_id: SourceId, endpoints: Vec<String>, addresses: Vec<String>) -> Self {
        Self {
            source_id,
            endpoints: endpoints
                .into_iter()
                .map(|e| e.trim_end_matches('/').to_string())
                .collect(),
            addresses,
        }
    }

    async fn collect(&self, ctx: &SourceContext) -> Result<Vec<BalanceRecord>, FetchError> {
        let protocol = EsploraLookup {
            source_id: self.source_id.clone(),
            executor: ctx.executor.clone(),
        };
        let scheduler =
            BatchScheduler::spawn(self.source_id.clone(), protocol, ctx.batch_limits(&self.source_id));

        let replies = futures_util::future::join_all(
            self.addresses.iter().map(|address| scheduler.submit(address.clone())),
        )
        .await;

        let mut records = Vec::new();
        for (address, reply) in self.addresses.iter().zip(replies) {
            let stats = reply.map_err(|e| e.exhausted("all Bitcoin endpoints failed"))?;
            let sats = stats.balance_sats();
            if sats == 0 {
                continue;
            }
            let btc = Decimal::from(sats) / Decimal::from(SATS_PER_BTC);
            records.push(
                priced_record(ctx, &self.source_id, AccountType::Wallet, "BTC", btc)
                    .await
                    .with_meta("address", address.as_str()),
            );
        }
        Ok(records)
    }
}

#[async_trait]
impl SourceAdapter for BitcoinAdapter {
    fn source_id(&self) -> &SourceId {
        &self.source_id
    }

    fn kind(&self) -> &'static str {
        "bitcoin"
    }

    fn endpoints(&self) -> Vec<String> {
        self.endpoints.clone()
    }

    async fn fetch(&self, ctx: &SourceContext, _credential: Option<&Credential>) -> SourceOutcome {
        let result = self.collect(ctx).await;
        finish(&self.source_id, ctx, result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::ConfiguredSource;
    use portfolio_core::{FetchConfig, StaticPrices};
    use rust_decimal_macros::dec;
    use serde_json::json;
    use std::sync::Arc;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_balance_includes_mempool() {
        let stats: AddressStats = serde_json::from_value(json!({
            "address": "bc1q",
            "chain_stats": {"funded_txo_sum": 150_000_000, "spent_txo_sum": 50_000_000, "tx_count": 3},
            "mempool_stats": {"funded_txo_sum": 0, "spent_txo_sum": 10_000_000, "tx_count": 1}
        }))
        .unwrap();
        assert_eq!(stats.balance_sats(), 90_000_000);
    }

    #[tokio::test]
    async fn test_addresses_are_valued_in_btc() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/address/bc1qfirst"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "chain_stats": {"funded_txo_sum": 50_000_000, "spent_txo_sum": 0},
                "mempool_stats": {"funded_txo_sum": 0, "spent_txo_sum": 0}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/address/bc1qempty"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "chain_stats": {"funded_txo_sum": 0, "spent_txo_sum": 0},
                "mempool_stats": {"funded_txo_sum": 0, "spent_txo_sum": 0}
            })))
            .mount(&server)
            .await;

        let fetch = FetchConfig::default();
        let ctx = SourceContext::new(
            RequestExecutor::from_config(&fetch),
            &fetch,
            Arc::new(StaticPrices::new().with("BTC", dec!(60000))),
        );
        let adapter = Arc::new(BitcoinAdapter::new(
            SourceId::new("btc"),
            vec![format!("{}/", server.uri())],
            vec!["bc1qfirst".to_string(), "bc1qempty".to_string()],
        ));
        ctx.prepare(&ConfiguredSource::new(adapter.clone()));

        let outcome = adapter.fetch(&ctx, None).await;
        assert!(outcome.is_ok(), "{:?}", outcome.detail());
        assert_eq!(outcome.records().len(), 1);
        assert_eq!(outcome.records()[0].quantity, dec!(0.5));
        assert_eq!(outcome.records()[0].usd_value, dec!(30000));
        assert_eq!(outcome.attempts(), 2);
    }
}
