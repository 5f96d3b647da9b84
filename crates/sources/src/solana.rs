//! Solana wallets over public JSON-RPC endpoints, batched and rotated.

use crate::adapter::{finish, SourceAdapter};
use crate::context::SourceContext;
use crate::normalize::{parse_decimal, priced_record};
use async_trait::async_trait;
use portfolio_core::{AccountType, BalanceRecord, Credential, SourceId, SourceOutcome};
use portfolio_fetch::{http, BatchProtocol, BatchScheduler, FetchError, RequestExecutor};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};

pub const USDC_MINT: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";
pub const USDT_MINT: &str = "Es9vMFrzaCERmJfrF4H2FYD4KCoNkY11McCe8BenwNYB";

const LAMPORTS_PER_SOL: u64 = 1_000_000_000;

// =============================================================================
// JSON-RPC batch protocol
// =============================================================================

/// One JSON-RPC call.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcCall {
    pub method: &'static str,
    pub params: Value,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    id: u64,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

impl RpcError {
    fn to_fetch_error(&self) -> FetchError {
        match self.code {
            // Node-side throttling and overload.
            429 | -32005 => FetchError::rate_limit(None),
            -32603 | -32099..=-32000 => FetchError::api(503, self.message.clone()),
            _ => FetchError::api(400, format!("RPC {}: {}", self.code, self.message)),
        }
    }
}

/// JSON-RPC 2.0 batches over the source's rotating endpoints.
///
/// Responses are matched to requests by `id`, not by array position.
pub struct SolanaRpc {
    source_id: SourceId,
    executor: RequestExecutor,
    max_batch_size: usize,
}

impl SolanaRpc {
    #[must_use]
    pub fn new(source_id: SourceId, executor: RequestExecutor, max_batch_size: usize) -> Self {
        Self {
            source_id,
            executor,
            max_batch_size,
        }
    }
}

#[async_trait]
impl BatchProtocol for SolanaRpc {
    type Request = RpcCall;
    type Response = Result<Value, FetchError>;

    fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    async fn execute_batch(
        &self,
        requests: Vec<RpcCall>,
    ) -> Result<Vec<Result<Value, FetchError>>, FetchError> {
        let body: Vec<Value> = requests
            .iter()
            .enumerate()
            .map(|(id, call)| {
                json!({"jsonrpc": "2.0", "id": id, "method": call.method, "params": call.params})
            })
            .collect();
        let body = &body;

        let responses: Vec<RpcResponse> = self
            .executor
            .attempt_rotating(&self.source_id, |client, endpoint| async move {
                let responses: Vec<RpcResponse> =
                    http::send_json(client.post(endpoint).json(body)).await?;
                // A throttled or overloaded node still answers 200; fail the
                // attempt so the endpoint is rotated out and the batch retried.
                let transient = responses
                    .iter()
                    .filter_map(|response| response.error.as_ref())
                    .map(RpcError::to_fetch_error)
                    .find(FetchError::is_transient);
                match transient {
                    Some(error) => Err(error),
                    None => Ok(responses),
                }
            })
            .await?;

        let mut slots: Vec<Option<Result<Value, FetchError>>> =
            (0..requests.len()).map(|_| None).collect();
        for response in responses {
            let slot = usize::try_from(response.id)
                .ok()
                .and_then(|id| slots.get_mut(id))
                .ok_or_else(|| FetchError::parse(format!("unexpected RPC id {}", response.id)))?;
            *slot = Some(match (response.result, response.error) {
                (_, Some(error)) => Err(error.to_fetch_error()),
                (Some(result), None) => Ok(result),
                (None, None) => Err(FetchError::parse("RPC response without result")),
            });
        }
        slots
            .into_iter()
            .enumerate()
            .map(|(id, slot)| slot.ok_or_else(|| FetchError::parse(format!("missing RPC id {id}"))))
            .collect()
    }
}

// =============================================================================
// Adapter
// =============================================================================

/// SOL, USDC and USDT balances of every configured wallet.
///
/// The source reports all wallets or none: a failure on any one address
/// fails the whole outcome instead of returning a partial balance.
pub struct SolanaAdapter {
    source_id: SourceId,
    endpoints: Vec<String>,
    addresses: Vec<String>,
}

impl SolanaAdapter {
    pub fn new(source_id: SourceId, endpoints: Vec<String>, addresses: Vec<String>) -> Self {
        Self {
            source_id,
            endpoints,
            addresses,
        }
    }

    async fn call(scheduler: &BatchScheduler<SolanaRpc>, call: RpcCall) -> Result<Value, FetchError> {
        scheduler.submit(call).await.and_then(|reply| reply)
    }

    async fn collect_address(
        &self,
        ctx: &SourceContext,
        scheduler: &BatchScheduler<SolanaRpc>,
        address: &str,
    ) -> Result<Vec<BalanceRecord>, FetchError> {
        let token_call = |mint: &str| RpcCall {
            method: "getTokenAccountsByOwner",
            params: json!([address, {"mint": mint}, {"encoding": "jsonParsed"}]),
        };
        let (lamports, usdc, usdt) = tokio::join!(
            Self::call(
                scheduler,
                RpcCall {
                    method: "getBalance",
                    params: json!([address]),
                }
            ),
            Self::call(scheduler, token_call(USDC_MINT)),
            Self::call(scheduler, token_call(USDT_MINT)),
        );

        let mut records = Vec::new();
        let sol = lamports_to_sol(&lamports?)?;
        if !sol.is_zero() {
            records.push(
                priced_record(ctx, &self.source_id, AccountType::Wallet, "SOL", sol)
                    .await
                    .with_meta("address", address),
            );
        }
        for (symbol, reply) in [("USDC", usdc), ("USDT", usdt)] {
            let amount = token_amount(&reply?)?;
            if !amount.is_zero() {
                records.push(
                    priced_record(ctx, &self.source_id, AccountType::Wallet, symbol, amount)
                        .await
                        .with_meta("address", address),
                );
            }
        }
        Ok(records)
    }

    async fn collect(&self, ctx: &SourceContext) -> Result<Vec<BalanceRecord>, FetchError> {
        let protocol = SolanaRpc::new(self.source_id.clone(), ctx.executor.clone(), ctx.max_batch_size);
        let scheduler =
            BatchScheduler::spawn(self.source_id.clone(), protocol, ctx.batch_limits(&self.source_id));

        let per_address = futures_util::future::join_all(
            self.addresses
                .iter()
                .map(|address| self.collect_address(ctx, &scheduler, address)),
        )
        .await;

        let mut records = Vec::new();
        for result in per_address {
            records.extend(result.map_err(|e| e.exhausted("all Solana endpoints failed"))?);
        }
        Ok(records)
    }
}

/// `getBalance` result: `{"context": {...}, "value": <lamports>}`.
fn lamports_to_sol(result: &Value) -> Result<Decimal, FetchError> {
    let lamports = result
        .get("value")
        .and_then(Value::as_u64)
        .ok_or_else(|| FetchError::parse("getBalance result without lamports"))?;
    Ok(Decimal::from(lamports) / Decimal::from(LAMPORTS_PER_SOL))
}

/// Sums `uiAmountString` over every token account of a `getTokenAccountsByOwner` result.
fn token_amount(result: &Value) -> Result<Decimal, FetchError> {
    let accounts = result
        .get("value")
        .and_then(Value::as_array)
        .ok_or_else(|| FetchError::parse("token accounts result without value"))?;
    accounts.iter().try_fold(Decimal::ZERO, |total, account| {
        let raw = account
            .pointer("/account/data/parsed/info/tokenAmount/uiAmountString")
            .and_then(Value::as_str)
            .ok_or_else(|| FetchError::parse("token account without uiAmountString"))?;
        Ok(total + parse_decimal("uiAmountString", raw)?)
    })
}

#[async_trait]
impl SourceAdapter for SolanaAdapter {
    fn source_id(&self) -> &SourceId {
        &self.source_id
    }

    fn kind(&self) -> &'static str {
        "solana"
    }

    fn endpoints(&self) -> Vec<String> {
        self.endpoints.clone()
    }

    async fn fetch(&self, ctx: &SourceContext, _credential: Option<&Credential>) -> SourceOutcome {
        let result = self.collect(ctx).await;
        finish(&self.source_id, ctx, result)
    }
}
