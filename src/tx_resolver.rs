//! tx_resolver.rs
//! Turns an observed signature into a parsed transaction record
//! - JSON-RPC fetch with a fixed inter-attempt delay, no backoff, no jitter
//! - classifies qualifying pump.fun buys from the log lines
//! - extracts the traded mint from the post token balances

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_retry::{strategy::FixedInterval, Retry};
use tracing::debug;

/// Log markers that must both be present for a transaction to count as a
/// pump.fun buy. The invoke marker embeds the program id.
pub const PUMP_INVOKE_MARKER: &str = "Program 6EF8rrecthR5Dkzon8Nwu78hRvfCKubJ14M5uBEwF6P invoke";
const BUY_INSTRUCTION_MARKER: &str = "Instruction: Buy";

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("transaction fetch failed: {0}")]
    Transport(String),
    #[error("error getting transaction data: {0}")]
    Upstream(String),
    #[error("transaction not available")]
    NotAvailable,
    #[error("no post token balances")]
    NoPostTokenBalances,
    #[error("failed to get transaction data after {attempts} retries: {last}")]
    Exhausted {
        attempts: usize,
        #[source]
        last: Box<ResolveError>,
    },
}

/// Parsed transaction as returned by the RPC node. Read-only once built.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransactionRecord {
    #[serde(default)]
    pub meta: TransactionMeta,
    #[serde(rename = "blockTime", default)]
    pub block_time: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionMeta {
    #[serde(default)]
    pub err: Option<serde_json::Value>,
    #[serde(default)]
    pub fee: i64,
    #[serde(default)]
    pub log_messages: Vec<String>,
    #[serde(default)]
    pub post_token_balances: Vec<TokenBalance>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenBalance {
    #[serde(default)]
    pub mint: String,
    #[serde(default)]
    pub ui_token_amount: UiTokenAmount,
    #[serde(default)]
    pub owner: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiTokenAmount {
    #[serde(default)]
    pub ui_amount: Option<f64>,
    #[serde(default)]
    pub decimals: u8,
}

/// True only when both the program-invoke marker and the buy-instruction
/// marker appear somewhere in the logs, in any order. Single pass.
pub fn is_pumpfun_buy(record: &TransactionRecord) -> bool {
    let mut buy = false;
    let mut pumpfun = false;

    for line in &record.meta.log_messages {
        if line.contains(BUY_INSTRUCTION_MARKER) {
            buy = true;
        }
        if line.contains(PUMP_INVOKE_MARKER) {
            pumpfun = true;
        }
        if buy && pumpfun {
            return true;
        }
    }

    false
}

/// The traded token is the first post token balance entry.
pub fn pumpfun_mint(record: &TransactionRecord) -> Result<&str, ResolveError> {
    record
        .meta
        .post_token_balances
        .first()
        .map(|balance| balance.mint.as_str())
        .ok_or(ResolveError::NoPostTokenBalances)
}

/// Raw fetch seam, mocked in tests and wrapped by the retry logic below.
#[async_trait]
pub trait TxFetcher: Send + Sync {
    async fn fetch_transaction(&self, signature: &str) -> Result<TransactionRecord, ResolveError>;
}

pub struct TransactionResolver {
    fetcher: Arc<dyn TxFetcher>,
    max_retries: usize,
    retry_delay: Duration,
}

impl TransactionResolver {
    pub fn new(fetcher: Arc<dyn TxFetcher>, max_retries: usize, retry_delay: Duration) -> Self {
        Self {
            fetcher,
            max_retries,
            retry_delay,
        }
    }

    /// Up to `max_retries` attempts with the fixed delay in between. The
    /// exhausted error carries the last underlying failure.
    pub async fn resolve(&self, signature: &str) -> Result<TransactionRecord, ResolveError> {
        let strategy = FixedInterval::new(self.retry_delay).take(self.max_retries.saturating_sub(1));

        Retry::spawn(strategy, || async {
            match self.fetcher.fetch_transaction(signature).await {
                Ok(record) => Ok(record),
                Err(e) => {
                    debug!(signature = %signature, "Transaction fetch attempt failed: {}", e);
                    Err(e)
                }
            }
        })
        .await
        .map_err(|last| ResolveError::Exhausted {
            attempts: self.max_retries,
            last: Box::new(last),
        })
    }
}

/// JSON-RPC fetcher against the REST endpoint.
pub struct HttpTxFetcher {
    http: reqwest::Client,
    endpoint: String,
    request_id: AtomicU64,
}

impl HttpTxFetcher {
    pub fn new(endpoint: String, timeout: Duration) -> Result<Self, ResolveError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ResolveError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            endpoint,
            request_id: AtomicU64::new(1),
        })
    }
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<RpcResult>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcResult {
    #[serde(default)]
    transaction: Option<TransactionRecord>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

#[async_trait]
impl TxFetcher for HttpTxFetcher {
    async fn fetch_transaction(&self, signature: &str) -> Result<TransactionRecord, ResolveError> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": self.request_id.fetch_add(1, Ordering::Relaxed),
            "method": "getTransactionWithCompressionInfo",
            "params": [signature],
        });

        let response = self
            .http
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| ResolveError::Transport(e.to_string()))?;

        let parsed: RpcResponse = response
            .json()
            .await
            .map_err(|e| ResolveError::Transport(e.to_string()))?;

        if let Some(err) = parsed.error {
            if err.code != 0 {
                return Err(ResolveError::Upstream(err.message));
            }
        }

        // A null result means the node has not indexed the transaction yet;
        // that is what the retry loop is for.
        parsed
            .result
            .and_then(|r| r.transaction)
            .ok_or(ResolveError::NotAvailable)
    }
}
