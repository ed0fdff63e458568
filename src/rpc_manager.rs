use anyhow::{anyhow, Context, Result};
use solana_client::{nonblocking::rpc_client::RpcClient, rpc_config::RpcSendTransactionConfig};
use solana_sdk::{
    commitment_config::{CommitmentConfig, CommitmentLevel},
    hash::Hash,
    pubkey::Pubkey,
    signature::Signature,
    transaction::VersionedTransaction,
};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tokio_retry::{strategy::FixedInterval, Retry};
use tracing::{debug, info, warn};

const SEND_TIMEOUT: Duration = Duration::from_secs(8);
const BLOCKHASH_RETRY_DELAY_MS: u64 = 200;
const BLOCKHASH_RETRY_ATTEMPTS: usize = 3;

/// Chain-side capabilities the trade client depends on. A trait so tests can
/// script submissions without touching a live endpoint.
pub trait RpcBroadcaster: Send + Sync {
    /// Submit a signed transaction; resolve to its signature.
    fn send_transaction<'a>(
        &'a self,
        tx: VersionedTransaction,
    ) -> Pin<Box<dyn Future<Output = Result<Signature>> + Send + 'a>>;

    fn latest_blockhash<'a>(&'a self)
        -> Pin<Box<dyn Future<Output = Result<Hash>> + Send + 'a>>;

    fn account_exists<'a>(
        &'a self,
        address: &'a Pubkey,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + 'a>>;
}

/// Production broadcaster over a single HTTP RPC endpoint.
pub struct RpcManager {
    endpoint: String,
    client: Arc<RpcClient>,
}

impl RpcManager {
    pub fn new(endpoint: String) -> Self {
        let client = Arc::new(RpcClient::new_with_commitment(
            endpoint.clone(),
            CommitmentConfig::confirmed(),
        ));
        Self { endpoint, client }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl RpcBroadcaster for RpcManager {
    fn send_transaction<'a>(
        &'a self,
        tx: VersionedTransaction,
    ) -> Pin<Box<dyn Future<Output = Result<Signature>> + Send + 'a>> {
        Box::pin(async move {
            let send_cfg = RpcSendTransactionConfig {
                skip_preflight: true,
                preflight_commitment: Some(CommitmentLevel::Processed),
                max_retries: Some(3),
                ..Default::default()
            };

            debug!(endpoint = %self.endpoint, "Sending transaction");
            let start = Instant::now();
            let send_fut = self.client.send_transaction_with_config(&tx, send_cfg);

            match timeout(SEND_TIMEOUT, send_fut).await {
                Ok(Ok(sig)) => {
                    info!(
                        endpoint = %self.endpoint,
                        signature = %sig,
                        latency = ?start.elapsed(),
                        "Transaction accepted"
                    );
                    Ok(sig)
                }
                Ok(Err(e)) => {
                    warn!(endpoint = %self.endpoint, "Transaction send failed: {}", e);
                    Err(anyhow!(e).context("send_transaction_with_config failed"))
                }
                Err(_elapsed) => {
                    warn!(endpoint = %self.endpoint, "Transaction send timed out after {:?}", SEND_TIMEOUT);
                    Err(anyhow!("RPC send timeout after {:?}", SEND_TIMEOUT))
                }
            }
        })
    }

    fn latest_blockhash<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = Result<Hash>> + Send + 'a>> {
        Box::pin(async move {
            let strategy =
                FixedInterval::from_millis(BLOCKHASH_RETRY_DELAY_MS).take(BLOCKHASH_RETRY_ATTEMPTS);
            Retry::spawn(strategy, || async {
                self.client
                    .get_latest_blockhash()
                    .await
                    .map_err(|e| anyhow!(e.to_string()))
            })
            .await
            .context("blockhash fetch failed on all attempts")
        })
    }

    fn account_exists<'a>(
        &'a self,
        address: &'a Pubkey,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + 'a>> {
        Box::pin(async move {
            let response = self
                .client
                .get_account_with_commitment(address, self.client.commitment())
                .await
                .with_context(|| format!("getAccountInfo failed for {address}"))?;
            Ok(response.value.is_some())
        })
    }
}
