//! Application entry: wires the wallet feed, transaction resolver, trade
//! client, and notifier into the snipe engine.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use pump_snipe_bot::coin_info::CoinInfoClient;
use pump_snipe_bot::config::Config;
use pump_snipe_bot::notifications::ClicksendClient;
use pump_snipe_bot::rpc_manager::RpcManager;
use pump_snipe_bot::snipe_engine::{SnipeEngine, TRADE_ERROR_BUFFER_SIZE};
use pump_snipe_bot::trade_gate::TradeGate;
use pump_snipe_bot::tx_builder::{load_keypair, PumpTradeClient};
use pump_snipe_bot::tx_resolver::{HttpTxFetcher, TransactionResolver};
use pump_snipe_bot::wallet_feed::WalletFeed;

const RESOLVE_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let config = Config::load(None)?;
    info!(wallets = ?config.wallets, "Starting pump snipe bot for wallets");

    let rpc = Arc::new(RpcManager::new(config.rest_endpoint()));
    let coin_info = Arc::new(CoinInfoClient::new(
        config.coin_api_base.clone(),
        config.rest_endpoint(),
        config.proxy_url.as_deref(),
    )?);
    let keypair = load_keypair(&config.wallet_private_key)?;
    let trade_client = Arc::new(PumpTradeClient::new(
        rpc,
        coin_info.clone(),
        keypair,
        config.compute_unit_limit,
    ));
    let notifier = Arc::new(ClicksendClient::new(
        config.clicksend_username.clone(),
        config.clicksend_api_key.clone(),
    ));
    let fetcher = Arc::new(HttpTxFetcher::new(
        config.rest_endpoint(),
        RESOLVE_HTTP_TIMEOUT,
    )?);
    let resolver = Arc::new(TransactionResolver::new(
        fetcher,
        config.resolve_max_retries,
        config.resolve_retry_delay,
    ));
    let gate = Arc::new(TradeGate::new(config.max_concurrent_holds));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let feed = WalletFeed::new(config.ws_endpoint(), config.wallets.clone());
    let handles = feed.subscribe(shutdown_rx.clone()).await?;

    let (trade_errs_tx, trade_errs_rx) = mpsc::channel(TRADE_ERROR_BUFFER_SIZE);
    let mut engine = SnipeEngine {
        trade_client,
        coin_info,
        notifier,
        resolver,
        gate,
        config,
        events: handles.events,
        feed_errs: handles.errors,
        trade_errs_tx,
        trade_errs_rx,
        shutdown: shutdown_rx,
    };

    let mut engine_task = tokio::spawn(async move { engine.run().await });

    tokio::select! {
        result = &mut engine_task => {
            let result = result?;
            if let Err(ref e) = result {
                error!(error = %e, "Engine exited with error");
            }
            let _ = shutdown_tx.send(true);
            return result;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    }

    engine_task.await?
}
