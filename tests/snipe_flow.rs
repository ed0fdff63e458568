//! End-to-end pipeline tests: feed event in, resolved buy out, position held
//! and sold, SMS alerts recorded. Everything external is mocked at the trait
//! seams; the engine, gate, and resolver are the real ones.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use solana_sdk::{pubkey::Pubkey, signature::Signature};
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, Instant};

use pump_snipe_bot::coin_info::{CoinData, CoinInfoError, CoinInfoProvider};
use pump_snipe_bot::config::Config;
use pump_snipe_bot::notifications::{Notifier, NotifyError};
use pump_snipe_bot::snipe_engine::{SnipeEngine, TRADE_ERROR_BUFFER_SIZE};
use pump_snipe_bot::trade_gate::TradeGate;
use pump_snipe_bot::tx_builder::{TradeClientError, TradeExecutor};
use pump_snipe_bot::tx_resolver::{
    ResolveError, TokenBalance, TransactionMeta, TransactionRecord, TransactionResolver, TxFetcher,
    UiTokenAmount, PUMP_INVOKE_MARKER,
};
use pump_snipe_bot::types::{BuyTokenResult, WalletTransactionSignature};

#[derive(Default)]
struct ScriptedExecutor {
    buys: Mutex<Vec<String>>,
    sells: Mutex<Vec<String>>,
}

#[async_trait]
impl TradeExecutor for ScriptedExecutor {
    async fn buy_token_with_sol(
        &self,
        mint: &str,
        _bonding_curve: &str,
        _associated_bonding_curve: &str,
        _sol_amount: f64,
        _slippage: f64,
    ) -> Result<BuyTokenResult, TradeClientError> {
        self.buys.lock().unwrap().push(mint.to_string());
        Ok(BuyTokenResult {
            signature: Signature::from([3u8; 64]),
            amount_base_units: 2_000_000,
            max_amount_base_units: 3_000_000,
            associated_token_account: Pubkey::new_unique(),
            token_amount: 0.002,
        })
    }

    async fn sell_token(
        &self,
        mint: &str,
        _bonding_curve: &str,
        _associated_bonding_curve: &str,
        _position: &BuyTokenResult,
        _slippage: f64,
    ) -> Result<Signature, TradeClientError> {
        self.sells.lock().unwrap().push(mint.to_string());
        Ok(Signature::from([4u8; 64]))
    }
}

#[derive(Default)]
struct SmsLog {
    bodies: Mutex<Vec<String>>,
}

#[async_trait]
impl Notifier for SmsLog {
    async fn send_sms(&self, body: &str, _to: &str) -> Result<(), NotifyError> {
        self.bodies.lock().unwrap().push(body.to_string());
        Ok(())
    }
}

/// Serves the same coin for every mint asked about; the symbol tracks the
/// mint so assertions can tell positions apart.
struct CoinDirectory {
    king_of_the_hill_timestamp: i64,
    polls: AtomicUsize,
}

#[async_trait]
impl CoinInfoProvider for CoinDirectory {
    async fn coin_data_for(
        &self,
        mint: &str,
        _cache_bust: bool,
        use_proxy: bool,
    ) -> Result<CoinData, CoinInfoError> {
        if use_proxy {
            self.polls.fetch_add(1, Ordering::SeqCst);
        }
        Ok(CoinData {
            mint: mint.to_string(),
            symbol: format!("SYM-{}", &mint[..4]),
            bonding_curve: Pubkey::new_unique().to_string(),
            associated_bonding_curve: Pubkey::new_unique().to_string(),
            king_of_the_hill_timestamp: self.king_of_the_hill_timestamp,
            ..CoinData::default()
        })
    }

    async fn price_in_sol_from_bonding_curve(
        &self,
        _bonding_curve: &str,
    ) -> Result<f64, CoinInfoError> {
        Ok(0.00000005)
    }

    async fn sol_price_usd(&self) -> Result<f64, CoinInfoError> {
        Ok(200.0)
    }
}

struct MappedFetcher {
    records: HashMap<String, TransactionRecord>,
}

#[async_trait]
impl TxFetcher for MappedFetcher {
    async fn fetch_transaction(&self, signature: &str) -> Result<TransactionRecord, ResolveError> {
        self.records
            .get(signature)
            .cloned()
            .ok_or(ResolveError::NotAvailable)
    }
}

fn buy_record(mint: &str) -> TransactionRecord {
    TransactionRecord {
        meta: TransactionMeta {
            log_messages: vec![
                format!("{PUMP_INVOKE_MARKER} [1]"),
                "Program log: Instruction: Buy".to_string(),
            ],
            post_token_balances: vec![TokenBalance {
                mint: mint.to_string(),
                ui_token_amount: UiTokenAmount {
                    ui_amount: Some(0.002),
                    decimals: 9,
                },
                owner: "watched-wallet".to_string(),
            }],
            ..TransactionMeta::default()
        },
        ..TransactionRecord::default()
    }
}

fn fast_config() -> Config {
    Config {
        wallets: vec!["WatchedWallet1111".to_string()],
        buy_amount_sol: 0.001,
        buy_slippage: 0.5,
        sell_slippage: 0.9,
        max_hold_time: Duration::from_millis(30),
        koth_poll_interval: Duration::from_millis(5),
        poller_count: 2,
        poll_error_threshold: 6,
        max_concurrent_holds: 1,
        resolve_max_retries: 3,
        resolve_retry_delay: Duration::from_millis(1),
        standby_cooldown: Duration::from_millis(10),
        compute_unit_limit: 100_000,
        sms_recipient: "+10000000000".to_string(),
        coin_api_base: "http://unused.invalid".to_string(),
        proxy_url: None,
        helius_api_key: "test-key".to_string(),
        wallet_private_key: "unused".to_string(),
        clicksend_username: "user".to_string(),
        clicksend_api_key: "key".to_string(),
    }
}

struct Pipeline {
    executor: Arc<ScriptedExecutor>,
    sms: Arc<SmsLog>,
    coins: Arc<CoinDirectory>,
    events_tx: mpsc::Sender<WalletTransactionSignature>,
    #[allow(dead_code)]
    feed_errs_tx: mpsc::Sender<pump_snipe_bot::wallet_feed::FeedError>,
    #[allow(dead_code)]
    shutdown_tx: watch::Sender<bool>,
    engine: SnipeEngine,
}

fn pipeline(records: HashMap<String, TransactionRecord>, koth: i64, config: Config) -> Pipeline {
    let executor = Arc::new(ScriptedExecutor::default());
    let sms = Arc::new(SmsLog::default());
    let coins = Arc::new(CoinDirectory {
        king_of_the_hill_timestamp: koth,
        polls: AtomicUsize::new(0),
    });
    let resolver = Arc::new(TransactionResolver::new(
        Arc::new(MappedFetcher { records }),
        config.resolve_max_retries,
        config.resolve_retry_delay,
    ));
    let gate = Arc::new(TradeGate::new(config.max_concurrent_holds));

    let (events_tx, events_rx) = mpsc::channel(64);
    let (feed_errs_tx, feed_errs_rx) = mpsc::channel(1);
    let (trade_errs_tx, trade_errs_rx) = mpsc::channel(TRADE_ERROR_BUFFER_SIZE);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let engine = SnipeEngine {
        trade_client: executor.clone(),
        coin_info: coins.clone(),
        notifier: sms.clone(),
        resolver,
        gate,
        config,
        events: events_rx,
        feed_errs: feed_errs_rx,
        trade_errs_tx,
        trade_errs_rx,
        shutdown: shutdown_rx,
    };

    Pipeline {
        executor,
        sms,
        coins,
        events_tx,
        feed_errs_tx,
        shutdown_tx,
        engine,
    }
}

async fn wait_until(limit: Duration, cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        sleep(Duration::from_millis(2)).await;
    }
    cond()
}

fn event(signature: &str) -> WalletTransactionSignature {
    WalletTransactionSignature {
        wallet: "WatchedWallet1111".to_string(),
        signature: signature.to_string(),
    }
}

#[tokio::test]
async fn observed_buy_is_copied_held_and_sold_with_alerts() {
    let mint = Pubkey::new_unique().to_string();
    let mut records = HashMap::new();
    records.insert("sig-observed".to_string(), buy_record(&mint));

    let mut p = pipeline(records, 0, fast_config());
    p.events_tx.send(event("sig-observed")).await.unwrap();
    drop(p.events_tx);

    p.engine.run().await.unwrap();

    let executor = p.executor.clone();
    assert!(
        wait_until(Duration::from_secs(2), || executor.sells.lock().unwrap().len() == 1).await,
        "the copied position should complete a full buy-hold-sell cycle"
    );
    assert_eq!(p.executor.buys.lock().unwrap().clone(), vec![mint.clone()]);
    assert_eq!(p.executor.sells.lock().unwrap().clone(), vec![mint.clone()]);

    // Holding means polling: the promotion watchers must have hit the coin
    // API through the proxy path at least once.
    assert!(p.coins.polls.load(Ordering::SeqCst) >= 1);

    let sms = p.sms.clone();
    assert!(
        wait_until(Duration::from_secs(1), || sms.bodies.lock().unwrap().len() == 2).await,
        "expected one buy SMS and one sell SMS"
    );
    let bodies = p.sms.bodies.lock().unwrap().clone();
    let url = format!("https://pump.fun/coin/{mint}");
    let symbol = format!("SYM-{}", &mint[..4]);
    assert!(bodies.iter().any(|b| b.starts_with("BUY: ") && b.contains(&url)));
    assert!(bodies.contains(&format!("SELL: {url} -> {symbol}")));
}

#[tokio::test]
async fn promotion_cuts_the_hold_short() {
    let mint = Pubkey::new_unique().to_string();
    let mut records = HashMap::new();
    records.insert("sig-promoted".to_string(), buy_record(&mint));

    let mut config = fast_config();
    config.max_hold_time = Duration::from_millis(400);
    let mut p = pipeline(records, 1_700_000_000, config);

    p.events_tx.send(event("sig-promoted")).await.unwrap();
    drop(p.events_tx);

    let started = Instant::now();
    p.engine.run().await.unwrap();

    let executor = p.executor.clone();
    assert!(wait_until(Duration::from_millis(300), || {
        executor.sells.lock().unwrap().len() == 1
    })
    .await);
    assert!(
        started.elapsed() < Duration::from_millis(350),
        "promotion should beat the 400ms deadline"
    );
}

#[tokio::test]
async fn finished_position_frees_the_slot_for_the_next_mint() {
    let mint_a = Pubkey::new_unique().to_string();
    let mint_b = Pubkey::new_unique().to_string();
    let mut records = HashMap::new();
    records.insert("sig-a".to_string(), buy_record(&mint_a));
    records.insert("sig-b".to_string(), buy_record(&mint_b));

    let mut p = pipeline(records, 0, fast_config());
    let events_tx = p.events_tx.clone();
    drop(p.events_tx);
    let executor = p.executor.clone();

    let run = tokio::spawn(async move { p.engine.run().await });

    events_tx.send(event("sig-a")).await.unwrap();
    assert!(
        wait_until(Duration::from_secs(2), || executor.sells.lock().unwrap().len() == 1).await,
        "first position should finish"
    );

    // The slot is free again, so a brand-new mint trades normally.
    events_tx.send(event("sig-b")).await.unwrap();
    drop(events_tx);
    run.await.unwrap().unwrap();

    assert!(
        wait_until(Duration::from_secs(2), || executor.sells.lock().unwrap().len() == 2).await,
        "second position should also finish"
    );
    assert_eq!(
        executor.buys.lock().unwrap().clone(),
        vec![mint_a, mint_b]
    );
}
