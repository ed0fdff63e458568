//! Core copy-trading loop.
//!
//! Responsibilities:
//! - Consume wallet transaction signatures from the feed, resolve each one,
//!   and keep only pump.fun buys.
//! - Admit every mint at most once and cap how many positions are held at a
//!   time; surplus candidates are skipped outright.
//! - For each admitted mint: buy, hold until the sell race resolves, sell,
//!   and report fills over SMS.
//! - Route all trade errors through one channel; a force-quit error notifies,
//!   observes the standby cooldown, and stops the run.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info};

use crate::coin_info::{CoinData, CoinInfoProvider};
use crate::config::Config;
use crate::hold_race::{HoldRace, HoldRaceConfig};
use crate::notifications::Notifier;
use crate::trade_gate::TradeGate;
use crate::tx_builder::TradeExecutor;
use crate::tx_resolver::{is_pumpfun_buy, pumpfun_mint, TransactionResolver};
use crate::types::{
    BuyTokenResult, EventReceiver, SellReason, TradeError, TradeErrorReceiver, TradeErrorSender,
    WalletTransactionSignature,
};
use crate::wallet_feed::FeedErrorReceiver;

/// Trade errors are reported with `try_send` from inside the run loop's own
/// call stack, so the channel must have room to absorb them.
pub const TRADE_ERROR_BUFFER_SIZE: usize = 100;

pub struct SnipeEngine {
    pub trade_client: Arc<dyn TradeExecutor>,
    pub coin_info: Arc<dyn CoinInfoProvider>,
    pub notifier: Arc<dyn Notifier>,
    pub resolver: Arc<TransactionResolver>,
    pub gate: Arc<TradeGate>,
    pub config: Config,
    pub events: EventReceiver,
    pub feed_errs: FeedErrorReceiver,
    pub trade_errs_tx: TradeErrorSender,
    pub trade_errs_rx: TradeErrorReceiver,
    pub shutdown: watch::Receiver<bool>,
}

impl SnipeEngine {
    /// Runs until the feed fails, a force-quit trade error arrives, the event
    /// stream closes, or shutdown is requested. Feed errors take priority
    /// over trade errors, trade errors over new events.
    pub async fn run(&mut self) -> Result<()> {
        info!("SnipeEngine started");
        loop {
            tokio::select! {
                biased;

                feed_err = self.feed_errs.recv() => {
                    match feed_err {
                        Some(err) => {
                            error!(error = %err, "Wallet feed failed");
                            return Err(err.into());
                        }
                        None => {
                            if *self.shutdown.borrow() {
                                info!("SnipeEngine stopped");
                                return Ok(());
                            }
                            return Err(anyhow!("wallet feed closed unexpectedly"));
                        }
                    }
                }

                trade_err = self.trade_errs_rx.recv() => {
                    // The engine keeps a sender clone, so the channel cannot
                    // close while the loop runs.
                    if let Some(err) = trade_err {
                        if err.is_force_quit() {
                            self.enter_standby(&err).await;
                            return Err(err.source);
                        }
                        error!(error = %err.source, "Non-critical error");
                    }
                }

                event = self.events.recv() => {
                    match event {
                        Some(event) => self.handle_transaction(event).await,
                        None => {
                            info!("Event stream closed; SnipeEngine stopped");
                            return Ok(());
                        }
                    }
                }

                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        info!("SnipeEngine stopped");
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Resolves one observed signature and, for a fresh pump.fun buy, spawns
    /// a trade worker for its mint. Resolution happens inline so duplicate
    /// notifications are deduplicated in arrival order.
    async fn handle_transaction(&self, event: WalletTransactionSignature) {
        let record = match self.resolver.resolve(&event.signature).await {
            Ok(record) => record,
            Err(err) => {
                let _ = self.trade_errs_tx.try_send(TradeError::transient(err));
                return;
            }
        };

        if !is_pumpfun_buy(&record) {
            debug!(
                wallet = %event.wallet,
                signature = %event.signature,
                "Not a pump.fun buy"
            );
            return;
        }

        let mint = match pumpfun_mint(&record) {
            Ok(mint) => mint.to_string(),
            Err(err) => {
                let _ = self.trade_errs_tx.try_send(TradeError::transient(err));
                return;
            }
        };

        if !self.gate.mark_seen_if_new(&mint) {
            debug!(mint = %mint, "Mint already traded, skipping");
            return;
        }

        info!(wallet = %event.wallet, mint = %mint, "Copying pump.fun buy");
        let worker = self.worker();
        tokio::spawn(async move { worker.try_execute_trade(&mint).await });
    }

    async fn enter_standby(&self, err: &TradeError) {
        error!(error = %err.source, "Critical error, entering standby");
        let body = critical_error_message(&err.source.to_string());
        if let Err(sms_err) = self
            .notifier
            .send_sms(&body, &self.config.sms_recipient)
            .await
        {
            error!(error = %sms_err, "Error sending SMS");
        }
        sleep(self.config.standby_cooldown).await;
    }

    fn worker(&self) -> TradeWorker {
        TradeWorker {
            trade_client: self.trade_client.clone(),
            coin_info: self.coin_info.clone(),
            notifier: self.notifier.clone(),
            gate: self.gate.clone(),
            config: self.config.clone(),
            trade_errs: self.trade_errs_tx.clone(),
        }
    }
}

/// Everything one position needs, detached from the engine so the run loop
/// never blocks on a trade.
struct TradeWorker {
    trade_client: Arc<dyn TradeExecutor>,
    coin_info: Arc<dyn CoinInfoProvider>,
    notifier: Arc<dyn Notifier>,
    gate: Arc<TradeGate>,
    config: Config,
    trade_errs: TradeErrorSender,
}

impl TradeWorker {
    /// Takes a hold slot for the whole buy-hold-sell lifetime; the slot frees
    /// only after the sell attempt finishes. At capacity the mint is skipped
    /// for good, it stays marked as seen.
    async fn try_execute_trade(&self, mint: &str) {
        let _hold = match self.gate.try_acquire_hold() {
            Some(slot) => slot,
            None => {
                info!(
                    mint = %mint,
                    max = self.gate.max_concurrent_holds(),
                    current = self.gate.holds_in_use(),
                    "Max concurrent holds reached"
                );
                return;
            }
        };
        self.handle_buy_and_sell(mint).await;
    }

    async fn handle_buy_and_sell(&self, mint: &str) {
        let coin = match self.coin_info.coin_data_for(mint, false, false).await {
            Ok(coin) => coin,
            Err(err) => {
                let _ = self
                    .trade_errs
                    .try_send(TradeError::transient(anyhow!(
                        "failed to get coin data for {mint}: {err}"
                    )));
                return;
            }
        };

        info!(mint = %mint, symbol = %coin.symbol, "Buying token");
        let position = match self
            .trade_client
            .buy_token_with_sol(
                mint,
                &coin.bonding_curve,
                &coin.associated_bonding_curve,
                self.config.buy_amount_sol,
                self.config.buy_slippage,
            )
            .await
        {
            Ok(position) => position,
            Err(err) => {
                let _ = self
                    .trade_errs
                    .try_send(TradeError::transient(anyhow!("buy failed for {mint}: {err}")));
                return;
            }
        };

        self.spawn_buy_notification(mint, &coin, &position);

        let race = HoldRace::new(
            self.coin_info.clone(),
            HoldRaceConfig {
                max_hold_time: self.config.max_hold_time,
                poll_interval: self.config.koth_poll_interval,
                poller_count: self.config.poller_count,
                error_threshold: self.config.poll_error_threshold,
            },
        );
        let reason = race.await_sell_signal(mint, &self.trade_errs).await;

        self.handle_sell(mint, &coin, &position, reason).await;
    }

    /// The buy SMS needs a SOL/USD lookup, so it runs off to the side rather
    /// than delaying the hold timer.
    fn spawn_buy_notification(&self, mint: &str, coin: &CoinData, position: &BuyTokenResult) {
        let coin_info = self.coin_info.clone();
        let notifier = self.notifier.clone();
        let to = self.config.sms_recipient.clone();
        let buy_amount_sol = self.config.buy_amount_sol;
        let mint = mint.to_string();
        let symbol = coin.symbol.clone();
        let token_amount = position.token_amount;

        tokio::spawn(async move {
            let sol_price = match coin_info.sol_price_usd().await {
                Ok(price) => price,
                Err(err) => {
                    error!(error = %err, "Error getting SOL price");
                    return;
                }
            };
            let body = buy_message(&mint, sol_price * buy_amount_sol, token_amount, &symbol);
            if let Err(err) = notifier.send_sms(&body, &to).await {
                error!(error = %err, "Error sending SMS");
            }
        });
    }

    /// Sells with one retry. A second failure raises a single force-quit and
    /// texts the failure; nothing here retries beyond that.
    async fn handle_sell(
        &self,
        mint: &str,
        coin: &CoinData,
        position: &BuyTokenResult,
        reason: SellReason,
    ) {
        info!(mint = %mint, symbol = %coin.symbol, reason = %reason, "Selling token");

        let first_attempt = self
            .trade_client
            .sell_token(
                mint,
                &coin.bonding_curve,
                &coin.associated_bonding_curve,
                position,
                self.config.sell_slippage,
            )
            .await;

        let signature = match first_attempt {
            Ok(signature) => signature,
            Err(first_err) => {
                debug!(mint = %mint, error = %first_err, "Sell failed, retrying once");
                match self
                    .trade_client
                    .sell_token(
                        mint,
                        &coin.bonding_curve,
                        &coin.associated_bonding_curve,
                        position,
                        self.config.sell_slippage,
                    )
                    .await
                {
                    Ok(signature) => signature,
                    Err(err) => {
                        let _ = self
                            .trade_errs
                            .try_send(TradeError::force_quit(anyhow!(
                                "sell failed for {mint}: {err}"
                            )));
                        let body = sell_failure_message(mint, reason);
                        if let Err(sms_err) =
                            self.notifier.send_sms(&body, &self.config.sms_recipient).await
                        {
                            error!(error = %sms_err, "Error sending SMS");
                        }
                        return;
                    }
                }
            }
        };

        info!(mint = %mint, signature = %signature, reason = %reason, "Sold token");

        let body = sell_message(mint, &coin.symbol);
        if let Err(err) = self.notifier.send_sms(&body, &self.config.sms_recipient).await {
            error!(error = %err, "Error sending SMS");
        }
    }
}

pub fn pumpfun_url(mint: &str) -> String {
    format!("https://pump.fun/coin/{mint}")
}

fn buy_message(mint: &str, amount_in_pounds: f64, token_amount: f64, symbol: &str) -> String {
    format!(
        "BUY: {} £{} -> {} {}",
        pumpfun_url(mint),
        amount_in_pounds,
        token_amount,
        symbol
    )
}

fn sell_message(mint: &str, symbol: &str) -> String {
    format!("SELL: {} -> {}", pumpfun_url(mint), symbol)
}

fn sell_failure_message(mint: &str, reason: SellReason) -> String {
    format!("ERROR SELLING: {} failed: {}", pumpfun_url(mint), reason)
}

/// The error text is clipped to keep the alert inside one SMS segment.
fn critical_error_message(error_text: &str) -> String {
    format!("Critical error: {error_text:.20}, entering 10 min standby mode")
}
