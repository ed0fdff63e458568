//! hold_race.rs
//! Decides when an open position gets sold.
//!
//! Two competing triggers run from the moment a buy lands:
//! - a deadline timer at the maximum hold time
//! - redundant pollers watching the coin for king-of-the-hill promotion
//!
//! Whichever fires first wins. An atomic guard makes sure only one poller
//! ever signals, so the caller sees exactly one sell reason per position.

use anyhow::anyhow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::debug;

use crate::coin_info::CoinInfoProvider;
use crate::types::{SellReason, TradeError, TradeErrorSender};

#[derive(Debug, Clone)]
pub struct HoldRaceConfig {
    pub max_hold_time: Duration,
    pub poll_interval: Duration,
    /// How many identical pollers race against each other. More than one
    /// papers over a single flaky proxy route.
    pub poller_count: usize,
    /// Consecutive poll failures tolerated per poller before it reports a
    /// force-quit error and gives up.
    pub error_threshold: u32,
}

pub struct HoldRace {
    coin_info: Arc<dyn CoinInfoProvider>,
    config: HoldRaceConfig,
}

impl HoldRace {
    pub fn new(coin_info: Arc<dyn CoinInfoProvider>, config: HoldRaceConfig) -> Self {
        Self { coin_info, config }
    }

    /// Resolves exactly once per position. Promotion beats the deadline;
    /// if every poller dies early the deadline still fires.
    pub async fn await_sell_signal(
        &self,
        mint: &str,
        trade_errs: &TradeErrorSender,
    ) -> SellReason {
        let deadline = Instant::now() + self.config.max_hold_time;
        let (promoted_tx, mut promoted_rx) = mpsc::channel::<()>(1);
        let fired = Arc::new(AtomicBool::new(false));

        let mut pollers = JoinSet::new();
        for _ in 0..self.config.poller_count {
            pollers.spawn(poll_until_promoted(
                self.coin_info.clone(),
                mint.to_string(),
                deadline,
                self.config.poll_interval,
                self.config.error_threshold,
                fired.clone(),
                promoted_tx.clone(),
                trade_errs.clone(),
            ));
        }
        drop(promoted_tx);

        let reason = tokio::select! {
            _ = sleep_until(deadline) => SellReason::MaxHoldTime,
            signal = promoted_rx.recv() => match signal {
                Some(()) => SellReason::KothReached,
                // Every poller exited without a promotion signal, so only
                // the deadline is left.
                None => {
                    sleep_until(deadline).await;
                    SellReason::MaxHoldTime
                }
            },
        };

        fired.store(true, Ordering::SeqCst);
        pollers.abort_all();
        reason
    }
}

#[allow(clippy::too_many_arguments)]
async fn poll_until_promoted(
    coin_info: Arc<dyn CoinInfoProvider>,
    mint: String,
    deadline: Instant,
    poll_interval: Duration,
    error_threshold: u32,
    fired: Arc<AtomicBool>,
    promoted: mpsc::Sender<()>,
    trade_errs: TradeErrorSender,
) {
    let mut consecutive_errors: u32 = 0;
    loop {
        if Instant::now() >= deadline || fired.load(Ordering::SeqCst) {
            return;
        }
        if consecutive_errors > error_threshold {
            let err = TradeError::force_quit(anyhow!(
                "failed to get coin data after {} retries",
                consecutive_errors
            ));
            let _ = trade_errs.send(err).await;
            return;
        }

        match coin_info.coin_data_for(&mint, false, true).await {
            Ok(coin) => {
                consecutive_errors = 0;
                let promoted_now = coin.king_of_the_hill_timestamp > 0;
                debug!(mint = %mint, koth = promoted_now, "Polled coin data");
                if promoted_now {
                    // Only the first observer signals; the rest stand down.
                    if !fired.swap(true, Ordering::SeqCst) {
                        let _ = promoted.try_send(());
                    }
                    return;
                }
                sleep(poll_interval).await;
            }
            Err(e) => {
                consecutive_errors += 1;
                debug!(mint = %mint, consecutive_errors, "Coin data poll failed: {}", e);
            }
        }
    }
}
