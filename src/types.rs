use std::fmt;

use solana_sdk::{pubkey::Pubkey, signature::Signature};
use tokio::sync::mpsc;

/// One observed log notification for a watched wallet. Produced once per
/// notification, consumed exactly once by the engine.
#[derive(Debug, Clone)]
pub struct WalletTransactionSignature {
    pub wallet: String,
    pub signature: String,
}

pub type EventSender = mpsc::Sender<WalletTransactionSignature>;
pub type EventReceiver = mpsc::Receiver<WalletTransactionSignature>;

/// Outcome of a submitted buy. Owned by the hold/sell task for its mint and
/// never mutated after construction.
#[derive(Debug, Clone)]
pub struct BuyTokenResult {
    pub signature: Signature,
    pub amount_base_units: u64,
    pub max_amount_base_units: u64,
    pub associated_token_account: Pubkey,
    pub token_amount: f64,
}

/// Why a held position is being sold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SellReason {
    MaxHoldTime,
    KothReached,
}

impl fmt::Display for SellReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SellReason::MaxHoldTime => write!(f, "max hold time reached"),
            SellReason::KothReached => write!(f, "koh reached"),
        }
    }
}

/// How badly a raised error should be treated by the run loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Log it, abandon the affected mint, keep running.
    Transient,
    /// Notify, observe the cooldown, stop the run.
    ForceQuit,
    /// Construction-time failure. Never raised mid-run.
    Fatal,
}

/// Error plus the severity the raiser assigned to it. Flows through the trade
/// error channel to the run loop; the loop alone decides what happens next.
#[derive(Debug)]
pub struct TradeError {
    pub severity: Severity,
    pub source: anyhow::Error,
}

impl TradeError {
    pub fn transient(source: impl Into<anyhow::Error>) -> Self {
        Self {
            severity: Severity::Transient,
            source: source.into(),
        }
    }

    pub fn force_quit(source: impl Into<anyhow::Error>) -> Self {
        Self {
            severity: Severity::ForceQuit,
            source: source.into(),
        }
    }

    pub fn is_force_quit(&self) -> bool {
        self.severity == Severity::ForceQuit
    }
}

impl fmt::Display for TradeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

pub type TradeErrorSender = mpsc::Sender<TradeError>;
pub type TradeErrorReceiver = mpsc::Receiver<TradeError>;
