//! Admission control for trade attempts.
//!
//! Two independent gates, each atomic on its own:
//! - a seen set, so every mint is attempted at most once per process
//! - a hold semaphore capping how many positions may be open at a time
//!
//! The hold slot is an RAII permit. Dropping it frees the slot, so a slot
//! stays taken for the full buy-hold-sell lifetime of a position.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};

/// One open-position slot. Freed on drop.
#[derive(Debug)]
pub struct HoldSlot {
    _permit: OwnedSemaphorePermit,
}

#[derive(Debug)]
pub struct TradeGate {
    seen: Mutex<HashSet<String>>,
    holds: Arc<Semaphore>,
    max_concurrent_holds: usize,
}

impl TradeGate {
    pub fn new(max_concurrent_holds: usize) -> Self {
        Self {
            seen: Mutex::new(HashSet::new()),
            holds: Arc::new(Semaphore::new(max_concurrent_holds)),
            max_concurrent_holds,
        }
    }

    /// True exactly once per mint: the first caller wins, every later call
    /// for the same mint returns false.
    pub fn mark_seen_if_new(&self, mint: &str) -> bool {
        let mut seen = self.seen.lock().unwrap_or_else(PoisonError::into_inner);
        seen.insert(mint.to_string())
    }

    /// Non-blocking. None when every hold slot is taken; callers are
    /// expected to abandon the trade, not queue behind it.
    pub fn try_acquire_hold(&self) -> Option<HoldSlot> {
        match self.holds.clone().try_acquire_owned() {
            Ok(permit) => Some(HoldSlot { _permit: permit }),
            Err(TryAcquireError::NoPermits) | Err(TryAcquireError::Closed) => None,
        }
    }

    pub fn holds_in_use(&self) -> usize {
        self.max_concurrent_holds - self.holds.available_permits()
    }

    pub fn max_concurrent_holds(&self) -> usize {
        self.max_concurrent_holds
    }
}
