//! Shared suspend-veto decision state.
//!
//! One instance mirrors the one physical device. Two execution contexts
//! touch it: the host's suspend-sequencer context (reads the veto flag and
//! owns the denial counter via `decide_suspend`) and whichever observer is
//! deployed (owns the veto flag via `engage_veto`/`clear_veto`). Fields are
//! single-word atomics so the sequencer path never takes a lock.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use serde::Serialize;

/// Default ceiling on consecutive denials of one logical suspend attempt.
pub const DEFAULT_MAX_DENIALS: u32 = 10;

/// Outcome of one suspend query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuspendDecision {
    Allow,
    Deny,
    /// The denial ceiling was reached and the veto was forcibly cleared.
    /// Reported distinctly so diagnostics can tell the escape valve from an
    /// ordinary allow.
    ForcedAllow,
}

impl SuspendDecision {
    pub fn permits_sleep(&self) -> bool {
        !matches!(self, SuspendDecision::Deny)
    }
}

/// Point-in-time view of the policy state for diagnostics.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PolicySnapshot {
    pub veto_active: bool,
    pub consecutive_denials: u32,
    pub max_denials: u32,
    pub total_denials: u64,
    pub forced_allows: u64,
}

pub struct PolicyState {
    veto_active: AtomicBool,
    consecutive_denials: AtomicU32,
    max_denials: u32,
    // Diagnostics only; never consulted by a decision.
    total_denials: AtomicU64,
    forced_allows: AtomicU64,
}

impl PolicyState {
    pub fn new(max_denials: u32, initial_veto: bool) -> Self {
        Self {
            veto_active: AtomicBool::new(initial_veto),
            consecutive_denials: AtomicU32::new(0),
            max_denials: max_denials.max(1),
            total_denials: AtomicU64::new(0),
            forced_allows: AtomicU64::new(0),
        }
    }

    pub fn veto_active(&self) -> bool {
        self.veto_active.load(Ordering::Acquire)
    }

    /// Arm the veto: the next suspend query will be denied.
    ///
    /// Does not touch the denial counter; repeated engagement while a retry
    /// storm is in flight must not reset progress toward the ceiling.
    pub fn engage_veto(&self) {
        self.veto_active.store(true, Ordering::Release);
    }

    /// Drop the veto and reset the denial counter in the same transition.
    pub fn clear_veto(&self) {
        self.consecutive_denials.store(0, Ordering::Relaxed);
        self.veto_active.store(false, Ordering::Release);
    }

    /// Resolve one suspend query. Runs only on the suspend-sequencer
    /// context, which is the sole writer of `consecutive_denials`; the
    /// counter is therefore a plain load/store pair, not a RMW.
    pub fn decide_suspend(&self) -> SuspendDecision {
        if !self.veto_active.load(Ordering::Acquire) {
            self.consecutive_denials.store(0, Ordering::Relaxed);
            return SuspendDecision::Allow;
        }

        let count = self.consecutive_denials.load(Ordering::Relaxed);
        if count < self.max_denials {
            self.consecutive_denials.store(count + 1, Ordering::Relaxed);
            self.total_denials.fetch_add(1, Ordering::Relaxed);
            return SuspendDecision::Deny;
        }

        // Ceiling reached: the host may re-issue the query synchronously
        // forever on the same suspend attempt, so denial must eventually
        // convert to allowance or the device livelocks.
        self.consecutive_denials.store(0, Ordering::Relaxed);
        self.veto_active.store(false, Ordering::Release);
        self.forced_allows.fetch_add(1, Ordering::Relaxed);
        SuspendDecision::ForcedAllow
    }

    pub fn snapshot(&self) -> PolicySnapshot {
        PolicySnapshot {
            veto_active: self.veto_active.load(Ordering::Acquire),
            consecutive_denials: self.consecutive_denials.load(Ordering::Relaxed),
            max_denials: self.max_denials,
            total_denials: self.total_denials.load(Ordering::Relaxed),
            forced_allows: self.forced_allows.load(Ordering::Relaxed),
        }
    }
}
