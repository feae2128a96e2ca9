//! The suspend policy engine.
//!
//! Receives typed power events from the host's event bus and answers
//! suspend queries synchronously. The query path runs on the context the
//! host uses to drive its own suspend sequencer; it must resolve in one
//! call, without blocking, sleeping, or retrying.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::ObserverMode;
use crate::input::{observe, InputSampler};
use crate::policy::{PolicyState, SuspendDecision};

/// Events delivered by the host's suspend-sequence channel and the
/// switch-edge callback path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerEvent {
    /// "Is it acceptable to sleep now?" Answered synchronously.
    SuspendQuery,
    SuspendCancelled,
    SuspendStarted,
    /// Physical switch engaged (push variant only).
    SwitchPressed,
    /// Switch released through any path, including non-physical suspend
    /// requests the host multiplexes through the same callback.
    SwitchReleased,
}

/// Synchronous handler status returned to the host. `Busy` is the veto.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerStatus {
    Accept,
    Busy,
}

pub struct SuspendPolicyEngine {
    state: Arc<PolicyState>,
    sampler: Arc<dyn InputSampler>,
    mode: ObserverMode,
    combo_mask: u32,
    trust_edge_ordering: bool,
}

impl SuspendPolicyEngine {
    pub fn new(
        state: Arc<PolicyState>,
        sampler: Arc<dyn InputSampler>,
        mode: ObserverMode,
        combo_mask: u32,
        trust_edge_ordering: bool,
    ) -> Self {
        Self {
            state,
            sampler,
            mode,
            combo_mask,
            trust_edge_ordering,
        }
    }

    pub fn policy(&self) -> &Arc<PolicyState> {
        &self.state
    }

    /// Handle one event from the host. Exactly one decision per call; no
    /// error is retried inside the sequencer context.
    pub fn handle(&self, event: PowerEvent) -> HandlerStatus {
        match event {
            PowerEvent::SwitchPressed => {
                // Sample at the edge, before the host's sequencer has
                // necessarily begun. Holding the override combo is the
                // intended allow path; anything else arms the veto. A
                // failed sample resolves toward allowing suspend.
                match observe(self.sampler.as_ref(), self.combo_mask) {
                    Some(obs) if !obs.combo_engaged => {
                        debug!("Switch pressed without override combo; veto armed");
                        self.state.engage_veto();
                    }
                    Some(_) => {
                        debug!("Switch pressed with override combo; veto cleared");
                        self.state.clear_veto();
                    }
                    None => {
                        debug!("Switch pressed but input unreadable; allowing suspend");
                        self.state.clear_veto();
                    }
                }
                HandlerStatus::Accept
            }
            PowerEvent::SwitchReleased => {
                // A suspend request that did not come from the physical
                // switch has no human holding a combo; denying it would loop
                // until the platform watchdog resets the device.
                self.state.clear_veto();
                HandlerStatus::Accept
            }
            PowerEvent::SuspendQuery => self.answer_query(),
            PowerEvent::SuspendCancelled => {
                debug!("Host cancelled the suspend attempt");
                HandlerStatus::Accept
            }
            PowerEvent::SuspendStarted => {
                debug!("Suspend sequence started");
                HandlerStatus::Accept
            }
        }
    }

    fn answer_query(&self) -> HandlerStatus {
        if !self.trust_edge_ordering {
            // The host may deliver this query before the matching switch
            // edge or poll tick has been applied, so the flag could be
            // stale. Re-derive it from a fresh sample: in push mode the
            // override combo decides, in hold mode the hold switch itself
            // does. A failed sample fails open.
            match observe(self.sampler.as_ref(), self.combo_mask) {
                Some(obs) => {
                    let veto = match self.mode {
                        ObserverMode::PushEdge => !obs.combo_engaged,
                        ObserverMode::HoldPoll => obs.hold_engaged,
                    };
                    if veto {
                        self.state.engage_veto();
                    } else {
                        self.state.clear_veto();
                    }
                }
                None => {
                    debug!("Query-time sample failed; allowing suspend");
                    self.state.clear_veto();
                }
            }
        }

        match self.state.decide_suspend() {
            SuspendDecision::Allow => {
                debug!("Suspend query allowed");
                HandlerStatus::Accept
            }
            SuspendDecision::Deny => {
                let snap = self.state.snapshot();
                debug!(
                    consecutive_denials = snap.consecutive_denials,
                    max_denials = snap.max_denials,
                    "Suspend query denied"
                );
                HandlerStatus::Busy
            }
            SuspendDecision::ForcedAllow => {
                let snap = self.state.snapshot();
                warn!(
                    max_denials = snap.max_denials,
                    forced_allows = snap.forced_allows,
                    "Denial ceiling reached; forcing suspend through"
                );
                HandlerStatus::Accept
            }
        }
    }
}
