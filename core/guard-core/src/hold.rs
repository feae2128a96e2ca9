//! Hold-switch observer (poll variant).
//!
//! A dedicated worker samples the hold switch and keeps the veto armed while
//! it is engaged, then through a settle window after release so that
//! overshooting the detent cannot let a stray suspend slip through. The
//! phase machine is explicit and advanced by `tick` with an injected "now",
//! which keeps the settle behavior testable without real delays.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::bridge::ShutdownSignal;
use crate::input::{buttons, InputSampler, RawInput, SampleError};
use crate::policy::PolicyState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldPhase {
    /// Switch disengaged, veto clear.
    Idle,
    /// Switch engaged, veto armed.
    Engaged,
    /// Switch released; veto stays armed until the deadline passes.
    Settling { deadline: Instant },
}

pub struct HoldObserver {
    state: Arc<PolicyState>,
    settle: Duration,
    phase: HoldPhase,
}

impl HoldObserver {
    pub fn new(state: Arc<PolicyState>, settle: Duration) -> Self {
        Self {
            state,
            settle,
            phase: HoldPhase::Idle,
        }
    }

    pub fn phase(&self) -> HoldPhase {
        self.phase
    }

    /// Advance one poll tick.
    pub fn tick(&mut self, sample: Result<RawInput, SampleError>, now: Instant) {
        let raw = match sample {
            Ok(raw) => raw,
            Err(err) => {
                // Fail safe: a dead input device must re-enable sleep, not
                // leave the unit permanently unsleepable.
                debug!(error = %err, "Hold poll sample failed; re-enabling sleep");
                self.state.clear_veto();
                self.phase = HoldPhase::Idle;
                return;
            }
        };

        let engaged = raw.engaged(buttons::HOLD);
        self.phase = match (self.phase, engaged) {
            (_, true) => {
                self.state.engage_veto();
                HoldPhase::Engaged
            }
            (HoldPhase::Engaged, false) => HoldPhase::Settling {
                deadline: now + self.settle,
            },
            (HoldPhase::Settling { deadline }, false) => {
                if now >= deadline {
                    self.state.clear_veto();
                    HoldPhase::Idle
                } else {
                    HoldPhase::Settling { deadline }
                }
            }
            (HoldPhase::Idle, false) => HoldPhase::Idle,
        };
    }
}

/// Worker entry point for the poll variant.
///
/// Sleeps cooperatively between samples via the shutdown signal so teardown
/// can wake it immediately; the veto is cleared on the way out because no
/// one is left to clear it afterwards.
pub fn run_poll_worker(
    mut observer: HoldObserver,
    sampler: Arc<dyn InputSampler>,
    poll_interval: Duration,
    shutdown: Arc<ShutdownSignal>,
) {
    info!(poll_interval_ms = poll_interval.as_millis() as u64, "Hold poll worker started");
    while !shutdown.wait_timeout(poll_interval) {
        observer.tick(sampler.sample(), Instant::now());
    }
    observer.state.clear_veto();
    info!("Hold poll worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::test_support::ScriptedSampler;

    fn observer(settle_ms: u64) -> (HoldObserver, Arc<PolicyState>) {
        let state = Arc::new(PolicyState::new(10, false));
        (
            HoldObserver::new(Arc::clone(&state), Duration::from_millis(settle_ms)),
            state,
        )
    }

    fn hold_sample() -> Result<RawInput, SampleError> {
        Ok(RawInput::new(buttons::HOLD))
    }

    fn idle_sample() -> Result<RawInput, SampleError> {
        Ok(RawInput::new(0))
    }

    #[test]
    fn engaging_hold_arms_the_veto() {
        let (mut obs, state) = observer(1_000);
        obs.tick(hold_sample(), Instant::now());
        assert_eq!(obs.phase(), HoldPhase::Engaged);
        assert!(state.veto_active());
    }

    #[test]
    fn veto_holds_through_settle_window_then_clears() {
        let (mut obs, state) = observer(1_000);
        let t0 = Instant::now();

        obs.tick(hold_sample(), t0);
        obs.tick(idle_sample(), t0 + Duration::from_millis(50));
        assert!(matches!(obs.phase(), HoldPhase::Settling { .. }));
        assert!(state.veto_active());

        // Still inside the settle window.
        obs.tick(idle_sample(), t0 + Duration::from_millis(900));
        assert!(state.veto_active());

        // Window elapsed.
        obs.tick(idle_sample(), t0 + Duration::from_millis(1_100));
        assert_eq!(obs.phase(), HoldPhase::Idle);
        assert!(!state.veto_active());
    }

    #[test]
    fn momentary_disengagement_does_not_drop_the_veto() {
        // Overshoot past the detent: released for one tick, re-engaged on
        // the next.
        let (mut obs, state) = observer(1_000);
        let t0 = Instant::now();

        obs.tick(hold_sample(), t0);
        obs.tick(idle_sample(), t0 + Duration::from_millis(50));
        obs.tick(hold_sample(), t0 + Duration::from_millis(100));

        assert_eq!(obs.phase(), HoldPhase::Engaged);
        assert!(state.veto_active());
    }

    #[test]
    fn re_engaging_during_settle_returns_to_engaged() {
        let (mut obs, _state) = observer(1_000);
        let t0 = Instant::now();

        obs.tick(hold_sample(), t0);
        obs.tick(idle_sample(), t0 + Duration::from_millis(50));
        obs.tick(hold_sample(), t0 + Duration::from_millis(500));
        assert_eq!(obs.phase(), HoldPhase::Engaged);

        // The settle window restarts from the new release.
        obs.tick(idle_sample(), t0 + Duration::from_millis(600));
        obs.tick(idle_sample(), t0 + Duration::from_millis(1_100));
        assert!(matches!(obs.phase(), HoldPhase::Settling { .. }));
    }

    #[test]
    fn sample_failure_fails_safe_to_allow() {
        let (mut obs, state) = observer(1_000);
        obs.tick(hold_sample(), Instant::now());
        assert!(state.veto_active());

        obs.tick(Err(SampleError("device busy".to_string())), Instant::now());
        assert_eq!(obs.phase(), HoldPhase::Idle);
        assert!(!state.veto_active());
    }

    #[test]
    fn idle_ticks_leave_state_alone() {
        let (mut obs, state) = observer(1_000);
        obs.tick(idle_sample(), Instant::now());
        obs.tick(idle_sample(), Instant::now());
        assert_eq!(obs.phase(), HoldPhase::Idle);
        assert!(!state.veto_active());
    }

    #[test]
    fn worker_clears_veto_on_shutdown() {
        let state = Arc::new(PolicyState::new(10, false));
        let obs = HoldObserver::new(Arc::clone(&state), Duration::from_millis(10));
        let sampler: Arc<dyn InputSampler> = Arc::new(ScriptedSampler::fixed(buttons::HOLD));
        let shutdown = Arc::new(ShutdownSignal::new());

        let worker = {
            let shutdown = Arc::clone(&shutdown);
            std::thread::spawn(move || {
                run_poll_worker(obs, sampler, Duration::from_millis(5), shutdown)
            })
        };

        // Let the worker observe the engaged switch at least once.
        std::thread::sleep(Duration::from_millis(50));
        assert!(state.veto_active());

        shutdown.raise();
        worker.join().expect("worker join");
        assert!(!state.veto_active());
    }
}
