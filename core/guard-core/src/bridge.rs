//! Lifecycle and host-bus wiring.
//!
//! The host is modelled as a narrow injected interface: a bus with a small
//! fixed set of callback slots that delivers power events synchronously to
//! whatever handler occupies a slot. `Guard::start` claims a slot and (in
//! hold-poll mode) spawns the observer worker; `Guard::stop` tears down in
//! the only safe order: unregister first so no further query can be routed
//! to a handler about to disappear, then wake and join the worker with a
//! bounded wait.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{error, info, warn};

use crate::config::{GuardConfig, ObserverMode};
use crate::engine::{HandlerStatus, PowerEvent, SuspendPolicyEngine};
use crate::error::{GuardError, Result};
use crate::hold::{run_poll_worker, HoldObserver};
use crate::input::InputSampler;
use crate::policy::{PolicySnapshot, PolicyState};

/// Synchronous recipient of power events. Must return promptly; the bus
/// invokes it from the host's own dispatch contexts.
pub trait SuspendHandler: Send + Sync {
    fn handle(&self, event: PowerEvent) -> HandlerStatus;
}

impl SuspendHandler for SuspendPolicyEngine {
    fn handle(&self, event: PowerEvent) -> HandlerStatus {
        SuspendPolicyEngine::handle(self, event)
    }
}

/// The host's registration surface. Slot numbers are a scarce resource
/// shared with other system consumers; `register` fails with `SlotBusy`
/// when the requested slot is taken.
pub trait SuspendBus: Send + Sync {
    fn register(&self, slot: usize, handler: Arc<dyn SuspendHandler>) -> Result<()>;
    fn unregister(&self, slot: usize) -> Result<()>;
}

/// Cooperative shutdown flag with an interruptible wait.
///
/// The poll worker parks on this between samples so teardown can wake it
/// immediately instead of waiting out a sleep.
pub struct ShutdownSignal {
    raised: Mutex<bool>,
    condvar: Condvar,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self {
            raised: Mutex::new(false),
            condvar: Condvar::new(),
        }
    }

    pub fn raise(&self) {
        let mut raised = self.raised.lock().unwrap();
        *raised = true;
        self.condvar.notify_all();
    }

    pub fn is_raised(&self) -> bool {
        *self.raised.lock().unwrap()
    }

    /// Block for up to `timeout` or until raised. Returns true when
    /// shutdown has been requested.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let raised = self.raised.lock().unwrap();
        if *raised {
            return true;
        }
        let (raised, _) = self.condvar.wait_timeout(raised, timeout).unwrap();
        *raised
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

struct PollWorker {
    handle: JoinHandle<()>,
    shutdown: Arc<ShutdownSignal>,
    done_rx: Receiver<()>,
}

/// A started guard: its engine occupies a bus slot and, in hold-poll mode,
/// its worker is running. Dropping without `stop` leaks the registration;
/// callers own the teardown.
pub struct Guard {
    bus: Arc<dyn SuspendBus>,
    slot: usize,
    engine: Arc<SuspendPolicyEngine>,
    worker: Option<PollWorker>,
    join_timeout: Duration,
}

impl Guard {
    /// Register the engine with the bus and start the configured observer.
    ///
    /// Registration failure is fatal and leaves nothing active in the host:
    /// the guard simply fails to provide protection, which is safe by
    /// omission.
    pub fn start(
        bus: Arc<dyn SuspendBus>,
        sampler: Arc<dyn InputSampler>,
        config: &GuardConfig,
    ) -> Result<Guard> {
        config.validate()?;

        let state = Arc::new(PolicyState::new(config.max_denials, config.initial_veto));
        let engine = Arc::new(SuspendPolicyEngine::new(
            Arc::clone(&state),
            Arc::clone(&sampler),
            config.mode,
            config.combo_mask,
            config.trust_edge_ordering,
        ));

        let handler = Arc::clone(&engine) as Arc<dyn SuspendHandler>;
        let slot = register_first_free(bus.as_ref(), &config.callback_slots, handler)?;
        info!(slot, mode = ?config.mode, "Suspend handler registered");

        let worker = match config.mode {
            ObserverMode::PushEdge => None,
            ObserverMode::HoldPoll => {
                match spawn_poll_worker(state, Arc::clone(&sampler), config) {
                    Ok(worker) => Some(worker),
                    Err(err) => {
                        // No half-started guard: release the slot before
                        // reporting the failure.
                        if let Err(unreg_err) = bus.unregister(slot) {
                            error!(error = %unreg_err, slot, "Failed to release slot after worker spawn failure");
                        }
                        return Err(err);
                    }
                }
            }
        };

        Ok(Guard {
            bus,
            slot,
            engine,
            worker,
            join_timeout: config.join_timeout(),
        })
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn engine(&self) -> &Arc<SuspendPolicyEngine> {
        &self.engine
    }

    pub fn policy_snapshot(&self) -> PolicySnapshot {
        self.engine.policy().snapshot()
    }

    /// Tear down: unregister, then wake and join the worker. Failures are
    /// reported but never block exit; there is no rollback path.
    pub fn stop(self) -> Result<()> {
        let mut first_err = None;

        if let Err(err) = self.bus.unregister(self.slot) {
            error!(error = %err, slot = self.slot, "Failed to unregister suspend handler");
            first_err = Some(err);
        } else {
            info!(slot = self.slot, "Suspend handler unregistered");
        }

        if let Some(worker) = self.worker {
            if let Err(err) = stop_worker(worker, self.join_timeout) {
                error!(error = %err, "Observer worker teardown failed");
                first_err.get_or_insert(err);
            }
        }

        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn spawn_poll_worker(
    state: Arc<PolicyState>,
    sampler: Arc<dyn InputSampler>,
    config: &GuardConfig,
) -> Result<PollWorker> {
    let shutdown = Arc::new(ShutdownSignal::new());
    let (done_tx, done_rx) = mpsc::channel();
    let observer = HoldObserver::new(state, config.settle());
    let poll_interval = config.poll_interval();

    let handle = {
        let shutdown = Arc::clone(&shutdown);
        thread::Builder::new()
            .name("sleepguard-hold-poll".to_string())
            .spawn(move || {
                run_poll_worker(observer, sampler, poll_interval, shutdown);
                let _ = done_tx.send(());
            })
            .map_err(|source| GuardError::WorkerSpawn { source })?
    };

    Ok(PollWorker {
        handle,
        shutdown,
        done_rx,
    })
}

fn stop_worker(worker: PollWorker, join_timeout: Duration) -> Result<()> {
    worker.shutdown.raise();
    match worker.done_rx.recv_timeout(join_timeout) {
        Ok(()) => {
            if worker.handle.join().is_err() {
                warn!("Observer worker panicked before exit");
            }
            Ok(())
        }
        Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
            // std threads cannot be killed; abandon it so process exit is
            // never blocked.
            Err(GuardError::WorkerJoinTimedOut {
                timeout_ms: join_timeout.as_millis() as u64,
            })
        }
    }
}

fn register_first_free(
    bus: &dyn SuspendBus,
    candidates: &[usize],
    handler: Arc<dyn SuspendHandler>,
) -> Result<usize> {
    for &slot in candidates {
        match bus.register(slot, Arc::clone(&handler)) {
            Ok(()) => return Ok(slot),
            Err(GuardError::SlotBusy(_)) => continue,
            Err(err) => return Err(err),
        }
    }
    Err(GuardError::SlotsExhausted(candidates.to_vec()))
}
