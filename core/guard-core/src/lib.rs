//! Core suspend-veto logic for sleepguard.
//!
//! The host-facing daemon stays thin: everything with real concurrency or
//! failure-mode reasoning lives here, behind narrow traits so the policy can
//! be exercised in unit tests without a real device.

pub mod bridge;
pub mod config;
pub mod engine;
pub mod error;
pub mod hold;
pub mod input;
pub mod policy;

pub use bridge::{Guard, ShutdownSignal, SuspendBus, SuspendHandler};
pub use config::{GuardConfig, ObserverMode};
pub use engine::{HandlerStatus, PowerEvent, SuspendPolicyEngine};
pub use error::{GuardError, Result};
pub use input::{InputSampler, RawInput, SampleError, SwitchObservation};
pub use policy::{PolicySnapshot, PolicyState, SuspendDecision};
