//! Raw input sampling contract.
//!
//! The guard never owns the input device; it peeks at whatever the platform
//! currently reports. The sampler must be non-consuming (it may not steal
//! events from other consumers of the same stream) and must be safe to call
//! from the suspend-sequencer context: no blocking, no allocation, no locks
//! that a suspended thread could hold.

use tracing::debug;

/// Named bits within the raw button/switch bitmask.
pub mod buttons {
    pub const SELECT: u32 = 0x0000_0001;
    pub const START: u32 = 0x0000_0008;
    pub const HOME: u32 = 0x0001_0000;
    /// Physical hold/lock switch.
    pub const HOLD: u32 = 0x2000_0000;
}

/// Snapshot of the device's button and switch bitmask at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawInput {
    pub buttons: u32,
}

impl RawInput {
    pub fn new(buttons: u32) -> Self {
        Self { buttons }
    }

    /// True when every bit of `mask` is currently held.
    ///
    /// An empty mask is never engaged; a combo of nothing must not read as
    /// permanently pressed.
    pub fn engaged(&self, mask: u32) -> bool {
        mask != 0 && self.buttons & mask == mask
    }
}

/// Raw sample unavailable (device momentarily busy or gone).
#[derive(Debug, thiserror::Error)]
#[error("Input device unavailable: {0}")]
pub struct SampleError(pub String);

/// Non-consuming read of the current input state.
pub trait InputSampler: Send + Sync {
    fn sample(&self) -> std::result::Result<RawInput, SampleError>;
}

/// What the policy actually cares about, derived from one raw sample.
///
/// Ephemeral by contract: recomputed at each relevant event, never cached
/// across events, because physical state can change between samples.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SwitchObservation {
    pub combo_engaged: bool,
    pub hold_engaged: bool,
}

impl SwitchObservation {
    pub fn from_raw(raw: RawInput, combo_mask: u32) -> Self {
        Self {
            combo_engaged: raw.engaged(combo_mask),
            hold_engaged: raw.engaged(buttons::HOLD),
        }
    }
}

/// Sample once and derive the switch observation.
///
/// A failed sample yields `None`; callers must resolve that toward
/// allowing suspend, never toward denial, so a dead input device cannot
/// leave the unit permanently unsleepable.
pub fn observe(sampler: &dyn InputSampler, combo_mask: u32) -> Option<SwitchObservation> {
    match sampler.sample() {
        Ok(raw) => Some(SwitchObservation::from_raw(raw, combo_mask)),
        Err(err) => {
            debug!(error = %err, "Input sample failed");
            None
        }
    }
}
