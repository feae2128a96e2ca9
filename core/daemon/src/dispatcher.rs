//! Fixed callback-slot table standing in for the host's power-callback
//! registry.
//!
//! Slots are deliberately scarce and shared: other system consumers may
//! already occupy some of them, so registration probes and fails with a
//! distinct error on a taken slot. Dispatch walks occupied slots in order
//! and stops at the first handler that reports busy, matching the host
//! contract that a veto suppresses later callbacks.

use std::sync::{Arc, Mutex};

use sleepguard_core::{GuardError, HandlerStatus, PowerEvent, Result, SuspendBus, SuspendHandler};

pub const SLOT_COUNT: usize = 8;

pub struct CallbackTable {
    slots: Mutex<Vec<Option<Arc<dyn SuspendHandler>>>>,
    dispatch_gate: Mutex<()>,
}

impl CallbackTable {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(vec![None; SLOT_COUNT]),
            dispatch_gate: Mutex::new(()),
        }
    }

    /// Deliver one event to every registered handler, in slot order. A busy
    /// handler short-circuits the remaining slots.
    ///
    /// Events are delivered one at a time even when connection threads race:
    /// handlers count consecutive denials with plain load/store pairs and
    /// rely on the host's serialized dispatch context.
    pub fn dispatch(&self, event: PowerEvent) -> HandlerStatus {
        let _gate = self.dispatch_gate.lock().unwrap();
        let handlers: Vec<Arc<dyn SuspendHandler>> = {
            let slots = self.slots.lock().unwrap();
            slots.iter().flatten().map(Arc::clone).collect()
        };

        for handler in handlers {
            if handler.handle(event) == HandlerStatus::Busy {
                return HandlerStatus::Busy;
            }
        }
        HandlerStatus::Accept
    }

    pub fn occupied_slots(&self) -> Vec<usize> {
        let slots = self.slots.lock().unwrap();
        slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|_| index))
            .collect()
    }
}

impl Default for CallbackTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SuspendBus for CallbackTable {
    fn register(&self, slot: usize, handler: Arc<dyn SuspendHandler>) -> Result<()> {
        let mut slots = self.slots.lock().unwrap();
        let entry = slots
            .get_mut(slot)
            .ok_or_else(|| GuardError::Registration(format!("slot {} out of range", slot)))?;
        if entry.is_some() {
            return Err(GuardError::SlotBusy(slot));
        }
        *entry = Some(handler);
        Ok(())
    }

    fn unregister(&self, slot: usize) -> Result<()> {
        let mut slots = self.slots.lock().unwrap();
        let entry = slots
            .get_mut(slot)
            .ok_or_else(|| GuardError::Registration(format!("slot {} out of range", slot)))?;
        *entry = None;
        Ok(())
    }
}
