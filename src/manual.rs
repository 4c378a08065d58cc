//! Tracks whether a light was last changed by someone other than the scheduler.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct OverrideState {
    manually_overridden: bool,
    just_turned_on: bool,
    is_off: bool,
    /// Turned on while overridden; cleared when control changes hands again.
    resumed: bool,
}

/// Per-id override bookkeeping. Ids that were never seen report all flags as
/// unset.
#[derive(Debug, Default)]
pub struct ManualOverrideTracker {
    states: Mutex<HashMap<String, OverrideState>>,
}

impl ManualOverrideTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn update(&self, id: &str, f: impl FnOnce(&mut OverrideState)) {
        let mut states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        f(states.entry(id.to_string()).or_default());
    }

    fn get(&self, id: &str) -> OverrideState {
        let states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        states.get(id).copied().unwrap_or_default()
    }

    pub fn on_manually_overridden(&self, id: &str) {
        log::debug!("{id} manually overridden");
        self.update(id, |state| {
            state.manually_overridden = true;
            state.just_turned_on = false;
            state.resumed = false;
        });
    }

    pub fn on_light_turned_on(&self, id: &str) {
        self.update(id, |state| {
            state.resumed |= state.manually_overridden;
            state.manually_overridden = false;
            state.is_off = false;
            state.just_turned_on = true;
        });
    }

    pub fn on_light_off(&self, id: &str) {
        self.update(id, |state| state.is_off = true);
    }

    /// The scheduler took control again without an intervening on-event.
    pub fn on_automatically_assigned(&self, id: &str) {
        self.update(id, |state| {
            state.manually_overridden = false;
            state.just_turned_on = false;
            state.resumed = false;
        });
    }

    pub fn is_manually_overridden(&self, id: &str) -> bool {
        self.get(id).manually_overridden
    }

    pub fn was_just_turned_on(&self, id: &str) -> bool {
        self.get(id).just_turned_on
    }

    pub fn is_off(&self, id: &str) -> bool {
        self.get(id).is_off
    }

    /// True once a light has been turned back on after being overridden:
    /// switching it on hands control back to the scheduler.
    pub fn should_enforce_schedule(&self, id: &str) -> bool {
        let state = self.get(id);
        state.resumed && state.just_turned_on
    }
}
