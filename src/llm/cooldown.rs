//! Inference cooldown gate
//!
//! Automatic inference runs only from `Idle`. Starting an invocation moves
//! the gate out of `Idle`; completing it starts a cooldown window measured
//! from completion, after which the gate is `Idle` again. Manual runs bypass
//! the window but never overlap an invocation that is still in flight.

use std::sync::{Arc, Mutex};

use crate::clock::SharedClock;

/// Externally observable detector state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum DetectorState {
    Idle,
    Cooling,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Running,
    Cooling { until_ms: i64 },
}

/// Why an invocation was not started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Blocked {
    /// Another invocation has not completed yet
    InFlight,
    /// Automatic run inside the cooldown window
    Cooling { remaining_ms: i64 },
}

struct Inner {
    clock: SharedClock,
    cooldown_ms: i64,
    phase: Mutex<Phase>,
}

impl Inner {
    fn lock(&self) -> std::sync::MutexGuard<'_, Phase> {
        self.phase.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Current phase with an expired cooldown folded back into `Idle`.
    fn resolve(&self, phase: &mut Phase) -> Phase {
        if let Phase::Cooling { until_ms } = *phase {
            if self.clock.now_ms() >= until_ms {
                *phase = Phase::Idle;
            }
        }
        *phase
    }
}

/// Cooldown state machine shared by automatic and manual triggers.
#[derive(Clone)]
pub struct CooldownGate {
    inner: Arc<Inner>,
}

impl CooldownGate {
    pub fn new(clock: SharedClock, cooldown_ms: i64) -> Self {
        Self {
            inner: Arc::new(Inner {
                clock,
                cooldown_ms,
                phase: Mutex::new(Phase::Idle),
            }),
        }
    }

    pub fn state(&self) -> DetectorState {
        let mut phase = self.inner.lock();
        match self.inner.resolve(&mut phase) {
            Phase::Idle => DetectorState::Idle,
            Phase::Running | Phase::Cooling { .. } => DetectorState::Cooling,
        }
    }

    pub fn is_in_flight(&self) -> bool {
        *self.inner.lock() == Phase::Running
    }

    /// Start an invocation. `manual` skips the cooldown window check. The
    /// returned permit starts the cooldown when dropped.
    pub fn try_begin(&self, manual: bool) -> Result<CooldownPermit, Blocked> {
        let mut phase = self.inner.lock();
        match self.inner.resolve(&mut phase) {
            Phase::Running => return Err(Blocked::InFlight),
            Phase::Cooling { until_ms } if !manual => {
                return Err(Blocked::Cooling {
                    remaining_ms: until_ms - self.inner.clock.now_ms(),
                });
            }
            Phase::Idle | Phase::Cooling { .. } => {}
        }
        *phase = Phase::Running;
        Ok(CooldownPermit {
            inner: Arc::clone(&self.inner),
        })
    }
}

/// Held for the duration of one invocation.
pub struct CooldownPermit {
    inner: Arc<Inner>,
}

impl Drop for CooldownPermit {
    fn drop(&mut self) {
        let until_ms = self.inner.clock.now_ms() + self.inner.cooldown_ms;
        *self.inner.lock() = Phase::Cooling { until_ms };
    }
}
