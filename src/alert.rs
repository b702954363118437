//! Alert decision engine.
//!
//! Two states, `Armed` and `CoolingDown`. A fire moves the engine to
//! `CoolingDown`; it returns to `Armed` once strictly more than the cooldown
//! has elapsed since the last fire. The transition back is evaluated lazily on
//! every call, there is no timer.
//!
//! The comparison is strict: a detection arriving exactly `cooldown` after
//! the previous alert is still suppressed.

use std::time::Duration;

use crate::clock::Timestamp;
use crate::detect::DetectionSet;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AlertPhase {
    Armed,
    CoolingDown,
}

/// Outcome of one `decide` call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Decision {
    pub should_fire: bool,
    /// Timestamp to carry into the next call. `now` on fire, unchanged otherwise.
    pub last_alert: Option<Timestamp>,
    /// Detected classes that are also classes of interest.
    pub matched: DetectionSet,
}

/// Decide whether the current detections raise an alert.
///
/// Fires iff `detected ∩ interest` is non-empty and `now - last_alert > cooldown`.
/// `last_alert == None` means no alert has fired yet, so the engine is armed.
/// A `now` earlier than `last_alert` counts as zero elapsed time.
pub fn decide(
    detected: &DetectionSet,
    interest: &DetectionSet,
    last_alert: Option<Timestamp>,
    cooldown: Duration,
    now: Timestamp,
) -> Decision {
    let matched: DetectionSet = detected.intersection(interest).copied().collect();
    let should_fire = !matched.is_empty() && cooldown_elapsed(last_alert, cooldown, now);

    Decision {
        should_fire,
        last_alert: if should_fire { Some(now) } else { last_alert },
        matched,
    }
}

fn cooldown_elapsed(last_alert: Option<Timestamp>, cooldown: Duration, now: Timestamp) -> bool {
    match last_alert {
        None => true,
        Some(last) => now.saturating_sub(last) > cooldown,
    }
}

/// Cooldown state owned by the main loop.
#[derive(Clone, Debug)]
pub struct AlertState {
    last_alert: Option<Timestamp>,
    cooldown: Duration,
    fired: u64,
}

impl AlertState {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            last_alert: None,
            cooldown,
            fired: 0,
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    pub fn last_alert(&self) -> Option<Timestamp> {
        self.last_alert
    }

    /// Number of alerts fired since start.
    pub fn fired(&self) -> u64 {
        self.fired
    }

    pub fn phase(&self, now: Timestamp) -> AlertPhase {
        if cooldown_elapsed(self.last_alert, self.cooldown, now) {
            AlertPhase::Armed
        } else {
            AlertPhase::CoolingDown
        }
    }

    /// Run `decide` and keep the resulting timestamp.
    pub fn evaluate(
        &mut self,
        detected: &DetectionSet,
        interest: &DetectionSet,
        now: Timestamp,
    ) -> Decision {
        let decision = decide(detected, interest, self.last_alert, self.cooldown, now);
        if decision.should_fire {
            self.fired += 1;
        }
        self.last_alert = decision.last_alert;
        decision
    }
}
