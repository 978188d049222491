//! Presence debounce state machine.
//!
//! Raw per-frame presence flickers: partial occlusion or a single missed
//! detection would otherwise fire one alert per flicker. The tracker
//! collapses a contiguous presence interval into exactly two events -
//! enter and exit - by requiring a grace period of continuous absence
//! before declaring the person gone.

/// Continuous absence required before PERSON_GONE, in seconds.
pub const DEFAULT_GRACE_PERIOD_SECS: f64 = 2.5;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresenceStatus {
    Absent,
    Present,
}

/// Discrete state-change event, emitted at most once per transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresenceEvent {
    PersonDetected,
    PersonGone,
}

impl PresenceEvent {
    /// Wire name used in alert payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            PresenceEvent::PersonDetected => "PERSON_DETECTED",
            PresenceEvent::PersonGone => "PERSON_GONE",
        }
    }
}

/// Per-camera debounce tracker. Fed once per scheduler tick.
pub struct PresenceTracker {
    status: PresenceStatus,
    last_person_seen_time: Option<f64>,
    grace_period: f64,
}

impl PresenceTracker {
    pub fn new(grace_period_secs: f64) -> Self {
        Self {
            status: PresenceStatus::Absent,
            last_person_seen_time: None,
            grace_period: grace_period_secs,
        }
    }

    /// Advance the state machine one tick.
    ///
    /// - Person seen: refresh `last_person_seen_time`; Absent -> Present
    ///   emits `PersonDetected` exactly once for this occurrence.
    /// - Nothing seen while Present: no action inside the grace period;
    ///   past it, Present -> Absent emits `PersonGone` exactly once.
    pub fn update(&mut self, now: f64, person_seen: bool) -> Option<PresenceEvent> {
        if person_seen {
            self.last_person_seen_time = Some(now);
            if self.status == PresenceStatus::Absent {
                self.status = PresenceStatus::Present;
                return Some(PresenceEvent::PersonDetected);
            }
            return None;
        }

        if self.status == PresenceStatus::Present {
            let last_seen = self.last_person_seen_time.unwrap_or(now);
            if now - last_seen > self.grace_period {
                self.status = PresenceStatus::Absent;
                return Some(PresenceEvent::PersonGone);
            }
        }
        None
    }

    pub fn status(&self) -> PresenceStatus {
        self.status
    }

    pub fn last_person_seen_time(&self) -> Option<f64> {
        self.last_person_seen_time
    }
}
