use chrono::{Duration, NaiveDateTime};
use serde::Serialize;

use crate::alarm::model::Alarm;

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RingPhase {
    #[default]
    Idle,
    Ringing,
    Snoozed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnoozeOutcome {
    Snoozed { count: u32, until: NaiveDateTime },
    /// Budget already spent; the request dismissed the alarm instead.
    Exhausted,
    NotAllowed,
    NotRinging,
}

/// Tracks the single active alarm: `Idle -> Ringing -> (Snoozed -> Ringing)* -> Idle`.
#[derive(Debug, Default)]
pub struct RingingMachine {
    active: Option<Alarm>,
    phase: RingPhase,
    snooze_count: u32,
    snooze_until: Option<NaiveDateTime>,
}

impl RingingMachine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a fresh ring. Any previous snooze progress is discarded.
    pub fn ring(&mut self, alarm: Alarm) {
        self.active = Some(alarm);
        self.phase = RingPhase::Ringing;
        self.snooze_count = 0;
        self.snooze_until = None;
    }

    pub fn snooze(&mut self, now: NaiveDateTime) -> SnoozeOutcome {
        if self.phase != RingPhase::Ringing {
            return SnoozeOutcome::NotRinging;
        }
        let Some(alarm) = self.active.as_ref() else {
            return SnoozeOutcome::NotRinging;
        };
        if !alarm.snooze.enabled {
            return SnoozeOutcome::NotAllowed;
        }
        if self.snooze_count >= alarm.snooze.max_count {
            self.dismiss();
            return SnoozeOutcome::Exhausted;
        }

        let until = now + Duration::minutes(i64::from(alarm.snooze.duration_minutes));
        self.snooze_count += 1;
        self.phase = RingPhase::Snoozed;
        self.snooze_until = Some(until);
        SnoozeOutcome::Snoozed {
            count: self.snooze_count,
            until,
        }
    }

    /// Returns the alarm that was active, or `None` when there was nothing to dismiss.
    pub fn dismiss(&mut self) -> Option<Alarm> {
        self.phase = RingPhase::Idle;
        self.snooze_count = 0;
        self.snooze_until = None;
        self.active.take()
    }

    /// Moves a snoozed alarm back to ringing once its deadline has passed.
    pub fn resume_due(&mut self, now: NaiveDateTime) -> Option<&Alarm> {
        if self.phase != RingPhase::Snoozed {
            return None;
        }
        let until = self.snooze_until?;
        if now < until {
            return None;
        }
        self.phase = RingPhase::Ringing;
        self.snooze_until = None;
        self.active.as_ref()
    }

    pub fn phase(&self) -> RingPhase {
        self.phase
    }

    pub fn is_ringing(&self) -> bool {
        self.phase == RingPhase::Ringing
    }

    #[cfg(test)]
    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn active_alarm(&self) -> Option<&Alarm> {
        self.active.as_ref()
    }

    pub fn snooze_count(&self) -> u32 {
        self.snooze_count
    }

    pub fn snooze_until(&self) -> Option<NaiveDateTime> {
        self.snooze_until
    }
}
