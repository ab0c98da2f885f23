use std::collections::HashSet;

use chrono::{Datelike, NaiveDateTime, Timelike};
use tracing::{debug, warn};

use crate::alarm::dedup::{TriggerCache, TriggerKey};
use crate::alarm::model::Alarm;
use crate::error::AlarmError;

/// Last second of a minute (inclusive) in which a matching alarm may still fire.
pub const TRIGGER_WINDOW_LAST_SECOND: u32 = 2;

pub fn minute_key(now: NaiveDateTime) -> String {
    now.format("%H:%M").to_string()
}

/// Whether `alarm` should fire at wall-clock `now`. A malformed alarm time is an error so the
/// caller can skip the record without aborting the whole scan.
pub fn trigger_condition(
    alarm: &Alarm,
    now: NaiveDateTime,
    recently_triggered: &TriggerCache,
) -> Result<bool, AlarmError> {
    let time_local = alarm.parsed_time()?;
    if time_local.hour() != now.hour() || time_local.minute() != now.minute() {
        return Ok(false);
    }
    if now.second() > TRIGGER_WINDOW_LAST_SECOND {
        return Ok(false);
    }
    let key = TriggerKey::new(&alarm.id, &minute_key(now));
    if recently_triggered.contains(&key, now) {
        return Ok(false);
    }

    if alarm.repeat.any() {
        return Ok(alarm.repeat.get(now.weekday()));
    }
    match alarm.scheduled_date {
        Some(date) => Ok(date == now.date()),
        // Legacy one-time alarms without a date match on time alone.
        None => Ok(true),
    }
}

#[derive(Debug, Default)]
pub struct AlarmScheduler {
    recently_triggered: TriggerCache,
    reported_malformed: HashSet<String>,
}

impl AlarmScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prune(&mut self, now: NaiveDateTime) {
        let expired = self.recently_triggered.prune(now);
        if expired > 0 {
            debug!(expired, "expired trigger keys");
        }
    }

    /// Scans `alarms` in order and claims the first one whose trigger condition holds.
    /// At most one alarm is returned per call; later matches wait for the next tick.
    pub fn scan(&mut self, alarms: &[Alarm], now: NaiveDateTime) -> Option<Alarm> {
        let current_time = minute_key(now);
        for alarm in alarms.iter().filter(|alarm| alarm.enabled) {
            match trigger_condition(alarm, now, &self.recently_triggered) {
                Ok(true) => {
                    self.recently_triggered
                        .insert(TriggerKey::new(&alarm.id, &current_time), now);
                    return Some(alarm.clone());
                }
                Ok(false) => {}
                Err(err) => {
                    if self.reported_malformed.insert(alarm.id.clone()) {
                        warn!(alarm_id = %alarm.id, "skipping alarm: {err}");
                    }
                }
            }
        }
        None
    }

    pub fn reset(&mut self) {
        self.recently_triggered.clear();
        self.reported_malformed.clear();
    }

    #[cfg(test)]
    pub fn recently_triggered(&self) -> &TriggerCache {
        &self.recently_triggered
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, NaiveDate, Weekday};

    use super::*;
    use crate::alarm::model::{RepeatDays, sample_alarm};

    fn at(day: u32, h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, day)
            .expect("date")
            .and_hms_opt(h, m, s)
            .expect("time")
    }

    #[test]
    fn floating_one_time_alarm_fires_once_inside_window() {
        let alarm = sample_alarm("wake", "07:30");
        let mut scheduler = AlarmScheduler::new();

        assert!(scheduler.scan(std::slice::from_ref(&alarm), at(10, 7, 29, 50)).is_none());

        let fired = scheduler.scan(std::slice::from_ref(&alarm), at(10, 7, 30, 1));
        assert_eq!(fired.map(|a| a.id), Some("wake".to_string()));

        let cache = scheduler.recently_triggered();
        assert!(cache.contains(&TriggerKey::new("wake", "07:30"), at(10, 7, 30, 1)));
        assert!(
            !trigger_condition(&alarm, at(10, 7, 30, 1), cache).expect("well-formed"),
            "second poll in the same second must not fire again"
        );
    }

    #[test]
    fn repeated_ticks_in_one_minute_fire_at_most_once() {
        let mut alarm = sample_alarm("daily", "06:00");
        alarm.repeat = RepeatDays::from_days(&[Weekday::Tue]);
        let alarms = [alarm];
        let mut scheduler = AlarmScheduler::new();

        let mut fired = 0;
        for second in 0..60 {
            let now = at(10, 6, 0, second);
            scheduler.prune(now);
            if scheduler.scan(&alarms, now).is_some() {
                fired += 1;
            }
        }
        assert_eq!(fired, 1);
    }

    #[test]
    fn window_closes_after_second_two() {
        let alarm = sample_alarm("late", "07:30");
        let cache = TriggerCache::default();
        assert!(trigger_condition(&alarm, at(10, 7, 30, 0), &cache).expect("ok"));
        assert!(trigger_condition(&alarm, at(10, 7, 30, 2), &cache).expect("ok"));
        assert!(!trigger_condition(&alarm, at(10, 7, 30, 3), &cache).expect("ok"));
        assert!(!trigger_condition(&alarm, at(10, 7, 31, 0), &cache).expect("ok"));
    }

    #[test]
    fn recurring_alarm_requires_selected_weekday() {
        let mut alarm = sample_alarm("weekend", "08:00");
        alarm.repeat = RepeatDays::from_days(&[Weekday::Sat, Weekday::Sun]);
        let cache = TriggerCache::default();

        // 2026-03-13 is a Friday, 2026-03-14 a Saturday.
        assert!(!trigger_condition(&alarm, at(13, 8, 0, 0), &cache).expect("ok"));
        assert!(trigger_condition(&alarm, at(14, 8, 0, 0), &cache).expect("ok"));
    }

    #[test]
    fn scheduled_one_time_alarm_requires_matching_date() {
        let mut alarm = sample_alarm("dentist", "09:15");
        alarm.scheduled_date = Some(NaiveDate::from_ymd_opt(2026, 3, 12).expect("date"));
        let cache = TriggerCache::default();

        assert!(!trigger_condition(&alarm, at(11, 9, 15, 0), &cache).expect("ok"));
        assert!(trigger_condition(&alarm, at(12, 9, 15, 0), &cache).expect("ok"));
    }

    #[test]
    fn disabled_alarm_never_fires() {
        let mut alarm = sample_alarm("off", "07:30");
        alarm.enabled = false;
        alarm.repeat = RepeatDays::from_days(&[Weekday::Tue]);
        let mut scheduler = AlarmScheduler::new();
        for second in 0..=2 {
            assert!(
                scheduler
                    .scan(std::slice::from_ref(&alarm), at(10, 7, 30, second))
                    .is_none()
            );
        }
    }

    #[test]
    fn first_matching_alarm_wins_and_the_next_waits_a_tick() {
        let alarms = [sample_alarm("first", "07:30"), sample_alarm("second", "07:30")];
        let mut scheduler = AlarmScheduler::new();

        let first = scheduler.scan(&alarms, at(10, 7, 30, 0)).expect("first fires");
        assert_eq!(first.id, "first");
        let second = scheduler.scan(&alarms, at(10, 7, 30, 1)).expect("second fires");
        assert_eq!(second.id, "second");
        assert!(scheduler.scan(&alarms, at(10, 7, 30, 2)).is_none());
    }

    #[test]
    fn malformed_alarm_is_skipped_without_blocking_others() {
        let alarms = [sample_alarm("broken", "7:30"), sample_alarm("fine", "07:30")];
        let mut scheduler = AlarmScheduler::new();

        let fired = scheduler.scan(&alarms, at(10, 7, 30, 0)).expect("fine fires");
        assert_eq!(fired.id, "fine");
        assert!(matches!(
            trigger_condition(&alarms[0], at(10, 7, 30, 0), &TriggerCache::default()),
            Err(AlarmError::InvalidTime(_))
        ));
    }

    #[test]
    fn expired_key_allows_firing_on_a_later_day() {
        let mut alarm = sample_alarm("daily", "07:30");
        alarm.repeat = RepeatDays::from_days(&[Weekday::Tue, Weekday::Wed]);
        let alarms = [alarm];
        let mut scheduler = AlarmScheduler::new();

        assert!(scheduler.scan(&alarms, at(10, 7, 30, 0)).is_some());
        let next_day = at(10, 7, 30, 0) + Duration::days(1);
        scheduler.prune(next_day);
        assert!(scheduler.recently_triggered().is_empty());
        assert!(scheduler.scan(&alarms, next_day).is_some());
    }

    #[test]
    fn reset_forgets_recent_triggers() {
        let alarms = [sample_alarm("wake", "07:30")];
        let mut scheduler = AlarmScheduler::new();
        assert!(scheduler.scan(&alarms, at(10, 7, 30, 0)).is_some());
        scheduler.reset();
        assert!(scheduler.scan(&alarms, at(10, 7, 30, 1)).is_some());
    }
}
