use chrono::{
    DateTime, Datelike, Days, Local, LocalResult, NaiveDateTime, NaiveTime, TimeZone, Timelike,
};

use crate::alarm::model::{Alarm, RepeatDays, TimeDisplayMode};

// Offset 7 is today's weekday one week out, reached when today's slot has already passed.
const RECURRING_SCAN_DAYS: u64 = 7;

pub fn next_occurrence(alarm: &Alarm, now: &DateTime<Local>) -> Option<DateTime<Local>> {
    next_occurrence_in_tz(alarm, now, &Local)
}

/// Next wall-clock instant `alarm` should ring at, composed in `timezone`.
///
/// One-time alarms anchored to a `scheduled_date` return that instant even when it is
/// already in the past; callers decide what a stale one-time alarm means. A malformed
/// `time` never rings.
pub fn next_occurrence_in_tz<Tz>(
    alarm: &Alarm,
    now: &DateTime<Tz>,
    timezone: &Tz,
) -> Option<DateTime<Tz>>
where
    Tz: TimeZone,
    Tz::Offset: Copy,
{
    if !alarm.enabled {
        return None;
    }
    let time_local = alarm.parsed_time().ok()?;

    if alarm.repeat.any() {
        return next_recurring_occurrence(&alarm.repeat, time_local, now, timezone);
    }

    match alarm.scheduled_date {
        Some(date) => resolve_local_datetime(timezone, date.and_time(time_local)),
        None => next_floating_occurrence(time_local, now, timezone),
    }
}

fn resolve_local_datetime<Tz>(timezone: &Tz, naive: NaiveDateTime) -> Option<DateTime<Tz>>
where
    Tz: TimeZone,
    Tz::Offset: Copy,
{
    match timezone.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Some(dt),
        LocalResult::Ambiguous(first, _second) => Some(first),
        LocalResult::None => None,
    }
}

fn next_floating_occurrence<Tz>(
    time_local: NaiveTime,
    now: &DateTime<Tz>,
    timezone: &Tz,
) -> Option<DateTime<Tz>>
where
    Tz: TimeZone,
    Tz::Offset: Copy,
{
    for day_offset in 0_u64..=1 {
        let date = now.date_naive().checked_add_days(Days::new(day_offset))?;
        let Some(candidate) = resolve_local_datetime(timezone, date.and_time(time_local)) else {
            continue;
        };
        if candidate > *now {
            return Some(candidate);
        }
    }
    None
}

fn next_recurring_occurrence<Tz>(
    repeat: &RepeatDays,
    time_local: NaiveTime,
    now: &DateTime<Tz>,
    timezone: &Tz,
) -> Option<DateTime<Tz>>
where
    Tz: TimeZone,
    Tz::Offset: Copy,
{
    for day_offset in 0_u64..=RECURRING_SCAN_DAYS {
        let date = now.date_naive().checked_add_days(Days::new(day_offset))?;
        if !repeat.get(date.weekday()) {
            continue;
        }
        let candidate = match resolve_local_datetime(timezone, date.and_time(time_local)) {
            Some(value) => value,
            None => continue,
        };

        if day_offset == 0 && candidate <= *now {
            continue;
        }
        return Some(candidate);
    }

    None
}

pub fn format_next_occurrence_with_mode(
    next: Option<DateTime<Local>>,
    mode: TimeDisplayMode,
) -> String {
    match next {
        Some(dt) => match mode {
            TimeDisplayMode::Hour24 => format!(
                "{} {:04}-{:02}-{:02} {:02}:{:02}",
                dt.weekday(),
                dt.year(),
                dt.month(),
                dt.day(),
                dt.hour(),
                dt.minute(),
            ),
            TimeDisplayMode::Hour12 => {
                let (is_pm, hour12) = dt.hour12();
                let meridiem = if is_pm { "PM" } else { "AM" };
                format!(
                    "{} {:04}-{:02}-{:02} {:02}:{:02} {}",
                    dt.weekday(),
                    dt.year(),
                    dt.month(),
                    dt.day(),
                    hour12,
                    dt.minute(),
                    meridiem
                )
            }
        },
        None => "-".to_string(),
    }
}
