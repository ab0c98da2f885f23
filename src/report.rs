use std::fmt::{self, Write as _};

use chrono::{DateTime, Local};

use crate::alarm::model::{Alarm, AlarmSettings, TimeDisplayMode};
use crate::alarm::occurrence::{format_next_occurrence_with_mode, next_occurrence};

pub fn render_report(
    alarms: &[Alarm],
    settings: &AlarmSettings,
    now: &DateTime<Local>,
) -> Result<String, fmt::Error> {
    let mut out = String::new();
    writeln!(out, "Alarm report")?;
    writeln!(out, "Now: {}", now.format("%a %Y-%m-%d %H:%M:%S"))?;
    writeln!(
        out,
        "Time format: {}",
        match settings.time_format {
            TimeDisplayMode::Hour24 => "24h",
            TimeDisplayMode::Hour12 => "12h",
        }
    )?;
    let enabled = alarms.iter().filter(|alarm| alarm.enabled).count();
    writeln!(out, "Alarms: {} ({enabled} enabled)", alarms.len())?;

    for alarm in alarms {
        let next = next_occurrence(alarm, now);
        let label = if alarm.label.is_empty() {
            "-"
        } else {
            alarm.label.as_str()
        };
        writeln!(
            out,
            "  [{}] {} {} {:<12} repeat={} next={}",
            if alarm.enabled { "on" } else { "off" },
            alarm.id,
            alarm.time,
            label,
            alarm.repeat.summary(),
            format_next_occurrence_with_mode(next, settings.time_format),
        )?;
    }

    let upcoming = alarms
        .iter()
        .filter_map(|alarm| next_occurrence(alarm, now).map(|at| (at, alarm)))
        .filter(|(at, _)| at > now)
        .min_by_key(|(at, _)| *at);
    match upcoming {
        Some((at, alarm)) => writeln!(
            out,
            "Next alarm: {} at {}",
            alarm.id,
            format_next_occurrence_with_mode(Some(at), settings.time_format)
        )?,
        None => writeln!(out, "Next alarm: none")?,
    }
    Ok(out)
}
