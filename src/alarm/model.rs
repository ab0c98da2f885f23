use std::collections::HashSet;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};

use crate::error::AlarmError;

pub const CONFIG_VERSION: u32 = 1;

#[derive(Debug, Clone, Default)]
pub struct AlarmConfig {
    pub settings: AlarmSettings,
    pub alarms: Vec<Alarm>,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Default, Serialize, Deserialize)]
pub enum TimeDisplayMode {
    #[default]
    #[serde(rename = "24h")]
    Hour24,
    #[serde(rename = "12h")]
    Hour12,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmSettings {
    #[serde(default)]
    pub time_format: TimeDisplayMode,
    #[serde(default = "default_snooze_minutes")]
    pub default_snooze_minutes: u32,
    #[serde(default = "default_snooze_max_count")]
    pub default_snooze_max_count: u32,
    #[serde(default = "default_volume")]
    pub default_volume: u8,
}

impl Default for AlarmSettings {
    fn default() -> Self {
        Self {
            time_format: TimeDisplayMode::Hour24,
            default_snooze_minutes: default_snooze_minutes(),
            default_snooze_max_count: default_snooze_max_count(),
            default_volume: default_volume(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alarm {
    pub id: String,
    #[serde(default)]
    pub label: String,
    pub time: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub repeat: RepeatDays,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_date: Option<NaiveDate>,
    #[serde(default)]
    pub sound: SoundConfig,
    #[serde(default)]
    pub snooze: SnoozeConfig,
    #[serde(default)]
    pub vibration: VibrationConfig,
    #[serde(default)]
    pub smart_wakeup: SmartWakeup,
    #[serde(default)]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: DateTime<Utc>,
}

impl Alarm {
    pub fn from_draft(
        id: String,
        draft: AlarmDraft,
        settings: &AlarmSettings,
        now: DateTime<Utc>,
    ) -> Result<Self, AlarmError> {
        let alarm = Self {
            id,
            label: draft.label,
            time: draft.time,
            enabled: draft.enabled.unwrap_or(true),
            repeat: draft.repeat,
            scheduled_date: draft.scheduled_date,
            sound: draft.sound.unwrap_or_else(|| SoundConfig {
                volume: settings.default_volume,
                ..SoundConfig::default()
            }),
            snooze: draft.snooze.unwrap_or(SnoozeConfig {
                enabled: true,
                duration_minutes: settings.default_snooze_minutes,
                max_count: settings.default_snooze_max_count,
            }),
            vibration: draft.vibration.unwrap_or_default(),
            smart_wakeup: draft.smart_wakeup.unwrap_or_default(),
            created_at: now,
            updated_at: now,
        };
        validate_alarm(&alarm)?;
        Ok(alarm)
    }

    pub fn is_one_time(&self) -> bool {
        !self.repeat.any()
    }

    pub fn parsed_time(&self) -> Result<NaiveTime, AlarmError> {
        parse_alarm_time(&self.time)
    }
}

/// Weekday repeat flags, Sunday first. No flag set means the alarm is one-time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepeatDays {
    pub sunday: bool,
    pub monday: bool,
    pub tuesday: bool,
    pub wednesday: bool,
    pub thursday: bool,
    pub friday: bool,
    pub saturday: bool,
}

impl RepeatDays {
    #[cfg(test)]
    pub fn from_days(days: &[Weekday]) -> Self {
        let mut repeat = Self::default();
        for day in days {
            repeat.set(*day, true);
        }
        repeat
    }

    pub fn get(&self, day: Weekday) -> bool {
        match day {
            Weekday::Sun => self.sunday,
            Weekday::Mon => self.monday,
            Weekday::Tue => self.tuesday,
            Weekday::Wed => self.wednesday,
            Weekday::Thu => self.thursday,
            Weekday::Fri => self.friday,
            Weekday::Sat => self.saturday,
        }
    }

    #[cfg(test)]
    pub fn set(&mut self, day: Weekday, value: bool) {
        let slot = match day {
            Weekday::Sun => &mut self.sunday,
            Weekday::Mon => &mut self.monday,
            Weekday::Tue => &mut self.tuesday,
            Weekday::Wed => &mut self.wednesday,
            Weekday::Thu => &mut self.thursday,
            Weekday::Fri => &mut self.friday,
            Weekday::Sat => &mut self.saturday,
        };
        *slot = value;
    }

    pub fn any(&self) -> bool {
        WEEK_FROM_SUNDAY.iter().any(|day| self.get(*day))
    }

    pub fn summary(&self) -> String {
        if !self.any() {
            return "once".to_string();
        }
        WEEK_FROM_SUNDAY
            .iter()
            .filter(|day| self.get(**day))
            .map(|day| weekday_to_token(*day))
            .collect::<Vec<_>>()
            .join(",")
    }
}

pub const WEEK_FROM_SUNDAY: [Weekday; 7] = [
    Weekday::Sun,
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SoundKind {
    #[default]
    Builtin,
    Custom,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SoundConfig {
    pub kind: SoundKind,
    pub uri: String,
    pub name: String,
    pub volume: u8,
}

impl Default for SoundConfig {
    fn default() -> Self {
        Self {
            kind: SoundKind::Builtin,
            uri: "default".to_string(),
            name: "Default".to_string(),
            volume: default_volume(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnoozeConfig {
    pub enabled: bool,
    pub duration_minutes: u32,
    pub max_count: u32,
}

impl Default for SnoozeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            duration_minutes: default_snooze_minutes(),
            max_count: default_snooze_max_count(),
        }
    }
}

/// `pattern` alternates off/on durations in milliseconds, starting with off.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VibrationConfig {
    pub enabled: bool,
    pub pattern: Vec<u64>,
}

impl Default for VibrationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            pattern: vec![0, 800, 400, 800],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmartWakeup {
    pub enabled: bool,
    pub window_minutes: u32,
}

impl Default for SmartWakeup {
    fn default() -> Self {
        Self {
            enabled: false,
            window_minutes: 30,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AlarmDraft {
    #[serde(default)]
    pub label: String,
    pub time: String,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub repeat: RepeatDays,
    #[serde(default)]
    pub scheduled_date: Option<NaiveDate>,
    #[serde(default)]
    pub sound: Option<SoundConfig>,
    #[serde(default)]
    pub snooze: Option<SnoozeConfig>,
    #[serde(default)]
    pub vibration: Option<VibrationConfig>,
    #[serde(default)]
    pub smart_wakeup: Option<SmartWakeup>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AlarmPatch {
    pub label: Option<String>,
    pub time: Option<String>,
    pub enabled: Option<bool>,
    pub repeat: Option<RepeatDays>,
    pub scheduled_date: Option<NaiveDate>,
    pub clear_scheduled_date: bool,
    pub sound: Option<SoundConfig>,
    pub snooze: Option<SnoozeConfig>,
    pub vibration: Option<VibrationConfig>,
    pub smart_wakeup: Option<SmartWakeup>,
}

impl AlarmPatch {
    pub fn enabled(enabled: bool) -> Self {
        Self {
            enabled: Some(enabled),
            ..Self::default()
        }
    }

    /// Applies the patch to a copy so a rejected patch leaves `alarm` untouched.
    pub fn apply(&self, alarm: &Alarm, now: DateTime<Utc>) -> Result<Alarm, AlarmError> {
        let mut next = alarm.clone();
        if let Some(label) = &self.label {
            next.label = label.clone();
        }
        if let Some(time) = &self.time {
            next.time = time.clone();
        }
        if let Some(enabled) = self.enabled {
            next.enabled = enabled;
        }
        if let Some(repeat) = self.repeat {
            next.repeat = repeat;
        }
        if self.clear_scheduled_date {
            next.scheduled_date = None;
        } else if let Some(date) = self.scheduled_date {
            next.scheduled_date = Some(date);
        }
        if let Some(sound) = &self.sound {
            next.sound = sound.clone();
        }
        if let Some(snooze) = self.snooze {
            next.snooze = snooze;
        }
        if let Some(vibration) = &self.vibration {
            next.vibration = vibration.clone();
        }
        if let Some(smart_wakeup) = self.smart_wakeup {
            next.smart_wakeup = smart_wakeup;
        }
        validate_alarm(&next)?;
        next.updated_at = now;
        Ok(next)
    }
}

pub fn parse_alarm_time(input: &str) -> Result<NaiveTime, AlarmError> {
    let invalid = || AlarmError::InvalidTime(input.to_string());
    let bytes = input.as_bytes();
    if bytes.len() != 5 || bytes[2] != b':' {
        return Err(invalid());
    }
    let digits = [bytes[0], bytes[1], bytes[3], bytes[4]];
    if !digits.iter().all(u8::is_ascii_digit) {
        return Err(invalid());
    }
    let hour = u32::from(digits[0] - b'0') * 10 + u32::from(digits[1] - b'0');
    let minute = u32::from(digits[2] - b'0') * 10 + u32::from(digits[3] - b'0');
    if hour > 23 || minute > 59 {
        return Err(invalid());
    }
    NaiveTime::from_hms_opt(hour, minute, 0).ok_or_else(invalid)
}

pub fn validate_alarm(alarm: &Alarm) -> Result<(), AlarmError> {
    parse_alarm_time(&alarm.time)?;
    if alarm.sound.volume > 100 {
        return Err(AlarmError::InvalidVolume {
            id: alarm.id.clone(),
            volume: alarm.sound.volume,
        });
    }
    Ok(())
}

pub fn load_alarm_config(path: &Path) -> Result<AlarmConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("unable to read alarm file {}", path.display()))?;
    parse_alarm_config_text(&content)
}

pub fn parse_alarm_config_text(content: &str) -> Result<AlarmConfig> {
    let raw = serde_json::from_str::<AlarmConfigFile>(content).map_err(|err| {
        let line = err.line();
        let column = err.column();
        anyhow::anyhow!("invalid JSON at line {line}, column {column}: {err}")
    })?;

    if raw.version != CONFIG_VERSION {
        return Err(AlarmError::UnsupportedVersion(raw.version).into());
    }

    let mut ids = HashSet::new();
    for alarm in &raw.alarms {
        if !ids.insert(alarm.id.as_str()) {
            return Err(AlarmError::DuplicateId(alarm.id.clone()).into());
        }
        validate_alarm(alarm).with_context(|| format!("alarm '{}' is invalid", alarm.id))?;
    }

    Ok(AlarmConfig {
        settings: raw.settings,
        alarms: raw.alarms,
    })
}

pub fn save_alarm_config(path: &Path, alarms: &[Alarm], settings: &AlarmSettings) -> Result<()> {
    let payload = AlarmConfigFileRef {
        version: CONFIG_VERSION,
        settings,
        alarms,
    };
    let text = serde_json::to_string_pretty(&payload)?;
    fs::write(path, format!("{text}\n"))
        .with_context(|| format!("unable to write alarm file {}", path.display()))?;
    Ok(())
}

#[derive(Debug, Deserialize)]
struct AlarmConfigFile {
    version: u32,
    #[serde(default)]
    settings: AlarmSettings,
    #[serde(default)]
    alarms: Vec<Alarm>,
}

#[derive(Serialize)]
struct AlarmConfigFileRef<'a> {
    version: u32,
    settings: &'a AlarmSettings,
    alarms: &'a [Alarm],
}

fn default_enabled() -> bool {
    true
}

fn default_snooze_minutes() -> u32 {
    5
}

fn default_snooze_max_count() -> u32 {
    3
}

fn default_volume() -> u8 {
    80
}

pub fn weekday_to_token(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "Mon",
        Weekday::Tue => "Tue",
        Weekday::Wed => "Wed",
        Weekday::Thu => "Thu",
        Weekday::Fri => "Fri",
        Weekday::Sat => "Sat",
        Weekday::Sun => "Sun",
    }
}

#[cfg(test)]
pub(crate) fn sample_alarm(id: &str, time: &str) -> Alarm {
    Alarm {
        id: id.to_string(),
        label: String::new(),
        time: time.to_string(),
        enabled: true,
        repeat: RepeatDays::default(),
        scheduled_date: None,
        sound: SoundConfig::default(),
        snooze: SnoozeConfig::default(),
        vibration: VibrationConfig::default(),
        smart_wakeup: SmartWakeup::default(),
        created_at: DateTime::<Utc>::default(),
        updated_at: DateTime::<Utc>::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_alarm_config() {
        let json = r#"
{
  "version": 1,
  "settings": {
    "time_format": "12h",
    "default_snooze_minutes": 9
  },
  "alarms": [
    {
      "id": "wake-1",
      "label": "Wake up",
      "time": "07:30",
      "scheduled_date": "2026-02-07",
      "sound": { "kind": "builtin", "uri": "ring", "name": "Ring", "volume": 60 }
    },
    {
      "id": "standup-weekdays",
      "enabled": false,
      "time": "09:30",
      "repeat": { "monday": true, "tuesday": true, "wednesday": true, "thursday": true, "friday": true },
      "snooze": { "enabled": false, "duration_minutes": 10, "max_count": 1 }
    }
  ]
}
"#;

        let config = parse_alarm_config_text(json).expect("valid config");
        assert_eq!(config.settings.time_format, TimeDisplayMode::Hour12);
        assert_eq!(config.settings.default_snooze_minutes, 9);
        assert_eq!(config.settings.default_snooze_max_count, 3);
        assert_eq!(config.alarms.len(), 2);

        let wake = &config.alarms[0];
        assert!(wake.enabled);
        assert!(wake.is_one_time());
        assert_eq!(
            wake.scheduled_date,
            Some(NaiveDate::from_ymd_opt(2026, 2, 7).expect("date"))
        );
        assert_eq!(wake.sound.volume, 60);
        assert_eq!(wake.snooze, SnoozeConfig::default());

        let standup = &config.alarms[1];
        assert!(!standup.enabled);
        assert!(!standup.is_one_time());
        assert!(standup.repeat.get(Weekday::Fri));
        assert!(!standup.repeat.get(Weekday::Sat));
        assert!(!standup.snooze.enabled);
    }

    #[test]
    fn rejects_invalid_time() {
        let json = r#"
{
  "version": 1,
  "alarms": [
    { "id": "bad", "time": "25:00" }
  ]
}
"#;
        let err = parse_alarm_config_text(json).expect_err("invalid time should fail");
        let text = format!("{err:#}");
        assert!(text.contains("alarm 'bad' is invalid"));
        assert!(text.contains("invalid alarm time '25:00'"));
    }

    #[test]
    fn rejects_duplicate_ids() {
        let json = r#"
{
  "version": 1,
  "alarms": [
    { "id": "dup", "time": "07:30" },
    { "id": "dup", "time": "08:30" }
  ]
}
"#;
        let err = parse_alarm_config_text(json).expect_err("duplicate ids should fail");
        assert_eq!(
            err.downcast_ref::<AlarmError>(),
            Some(&AlarmError::DuplicateId("dup".to_string()))
        );
    }

    #[test]
    fn rejects_unsupported_version_and_loud_volume() {
        let err = parse_alarm_config_text(r#"{ "version": 2, "alarms": [] }"#)
            .expect_err("version 2 should fail");
        assert!(err.to_string().contains("unsupported alarm config version 2"));

        let json = r#"
{
  "version": 1,
  "alarms": [
    { "id": "loud", "time": "06:00", "sound": { "volume": 140 } }
  ]
}
"#;
        let err = parse_alarm_config_text(json).expect_err("volume above 100 should fail");
        assert!(format!("{err:#}").contains("volume 140 is out of range"));
    }

    #[test]
    fn malformed_json_reports_position() {
        let err = parse_alarm_config_text("{ not-valid-json ").expect_err("must fail");
        assert!(err.to_string().contains("invalid JSON at line 1"));
    }

    #[test]
    fn alarm_time_requires_zero_padded_24_hour_form() {
        assert_eq!(
            parse_alarm_time("07:05").expect("valid"),
            NaiveTime::from_hms_opt(7, 5, 0).expect("time")
        );
        assert_eq!(
            parse_alarm_time("23:59").expect("valid"),
            NaiveTime::from_hms_opt(23, 59, 0).expect("time")
        );
        for bad in ["7:05", "24:00", "12:60", "ab:cd", "12-30", "", "12:300"] {
            assert!(parse_alarm_time(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn save_then_load_keeps_alarm_fields() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("alarms.json");
        let settings = AlarmSettings::default();
        let draft = AlarmDraft {
            label: "gym".to_string(),
            time: "06:15".to_string(),
            repeat: RepeatDays::from_days(&[Weekday::Mon, Weekday::Thu]),
            ..AlarmDraft::default()
        };
        let alarm = Alarm::from_draft("gym-1".to_string(), draft, &settings, Utc::now())
            .expect("valid draft");

        save_alarm_config(&path, std::slice::from_ref(&alarm), &settings).expect("save");
        let loaded = load_alarm_config(&path).expect("load");
        assert_eq!(loaded.alarms, vec![alarm]);
        assert_eq!(loaded.settings, settings);
    }

    #[test]
    fn draft_uses_settings_defaults() {
        let settings = AlarmSettings {
            default_snooze_minutes: 7,
            default_snooze_max_count: 2,
            default_volume: 40,
            ..AlarmSettings::default()
        };
        let draft = AlarmDraft {
            time: "05:45".to_string(),
            ..AlarmDraft::default()
        };
        let alarm =
            Alarm::from_draft("a".to_string(), draft, &settings, Utc::now()).expect("valid");
        assert_eq!(alarm.snooze.duration_minutes, 7);
        assert_eq!(alarm.snooze.max_count, 2);
        assert_eq!(alarm.sound.volume, 40);
        assert!(alarm.enabled);
        assert_eq!(alarm.repeat.summary(), "once");
    }

    #[test]
    fn rejected_patch_leaves_alarm_unchanged() {
        let draft = AlarmDraft {
            time: "05:45".to_string(),
            ..AlarmDraft::default()
        };
        let alarm = Alarm::from_draft("a".to_string(), draft, &AlarmSettings::default(), Utc::now())
            .expect("valid");
        let patch = AlarmPatch {
            time: Some("5:45".to_string()),
            ..AlarmPatch::default()
        };
        let err = patch.apply(&alarm, Utc::now()).expect_err("bad time");
        assert_eq!(err, AlarmError::InvalidTime("5:45".to_string()));
        assert_eq!(alarm.time, "05:45");
    }

    #[test]
    fn repeat_summary_lists_days_from_sunday() {
        let repeat = RepeatDays::from_days(&[Weekday::Sat, Weekday::Sun]);
        assert_eq!(repeat.summary(), "Sun,Sat");
    }
}
