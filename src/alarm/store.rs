use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Result, anyhow};
use chrono::{Days, NaiveDateTime, Utc};
use tracing::info;
use uuid::Uuid;

use crate::alarm::model::{
    Alarm, AlarmConfig, AlarmDraft, AlarmPatch, AlarmSettings, load_alarm_config,
    save_alarm_config,
};
use crate::clock::Clock;
use crate::error::AlarmError;

/// What the scheduler needs from the alarm collection.
pub trait AlarmRepository: Send + Sync {
    fn list_enabled(&self) -> Result<Vec<Alarm>>;
    fn update(&self, id: &str, patch: &AlarmPatch) -> Result<Alarm>;
}

pub trait AlarmPersistence: Send + Sync {
    fn load(&self) -> Result<AlarmConfig>;
    fn save(&self, alarms: &[Alarm], settings: &AlarmSettings) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct JsonFilePersistence {
    path: PathBuf,
}

impl JsonFilePersistence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl AlarmPersistence for JsonFilePersistence {
    fn load(&self) -> Result<AlarmConfig> {
        if !self.path.exists() {
            info!(path = %self.path.display(), "alarm file not found, starting empty");
            return Ok(AlarmConfig::default());
        }
        load_alarm_config(&self.path)
    }

    fn save(&self, alarms: &[Alarm], settings: &AlarmSettings) -> Result<()> {
        save_alarm_config(&self.path, alarms, settings)
    }
}

pub struct AlarmCollection {
    state: Mutex<AlarmConfig>,
    persistence: Box<dyn AlarmPersistence>,
    clock: Arc<dyn Clock>,
}

impl AlarmCollection {
    pub fn open(persistence: Box<dyn AlarmPersistence>, clock: Arc<dyn Clock>) -> Result<Self> {
        let config = persistence.load()?;
        Ok(Self {
            state: Mutex::new(config),
            persistence,
            clock,
        })
    }

    pub fn list(&self) -> Result<Vec<Alarm>> {
        Ok(self.lock()?.alarms.clone())
    }

    pub fn get(&self, id: &str) -> Result<Alarm> {
        self.lock()?
            .alarms
            .iter()
            .find(|alarm| alarm.id == id)
            .cloned()
            .ok_or_else(|| AlarmError::NotFound(id.to_string()).into())
    }

    pub fn settings(&self) -> Result<AlarmSettings> {
        Ok(self.lock()?.settings.clone())
    }

    pub fn add(&self, draft: AlarmDraft) -> Result<Alarm> {
        let now = self.clock.now();
        let mut guard = self.lock()?;
        let explicit_date = draft.scheduled_date.is_some();
        let mut alarm = Alarm::from_draft(
            Uuid::new_v4().to_string(),
            draft,
            &guard.settings,
            now.with_timezone(&Utc),
        )?;
        // A caller-supplied date is kept as given, same as in `update`.
        if !explicit_date {
            anchor_one_time_date(&mut alarm, now.naive_local());
        }

        let mut next = guard.alarms.clone();
        next.push(alarm.clone());
        self.commit(&mut guard, next)?;
        info!(alarm_id = %alarm.id, time = %alarm.time, "alarm added");
        Ok(alarm)
    }

    pub fn update(&self, id: &str, patch: &AlarmPatch) -> Result<Alarm> {
        let now = self.clock.now();
        let mut guard = self.lock()?;
        let index = position(&guard.alarms, id)?;
        let mut updated = patch.apply(&guard.alarms[index], now.with_timezone(&Utc))?;
        if patch.scheduled_date.is_none() && !patch.clear_scheduled_date {
            anchor_one_time_date(&mut updated, now.naive_local());
        }

        let mut next = guard.alarms.clone();
        next[index] = updated.clone();
        self.commit(&mut guard, next)?;
        info!(alarm_id = %id, enabled = updated.enabled, "alarm updated");
        Ok(updated)
    }

    pub fn toggle(&self, id: &str) -> Result<Alarm> {
        let enabled = !self.get(id)?.enabled;
        self.update(id, &AlarmPatch::enabled(enabled))
    }

    pub fn delete(&self, id: &str) -> Result<Alarm> {
        let mut guard = self.lock()?;
        let index = position(&guard.alarms, id)?;
        let mut next = guard.alarms.clone();
        let removed = next.remove(index);
        self.commit(&mut guard, next)?;
        info!(alarm_id = %id, "alarm deleted");
        Ok(removed)
    }

    fn commit(&self, guard: &mut MutexGuard<'_, AlarmConfig>, next: Vec<Alarm>) -> Result<()> {
        self.persistence.save(&next, &guard.settings)?;
        guard.alarms = next;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, AlarmConfig>> {
        self.state
            .lock()
            .map_err(|_| anyhow!("alarm collection lock poisoned"))
    }
}

impl AlarmRepository for AlarmCollection {
    fn list_enabled(&self) -> Result<Vec<Alarm>> {
        Ok(self
            .lock()?
            .alarms
            .iter()
            .filter(|alarm| alarm.enabled)
            .cloned()
            .collect())
    }

    fn update(&self, id: &str, patch: &AlarmPatch) -> Result<Alarm> {
        AlarmCollection::update(self, id, patch)
    }
}

fn position(alarms: &[Alarm], id: &str) -> Result<usize> {
    alarms
        .iter()
        .position(|alarm| alarm.id == id)
        .ok_or_else(|| AlarmError::NotFound(id.to_string()).into())
}

/// Pins an enabled one-time alarm to the next calendar day its time comes round, so it
/// never falls back to matching on time alone. Recurring alarms are left untouched.
fn anchor_one_time_date(alarm: &mut Alarm, now: NaiveDateTime) {
    if !alarm.enabled || !alarm.is_one_time() {
        return;
    }
    let Ok(time_local) = alarm.parsed_time() else {
        return;
    };
    let still_ahead = alarm
        .scheduled_date
        .map(|date| date.and_time(time_local) > now)
        .unwrap_or(false);
    if still_ahead {
        return;
    }
    let today = now.date();
    alarm.scheduled_date = if today.and_time(time_local) > now {
        Some(today)
    } else {
        today.checked_add_days(Days::new(1))
    };
}

#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct MemoryPersistence {
    initial: AlarmConfig,
    saved: Mutex<Vec<Vec<Alarm>>>,
}

#[cfg(test)]
impl MemoryPersistence {
    pub(crate) fn with_alarms(alarms: Vec<Alarm>) -> Self {
        Self {
            initial: AlarmConfig {
                settings: AlarmSettings::default(),
                alarms,
            },
            saved: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn save_count(&self) -> usize {
        self.saved.lock().map(|saved| saved.len()).unwrap_or(0)
    }
}

#[cfg(test)]
impl AlarmPersistence for MemoryPersistence {
    fn load(&self) -> Result<AlarmConfig> {
        Ok(self.initial.clone())
    }

    fn save(&self, alarms: &[Alarm], _settings: &AlarmSettings) -> Result<()> {
        self.saved
            .lock()
            .map_err(|_| anyhow!("memory persistence lock poisoned"))?
            .push(alarms.to_vec());
        Ok(())
    }
}

#[cfg(test)]
impl AlarmPersistence for Arc<MemoryPersistence> {
    fn load(&self) -> Result<AlarmConfig> {
        self.as_ref().load()
    }

    fn save(&self, alarms: &[Alarm], settings: &AlarmSettings) -> Result<()> {
        self.as_ref().save(alarms, settings)
    }
}
