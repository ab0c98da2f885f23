use std::collections::HashMap;

use chrono::{Duration, NaiveDateTime};

pub const TRIGGER_KEY_TTL_SECS: i64 = 120;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TriggerKey {
    pub alarm_id: String,
    pub minute: String,
}

impl TriggerKey {
    pub fn new(alarm_id: &str, minute: &str) -> Self {
        Self {
            alarm_id: alarm_id.to_string(),
            minute: minute.to_string(),
        }
    }
}

/// Keys of alarms fired recently, each with its own expiry instant.
/// Expired keys are dropped by `prune`, which the scheduler calls once per tick.
#[derive(Debug, Clone)]
pub struct TriggerCache {
    ttl: Duration,
    entries: HashMap<TriggerKey, NaiveDateTime>,
}

impl Default for TriggerCache {
    fn default() -> Self {
        Self::new(Duration::seconds(TRIGGER_KEY_TTL_SECS))
    }
}

impl TriggerCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
        }
    }

    pub fn contains(&self, key: &TriggerKey, now: NaiveDateTime) -> bool {
        self.entries
            .get(key)
            .map(|expires_at| now < *expires_at)
            .unwrap_or(false)
    }

    pub fn insert(&mut self, key: TriggerKey, now: NaiveDateTime) {
        self.entries.insert(key, now + self.ttl);
    }

    pub fn prune(&mut self, now: NaiveDateTime) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, expires_at| now < *expires_at);
        before - self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
