use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use chrono::NaiveDateTime;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::alarm::model::{Alarm, AlarmPatch};
use crate::alarm::ringing::{RingPhase, RingingMachine, SnoozeOutcome};
use crate::alarm::scheduler::AlarmScheduler;
use crate::alarm::store::AlarmRepository;
use crate::clock::Clock;
use crate::effects::EffectCommand;

pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Default, PartialEq)]
pub struct TickOutcome {
    pub triggered: Option<String>,
    pub resumed: bool,
    pub effects: Vec<EffectCommand>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RingingSnapshot {
    pub phase: RingPhase,
    pub alarm_id: Option<String>,
    pub label: Option<String>,
    pub time: Option<String>,
    pub snooze_count: u32,
    pub snooze_until: Option<NaiveDateTime>,
    pub can_snooze: bool,
}

/// Scheduler plus ringing state. Every method runs under the engine mutex and only
/// returns the effects to perform; nothing here touches audio or notifications.
pub struct EngineCore {
    repo: Arc<dyn AlarmRepository>,
    scheduler: AlarmScheduler,
    ringing: RingingMachine,
}

impl EngineCore {
    pub fn new(repo: Arc<dyn AlarmRepository>) -> Self {
        Self {
            repo,
            scheduler: AlarmScheduler::new(),
            ringing: RingingMachine::new(),
        }
    }

    pub fn tick(&mut self, now: NaiveDateTime) -> TickOutcome {
        let mut outcome = TickOutcome::default();
        self.scheduler.prune(now);

        if let Some(alarm) = self.ringing.resume_due(now).cloned() {
            let snooze_count = self.ringing.snooze_count();
            info!(alarm_id = %alarm.id, snooze_count, "snooze elapsed, ringing again");
            outcome.resumed = true;
            outcome.effects.push(EffectCommand::StartRinging {
                alarm,
                snooze_count,
            });
        }

        // A ringing alarm blocks the scan; a snoozed one yields to the next trigger.
        if self.ringing.is_ringing() {
            return outcome;
        }

        let alarms = match self.repo.list_enabled() {
            Ok(alarms) => alarms,
            Err(err) => {
                warn!("failed to read alarms: {err:#}");
                return outcome;
            }
        };
        if alarms.is_empty() {
            return outcome;
        }
        let Some(alarm) = self.scheduler.scan(&alarms, now) else {
            return outcome;
        };

        info!(alarm_id = %alarm.id, time = %alarm.time, label = %alarm.label, "alarm triggered");
        if alarm.is_one_time()
            && let Err(err) = self.repo.update(&alarm.id, &AlarmPatch::enabled(false))
        {
            warn!(alarm_id = %alarm.id, "failed to disable one-time alarm: {err:#}");
        }

        outcome.triggered = Some(alarm.id.clone());
        outcome.effects.push(EffectCommand::StartRinging {
            alarm: alarm.clone(),
            snooze_count: 0,
        });
        self.ringing.ring(alarm);
        outcome
    }

    pub fn snooze(&mut self, now: NaiveDateTime) -> (SnoozeOutcome, Vec<EffectCommand>) {
        let alarm_id = self.ringing.active_alarm().map(|alarm| alarm.id.clone());
        let outcome = self.ringing.snooze(now);
        let effects = match &outcome {
            SnoozeOutcome::Snoozed { count, until } => {
                info!(alarm_id = ?alarm_id, count, %until, "alarm snoozed");
                vec![EffectCommand::StopRinging]
            }
            SnoozeOutcome::Exhausted => {
                info!(alarm_id = ?alarm_id, "snooze limit reached, alarm dismissed");
                vec![EffectCommand::StopRinging]
            }
            SnoozeOutcome::NotAllowed => {
                debug!(alarm_id = ?alarm_id, "snooze disabled for alarm");
                Vec::new()
            }
            SnoozeOutcome::NotRinging => Vec::new(),
        };
        (outcome, effects)
    }

    pub fn dismiss(&mut self) -> (Option<Alarm>, Vec<EffectCommand>) {
        match self.ringing.dismiss() {
            Some(alarm) => {
                info!(alarm_id = %alarm.id, "alarm dismissed");
                (Some(alarm), vec![EffectCommand::StopRinging])
            }
            None => (None, Vec::new()),
        }
    }

    pub fn snapshot(&self) -> RingingSnapshot {
        let active = self.ringing.active_alarm();
        RingingSnapshot {
            phase: self.ringing.phase(),
            alarm_id: active.map(|alarm| alarm.id.clone()),
            label: active.map(|alarm| alarm.label.clone()),
            time: active.map(|alarm| alarm.time.clone()),
            snooze_count: self.ringing.snooze_count(),
            snooze_until: self.ringing.snooze_until(),
            can_snooze: self.ringing.is_ringing()
                && active.map(|alarm| alarm.snooze.enabled).unwrap_or(false),
        }
    }
}

/// Cheap cloneable access to the running engine for the tick thread and the API.
#[derive(Clone)]
pub struct EngineHandle {
    core: Arc<Mutex<EngineCore>>,
    clock: Arc<dyn Clock>,
    effects: Sender<EffectCommand>,
}

impl EngineHandle {
    pub fn tick(&self) -> Result<TickOutcome> {
        let now = self.clock.now().naive_local();
        let mut core = self.lock()?;
        let outcome = core.tick(now);
        // Sent under the lock so effect order matches transition order.
        self.dispatch(outcome.effects.iter().cloned());
        Ok(outcome)
    }

    pub fn snooze(&self) -> Result<SnoozeOutcome> {
        let now = self.clock.now().naive_local();
        let mut core = self.lock()?;
        let (outcome, effects) = core.snooze(now);
        self.dispatch(effects);
        Ok(outcome)
    }

    pub fn dismiss(&self) -> Result<Option<Alarm>> {
        let mut core = self.lock()?;
        let (dismissed, effects) = core.dismiss();
        self.dispatch(effects);
        Ok(dismissed)
    }

    pub fn snapshot(&self) -> Result<RingingSnapshot> {
        Ok(self.lock()?.snapshot())
    }

    fn dispatch(&self, effects: impl IntoIterator<Item = EffectCommand>) {
        for effect in effects {
            if self.effects.send(effect).is_err() {
                warn!("effect worker is not running, dropping effect");
            }
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, EngineCore>> {
        self.core
            .lock()
            .map_err(|_| anyhow!("engine state lock poisoned"))
    }
}

struct TickThread {
    stop: Sender<()>,
    join: JoinHandle<()>,
}

pub struct AlarmEngine {
    handle: EngineHandle,
    tick_interval: Duration,
    ticker: Option<TickThread>,
}

impl AlarmEngine {
    pub fn new(
        repo: Arc<dyn AlarmRepository>,
        clock: Arc<dyn Clock>,
        effects: Sender<EffectCommand>,
    ) -> Self {
        Self {
            handle: EngineHandle {
                core: Arc::new(Mutex::new(EngineCore::new(repo))),
                clock,
                effects,
            },
            tick_interval: TICK_INTERVAL,
            ticker: None,
        }
    }

    pub fn handle(&self) -> EngineHandle {
        self.handle.clone()
    }

    #[cfg(test)]
    pub fn is_running(&self) -> bool {
        self.ticker.is_some()
    }

    /// Starts the tick thread. Returns `false` if it was already running.
    pub fn start(&mut self) -> Result<bool> {
        if self.ticker.is_some() {
            return Ok(false);
        }

        let (stop, stop_rx) = mpsc::channel::<()>();
        let handle = self.handle.clone();
        let interval = self.tick_interval;
        let join = thread::Builder::new()
            .name("alarm-scheduler".to_string())
            .spawn(move || {
                loop {
                    if let Err(err) = handle.tick() {
                        warn!("scheduler tick failed: {err:#}");
                    }
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            })
            .context("failed to spawn scheduler thread")?;

        self.ticker = Some(TickThread { stop, join });
        info!(interval_ms = interval.as_millis() as u64, "scheduler started");
        Ok(true)
    }

    /// Stops the tick thread and forgets recent triggers. Ringing effects are left alone.
    pub fn stop(&mut self) {
        let Some(ticker) = self.ticker.take() else {
            return;
        };
        let _ = ticker.stop.send(());
        if ticker.join.join().is_err() {
            warn!("scheduler thread panicked");
        }
        match self.handle.lock() {
            Ok(mut core) => core.scheduler.reset(),
            Err(err) => warn!("{err:#}"),
        }
        info!("scheduler stopped");
    }
}

impl Drop for AlarmEngine {
    fn drop(&mut self) {
        self.stop();
    }
}
