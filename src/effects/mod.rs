pub mod console;

use std::sync::mpsc::{self, Sender};
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::alarm::model::{Alarm, SoundConfig};

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct PlaybackOptions {
    pub looping: bool,
    pub volume: u8,
}

pub trait SoundBackend: Send {
    fn play(&mut self, sound: &SoundConfig, options: PlaybackOptions) -> Result<()>;
    fn rewind(&mut self) -> Result<()>;
    fn pause(&mut self) -> Result<()>;
    fn stop(&mut self) -> Result<()>;
    fn unload(&mut self) -> Result<()>;
}

pub trait VibrationBackend: Send {
    fn vibrate(&mut self, pattern: &[u64], repeat: bool) -> Result<()>;
    fn cancel(&mut self) -> Result<()>;
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct NotificationRequest {
    pub title: String,
    pub body: String,
    pub alarm_id: String,
    pub default_sound: bool,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct NotificationHandle(pub String);

pub trait NotificationBackend: Send {
    fn post_immediate(&mut self, request: &NotificationRequest) -> Result<NotificationHandle>;
    fn cancel_all(&mut self) -> Result<()>;
}

/// One-way "show the ringing screen" / "back to normal" signal for the presentation layer.
pub trait RingingSignal: Send {
    fn ringing(&self, alarm: &Alarm, snooze_count: u32);
    fn cleared(&self);
}

#[derive(Debug, Clone, PartialEq)]
pub enum EffectCommand {
    StartRinging { alarm: Alarm, snooze_count: u32 },
    StopRinging,
    Shutdown,
}

pub struct EffectBackends {
    pub sound: Box<dyn SoundBackend>,
    pub vibration: Box<dyn VibrationBackend>,
    pub notifications: Box<dyn NotificationBackend>,
    pub signal: Box<dyn RingingSignal>,
}

/// Turns ringing transitions into sound, vibration and notification calls.
/// Nothing here returns an error: every failure is logged and, for playback,
/// replaced by a notification that carries the system default sound.
pub struct EffectDispatcher {
    backends: EffectBackends,
    sound_loaded: bool,
}

impl EffectDispatcher {
    pub fn new(backends: EffectBackends) -> Self {
        Self {
            backends,
            sound_loaded: false,
        }
    }

    pub fn start_ringing(&mut self, alarm: &Alarm, snooze_count: u32) {
        if self.sound_loaded {
            self.stop_sound();
        }

        let options = PlaybackOptions {
            looping: true,
            volume: alarm.sound.volume.min(100),
        };
        let played = match self.backends.sound.play(&alarm.sound, options) {
            Ok(()) => {
                self.sound_loaded = true;
                true
            }
            Err(err) => {
                warn!(alarm_id = %alarm.id, sound = %alarm.sound.uri, "playback failed, falling back to notification sound: {err:#}");
                false
            }
        };

        if alarm.vibration.enabled && !alarm.vibration.pattern.is_empty() {
            if let Err(err) = self.backends.vibration.vibrate(&alarm.vibration.pattern, true) {
                warn!(alarm_id = %alarm.id, "vibration failed: {err:#}");
            }
        }

        let request = NotificationRequest {
            title: notification_title(alarm),
            body: format!("Alarm set for {}", alarm.time),
            alarm_id: alarm.id.clone(),
            default_sound: !played,
        };
        match self.backends.notifications.post_immediate(&request) {
            Ok(handle) => debug!(alarm_id = %alarm.id, handle = %handle.0, "notification posted"),
            Err(err) if played => warn!(alarm_id = %alarm.id, "notification failed: {err:#}"),
            Err(err) => error!(alarm_id = %alarm.id, "alarm has no audible signal: {err:#}"),
        }

        self.backends.signal.ringing(alarm, snooze_count);
        info!(alarm_id = %alarm.id, snooze_count, "ringing started");
    }

    pub fn stop_ringing(&mut self) {
        self.stop_sound();
        if let Err(err) = self.backends.vibration.cancel() {
            warn!("vibration cancel failed: {err:#}");
        }
        if let Err(err) = self.backends.notifications.cancel_all() {
            warn!("notification cancel failed: {err:#}");
        }
        self.backends.signal.cleared();
        info!("ringing stopped");
    }

    /// Returns `false` once the worker should exit.
    pub fn handle(&mut self, command: EffectCommand) -> bool {
        match command {
            EffectCommand::StartRinging {
                alarm,
                snooze_count,
            } => {
                self.start_ringing(&alarm, snooze_count);
                true
            }
            EffectCommand::StopRinging => {
                self.stop_ringing();
                true
            }
            EffectCommand::Shutdown => {
                self.stop_ringing();
                false
            }
        }
    }

    fn stop_sound(&mut self) {
        let sound = self.backends.sound.as_mut();
        // Every step runs even if an earlier one failed.
        let steps = [
            ("rewind", sound.rewind()),
            ("pause", sound.pause()),
            ("stop", sound.stop()),
            ("unload", sound.unload()),
        ];
        for (step, result) in steps {
            if let Err(err) = result {
                warn!(step, "sound stop step failed: {err:#}");
            }
        }
        self.sound_loaded = false;
    }
}

fn notification_title(alarm: &Alarm) -> String {
    if alarm.label.trim().is_empty() {
        "Alarm".to_string()
    } else {
        alarm.label.clone()
    }
}

/// Owns the dispatcher on its own thread so ticks never wait on audio or notifications.
pub struct EffectWorker {
    sender: Sender<EffectCommand>,
    join: Option<JoinHandle<()>>,
}

impl EffectWorker {
    pub fn spawn(mut dispatcher: EffectDispatcher) -> Result<Self> {
        let (sender, receiver) = mpsc::channel::<EffectCommand>();
        let join = thread::Builder::new()
            .name("alarm-effects".to_string())
            .spawn(move || {
                while let Ok(command) = receiver.recv() {
                    if !dispatcher.handle(command) {
                        return;
                    }
                }
                debug!("effect channel closed");
                dispatcher.stop_ringing();
            })
            .context("failed to spawn effect worker thread")?;
        Ok(Self {
            sender,
            join: Some(join),
        })
    }

    pub fn sender(&self) -> Sender<EffectCommand> {
        self.sender.clone()
    }
}

impl Drop for EffectWorker {
    fn drop(&mut self) {
        let _ = self.sender.send(EffectCommand::Shutdown);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}
