use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use tracing::{debug, info};

use crate::alarm::model::{SoundConfig, SoundKind};
use crate::effects::{
    NotificationBackend, NotificationHandle, NotificationRequest, PlaybackOptions, SoundBackend,
    VibrationBackend,
};

pub const BUILTIN_SOUNDS: [&str; 5] = ["default", "ring", "bingbong", "ticktock", "rain"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadedSound {
    Builtin(&'static str),
    File(PathBuf),
}

/// Logs playback instead of driving an audio device.
#[derive(Debug, Default)]
pub struct ConsoleSound {
    loaded: Option<LoadedSound>,
    playing: bool,
}

impl ConsoleSound {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn loaded(&self) -> Option<&LoadedSound> {
        self.loaded.as_ref()
    }

    #[cfg(test)]
    pub fn is_playing(&self) -> bool {
        self.playing
    }
}

pub fn resolve_sound(sound: &SoundConfig) -> Result<LoadedSound> {
    match sound.kind {
        SoundKind::Builtin => match BUILTIN_SOUNDS.into_iter().find(|id| *id == sound.uri) {
            Some(id) => Ok(LoadedSound::Builtin(id)),
            None => bail!("unknown built-in sound '{}'", sound.uri),
        },
        SoundKind::Custom => {
            let path = Path::new(sound.uri.strip_prefix("file://").unwrap_or(&sound.uri));
            if !path.is_file() {
                bail!("custom sound file not found: {}", path.display());
            }
            Ok(LoadedSound::File(path.to_path_buf()))
        }
    }
}

impl SoundBackend for ConsoleSound {
    fn play(&mut self, sound: &SoundConfig, options: PlaybackOptions) -> Result<()> {
        let loaded = resolve_sound(sound)?;
        info!(
            sound = ?loaded,
            looping = options.looping,
            volume = options.volume,
            "playing alarm sound"
        );
        self.loaded = Some(loaded);
        self.playing = true;
        Ok(())
    }

    fn rewind(&mut self) -> Result<()> {
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        self.playing = false;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if self.playing {
            debug!("sound stopped");
        }
        self.playing = false;
        Ok(())
    }

    fn unload(&mut self) -> Result<()> {
        if let Some(sound) = self.loaded.take() {
            debug!(?sound, "sound unloaded");
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct ConsoleVibration {
    active: bool,
}

impl VibrationBackend for ConsoleVibration {
    fn vibrate(&mut self, pattern: &[u64], repeat: bool) -> Result<()> {
        info!(?pattern, repeat, "vibrating");
        self.active = true;
        Ok(())
    }

    fn cancel(&mut self) -> Result<()> {
        if self.active {
            debug!("vibration cancelled");
        }
        self.active = false;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct LogNotifications {
    next_id: u64,
    pending: Vec<NotificationHandle>,
}

impl LogNotifications {
    #[cfg(test)]
    pub fn pending(&self) -> &[NotificationHandle] {
        &self.pending
    }
}

impl NotificationBackend for LogNotifications {
    fn post_immediate(&mut self, request: &NotificationRequest) -> Result<NotificationHandle> {
        self.next_id += 1;
        let handle = NotificationHandle(format!("alarm-{}-{}", request.alarm_id, self.next_id));
        info!(
            title = %request.title,
            body = %request.body,
            default_sound = request.default_sound,
            "notification"
        );
        self.pending.push(handle.clone());
        Ok(handle)
    }

    fn cancel_all(&mut self) -> Result<()> {
        if !self.pending.is_empty() {
            debug!(count = self.pending.len(), "cancelling notifications");
        }
        self.pending.clear();
        Ok(())
    }
}
