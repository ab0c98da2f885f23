use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AlarmError {
    #[error("invalid alarm time '{0}', expected HH:MM (24-hour)")]
    InvalidTime(String),
    #[error("alarm '{id}' volume {volume} is out of range 0-100")]
    InvalidVolume { id: String, volume: u8 },
    #[error("duplicate alarm id found: {0}")]
    DuplicateId(String),
    #[error("unknown alarm id: {0}")]
    NotFound(String),
    #[error("unsupported alarm config version {0}; expected version 1")]
    UnsupportedVersion(u32),
}
