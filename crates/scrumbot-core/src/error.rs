//! Scrumbot error types.

use thiserror::Error;

/// Errors shared by every Scrumbot crate.
#[derive(Debug, Error)]
pub enum ScrumError {
    #[error("Config error: {0}")]
    Config(String),

    /// Zone id that is neither an IANA name nor a known Windows zone name.
    #[error("Unknown time zone: {0}")]
    InvalidTimezone(String),

    #[error("Invalid start time '{0}' (expected HH:MM, HH:MM:SS or RFC 3339)")]
    InvalidStartTime(String),

    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Notification error: {0}")]
    Notify(String),

    /// The destination channel no longer exists (deleted, bot removed).
    #[error("Channel not found: {0}")]
    ChannelNotFound(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Run {0} is already closed")]
    RunClosed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ScrumError {
    /// Configuration problems are permanent for a job until it is edited.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            ScrumError::Config(_)
                | ScrumError::InvalidTimezone(_)
                | ScrumError::InvalidStartTime(_)
                | ScrumError::InvalidSchedule(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ScrumError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_classification() {
        assert!(ScrumError::InvalidTimezone("Mars/Olympus".into()).is_config());
        assert!(ScrumError::InvalidStartTime("25:00".into()).is_config());
        assert!(!ScrumError::Notify("timeout".into()).is_config());
        assert!(!ScrumError::RunClosed("r1".into()).is_config());
    }

    #[test]
    fn test_display() {
        let e = ScrumError::ChannelNotFound("telegram:42".into());
        assert_eq!(e.to_string(), "Channel not found: telegram:42");
    }
}
