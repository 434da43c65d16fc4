//! Quiz-session synchronization settings

use std::time::Duration;

use crate::{get_env_or_default, parse_env, ConfigError, ConfigResult};

/// Default visible lead time before a started quiz goes live
pub const DEFAULT_COUNTDOWN_SECS: u32 = 5;

/// Default extra lockout on the start guard beyond the countdown
pub const DEFAULT_GUARD_BUFFER_SECS: u32 = 2;

/// Settings for the per-session coordination layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Countdown carried by every start broadcast, in seconds
    pub countdown_secs: u32,

    /// Seconds the pending-start guard stays set after the countdown would have elapsed
    pub guard_buffer_secs: u32,

    /// Prefix of the per-session room channel (`{prefix}{session_id}`)
    pub room_channel_prefix: String,

    /// Prefix of the group-wide notification channel (`{prefix}{group_id}`)
    pub group_channel_prefix: String,

    /// Buffer size of the notice fan-out
    pub notice_capacity: usize,
}

impl SyncConfig {
    /// Load sync configuration from environment variables
    pub fn from_env() -> ConfigResult<Self> {
        let config = Self {
            countdown_secs: parse_env("SYNC_COUNTDOWN_SECS", DEFAULT_COUNTDOWN_SECS)?,
            guard_buffer_secs: parse_env("SYNC_GUARD_BUFFER_SECS", DEFAULT_GUARD_BUFFER_SECS)?,
            room_channel_prefix: get_env_or_default("SYNC_ROOM_CHANNEL_PREFIX", "quiz-sync-"),
            group_channel_prefix: get_env_or_default(
                "SYNC_GROUP_CHANNEL_PREFIX",
                "group-wide-notifications-",
            ),
            notice_capacity: parse_env("SYNC_NOTICE_CAPACITY", 64)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the coordination layer cannot run with
    pub fn validate(&self) -> ConfigResult<()> {
        if self.countdown_secs == 0 {
            return Err(ConfigError::OutOfRange {
                name: "SYNC_COUNTDOWN_SECS",
                reason: "countdown must be at least one second".to_string(),
            });
        }
        if self.notice_capacity == 0 {
            return Err(ConfigError::OutOfRange {
                name: "SYNC_NOTICE_CAPACITY",
                reason: "notice buffer cannot be empty".to_string(),
            });
        }
        if self.room_channel_prefix.is_empty() || self.group_channel_prefix.is_empty() {
            return Err(ConfigError::ValidationError(
                "channel prefixes must not be empty".to_string(),
            ));
        }
        if self.room_channel_prefix == self.group_channel_prefix {
            return Err(ConfigError::ValidationError(
                "room and group channel prefixes must differ".to_string(),
            ));
        }
        Ok(())
    }

    /// Countdown as a duration
    pub fn countdown(&self) -> Duration {
        Duration::from_secs(u64::from(self.countdown_secs))
    }

    /// How long a start broadcast blocks the next one when nothing clears it
    pub fn guard_window(&self) -> Duration {
        self.countdown() + Duration::from_secs(u64::from(self.guard_buffer_secs))
    }

    /// Channel name for a quiz session room
    pub fn room_channel(&self, session_id: impl std::fmt::Display) -> String {
        format!("{}{}", self.room_channel_prefix, session_id)
    }

    /// Channel name for a group's out-of-room notifications
    pub fn group_channel(&self, group_id: impl std::fmt::Display) -> String {
        format!("{}{}", self.group_channel_prefix, group_id)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            countdown_secs: DEFAULT_COUNTDOWN_SECS,
            guard_buffer_secs: DEFAULT_GUARD_BUFFER_SECS,
            room_channel_prefix: "quiz-sync-".to_string(),
            group_channel_prefix: "group-wide-notifications-".to_string(),
            notice_capacity: 64,
        }
    }
}
