use std::time::Duration;

use crate::error::SchedulerError;

pub const DEFAULT_QUIET_WINDOW_MS: u64 = 120;
pub const MAX_QUIET_WINDOW_MS: u64 = 60_000;

#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DebounceConfig {
    pub quiet_window_ms: u64,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            quiet_window_ms: DEFAULT_QUIET_WINDOW_MS,
        }
    }
}

impl DebounceConfig {
    pub fn new(quiet_window_ms: u64) -> Result<Self, SchedulerError> {
        let config = Self { quiet_window_ms };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.quiet_window_ms == 0 || self.quiet_window_ms > MAX_QUIET_WINDOW_MS {
            return Err(SchedulerError::InvalidWindow {
                got: self.quiet_window_ms,
                max: MAX_QUIET_WINDOW_MS,
            });
        }
        Ok(())
    }

    pub fn quiet_window(&self) -> Duration {
        Duration::from_millis(self.quiet_window_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_out_of_range_windows() {
        assert!(DebounceConfig::new(0).is_err());
        assert!(DebounceConfig::new(MAX_QUIET_WINDOW_MS + 1).is_err());
        let config = DebounceConfig::new(250).unwrap();
        assert_eq!(config.quiet_window(), Duration::from_millis(250));
        assert_eq!(DebounceConfig::default().quiet_window_ms, 120);
    }
}
