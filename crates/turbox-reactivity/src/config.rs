#![forbid(unsafe_code)]

//! Engine configuration.

use crate::error::ReactivityError;

/// History depth used when a host does not pick one.
pub const DEFAULT_MAX_STEP_NUMBER: usize = 20;

/// Time-travel recording settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeTravelConfig {
    /// Whether completed top-level actions are recorded at all.
    pub is_active: bool,
    /// Default ring-buffer capacity for newly created instances.
    pub max_step_number: usize,
}

impl Default for TimeTravelConfig {
    fn default() -> Self {
        Self {
            is_active: false,
            max_step_number: DEFAULT_MAX_STEP_NUMBER,
        }
    }
}

impl TimeTravelConfig {
    /// Recording enabled with the given capacity.
    #[must_use]
    pub fn active(max_step_number: usize) -> Self {
        Self {
            is_active: true,
            max_step_number,
        }
    }

    /// Set the default capacity.
    #[must_use]
    pub fn with_max_step_number(mut self, max_step_number: usize) -> Self {
        self.max_step_number = max_step_number;
        self
    }

    /// Reject capacities that could never hold an entry.
    ///
    /// # Errors
    ///
    /// Returns [`ReactivityError::Configuration`] when `max_step_number` is zero.
    pub fn validate(&self) -> Result<(), ReactivityError> {
        validate_max_step_number(self.max_step_number)
    }
}

pub(crate) fn validate_max_step_number(max_step_number: usize) -> Result<(), ReactivityError> {
    if max_step_number == 0 {
        return Err(ReactivityError::Configuration(
            "max_step_number must be at least 1".to_string(),
        ));
    }
    Ok(())
}

/// Configuration for an [`Engine`](crate::Engine).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Time-travel recording settings.
    pub time_travel: TimeTravelConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            time_travel: TimeTravelConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Set the time-travel settings.
    #[must_use]
    pub fn with_time_travel(mut self, time_travel: TimeTravelConfig) -> Self {
        self.time_travel = time_travel;
        self
    }
}
