//! Configuration types for transfer-task

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Step driver configuration
///
/// The cancellation core has no settings of its own; everything here shapes
/// how [`StepDriver`](crate::StepDriver) runs steps around it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Maximum time a single step may run before it is cancelled (None = no limit)
    ///
    /// Serialized as whole milliseconds.
    #[serde(default, with = "optional_duration_serde")]
    pub step_timeout: Option<Duration>,

    /// Maximum number of members of a parallel step in flight at once (default: 4)
    #[serde(default = "default_max_parallel_steps")]
    pub max_parallel_steps: usize,

    /// Capacity of the event broadcast channel (default: 256)
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            step_timeout: None,
            max_parallel_steps: default_max_parallel_steps(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

impl DriverConfig {
    /// Parse a configuration from JSON, filling unset fields with defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: DriverConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for values the driver cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.max_parallel_steps == 0 {
            return Err(Error::Config {
                message: "max_parallel_steps must be at least 1".to_string(),
                key: Some("max_parallel_steps".to_string()),
            });
        }

        if self.event_channel_capacity == 0 {
            return Err(Error::Config {
                message: "event_channel_capacity must be at least 1".to_string(),
                key: Some("event_channel_capacity".to_string()),
            });
        }

        if self.step_timeout.is_some_and(|t| t.as_millis() == 0) {
            return Err(Error::Config {
                message: "step_timeout must be at least 1ms (omit it for no limit)".to_string(),
                key: Some("step_timeout".to_string()),
            });
        }

        Ok(())
    }
}

fn default_max_parallel_steps() -> usize {
    4
}

fn default_event_channel_capacity() -> usize {
    256
}

// Optional Duration serialization helper
mod optional_duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => {
                let millis = u64::try_from(d.as_millis()).unwrap_or(u64::MAX);
                serializer.serialize_some(&millis)
            }
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = Option::<u64>::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}
