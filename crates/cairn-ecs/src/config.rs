//! Tunables for a [`World`](crate::world::World) and its handle allocator.

use serde::{Deserialize, Serialize};

use crate::EcsError;

/// Free slots the allocator keeps in reserve ahead of demand.
pub const DEFAULT_CACHE_SIZE: usize = 32;

/// Generation at which a slot retires.
pub const DEFAULT_MAX_GENERATION: u32 = u32::MAX;

/// Batches a single command drain may process before it is treated as a
/// runaway feedback loop.
pub const DEFAULT_MAX_DRAIN_ITERATIONS: usize = 32;

/// World configuration.
///
/// Every field has a default, so a partial JSON document such as
/// `{"cache_size": 8}` is a complete configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    /// Free slots kept pre-allocated so reuse rotates across many slots.
    pub cache_size: usize,
    /// Generation at which a slot is retired. Must be at least 1.
    pub max_generation: u32,
    /// Ceiling on batches per `process_commands` call. Must be at least 1.
    pub max_drain_iterations: usize,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            cache_size: DEFAULT_CACHE_SIZE,
            max_generation: DEFAULT_MAX_GENERATION,
            max_drain_iterations: DEFAULT_MAX_DRAIN_ITERATIONS,
        }
    }
}

impl WorldConfig {
    /// Parse and validate a JSON configuration document.
    ///
    /// # Errors
    ///
    /// [`EcsError::InvalidConfig`] if the document does not parse or fails
    /// [`validate`](Self::validate).
    pub fn from_json_str(json: &str) -> Result<Self, EcsError> {
        let config: WorldConfig =
            serde_json::from_str(json).map_err(|e| EcsError::InvalidConfig {
                details: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Check field ranges.
    pub fn validate(&self) -> Result<(), EcsError> {
        if self.max_generation == 0 {
            return Err(EcsError::InvalidConfig {
                details: "max_generation must be at least 1".to_owned(),
            });
        }
        if self.max_drain_iterations == 0 {
            return Err(EcsError::InvalidConfig {
                details: "max_drain_iterations must be at least 1".to_owned(),
            });
        }
        Ok(())
    }
}
