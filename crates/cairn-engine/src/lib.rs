//! Cairn Engine -- fixed-timestep driver for a [`cairn_ecs`] world.
//!
//! This crate builds on [`cairn_ecs`] to provide the simulation loop: systems
//! run in a fixed order each tick, after which the world's entity lifecycle
//! queue is drained. It also carries the tracing setup used by the demos.
//!
//! # Quick Start
//!
//! ```
//! use cairn_engine::prelude::*;
//!
//! let config = TickConfig { fixed_dt: 1.0 / 60.0, ..Default::default() };
//! let mut tick_loop = TickLoop::from_config(config).unwrap();
//!
//! tick_loop.add_system("example", |world| {
//!     if world.entity_count() < 3 {
//!         world.create_entity().unwrap();
//!     }
//! });
//!
//! tick_loop.run_ticks(100);
//! assert_eq!(tick_loop.tick_count(), 100);
//! assert_eq!(tick_loop.world().entity_count(), 3);
//! ```

#![deny(unsafe_code)]

pub mod logging;
pub mod tick;

use cairn_ecs::EcsError;

/// Re-export the ECS crate for convenience.
pub use cairn_ecs;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced while configuring the engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid engine configuration: {details}")]
    InvalidConfig { details: String },

    #[error(transparent)]
    Ecs(#[from] EcsError),
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common engine usage.
pub mod prelude {
    pub use cairn_ecs::prelude::*;

    pub use crate::logging::init_tracing;
    pub use crate::tick::{SystemFn, TickConfig, TickDiagnostics, TickLoop};
    pub use crate::EngineError;
}
