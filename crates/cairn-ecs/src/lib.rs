//! Cairn ECS -- generational handles, deferred entity lifecycle, and
//! per-type component pools.
//!
//! Entities are identified by generational [`Handle`](handle::Handle)s
//! handed out by a [`HandleAllocator`](handle::HandleAllocator) that keeps a
//! reserve of free slots so reuse is spread across many slots. Creating or
//! destroying an entity queues a command; [`World::process_commands`]
//! drains the queue, dispatching the entity events that component pools
//! (and any other receiver) listen to. A create receiver can veto a
//! creation, which rolls the entity back.
//!
//! # Quick Start
//!
//! ```
//! use cairn_ecs::prelude::*;
//!
//! #[derive(Debug, Default, PartialEq)]
//! struct Position { x: f32, y: f32 }
//!
//! impl Component for Position {}
//!
//! let mut world = World::new();
//! let entity = world.create_entity().unwrap();
//! world.create::<Position>(entity).unwrap().x = 3.0;
//!
//! let report = world.process_commands();
//! assert_eq!(report.created, 1);
//! assert!(world.is_entity_created(entity));
//! assert_eq!(world.lookup::<Position>(entity), Some(&Position { x: 3.0, y: 0.0 }));
//! ```

#![deny(unsafe_code)]

pub mod component;
pub mod config;
pub mod entity;
pub mod handle;
pub mod signal;
pub mod snapshot;
pub mod world;

use handle::Handle;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by ECS operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EcsError {
    /// The handle is not live (destroyed, reused, or never allocated).
    #[error("handle {handle} is stale or was never allocated")]
    StaleHandle { handle: Handle },

    /// A requested handle can never be allocated.
    #[error("handle {handle} cannot be requested: {reason}")]
    InvalidHandle {
        handle: Handle,
        reason: &'static str,
    },

    /// The requested slot has already moved past the requested generation.
    #[error("handle {requested} already created (slot is at generation {current})")]
    AlreadyCreated { requested: Handle, current: u32 },

    /// The requested slot is live.
    #[error("handle {requested} is currently live")]
    RequestedHandleAlreadyCreated { requested: Handle },

    /// The slot index space is used up and nothing is free.
    #[error("handle space exhausted ({total_slots} slots, none free)")]
    HandleSpaceExhausted { total_slots: usize },

    #[error("invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("snapshot checksum mismatch (expected {expected}, computed {computed})")]
    SnapshotChecksumMismatch { expected: String, computed: String },

    #[error("malformed snapshot: {details}")]
    SnapshotFormat { details: String },
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::component::{Component, ComponentDirectory, ComponentPool};
    pub use crate::config::WorldConfig;
    pub use crate::entity::{
        DrainReport, EntityCommand, EntityCommandKind, EntityFlags, EntityManager,
    };
    pub use crate::handle::{Handle, HandleAllocator};
    pub use crate::signal::{
        CollectAll, CollectWhileTrue, Collector, Priority, Receiver, Signal, SubscriptionId,
        SubscriptionPolicy,
    };
    pub use crate::snapshot::EntitySnapshot;
    pub use crate::world::World;
    pub use crate::EcsError;
}

// ---------------------------------------------------------------------------
// Integration Tests
// ---------------------------------------------------------------------------
