//! Entity lifecycle: deferred create/destroy commands and their events.
//!
//! Creating an entity allocates its handle right away, but the entity only
//! becomes *created* once its `Create` command is drained by
//! [`World::process_commands`] and no `on_entity_create` receiver vetoes it.
//! Destruction is deferred the same way: the `Destroy` command dispatches
//! `on_entity_destroy` so component pools can tear down, and only then is the
//! handle freed.
//!
//! ```
//! use cairn_ecs::prelude::*;
//!
//! let mut world = World::new();
//! let e = world.create_entity().unwrap();
//! assert!(world.is_entity_valid(e));
//! assert!(!world.is_entity_created(e));
//!
//! world.process_commands();
//! assert!(world.is_entity_created(e));
//!
//! world.destroy_entity(e);
//! world.process_commands();
//! assert!(!world.is_entity_valid(e));
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::ops::BitOr;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, trace, warn};

use crate::config::WorldConfig;
use crate::handle::{Handle, HandleAllocator};
use crate::signal::{self, CollectAll, CollectWhileTrue, Signal};
use crate::world::World;
use crate::EcsError;

// ---------------------------------------------------------------------------
// EntityFlags
// ---------------------------------------------------------------------------

/// Lifecycle state bits stored as the entity allocator's payload.
///
/// The empty set means the slot is unused.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct EntityFlags(u8);

impl EntityFlags {
    /// Slot not in use.
    pub const UNUSED: EntityFlags = EntityFlags(0);
    /// Handle allocated; create command pending or done.
    pub const EXISTS: EntityFlags = EntityFlags(1);
    /// Create command drained and accepted by every receiver.
    pub const CREATED: EntityFlags = EntityFlags(1 << 1);
    /// Destroy command queued.
    pub const DESTROY: EntityFlags = EntityFlags(1 << 2);

    #[inline]
    pub const fn contains(self, other: EntityFlags) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub fn insert(&mut self, other: EntityFlags) {
        self.0 |= other.0;
    }

    #[inline]
    pub fn remove(&mut self, other: EntityFlags) {
        self.0 &= !other.0;
    }

    #[inline]
    pub const fn is_unused(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for EntityFlags {
    type Output = EntityFlags;

    fn bitor(self, rhs: EntityFlags) -> EntityFlags {
        EntityFlags(self.0 | rhs.0)
    }
}

impl fmt::Debug for EntityFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unused() {
            return write!(f, "EntityFlags(UNUSED)");
        }
        let names: Vec<&str> = [
            (Self::EXISTS, "EXISTS"),
            (Self::CREATED, "CREATED"),
            (Self::DESTROY, "DESTROY"),
        ]
        .iter()
        .filter(|(flag, _)| self.contains(*flag))
        .map(|(_, name)| *name)
        .collect();
        write!(f, "EntityFlags({})", names.join(" | "))
    }
}

// ---------------------------------------------------------------------------
// EntityCommand
// ---------------------------------------------------------------------------

/// What a queued [`EntityCommand`] asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityCommandKind {
    Create,
    Destroy,
}

/// One queued lifecycle request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityCommand {
    pub handle: Handle,
    pub kind: EntityCommandKind,
}

// ---------------------------------------------------------------------------
// DrainReport
// ---------------------------------------------------------------------------

/// Summary of one [`World::process_commands`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Batches taken off the queue (each batch is everything queued at the
    /// moment it was taken).
    pub batches: usize,
    /// Entities that became created.
    pub created: usize,
    /// Creations rolled back because a receiver returned `false`.
    pub vetoed: usize,
    /// Entities destroyed by a `Destroy` command.
    pub destroyed: usize,
    /// Commands whose handle was no longer live, duplicate creates, and
    /// creates overtaken by a pending destroy.
    pub skipped: usize,
}

impl DrainReport {
    /// Commands handled in total.
    pub fn processed(&self) -> usize {
        self.created + self.vetoed + self.destroyed + self.skipped
    }
}

// ---------------------------------------------------------------------------
// EntityManager
// ---------------------------------------------------------------------------

/// Owns entity handles, the lifecycle command queue and the entity events.
///
/// The manager holds state only; the drain that dispatches events lives on
/// [`World`] because receivers need the whole world as their context.
pub struct EntityManager {
    pub(crate) handles: HandleAllocator<EntityFlags>,
    pub(crate) queue: VecDeque<EntityCommand>,
    pub(crate) on_create: Signal<World, Handle, bool>,
    pub(crate) on_destroy: Signal<World, Handle, ()>,
    max_drain_iterations: usize,
    draining: bool,
    last_drain_report: DrainReport,
}

impl EntityManager {
    /// Create an empty manager sized by `config`.
    pub fn new(config: &WorldConfig) -> Self {
        Self {
            handles: HandleAllocator::with_limits(config.cache_size, config.max_generation),
            queue: VecDeque::new(),
            on_create: Signal::new(),
            on_destroy: Signal::new(),
            max_drain_iterations: config.max_drain_iterations,
            draining: false,
            last_drain_report: DrainReport::default(),
        }
    }

    /// Allocate an entity handle and queue its `Create` command.
    ///
    /// The handle can be used as a key (e.g. to attach components) right
    /// away, but the entity is not created until the queue is drained.
    pub fn create_entity(&mut self) -> Result<Handle, EcsError> {
        self.spawn(None)
    }

    /// Like [`create_entity`](Self::create_entity), but reconstructs a
    /// specific handle (used when restoring a snapshot).
    pub fn create_entity_with(&mut self, requested: Handle) -> Result<Handle, EcsError> {
        self.spawn(Some(requested))
    }

    fn spawn(&mut self, requested: Option<Handle>) -> Result<Handle, EcsError> {
        let handle = self.handles.create_handle(requested)?;
        *self.handles.lookup_mut(handle)? = EntityFlags::EXISTS;
        self.queue.push_back(EntityCommand {
            handle,
            kind: EntityCommandKind::Create,
        });
        trace!(entity = %handle, "entity create queued");
        Ok(handle)
    }

    /// Flag `handle` for destruction and queue its `Destroy` command.
    ///
    /// Returns `false` without queuing anything if the handle is stale or a
    /// destroy is already pending.
    pub fn destroy_entity(&mut self, handle: Handle) -> bool {
        let Ok(flags) = self.handles.lookup_mut(handle) else {
            debug!(entity = %handle, "destroy requested for stale entity");
            return false;
        };
        if flags.contains(EntityFlags::DESTROY) {
            return false;
        }
        flags.insert(EntityFlags::DESTROY);
        self.queue.push_back(EntityCommand {
            handle,
            kind: EntityCommandKind::Destroy,
        });
        trace!(entity = %handle, "entity destroy queued");
        true
    }

    /// Current flags of a live entity.
    pub fn flags(&self, handle: Handle) -> Option<EntityFlags> {
        self.handles.lookup(handle).ok().copied()
    }

    /// Whether `handle` names a live entity, created or not.
    pub fn is_valid(&self, handle: Handle) -> bool {
        self.handles.is_valid(handle)
    }

    /// Whether `handle` is live and its `Create` command has been accepted.
    pub fn is_created(&self, handle: Handle) -> bool {
        self.flags(handle)
            .is_some_and(|flags| flags.contains(EntityFlags::CREATED))
    }

    /// Live entity handles, whatever their lifecycle stage.
    pub fn count(&self) -> usize {
        self.handles.valid_count()
    }

    /// Commands queued since the last drain.
    pub fn pending_command_count(&self) -> usize {
        self.queue.len()
    }

    /// Commands waiting for the next drain, oldest first.
    pub fn pending_commands(&self) -> impl Iterator<Item = &EntityCommand> {
        self.queue.iter()
    }

    /// Read-only access to the underlying handle table.
    pub fn handles(&self) -> &HandleAllocator<EntityFlags> {
        &self.handles
    }

    /// Report of the most recent outermost drain.
    pub fn last_drain_report(&self) -> &DrainReport {
        &self.last_drain_report
    }
}

impl fmt::Debug for EntityManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityManager")
            .field("live", &self.handles.valid_count())
            .field("pending", &self.queue.len())
            .field("create_receivers", &self.on_create.len())
            .field("destroy_receivers", &self.on_destroy.len())
            .finish()
    }
}

fn create_signal(world: &World) -> &Signal<World, Handle, bool> {
    &world.entities.on_create
}

fn destroy_signal(world: &World) -> &Signal<World, Handle, ()> {
    &world.entities.on_destroy
}

// ---------------------------------------------------------------------------
// World lifecycle API
// ---------------------------------------------------------------------------

impl World {
    /// See [`EntityManager::create_entity`].
    pub fn create_entity(&mut self) -> Result<Handle, EcsError> {
        self.entities.create_entity()
    }

    /// See [`EntityManager::create_entity_with`].
    pub fn create_entity_with(&mut self, requested: Handle) -> Result<Handle, EcsError> {
        self.entities.create_entity_with(requested)
    }

    /// See [`EntityManager::destroy_entity`].
    pub fn destroy_entity(&mut self, handle: Handle) -> bool {
        self.entities.destroy_entity(handle)
    }

    /// See [`EntityManager::is_valid`].
    pub fn is_entity_valid(&self, handle: Handle) -> bool {
        self.entities.is_valid(handle)
    }

    /// See [`EntityManager::is_created`].
    pub fn is_entity_created(&self, handle: Handle) -> bool {
        self.entities.is_created(handle)
    }

    /// Live entities, whatever their lifecycle stage.
    pub fn entity_count(&self) -> usize {
        self.entities.count()
    }

    /// Drain the lifecycle queue until it is empty.
    ///
    /// Commands run in FIFO order, one batch at a time; commands queued by
    /// receivers during a batch form the next batch. A nested call from
    /// inside a receiver returns an empty report and leaves the queued work
    /// to the outer drain.
    ///
    /// # Panics
    ///
    /// Panics if the queue is still non-empty after the configured number of
    /// batches, which means receivers keep feeding the queue.
    pub fn process_commands(&mut self) -> DrainReport {
        if self.entities.draining {
            debug!("process_commands re-entered from a receiver; deferring to the outer drain");
            return DrainReport::default();
        }
        self.entities.draining = true;

        let limit = self.entities.max_drain_iterations;
        let mut report = DrainReport::default();
        while !self.entities.queue.is_empty() {
            if report.batches == limit {
                error!(
                    batches = report.batches,
                    pending = self.entities.queue.len(),
                    "entity command drain did not settle"
                );
                panic!(
                    "entity command drain exceeded {limit} batches; receivers keep queuing lifecycle commands"
                );
            }
            report.batches += 1;
            let batch: Vec<EntityCommand> = self.entities.queue.drain(..).collect();
            for command in batch {
                self.apply_entity_command(command, &mut report);
            }
        }

        self.entities.draining = false;
        if report.batches > 0 {
            debug!(
                batches = report.batches,
                created = report.created,
                vetoed = report.vetoed,
                destroyed = report.destroyed,
                skipped = report.skipped,
                "entity commands drained"
            );
        }
        self.entities.last_drain_report = report.clone();
        report
    }

    fn apply_entity_command(&mut self, command: EntityCommand, report: &mut DrainReport) {
        let handle = command.handle;
        let Some(flags) = self.entities.flags(handle) else {
            trace!(entity = %handle, kind = ?command.kind, "command skipped: entity no longer live");
            report.skipped += 1;
            return;
        };

        match command.kind {
            EntityCommandKind::Create => {
                if flags.contains(EntityFlags::DESTROY) {
                    trace!(entity = %handle, "create skipped: destroy already pending");
                    report.skipped += 1;
                    return;
                }
                if flags.contains(EntityFlags::CREATED) {
                    warn!(entity = %handle, "duplicate create command skipped");
                    report.skipped += 1;
                    return;
                }
                let accepted =
                    signal::dispatch(self, create_signal, handle, CollectWhileTrue::default());
                // Components attached by receivers behind the directory hook
                // still need their init pass before the entity counts as created.
                if accepted && self.components.initialize_all(handle) {
                    if let Ok(flags) = self.entities.handles.lookup_mut(handle) {
                        flags.insert(EntityFlags::CREATED);
                    }
                    report.created += 1;
                } else {
                    debug!(entity = %handle, "entity creation vetoed; rolling back");
                    self.teardown_entity(handle);
                    report.vetoed += 1;
                }
            }
            EntityCommandKind::Destroy => {
                self.teardown_entity(handle);
                report.destroyed += 1;
            }
        }
    }

    /// Dispatch the destroy event, sweep the directory once more for
    /// components attached by late receivers, then release the handle.
    fn teardown_entity(&mut self, handle: Handle) {
        signal::dispatch(self, destroy_signal, handle, CollectAll);
        let stragglers = self.components.destroy_all(handle);
        if stragglers > 0 {
            debug!(entity = %handle, stragglers, "components attached during teardown removed");
        }
        if !self.entities.handles.destroy_handle(handle) {
            warn!(entity = %handle, "entity handle already released during teardown");
        }
    }

    /// Destroy every entity and drain until none remain.
    ///
    /// Called from inside a receiver, this only queues a destroy for every
    /// live entity; the outer drain carries them out and no emptiness check
    /// is made.
    ///
    /// # Panics
    ///
    /// Panics if live entities remain afterwards (for example because a
    /// destroy receiver created new entities).
    pub fn destroy_all_entities(&mut self) {
        if self.entities.draining {
            let mut queued = 0usize;
            let mut cursor = self.entities.handles.first_valid();
            while let Some(handle) = cursor {
                if self.entities.destroy_entity(handle) {
                    queued += 1;
                }
                cursor = self.entities.handles.next_valid_after(handle);
            }
            debug!(queued, "destroy_all_entities called during a drain; left to the outer drain");
            return;
        }

        self.process_commands();

        let mut cursor = self.entities.handles.first_valid();
        while let Some(handle) = cursor {
            self.entities.destroy_entity(handle);
            cursor = self.entities.handles.next_valid_after(handle);
        }

        self.process_commands();

        let remaining = self.entities.count();
        if remaining != 0 {
            error!(remaining, "entities survived destroy_all_entities");
            panic!("destroy_all_entities left {remaining} live entities");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
