//! Components: typed per-entity payloads stored in per-type pools.
//!
//! Each component type gets its own [`ComponentPool`], created the first
//! time the type is used and kept in the [`ComponentDirectory`] under its
//! Rust `TypeId`. The directory listens to the entity lifecycle events:
//! when an entity's creation is processed every pool initializes that
//! entity's component (any failure vetoes the creation), and when an entity
//! is destroyed every pool tears its component down.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;

use tracing::debug;

use crate::entity::EntityFlags;
use crate::handle::Handle;
use crate::world::World;

// ---------------------------------------------------------------------------
// Component trait
// ---------------------------------------------------------------------------

/// A type that can be attached to an entity.
///
/// Components start as `Default::default()` and receive
/// [`initialize`](Component::initialize) once their entity is created.
/// Returning `false` from `initialize` vetoes the entity's creation.
pub trait Component: Default + 'static {
    fn initialize(&mut self, entity: Handle) -> bool {
        let _ = entity;
        true
    }

    /// Called when the component is torn down, only if it was initialized.
    fn destroy(&mut self, entity: Handle) {
        let _ = entity;
    }
}

// ---------------------------------------------------------------------------
// ComponentPool
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct PoolEntry<T> {
    handle: Handle,
    payload: T,
    initialized: bool,
}

/// Sparse storage for one component type, indexed by entity slot.
///
/// An entry belongs to exactly one handle (index *and* generation), so a
/// lookup with a stale handle misses even if the slot has been reused.
#[derive(Debug)]
pub struct ComponentPool<T> {
    entries: Vec<Option<PoolEntry<T>>>,
    len: usize,
}

impl<T: Component> ComponentPool<T> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            len: 0,
        }
    }

    /// Store `value` for `entity`, replacing any previous entry in that slot.
    ///
    /// The new entry is uninitialized. Returns `None` for
    /// [`Handle::INVALID`].
    pub fn insert(&mut self, entity: Handle, value: T) -> Option<&mut T> {
        let position = entity.position()?;
        if position >= self.entries.len() {
            self.entries.resize_with(position + 1, || None);
        }
        let slot = &mut self.entries[position];
        if slot.is_none() {
            self.len += 1;
        }
        let entry = slot.insert(PoolEntry {
            handle: entity,
            payload: value,
            initialized: false,
        });
        Some(&mut entry.payload)
    }

    fn entry(&self, entity: Handle) -> Option<&PoolEntry<T>> {
        self.entries
            .get(entity.position()?)?
            .as_ref()
            .filter(|entry| entry.handle == entity)
    }

    fn entry_mut(&mut self, entity: Handle) -> Option<&mut PoolEntry<T>> {
        self.entries
            .get_mut(entity.position()?)?
            .as_mut()
            .filter(|entry| entry.handle == entity)
    }

    pub fn get(&self, entity: Handle) -> Option<&T> {
        self.entry(entity).map(|entry| &entry.payload)
    }

    pub fn get_mut(&mut self, entity: Handle) -> Option<&mut T> {
        self.entry_mut(entity).map(|entry| &mut entry.payload)
    }

    pub fn contains(&self, entity: Handle) -> bool {
        self.entry(entity).is_some()
    }

    pub fn is_initialized(&self, entity: Handle) -> bool {
        self.entry(entity).is_some_and(|entry| entry.initialized)
    }

    /// Run [`Component::initialize`] for `entity`'s component.
    ///
    /// Returns `true` when there is no component or it is already
    /// initialized.
    pub fn initialize(&mut self, entity: Handle) -> bool {
        let Some(entry) = self.entry_mut(entity) else {
            return true;
        };
        if entry.initialized {
            return true;
        }
        if entry.payload.initialize(entity) {
            entry.initialized = true;
            true
        } else {
            false
        }
    }

    /// Remove `entity`'s component without running its destroy hook.
    pub fn remove(&mut self, entity: Handle) -> Option<T> {
        self.entry(entity)?;
        let position = entity.position()?;
        let entry = self.entries[position].take()?;
        self.len -= 1;
        Some(entry.payload)
    }

    /// Tear down and drop `entity`'s component. Returns `false` if there was
    /// none.
    pub fn destroy(&mut self, entity: Handle) -> bool {
        let Some(entry) = self.entry_mut(entity) else {
            return false;
        };
        if entry.initialized {
            entry.payload.destroy(entity);
        }
        self.remove(entity).is_some()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Components in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (Handle, &T)> {
        self.entries
            .iter()
            .flatten()
            .map(|entry| (entry.handle, &entry.payload))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Handle, &mut T)> {
        self.entries
            .iter_mut()
            .flatten()
            .map(|entry| (entry.handle, &mut entry.payload))
    }
}

impl<T: Component> Default for ComponentPool<T> {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Type erasure
// ---------------------------------------------------------------------------

trait AnyPool {
    fn type_name(&self) -> &'static str;
    fn initialize(&mut self, entity: Handle) -> bool;
    fn destroy(&mut self, entity: Handle) -> bool;
    fn len(&self) -> usize;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Component> AnyPool for ComponentPool<T> {
    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn initialize(&mut self, entity: Handle) -> bool {
        ComponentPool::initialize(self, entity)
    }

    fn destroy(&mut self, entity: Handle) -> bool {
        ComponentPool::destroy(self, entity)
    }

    fn len(&self) -> usize {
        ComponentPool::len(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// ---------------------------------------------------------------------------
// ComponentDirectory
// ---------------------------------------------------------------------------

/// Maps component types to their pools, in registration order.
#[derive(Default)]
pub struct ComponentDirectory {
    index: HashMap<TypeId, usize>,
    pools: Vec<Box<dyn AnyPool>>,
}

impl ComponentDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// The pool for `T`, created on first use.
    pub fn pool<T: Component>(&mut self) -> &mut ComponentPool<T> {
        let type_id = TypeId::of::<T>();
        let slot = match self.index.get(&type_id) {
            Some(&slot) => slot,
            None => {
                let slot = self.pools.len();
                self.pools.push(Box::new(ComponentPool::<T>::new()));
                self.index.insert(type_id, slot);
                debug!(
                    component = std::any::type_name::<T>(),
                    slot, "component pool registered"
                );
                slot
            }
        };
        self.pools[slot]
            .as_any_mut()
            .downcast_mut::<ComponentPool<T>>()
            .expect("component pool stored under a mismatched TypeId")
    }

    /// The pool for `T`, if the type has been used.
    pub fn get_pool<T: Component>(&self) -> Option<&ComponentPool<T>> {
        let slot = *self.index.get(&TypeId::of::<T>())?;
        self.pools[slot].as_any().downcast_ref::<ComponentPool<T>>()
    }

    pub fn get_pool_mut<T: Component>(&mut self) -> Option<&mut ComponentPool<T>> {
        let slot = *self.index.get(&TypeId::of::<T>())?;
        self.pools[slot]
            .as_any_mut()
            .downcast_mut::<ComponentPool<T>>()
    }

    /// Initialize `entity`'s component in every pool, stopping at the first
    /// one that fails.
    pub fn initialize_all(&mut self, entity: Handle) -> bool {
        for pool in &mut self.pools {
            if !pool.initialize(entity) {
                debug!(entity = %entity, component = pool.type_name(), "component initialization failed");
                return false;
            }
        }
        true
    }

    /// Destroy `entity`'s component in every pool. Returns how many
    /// components were removed.
    pub fn destroy_all(&mut self, entity: Handle) -> usize {
        let mut removed = 0;
        for pool in &mut self.pools {
            if pool.destroy(entity) {
                removed += 1;
            }
        }
        removed
    }

    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    /// Total components across all pools.
    pub fn component_count(&self) -> usize {
        self.pools.iter().map(|pool| pool.len()).sum()
    }

    /// Type names of the registered component types, in registration order.
    pub fn registered_names(&self) -> Vec<&'static str> {
        self.pools.iter().map(|pool| pool.type_name()).collect()
    }
}

impl fmt::Debug for ComponentDirectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentDirectory")
            .field("pools", &self.registered_names())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// World component API
// ---------------------------------------------------------------------------

impl World {
    /// Attach a default `T` to `entity` and return it.
    ///
    /// Returns `None` if `entity` is not valid. If the entity has already
    /// been created the component is initialized on the spot, and dropped
    /// again (returning `None`) if initialization fails; otherwise it is
    /// initialized when the entity's creation is processed. If `entity`
    /// already has a `T`, that component is returned untouched.
    pub fn create<T: Component>(&mut self, entity: Handle) -> Option<&mut T> {
        let flags = self.entities.flags(entity)?;
        let pool = self.components.pool::<T>();
        if !pool.contains(entity) {
            pool.insert(entity, T::default());
            if flags.contains(EntityFlags::CREATED) && !pool.initialize(entity) {
                debug!(
                    entity = %entity,
                    component = std::any::type_name::<T>(),
                    "component rejected by initialize on a created entity"
                );
                pool.destroy(entity);
                return None;
            }
        }
        pool.get_mut(entity)
    }

    pub fn lookup<T: Component>(&self, entity: Handle) -> Option<&T> {
        self.components.get_pool::<T>()?.get(entity)
    }

    pub fn lookup_mut<T: Component>(&mut self, entity: Handle) -> Option<&mut T> {
        self.components.get_pool_mut::<T>()?.get_mut(entity)
    }

    /// See [`ComponentDirectory::pool`].
    pub fn pool<T: Component>(&mut self) -> &mut ComponentPool<T> {
        self.components.pool::<T>()
    }

    /// See [`ComponentDirectory::get_pool`].
    pub fn get_pool<T: Component>(&self) -> Option<&ComponentPool<T>> {
        self.components.get_pool::<T>()
    }

    pub fn components(&self) -> &ComponentDirectory {
        &self.components
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
