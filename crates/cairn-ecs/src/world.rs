//! The [`World`]: entity lifecycle plus component storage.
//!
//! Lifecycle operations live in [`entity`](crate::entity), component
//! operations in [`component`](crate::component) and snapshot support in
//! [`snapshot`](crate::snapshot); each adds its own `impl World` block.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use tracing::debug;

use crate::component::ComponentDirectory;
use crate::config::WorldConfig;
use crate::entity::EntityManager;
use crate::handle::Handle;
use crate::signal::{Priority, Receiver, SubscriptionId, SubscriptionPolicy};
use crate::EcsError;

/// Entity handles, their lifecycle events, and component pools.
///
/// `World` is single-threaded: receivers are `Rc`-shared, so it is neither
/// `Send` nor `Sync`.
pub struct World {
    pub(crate) entities: EntityManager,
    pub(crate) components: ComponentDirectory,
    config: WorldConfig,
}

impl World {
    pub fn new() -> Self {
        Self::build(WorldConfig::default())
    }

    /// Create a world with custom limits.
    ///
    /// # Errors
    ///
    /// [`EcsError::InvalidConfig`] if `config` fails validation.
    pub fn with_config(config: WorldConfig) -> Result<Self, EcsError> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: WorldConfig) -> Self {
        let mut world = Self {
            entities: EntityManager::new(&config),
            components: ComponentDirectory::new(),
            config,
        };
        world.attach_component_hooks();
        world
    }

    /// Subscribe the component directory to the entity events, behind any
    /// receivers added later at the front.
    fn attach_component_hooks(&mut self) {
        let on_create: Receiver<World, Handle, bool> =
            Rc::new(RefCell::new(|world: &mut World, entity: Handle| {
                world.components.initialize_all(entity)
            }));
        let on_destroy: Receiver<World, Handle, ()> =
            Rc::new(RefCell::new(|world: &mut World, entity: Handle| {
                let removed = world.components.destroy_all(entity);
                if removed > 0 {
                    debug!(entity = %entity, removed, "components destroyed");
                }
            }));
        self.entities
            .on_create
            .subscribe(on_create, SubscriptionPolicy::Unique, Priority::Back);
        self.entities
            .on_destroy
            .subscribe(on_destroy, SubscriptionPolicy::Unique, Priority::Back);
    }

    // -----------------------------------------------------------------------
    // Subscriptions
    // -----------------------------------------------------------------------

    /// Listen for entity creation. Returning `false` vetoes the creation.
    ///
    /// `Priority::Back` receivers added after the world was built run after
    /// the component hooks, so they see initialized components.
    pub fn subscribe_entity_create<F>(&mut self, receiver: F, priority: Priority) -> SubscriptionId
    where
        F: FnMut(&mut World, Handle) -> bool + 'static,
    {
        self.entities
            .on_create
            .connect(Rc::new(RefCell::new(receiver)), priority)
    }

    pub fn subscribe_entity_destroy<F>(&mut self, receiver: F, priority: Priority) -> SubscriptionId
    where
        F: FnMut(&mut World, Handle) + 'static,
    {
        self.entities
            .on_destroy
            .connect(Rc::new(RefCell::new(receiver)), priority)
    }

    /// Subscribe a shared receiver under an explicit policy. Returns `None`
    /// if `policy` is unique and the receiver is already subscribed.
    pub fn subscribe_entity_create_shared(
        &mut self,
        receiver: Receiver<World, Handle, bool>,
        policy: SubscriptionPolicy,
        priority: Priority,
    ) -> Option<SubscriptionId> {
        self.entities.on_create.subscribe(receiver, policy, priority)
    }

    pub fn subscribe_entity_destroy_shared(
        &mut self,
        receiver: Receiver<World, Handle, ()>,
        policy: SubscriptionPolicy,
        priority: Priority,
    ) -> Option<SubscriptionId> {
        self.entities.on_destroy.subscribe(receiver, policy, priority)
    }

    pub fn unsubscribe_entity_create(&mut self, id: SubscriptionId) -> bool {
        self.entities.on_create.unsubscribe(id)
    }

    pub fn unsubscribe_entity_destroy(&mut self, id: SubscriptionId) -> bool {
        self.entities.on_destroy.unsubscribe(id)
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    pub fn entities(&self) -> &EntityManager {
        &self.entities
    }

    pub fn pending_command_count(&self) -> usize {
        self.entities.pending_command_count()
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for World {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("World")
            .field("entities", &self.entities)
            .field("components", &self.components)
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_world_has_component_hooks() {
        let world = World::new();
        assert_eq!(world.entities.on_create.len(), 1);
        assert_eq!(world.entities.on_destroy.len(), 1);
        assert_eq!(world.entity_count(), 0);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = WorldConfig {
            max_drain_iterations: 0,
            ..WorldConfig::default()
        };
        assert!(matches!(
            World::with_config(config),
            Err(EcsError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn custom_config_reaches_allocator() {
        let config = WorldConfig {
            cache_size: 4,
            ..WorldConfig::default()
        };
        let mut world = World::with_config(config).unwrap();
        world.create_entity().unwrap();
        assert_eq!(world.entities().handles().cache_size(), 4);
        assert_eq!(world.entities().handles().total_slots(), 5);
        assert_eq!(world.config().cache_size, 4);
    }

    #[test]
    fn unsubscribe_by_id() {
        let mut world = World::new();
        let id = world.subscribe_entity_create(|_: &mut World, _: Handle| false, Priority::Front);
        assert!(world.unsubscribe_entity_create(id));
        assert!(!world.unsubscribe_entity_create(id));

        let e = world.create_entity().unwrap();
        world.process_commands();
        assert!(world.is_entity_created(e));
    }

    #[test]
    fn shared_receiver_respects_unique_policy() {
        let mut world = World::new();
        let receiver: Receiver<World, Handle, ()> =
            Rc::new(RefCell::new(|_: &mut World, _: Handle| {}));
        assert!(world
            .subscribe_entity_destroy_shared(
                Rc::clone(&receiver),
                SubscriptionPolicy::Unique,
                Priority::Back
            )
            .is_some());
        assert!(world
            .subscribe_entity_destroy_shared(receiver, SubscriptionPolicy::Unique, Priority::Back)
            .is_none());
    }

    #[test]
    fn debug_output_names_parts() {
        let world = World::new();
        let text = format!("{world:?}");
        assert!(text.contains("EntityManager"));
        assert!(text.contains("ComponentDirectory"));
    }
}
