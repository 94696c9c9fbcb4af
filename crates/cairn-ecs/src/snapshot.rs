//! Entity snapshot and restore.
//!
//! An [`EntitySnapshot`] records the exact handles (index and generation) of
//! the live entities in a world, so another world can recreate entities that
//! external data still refers to by handle. Component data is not captured:
//! pools are populated by whoever owns the component types, after restore.
//!
//! The handle list carries a BLAKE3 checksum of its JSON encoding, checked
//! on load and before restore.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::entity::EntityFlags;
use crate::handle::Handle;
use crate::world::World;
use crate::EcsError;

// ---------------------------------------------------------------------------
// EntitySnapshot
// ---------------------------------------------------------------------------

/// Raw handles of a world's entities, in slot order, plus their checksum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    /// Packed handles (see [`Handle::to_raw`]).
    pub entities: Vec<u64>,
    /// BLAKE3 hex digest of `entities` encoded as JSON.
    pub checksum: String,
}

impl EntitySnapshot {
    pub fn new(handles: impl IntoIterator<Item = Handle>) -> Self {
        let entities: Vec<u64> = handles.into_iter().map(Handle::to_raw).collect();
        let checksum = compute_checksum(&entities);
        Self { entities, checksum }
    }

    pub fn handles(&self) -> impl Iterator<Item = Handle> + '_ {
        self.entities.iter().copied().map(Handle::from_raw)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Recompute the checksum and compare it with the stored one.
    pub fn verify(&self) -> Result<(), EcsError> {
        let computed = compute_checksum(&self.entities);
        if computed != self.checksum {
            return Err(EcsError::SnapshotChecksumMismatch {
                expected: self.checksum.clone(),
                computed,
            });
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<String, EcsError> {
        serde_json::to_string(self).map_err(|e| EcsError::SnapshotFormat {
            details: e.to_string(),
        })
    }

    /// Parse a snapshot and verify its checksum.
    pub fn from_json(json: &str) -> Result<Self, EcsError> {
        let snapshot: EntitySnapshot =
            serde_json::from_str(json).map_err(|e| EcsError::SnapshotFormat {
                details: e.to_string(),
            })?;
        snapshot.verify()?;
        Ok(snapshot)
    }
}

fn compute_checksum(entities: &[u64]) -> String {
    let json_bytes =
        serde_json::to_vec(entities).expect("a list of integers is always JSON-serializable");
    blake3::hash(&json_bytes).to_hex().to_string()
}

// ---------------------------------------------------------------------------
// World capture/restore
// ---------------------------------------------------------------------------

impl World {
    /// Snapshot every live entity that is not waiting to be destroyed.
    ///
    /// Entities whose creation has not been processed yet are included.
    pub fn capture_entities(&self) -> EntitySnapshot {
        let handles = self
            .entities
            .handles()
            .iter()
            .filter(|(_, flags)| !flags.contains(EntityFlags::DESTROY))
            .map(|(handle, _)| handle);
        EntitySnapshot::new(handles)
    }

    /// Recreate the entities in `snapshot` with their exact handles.
    ///
    /// Each entity is queued for creation as with
    /// [`create_entity`](World::create_entity); call
    /// [`process_commands`](World::process_commands) to create them.
    ///
    /// # Errors
    ///
    /// [`EcsError::SnapshotChecksumMismatch`] if the snapshot was altered, or
    /// the allocator's error for the first handle that cannot be recreated.
    /// In the latter case the entities restored so far are queued for
    /// destruction before the error is returned.
    pub fn restore_entities(&mut self, snapshot: &EntitySnapshot) -> Result<Vec<Handle>, EcsError> {
        snapshot.verify()?;

        let mut restored = Vec::with_capacity(snapshot.len());
        for requested in snapshot.handles() {
            match self.entities.create_entity_with(requested) {
                Ok(handle) => restored.push(handle),
                Err(error) => {
                    warn!(
                        entity = %requested,
                        error = %error,
                        rolled_back = restored.len(),
                        "snapshot restore failed"
                    );
                    for handle in restored {
                        self.entities.destroy_entity(handle);
                    }
                    return Err(error);
                }
            }
        }

        debug!(count = restored.len(), "entities restored from snapshot");
        Ok(restored)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
