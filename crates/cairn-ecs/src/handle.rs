//! Generational handles and the slot allocator that issues them.
//!
//! A [`Handle`] names a slot by its 1-based index plus the slot's generation
//! at the time the handle was issued. Destroying a handle bumps the slot's
//! generation, so every outstanding copy of the old handle is immediately
//! stale. Index 0 is reserved for [`Handle::INVALID`].

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::VecDeque;
use std::fmt;
use tracing::{debug, warn};

use crate::config::{DEFAULT_CACHE_SIZE, DEFAULT_MAX_GENERATION};
use crate::EcsError;

/// Highest slot count the 1-based `u32` index space can address.
const MAX_SLOTS: usize = u32::MAX as usize;

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// A generational slot identifier.
///
/// Two handles are equal only when both index and generation match. Handles
/// order by slot index first; generation only breaks ties between handles of
/// the same slot, which are never live at the same time.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Handle {
    index: u32,
    generation: u32,
}

impl Handle {
    /// The reserved "no object" handle.
    pub const INVALID: Handle = Handle {
        index: 0,
        generation: 0,
    };

    /// Build a handle from its parts.
    ///
    /// Only the allocator hands out live handles; this constructor exists for
    /// deserialization and tests.
    #[inline]
    pub const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// 1-based slot index. Zero means invalid.
    #[inline]
    pub const fn index(self) -> u32 {
        self.index
    }

    /// Reuse count of the slot at the time this handle was issued.
    #[inline]
    pub const fn generation(self) -> u32 {
        self.generation
    }

    /// Whether the index is outside the reserved zero slot. Says nothing
    /// about whether the handle is still live in any allocator.
    #[inline]
    pub const fn is_valid(self) -> bool {
        self.index != 0
    }

    /// Packed `[generation: u32 | index: u32]` form.
    #[inline]
    pub const fn to_raw(self) -> u64 {
        (self.generation as u64) << 32 | self.index as u64
    }

    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        Self {
            index: raw as u32,
            generation: (raw >> 32) as u32,
        }
    }

    /// Zero-based position of this handle's slot in a dense table.
    #[inline]
    pub(crate) fn position(self) -> Option<usize> {
        if self.is_valid() {
            Some(self.index as usize - 1)
        } else {
            None
        }
    }
}

impl Default for Handle {
    fn default() -> Self {
        Self::INVALID
    }
}

impl PartialOrd for Handle {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Handle {
    fn cmp(&self, other: &Self) -> Ordering {
        self.index
            .cmp(&other.index)
            .then(self.generation.cmp(&other.generation))
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({}v{})", self.index, self.generation)
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

// ---------------------------------------------------------------------------
// Slot
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Slot<T> {
    generation: u32,
    valid: bool,
    retired: bool,
    payload: T,
}

// ---------------------------------------------------------------------------
// HandleAllocator
// ---------------------------------------------------------------------------

/// Issues, resolves and recycles [`Handle`]s over a growable slot table.
///
/// Each slot owns a default-constructed payload of type `T`. Freed slot
/// indices go to the tail of a FIFO free-list, and the allocator keeps at
/// least `cache_size` free slots in reserve so reuse rotates through many
/// slots instead of hammering the most recently freed one. A slot whose
/// generation reaches `max_generation` is retired and never handed out again.
#[derive(Debug)]
pub struct HandleAllocator<T> {
    slots: Vec<Slot<T>>,
    /// 1-based indices of recyclable slots, oldest first.
    free: VecDeque<u32>,
    cache_size: usize,
    max_generation: u32,
    valid_count: usize,
    retired_count: usize,
}

impl<T: Default> HandleAllocator<T> {
    /// Allocator with the default look-ahead cache (32) and generation limit.
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_CACHE_SIZE, DEFAULT_MAX_GENERATION)
    }

    /// Allocator with an explicit look-ahead cache and generation limit.
    ///
    /// `max_generation` is the generation at which a slot retires; a slot can
    /// therefore issue at most `max_generation` distinct handles. It is
    /// clamped to at least 1.
    pub fn with_limits(cache_size: usize, max_generation: u32) -> Self {
        Self {
            slots: Vec::new(),
            free: VecDeque::new(),
            cache_size,
            max_generation: max_generation.max(1),
            valid_count: 0,
            retired_count: 0,
        }
    }

    /// Issue a handle.
    ///
    /// With `None`, the oldest free slot is reused after topping the free-list
    /// up past `cache_size`. With `Some(request)`, the exact requested handle
    /// is reconstructed: its slot is pulled out of the free-list and its
    /// generation is forced forward to the requested value. That forward jump
    /// is the only place a slot's generation moves by more than one.
    ///
    /// # Errors
    ///
    /// - [`EcsError::InvalidHandle`] for a request with index 0 or a
    ///   generation at or past the retirement limit.
    /// - [`EcsError::RequestedHandleAlreadyCreated`] if the requested slot is
    ///   currently live.
    /// - [`EcsError::AlreadyCreated`] if the requested slot has already moved
    ///   past the requested generation, or is retired.
    /// - [`EcsError::HandleSpaceExhausted`] if no slot can be produced.
    pub fn create_handle(&mut self, request: Option<Handle>) -> Result<Handle, EcsError> {
        match request {
            None => self.allocate_next(),
            Some(requested) => self.allocate_requested(requested),
        }
    }

    fn allocate_next(&mut self) -> Result<Handle, EcsError> {
        while self.free.len() <= self.cache_size {
            if !self.grow() {
                break;
            }
        }
        let index = self
            .free
            .pop_front()
            .ok_or(EcsError::HandleSpaceExhausted {
                total_slots: self.slots.len(),
            })?;
        let slot = &mut self.slots[index as usize - 1];
        debug_assert!(!slot.valid && !slot.retired, "free-list held a live slot");
        slot.valid = true;
        self.valid_count += 1;
        Ok(Handle::new(index, slot.generation))
    }

    fn allocate_requested(&mut self, requested: Handle) -> Result<Handle, EcsError> {
        let Some(position) = requested.position() else {
            return Err(EcsError::InvalidHandle {
                handle: requested,
                reason: "slot index 0 is reserved",
            });
        };
        if requested.generation() >= self.max_generation {
            return Err(EcsError::InvalidHandle {
                handle: requested,
                reason: "generation is at or past the retirement limit",
            });
        }

        while self.slots.len() <= position {
            if !self.grow() {
                return Err(EcsError::HandleSpaceExhausted {
                    total_slots: self.slots.len(),
                });
            }
        }

        let slot = &self.slots[position];
        if slot.valid {
            return Err(EcsError::RequestedHandleAlreadyCreated { requested });
        }
        if slot.retired || slot.generation > requested.generation() {
            return Err(EcsError::AlreadyCreated {
                requested,
                current: slot.generation,
            });
        }

        let queued = self
            .free
            .iter()
            .position(|&index| index == requested.index())
            .ok_or(EcsError::AlreadyCreated {
                requested,
                current: slot.generation,
            })?;
        self.free.remove(queued);

        let slot = &mut self.slots[position];
        if slot.generation != requested.generation() {
            debug!(
                handle = %requested,
                from_generation = slot.generation,
                "reconstructed handle moves slot generation forward"
            );
        }
        slot.generation = requested.generation();
        slot.valid = true;
        self.valid_count += 1;
        Ok(requested)
    }

    /// Append one fresh slot to the table and the free-list tail.
    fn grow(&mut self) -> bool {
        if self.slots.len() >= MAX_SLOTS {
            return false;
        }
        self.slots.push(Slot::default());
        self.free.push_back(self.slots.len() as u32);
        true
    }

    /// Invalidate `handle`.
    ///
    /// The payload is reset to `T::default()` in place and the slot's
    /// generation advances. Returns `false` if the handle was not live.
    pub fn destroy_handle(&mut self, handle: Handle) -> bool {
        let Some(position) = self.live_position(handle) else {
            return false;
        };
        let slot = &mut self.slots[position];
        slot.payload = T::default();
        slot.valid = false;
        slot.generation += 1;
        self.valid_count -= 1;

        if slot.generation >= self.max_generation {
            slot.retired = true;
            self.retired_count += 1;
            warn!(
                slot = handle.index(),
                generation = slot.generation,
                "slot generation exhausted; retiring slot"
            );
        } else {
            self.free.push_back(handle.index());
        }
        true
    }

    // -- lookup -------------------------------------------------------------

    fn live_position(&self, handle: Handle) -> Option<usize> {
        let position = handle.position()?;
        let slot = self.slots.get(position)?;
        (slot.valid && slot.generation == handle.generation()).then_some(position)
    }

    /// Resolve a live handle to its payload.
    ///
    /// # Errors
    ///
    /// [`EcsError::StaleHandle`] if the index is out of range, the slot is
    /// free, or the generation does not match.
    pub fn lookup(&self, handle: Handle) -> Result<&T, EcsError> {
        self.live_position(handle)
            .map(|position| &self.slots[position].payload)
            .ok_or(EcsError::StaleHandle { handle })
    }

    /// Mutable form of [`lookup`](Self::lookup).
    pub fn lookup_mut(&mut self, handle: Handle) -> Result<&mut T, EcsError> {
        match self.live_position(handle) {
            Some(position) => Ok(&mut self.slots[position].payload),
            None => Err(EcsError::StaleHandle { handle }),
        }
    }

    /// Whether `handle` names a live slot at its current generation.
    pub fn is_valid(&self, handle: Handle) -> bool {
        self.live_position(handle).is_some()
    }
}

impl<T> HandleAllocator<T> {
    // -- iteration ----------------------------------------------------------

    /// First live handle in slot order.
    pub fn first_valid(&self) -> Option<Handle> {
        self.valid_from(0)
    }

    /// The next live handle after `after`'s slot.
    ///
    /// The position is recomputed from the table on every call, so the
    /// allocator may be mutated between steps of a cursor walk.
    pub fn next_valid_after(&self, after: Handle) -> Option<Handle> {
        self.valid_from(after.index() as usize)
    }

    fn valid_from(&self, start: usize) -> Option<Handle> {
        self.slots
            .iter()
            .enumerate()
            .skip(start)
            .find(|(_, slot)| slot.valid)
            .map(|(position, slot)| Handle::new(position as u32 + 1, slot.generation))
    }

    /// Live handles and payloads in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (Handle, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.valid)
            .map(|(position, slot)| {
                (Handle::new(position as u32 + 1, slot.generation), &slot.payload)
            })
    }

    /// Like [`iter`](Self::iter), with mutable payloads.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Handle, &mut T)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter(|(_, slot)| slot.valid)
            .map(|(position, slot)| {
                (
                    Handle::new(position as u32 + 1, slot.generation),
                    &mut slot.payload,
                )
            })
    }

    /// Live handles in slot order.
    pub fn handles(&self) -> impl Iterator<Item = Handle> + '_ {
        self.iter().map(|(handle, _)| handle)
    }

    // -- counters -----------------------------------------------------------

    /// Live handles.
    pub fn valid_count(&self) -> usize {
        self.valid_count
    }

    /// Released slots waiting for reuse, reserve included.
    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    /// Slots permanently removed from reuse.
    pub fn retired_count(&self) -> usize {
        self.retired_count
    }

    /// Slots ever allocated: live, free and retired.
    pub fn total_slots(&self) -> usize {
        self.slots.len()
    }

    /// Free slots held back before the oldest one is reused.
    pub fn cache_size(&self) -> usize {
        self.cache_size
    }

    /// Generation at which a slot is retired.
    pub fn max_generation(&self) -> u32 {
        self.max_generation
    }
}

impl<T: Default> Default for HandleAllocator<T> {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
