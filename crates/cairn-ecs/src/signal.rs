//! Ordered publish/subscribe lists with short-circuiting dispatch.
//!
//! A [`Signal`] keeps its receivers in an arena of nodes linked by
//! `prev`/`next` indices, so subscribing at either end and unsubscribing by
//! [`SubscriptionId`] are O(1). Receivers take a mutable context `C` as their
//! first argument, which lets a receiver reach back into the object that owns
//! the signal (for example, creating entities from inside an entity event).
//!
//! [`dispatch`] walks a snapshot of the receiver order taken when dispatch
//! starts. Receivers removed mid-dispatch are skipped; receivers added
//! mid-dispatch first hear the next dispatch. A [`Collector`] folds results
//! and decides when to stop.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use tracing::warn;

/// A shareable receiver callback.
pub type Receiver<C, A, R> = Rc<RefCell<dyn FnMut(&mut C, A) -> R>>;

// ---------------------------------------------------------------------------
// Policies and ids
// ---------------------------------------------------------------------------

/// Whether the same receiver may appear more than once in a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionPolicy {
    /// Reject a receiver that is already subscribed (pointer identity).
    Unique,
    AllowDuplicates,
}

/// Where a new receiver is placed in the dispatch order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Front,
    Back,
}

/// Names one subscription. Stays unique even after its arena slot is reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId {
    slot: u32,
    generation: u32,
}

// ---------------------------------------------------------------------------
// Collectors
// ---------------------------------------------------------------------------

/// Folds receiver results during a dispatch.
pub trait Collector<R> {
    type Output;

    /// Record one result. Returning `false` stops the dispatch.
    fn collect(&mut self, value: R) -> bool;

    fn finish(self) -> Self::Output;
}

/// Unconditional fan-out for receivers that return nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct CollectAll;

impl Collector<()> for CollectAll {
    type Output = ();

    fn collect(&mut self, _value: ()) -> bool {
        true
    }

    fn finish(self) {}
}

/// Stops at the first `false` and reports it; reports `true` otherwise,
/// including when nobody is subscribed.
#[derive(Debug, Clone, Copy)]
pub struct CollectWhileTrue {
    result: bool,
}

impl Default for CollectWhileTrue {
    fn default() -> Self {
        Self { result: true }
    }
}

impl Collector<bool> for CollectWhileTrue {
    type Output = bool;

    fn collect(&mut self, value: bool) -> bool {
        self.result = value;
        value
    }

    fn finish(self) -> bool {
        self.result
    }
}

// ---------------------------------------------------------------------------
// Signal
// ---------------------------------------------------------------------------

struct Node<C, A, R> {
    receiver: Option<Receiver<C, A, R>>,
    generation: u32,
    prev: Option<u32>,
    next: Option<u32>,
}

/// An ordered list of receivers for one event type.
pub struct Signal<C, A, R> {
    nodes: Vec<Node<C, A, R>>,
    free: Vec<u32>,
    head: Option<u32>,
    tail: Option<u32>,
    len: usize,
}

impl<C, A, R> Signal<C, A, R> {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            len: 0,
        }
    }

    /// Add `receiver` under the given policies.
    ///
    /// Returns `None` when `policy` is [`SubscriptionPolicy::Unique`] and the
    /// receiver is already subscribed.
    pub fn subscribe(
        &mut self,
        receiver: Receiver<C, A, R>,
        policy: SubscriptionPolicy,
        priority: Priority,
    ) -> Option<SubscriptionId> {
        if policy == SubscriptionPolicy::Unique && self.contains_receiver(&receiver) {
            return None;
        }
        Some(self.link(receiver, priority))
    }

    /// Add `receiver`, allowing duplicates. Never fails.
    pub fn connect(&mut self, receiver: Receiver<C, A, R>, priority: Priority) -> SubscriptionId {
        self.link(receiver, priority)
    }

    fn link(&mut self, receiver: Receiver<C, A, R>, priority: Priority) -> SubscriptionId {
        let slot = match self.free.pop() {
            Some(slot) => slot,
            None => {
                self.nodes.push(Node {
                    receiver: None,
                    generation: 0,
                    prev: None,
                    next: None,
                });
                (self.nodes.len() - 1) as u32
            }
        };

        let (prev, next) = match priority {
            Priority::Front => (None, self.head),
            Priority::Back => (self.tail, None),
        };
        match prev {
            Some(p) => self.nodes[p as usize].next = Some(slot),
            None => self.head = Some(slot),
        }
        match next {
            Some(n) => self.nodes[n as usize].prev = Some(slot),
            None => self.tail = Some(slot),
        }

        let node = &mut self.nodes[slot as usize];
        node.receiver = Some(receiver);
        node.prev = prev;
        node.next = next;
        self.len += 1;

        SubscriptionId {
            slot,
            generation: node.generation,
        }
    }

    /// Remove a subscription. Returns `false` if it was already gone.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        if !self.contains(id) {
            return false;
        }
        let (prev, next) = {
            let node = &mut self.nodes[id.slot as usize];
            node.receiver = None;
            node.generation = node.generation.wrapping_add(1);
            (node.prev.take(), node.next.take())
        };
        match prev {
            Some(p) => self.nodes[p as usize].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.nodes[n as usize].prev = prev,
            None => self.tail = prev,
        }
        self.free.push(id.slot);
        self.len -= 1;
        true
    }

    /// Whether `id` is still subscribed.
    pub fn contains(&self, id: SubscriptionId) -> bool {
        self.nodes
            .get(id.slot as usize)
            .is_some_and(|node| node.receiver.is_some() && node.generation == id.generation)
    }

    fn contains_receiver(&self, receiver: &Receiver<C, A, R>) -> bool {
        let target = Rc::as_ptr(receiver) as *const ();
        self.nodes.iter().any(|node| {
            node.receiver
                .as_ref()
                .is_some_and(|existing| Rc::as_ptr(existing) as *const () == target)
        })
    }

    /// Receivers in dispatch order, paired with their ids.
    pub fn snapshot(&self) -> Vec<(SubscriptionId, Receiver<C, A, R>)> {
        let mut out = Vec::with_capacity(self.len);
        let mut cursor = self.head;
        while let Some(slot) = cursor {
            let node = &self.nodes[slot as usize];
            if let Some(receiver) = &node.receiver {
                out.push((
                    SubscriptionId {
                        slot,
                        generation: node.generation,
                    },
                    Rc::clone(receiver),
                ));
            }
            cursor = node.next;
        }
        out
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Drop every subscription.
    ///
    /// Slots are unlinked one by one, so ids issued before the call stay
    /// stale after their slots are reused.
    pub fn clear(&mut self) {
        while let Some(slot) = self.head {
            let id = SubscriptionId {
                slot,
                generation: self.nodes[slot as usize].generation,
            };
            self.unsubscribe(id);
        }
    }
}

impl<C, A, R> Default for Signal<C, A, R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C, A, R> fmt::Debug for Signal<C, A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("receivers", &self.len)
            .field("arena", &self.nodes.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Invoke every receiver of the signal that `select` picks out of `ctx`.
///
/// The signal is re-read through `select` before each call, so receivers may
/// subscribe or unsubscribe (on this or any other signal in `ctx`) while the
/// dispatch is running. A receiver that is already executing further up the
/// call stack is skipped rather than re-entered.
pub fn dispatch<C, A, R, K>(
    ctx: &mut C,
    select: fn(&C) -> &Signal<C, A, R>,
    args: A,
    mut collector: K,
) -> K::Output
where
    A: Clone,
    K: Collector<R>,
{
    let receivers = select(ctx).snapshot();
    for (id, receiver) in receivers {
        if !select(ctx).contains(id) {
            continue;
        }
        let result = match receiver.try_borrow_mut() {
            Ok(mut callback) => (*callback)(ctx, args.clone()),
            Err(_) => {
                warn!(?id, "receiver is already running; skipping re-entrant call");
                continue;
            }
        };
        if !collector.collect(result) {
            break;
        }
    }
    collector.finish()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
