//! Intrusive List Module
//!
//! A doubly linked list whose link fields live beside each node in a
//! generational arena, rather than in separate wrapper allocations.
//!
//! Nodes are allocated once in a [`NodeArena`] and addressed by [`NodeKey`].
//! An [`IntrusiveList`] threads a circular ring through the arena slots,
//! terminated by a sentinel held in the list itself. A node belongs to at
//! most one list at a time; inserting a member or removing a non-member is
//! reported as a [`ListError`].

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::ListError;

static NEXT_LIST_ID: AtomicU64 = AtomicU64::new(1);

// == Handles ==
/// Identity of one list instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListId(u64);

impl ListId {
    fn next() -> Self {
        ListId(NEXT_LIST_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ListId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Generational handle to a node in a [`NodeArena`].
///
/// A handle outlives its node harmlessly: once the slot is freed (and
/// possibly reused) the stale handle no longer resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeKey {
    index: usize,
    generation: u64,
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cursor {
    Sentinel,
    Node(NodeKey),
}

#[derive(Debug, Clone, Copy)]
struct Links {
    prev: Cursor,
    next: Cursor,
}

#[derive(Debug, Clone, Copy)]
struct Membership {
    owner: ListId,
    links: Links,
}

#[derive(Debug)]
struct Slot<T> {
    generation: u64,
    value: Option<T>,
    // Both links are set together with the owner, or none of them is.
    membership: Option<Membership>,
}

// == Node Arena ==
/// Slab of list nodes with per-slot link fields.
///
/// Freed slots are recycled; each reuse bumps the slot generation.
#[derive(Debug)]
pub struct NodeArena<T> {
    slots: Vec<Slot<T>>,
    free: Vec<usize>,
    len: usize,
}

impl<T> NodeArena<T> {
    // == Constructor ==
    /// Creates an empty arena.
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }

    /// Creates an empty arena with room for `capacity` nodes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            len: 0,
        }
    }

    // == Insert ==
    /// Allocates an unlinked node holding `value`.
    pub fn insert(&mut self, value: T) -> NodeKey {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index];
            slot.generation = slot.generation.wrapping_add(1);
            slot.value = Some(value);
            slot.membership = None;
            return NodeKey {
                index,
                generation: slot.generation,
            };
        }

        let index = self.slots.len();
        self.slots.push(Slot {
            generation: 0,
            value: Some(value),
            membership: None,
        });
        NodeKey {
            index,
            generation: 0,
        }
    }

    // == Remove ==
    /// Frees a node and returns its value.
    ///
    /// The node must first be removed from its list.
    pub fn remove(&mut self, key: NodeKey) -> Result<T, ListError> {
        let slot = self.slot_mut(key).ok_or(ListError::UnknownNode(key))?;
        if let Some(membership) = slot.membership {
            return Err(ListError::StillLinked {
                node: key,
                owner: membership.owner,
            });
        }
        let value = slot.value.take().ok_or(ListError::UnknownNode(key))?;
        self.free.push(key.index);
        self.len -= 1;
        Ok(value)
    }

    // == Accessors ==
    pub fn get(&self, key: NodeKey) -> Option<&T> {
        self.slot(key).and_then(|slot| slot.value.as_ref())
    }

    pub fn get_mut(&mut self, key: NodeKey) -> Option<&mut T> {
        self.slot_mut(key).and_then(|slot| slot.value.as_mut())
    }

    pub fn contains(&self, key: NodeKey) -> bool {
        self.slot(key).is_some()
    }

    /// Returns the list the node currently belongs to.
    pub fn owner(&self, key: NodeKey) -> Option<ListId> {
        self.slot(key)
            .and_then(|slot| slot.membership)
            .map(|membership| membership.owner)
    }

    /// Number of live nodes, linked or not.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn slot(&self, key: NodeKey) -> Option<&Slot<T>> {
        self.slots
            .get(key.index)
            .filter(|slot| slot.generation == key.generation && slot.value.is_some())
    }

    fn slot_mut(&mut self, key: NodeKey) -> Option<&mut Slot<T>> {
        self.slots
            .get_mut(key.index)
            .filter(|slot| slot.generation == key.generation && slot.value.is_some())
    }

    /// Links of a node reachable from a list ring.
    fn links_mut(&mut self, key: NodeKey) -> &mut Links {
        // Linked nodes cannot be freed, so every ring member resolves.
        &mut self
            .slot_mut(key)
            .and_then(|slot| slot.membership.as_mut())
            .expect("linked node missing from arena")
            .links
    }

    fn links(&self, key: NodeKey) -> Option<Links> {
        self.slot(key)
            .and_then(|slot| slot.membership)
            .map(|membership| membership.links)
    }
}

impl<T> Default for NodeArena<T> {
    fn default() -> Self {
        Self::new()
    }
}

// == Intrusive List ==
/// Circular, sentinel-terminated doubly linked list over a [`NodeArena`].
///
/// The list never owns its nodes; it only orders them. Every operation is
/// O(1) and the size is maintained incrementally.
#[derive(Debug)]
pub struct IntrusiveList {
    id: ListId,
    sentinel: Links,
    len: usize,
}

impl IntrusiveList {
    // == Constructor ==
    /// Creates an empty list whose sentinel links to itself.
    pub fn new() -> Self {
        Self {
            id: ListId::next(),
            sentinel: Links {
                prev: Cursor::Sentinel,
                next: Cursor::Sentinel,
            },
            len: 0,
        }
    }

    pub fn id(&self) -> ListId {
        self.id
    }

    // == Insert First ==
    /// Links `node` at the front of the list.
    ///
    /// Fails with [`ListError::AlreadyMember`] if the node is in any list.
    pub fn insert_first<T>(
        &mut self,
        arena: &mut NodeArena<T>,
        node: NodeKey,
    ) -> Result<(), ListError> {
        let first = self.sentinel.next;
        self.link(arena, node, Cursor::Sentinel, first)
    }

    // == Insert Last ==
    /// Links `node` at the back of the list.
    ///
    /// Fails with [`ListError::AlreadyMember`] if the node is in any list.
    pub fn insert_last<T>(
        &mut self,
        arena: &mut NodeArena<T>,
        node: NodeKey,
    ) -> Result<(), ListError> {
        let last = self.sentinel.prev;
        self.link(arena, node, last, Cursor::Sentinel)
    }

    // == Peek ==
    pub fn peek_first(&self) -> Option<NodeKey> {
        match self.sentinel.next {
            Cursor::Node(key) => Some(key),
            Cursor::Sentinel => None,
        }
    }

    pub fn peek_last(&self) -> Option<NodeKey> {
        match self.sentinel.prev {
            Cursor::Node(key) => Some(key),
            Cursor::Sentinel => None,
        }
    }

    // == Remove Ends ==
    /// Unlinks and returns the front node, if any.
    pub fn remove_first<T>(&mut self, arena: &mut NodeArena<T>) -> Option<NodeKey> {
        let first = self.peek_first()?;
        self.unlink(arena, first);
        Some(first)
    }

    /// Unlinks and returns the back node, if any.
    pub fn remove_last<T>(&mut self, arena: &mut NodeArena<T>) -> Option<NodeKey> {
        let last = self.peek_last()?;
        self.unlink(arena, last);
        Some(last)
    }

    // == Remove ==
    /// Unlinks `node` from this list.
    ///
    /// Fails with [`ListError::NotMember`] if the node does not belong to
    /// this list, which catches double removal and cross-list removal.
    pub fn remove<T>(&mut self, arena: &mut NodeArena<T>, node: NodeKey) -> Result<(), ListError> {
        if arena.owner(node) != Some(self.id) {
            return Err(ListError::NotMember {
                node,
                list: self.id,
            });
        }
        self.unlink(arena, node);
        Ok(())
    }

    // == Length ==
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    // == Iteration ==
    /// Iterates nodes from front to back.
    pub fn iter<'a, T>(&'a self, arena: &'a NodeArena<T>) -> Iter<'a, T> {
        Iter {
            arena,
            cursor: self.sentinel.next,
            remaining: self.len,
        }
    }

    fn link<T>(
        &mut self,
        arena: &mut NodeArena<T>,
        node: NodeKey,
        prev: Cursor,
        next: Cursor,
    ) -> Result<(), ListError> {
        let slot = arena.slot_mut(node).ok_or(ListError::UnknownNode(node))?;
        if let Some(membership) = slot.membership {
            return Err(ListError::AlreadyMember {
                node,
                owner: membership.owner,
            });
        }
        slot.membership = Some(Membership {
            owner: self.id,
            links: Links { prev, next },
        });

        self.set_next(arena, prev, Cursor::Node(node));
        self.set_prev(arena, next, Cursor::Node(node));
        self.len += 1;
        Ok(())
    }

    /// Unlinks a node known to be a member of this list.
    fn unlink<T>(&mut self, arena: &mut NodeArena<T>, node: NodeKey) {
        let links = *arena.links_mut(node);
        if let Some(slot) = arena.slot_mut(node) {
            slot.membership = None;
        }
        self.set_next(arena, links.prev, links.next);
        self.set_prev(arena, links.next, links.prev);
        self.len -= 1;
    }

    fn set_next<T>(&mut self, arena: &mut NodeArena<T>, at: Cursor, to: Cursor) {
        match at {
            Cursor::Sentinel => self.sentinel.next = to,
            Cursor::Node(key) => arena.links_mut(key).next = to,
        }
    }

    fn set_prev<T>(&mut self, arena: &mut NodeArena<T>, at: Cursor, to: Cursor) {
        match at {
            Cursor::Sentinel => self.sentinel.prev = to,
            Cursor::Node(key) => arena.links_mut(key).prev = to,
        }
    }
}

impl Default for IntrusiveList {
    fn default() -> Self {
        Self::new()
    }
}

/// Front-to-back iterator over an [`IntrusiveList`].
pub struct Iter<'a, T> {
    arena: &'a NodeArena<T>,
    cursor: Cursor,
    remaining: usize,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = (NodeKey, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        let Cursor::Node(key) = self.cursor else {
            return None;
        };
        let links = self.arena.links(key)?;
        let value = self.arena.get(key)?;
        self.cursor = links.next;
        self.remaining = self.remaining.saturating_sub(1);
        Some((key, value))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining))
    }
}
