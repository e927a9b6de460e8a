//! Doubly linked recency list backed by a [`SlotArena`].
//!
//! Nodes are linked by [`SlotId`], giving each element a stable handle and
//! O(1) move-to-front / unlink. One list per striped recency segment: the
//! head is the most recently touched entry, the tail the eviction candidate.
//!
//! ```text
//!   head (MRU) ─► [id_4] ◄──► [id_1] ◄──► [id_7] ◄── tail (LRU)
//! ```
//!
//! `debug_validate_invariants()` is available in debug/test builds.

use crate::ds::slot_arena::{SlotArena, SlotId};

#[derive(Debug)]
struct Node<T> {
    value: T,
    prev: Option<SlotId>,
    next: Option<SlotId>,
}

#[derive(Debug)]
pub struct IntrusiveList<T> {
    arena: SlotArena<Node<T>>,
    head: Option<SlotId>,
    tail: Option<SlotId>,
}

impl<T> IntrusiveList<T> {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Creates an empty list with reserved node capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            arena: SlotArena::with_capacity(capacity),
            head: None,
            tail: None,
        }
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    pub fn contains(&self, id: SlotId) -> bool {
        self.arena.contains(id)
    }

    /// Value at the tail (least recent).
    pub fn back(&self) -> Option<&T> {
        self.tail
            .and_then(|id| self.arena.get(id).map(|node| &node.value))
    }

    pub fn get(&self, id: SlotId) -> Option<&T> {
        self.arena.get(id).map(|node| &node.value)
    }

    /// Iterates from head (most recent) to tail.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            list: self,
            current: self.head,
        }
    }

    /// Inserts at the head and returns the node handle.
    pub fn push_front(&mut self, value: T) -> SlotId {
        let id = self.arena.insert(Node {
            value,
            prev: None,
            next: self.head,
        });
        match self.head {
            Some(head) => {
                if let Some(node) = self.arena.get_mut(head) {
                    node.prev = Some(id);
                }
            },
            None => self.tail = Some(id),
        }
        self.head = Some(id);
        id
    }

    /// Removes and returns the tail value.
    pub fn pop_back(&mut self) -> Option<T> {
        let id = self.tail?;
        self.remove(id)
    }

    pub fn remove(&mut self, id: SlotId) -> Option<T> {
        self.detach(id)?;
        self.arena.remove(id).map(|node| node.value)
    }

    /// Moves a node to the head; returns `false` if `id` is not in the list.
    pub fn move_to_front(&mut self, id: SlotId) -> bool {
        if !self.arena.contains(id) {
            return false;
        }
        if self.head == Some(id) {
            return true;
        }
        self.detach(id);
        self.attach_front(id);
        true
    }

    pub fn clear(&mut self) {
        self.arena.clear();
        self.head = None;
        self.tail = None;
    }

    fn detach(&mut self, id: SlotId) -> Option<()> {
        let (prev, next) = {
            let node = self.arena.get(id)?;
            (node.prev, node.next)
        };

        match prev {
            Some(prev_id) => {
                if let Some(prev_node) = self.arena.get_mut(prev_id) {
                    prev_node.next = next;
                }
            },
            None => self.head = next,
        }

        match next {
            Some(next_id) => {
                if let Some(next_node) = self.arena.get_mut(next_id) {
                    next_node.prev = prev;
                }
            },
            None => self.tail = prev,
        }

        if let Some(node) = self.arena.get_mut(id) {
            node.prev = None;
            node.next = None;
        }
        Some(())
    }

    fn attach_front(&mut self, id: SlotId) {
        let old_head = self.head;
        if let Some(node) = self.arena.get_mut(id) {
            node.prev = None;
            node.next = old_head;
        } else {
            return;
        }
        match old_head {
            Some(old_head) => {
                if let Some(head_node) = self.arena.get_mut(old_head) {
                    head_node.prev = Some(id);
                }
            },
            None => self.tail = Some(id),
        }
        self.head = Some(id);
    }

    #[cfg(any(test, debug_assertions))]
    pub fn debug_validate_invariants(&self) {
        if self.head.is_none() || self.tail.is_none() {
            assert!(self.head.is_none());
            assert!(self.tail.is_none());
            assert_eq!(self.len(), 0);
            return;
        }

        let mut count = 0usize;
        let mut current = self.head;
        let mut prev = None;
        while let Some(id) = current {
            let node = self.arena.get(id).expect("linked node missing from arena");
            assert_eq!(node.prev, prev);
            if node.next.is_none() {
                assert_eq!(self.tail, Some(id));
            }
            prev = Some(id);
            current = node.next;
            count += 1;
            assert!(count <= self.len(), "cycle in recency list");
        }
        assert_eq!(count, self.len());
    }
}

impl<T> Default for IntrusiveList<T> {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Iter<'a, T> {
    list: &'a IntrusiveList<T>,
    current: Option<SlotId>,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.current?;
        let node = self.list.arena.get(id)?;
        self.current = node.next;
        Some(&node.value)
    }
}
