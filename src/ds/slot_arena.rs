//! Vec-backed arena with free-list slot reuse.
//!
//! Backs [`IntrusiveList`](crate::ds::IntrusiveList): nodes live in slots and
//! link to each other by [`SlotId`], so a recency segment can move or unlink
//! a node in O(1) without pointer juggling.

/// Index of an occupied slot. Only valid for the arena that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId(pub(crate) usize);

impl SlotId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug)]
pub struct SlotArena<T> {
    slots: Vec<Option<T>>,
    free_list: Vec<usize>,
    len: usize,
}

impl<T> SlotArena<T> {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free_list: Vec::new(),
            len: 0,
        }
    }

    pub fn insert(&mut self, value: T) -> SlotId {
        let idx = match self.free_list.pop() {
            Some(idx) => {
                self.slots[idx] = Some(value);
                idx
            },
            None => {
                self.slots.push(Some(value));
                self.slots.len() - 1
            },
        };
        self.len += 1;
        SlotId(idx)
    }

    pub fn remove(&mut self, id: SlotId) -> Option<T> {
        let value = self.slots.get_mut(id.0)?.take()?;
        self.free_list.push(id.0);
        self.len -= 1;
        Some(value)
    }

    pub fn get(&self, id: SlotId) -> Option<&T> {
        self.slots.get(id.0).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, id: SlotId) -> Option<&mut T> {
        self.slots.get_mut(id.0).and_then(Option::as_mut)
    }

    pub fn contains(&self, id: SlotId) -> bool {
        self.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.free_list.clear();
        self.len = 0;
    }
}

impl<T> Default for SlotArena<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_remove_reuses_slots() {
        let mut arena = SlotArena::new();
        let a = arena.insert("a");
        let b = arena.insert("b");
        assert_eq!(arena.len(), 2);
        assert_eq!(arena.get(b), Some(&"b"));

        assert_eq!(arena.remove(a), Some("a"));
        assert_eq!(arena.remove(a), None);
        assert!(!arena.contains(a));

        let c = arena.insert("c");
        assert_eq!(c.index(), a.index());
        assert_eq!(arena.len(), 2);
    }

    #[test]
    fn clear_empties_arena() {
        let mut arena = SlotArena::with_capacity(4);
        let id = arena.insert(1);
        *arena.get_mut(id).unwrap() = 2;
        assert_eq!(arena.get(id), Some(&2));
        arena.clear();
        assert!(arena.is_empty());
        assert_eq!(arena.get(id), None);
    }
}
