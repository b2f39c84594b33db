//! Recency/arrival queue over cache slot indices.

/// Per-slot links. Slots that are not queued have `linked == false`.
#[derive(Debug, Clone, Copy, Default)]
struct Link {
    prev: Option<usize>,
    next: Option<usize>,
    linked: bool,
}

/// Doubly linked queue of slot indices, stored as index links in a vector.
///
/// The front holds the most recently inserted (or, under LRU, most recently
/// used) slot; the back is the next eviction victim. Every operation is O(1).
#[derive(Debug, Default)]
pub struct SlotQueue {
    links: Vec<Link>,
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
}

impl SlotQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            links: Vec::with_capacity(capacity),
            ..Self::default()
        }
    }

    fn ensure(&mut self, slot: usize) {
        if slot >= self.links.len() {
            self.links.resize(slot + 1, Link::default());
        }
    }

    /// Insert `slot` at the front.
    ///
    /// # Panics
    /// Panics if the slot is already queued.
    pub fn push_front(&mut self, slot: usize) {
        self.ensure(slot);
        assert!(!self.links[slot].linked, "slot {slot} queued twice");

        self.links[slot] = Link {
            prev: None,
            next: self.head,
            linked: true,
        };
        match self.head {
            Some(old_head) => self.links[old_head].prev = Some(slot),
            None => self.tail = Some(slot),
        }
        self.head = Some(slot);
        self.len += 1;
    }

    /// Remove `slot` from the queue. Returns false if it was not queued.
    pub fn unlink(&mut self, slot: usize) -> bool {
        if !self.contains(slot) {
            return false;
        }
        let Link { prev, next, .. } = self.links[slot];

        match prev {
            Some(p) => self.links[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.links[n].prev = prev,
            None => self.tail = prev,
        }
        self.links[slot] = Link::default();
        self.len -= 1;
        true
    }

    /// Move a queued slot to the front.
    pub fn move_to_front(&mut self, slot: usize) {
        if self.head == Some(slot) {
            return;
        }
        if self.unlink(slot) {
            self.push_front(slot);
        }
    }

    #[inline]
    pub fn contains(&self, slot: usize) -> bool {
        self.links.get(slot).is_some_and(|link| link.linked)
    }

    #[inline]
    pub fn front(&self) -> Option<usize> {
        self.head
    }

    #[inline]
    pub fn back(&self) -> Option<usize> {
        self.tail
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Slot indices from front to back.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        std::iter::successors(self.head, move |&slot| self.links[slot].next)
    }
}
