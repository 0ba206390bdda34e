//! Arena-backed doubly linked list.
//!
//! The dispatch subsystem keeps its queues, caches and pool lists as
//! intrusive lists: O(1) unlink of a known element, O(1) push/pop at the
//! ends, ordered insertion by walking. `SlotList` gives the same shape
//! without raw pointers: elements live in a slot arena, neighbours are slot
//! indices, and a [`Link`] names one element. Every slot carries a
//! generation that is bumped when its element leaves, so a link to an
//! element that is gone (or whose slot was reused) simply resolves to
//! nothing.
//!
//! Vacated slots are chained into a free list and reused before the arena
//! grows. [`SlotList::try_reserve`] lets callers fail cleanly before an
//! insertion instead of aborting inside the allocator.

use std::collections::TryReserveError;

// ── Links ───────────────────────────────────────────────────────

/// Handle to one element of a [`SlotList`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Link {
    index: u32,
    generation: u32,
}

// ── Slots ───────────────────────────────────────────────────────

struct Slot<T> {
    value: Option<T>,
    prev: Option<u32>,
    /// Next element when occupied, next free slot when vacant.
    next: Option<u32>,
    generation: u32,
}

// ── The list ────────────────────────────────────────────────────

pub struct SlotList<T> {
    slots: Vec<Slot<T>>,
    head: Option<u32>,
    tail: Option<u32>,
    len: usize,
    free_head: Option<u32>,
    free_len: usize,
}

impl<T> Default for SlotList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SlotList<T> {
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            head: None,
            tail: None,
            len: 0,
            free_head: None,
            free_len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Make sure the next `additional` insertions will not allocate.
    pub fn try_reserve(&mut self, additional: usize) -> Result<(), TryReserveError> {
        match additional.checked_sub(self.free_len) {
            Some(grow) if grow > 0 => self.slots.try_reserve(grow),
            _ => Ok(()),
        }
    }

    fn occupy(&mut self, value: T) -> u32 {
        match self.free_head {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                self.free_head = slot.next;
                self.free_len -= 1;
                slot.value = Some(value);
                slot.prev = None;
                slot.next = None;
                index
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    value: Some(value),
                    prev: None,
                    next: None,
                    generation: 0,
                });
                index
            }
        }
    }

    fn link_of(&self, index: u32) -> Link {
        Link {
            index,
            generation: self.slots[index as usize].generation,
        }
    }

    fn resolve(&self, link: Link) -> Option<&Slot<T>> {
        self.slots
            .get(link.index as usize)
            .filter(|slot| slot.generation == link.generation && slot.value.is_some())
    }

    /// Append at the tail.
    pub fn push_back(&mut self, value: T) -> Link {
        let index = self.occupy(value);
        let slot = &mut self.slots[index as usize];
        slot.prev = self.tail;
        match self.tail {
            Some(tail) => self.slots[tail as usize].next = Some(index),
            None => self.head = Some(index),
        }
        self.tail = Some(index);
        self.len += 1;
        self.link_of(index)
    }

    /// Prepend at the head.
    pub fn push_front(&mut self, value: T) -> Link {
        match self.head {
            Some(head) => self.insert_at(head, value),
            None => self.push_back(value),
        }
    }

    /// Insert `value` right before the element `at`. A stale `at` hands the
    /// value back.
    pub fn insert_before(&mut self, at: Link, value: T) -> Result<Link, T> {
        if self.resolve(at).is_none() {
            return Err(value);
        }
        Ok(self.insert_at(at.index, value))
    }

    fn insert_at(&mut self, at: u32, value: T) -> Link {
        let index = self.occupy(value);
        let prev = self.slots[at as usize].prev;
        {
            let slot = &mut self.slots[index as usize];
            slot.prev = prev;
            slot.next = Some(at);
        }
        self.slots[at as usize].prev = Some(index);
        match prev {
            Some(prev) => self.slots[prev as usize].next = Some(index),
            None => self.head = Some(index),
        }
        self.len += 1;
        self.link_of(index)
    }

    /// Insert `value` before the first element `cur` for which
    /// `goes_before(&value, cur)` holds, or at the tail if there is none.
    ///
    /// With a strict comparison (`new < cur`) elements that compare equal
    /// keep their insertion order.
    pub fn insert_sorted_by<F>(&mut self, value: T, mut goes_before: F) -> Link
    where
        F: FnMut(&T, &T) -> bool,
    {
        let mut cursor = self.head;
        while let Some(index) = cursor {
            let slot = &self.slots[index as usize];
            if let Some(cur) = &slot.value {
                if goes_before(&value, cur) {
                    return self.insert_at(index, value);
                }
            }
            cursor = slot.next;
        }
        self.push_back(value)
    }

    pub fn front(&self) -> Option<&T> {
        self.head
            .and_then(|index| self.slots[index as usize].value.as_ref())
    }

    pub fn get(&self, link: Link) -> Option<&T> {
        self.resolve(link).and_then(|slot| slot.value.as_ref())
    }

    pub fn contains(&self, link: Link) -> bool {
        self.resolve(link).is_some()
    }

    pub fn pop_front(&mut self) -> Option<T> {
        let head = self.head?;
        let link = self.link_of(head);
        self.remove(link)
    }

    /// Unlink and return the element `link` names.
    pub fn remove(&mut self, link: Link) -> Option<T> {
        self.resolve(link)?;

        let index = link.index;
        let (prev, next) = {
            let slot = &self.slots[index as usize];
            (slot.prev, slot.next)
        };
        match prev {
            Some(prev) => self.slots[prev as usize].next = next,
            None => self.head = next,
        }
        match next {
            Some(next) => self.slots[next as usize].prev = prev,
            None => self.tail = prev,
        }

        let slot = &mut self.slots[index as usize];
        let value = slot.value.take();
        slot.generation = slot.generation.wrapping_add(1);
        slot.prev = None;
        slot.next = self.free_head;
        self.free_head = Some(index);
        self.free_len += 1;
        self.len -= 1;
        value
    }

    /// Walk the list head to tail.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            list: self,
            cursor: self.head,
        }
    }

    /// Remove every element, head first.
    pub fn drain(&mut self) -> Drain<'_, T> {
        Drain { list: self }
    }
}

pub struct Iter<'a, T> {
    list: &'a SlotList<T>,
    cursor: Option<u32>,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = (Link, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.cursor?;
        let slot = &self.list.slots[index as usize];
        self.cursor = slot.next;
        let value = slot.value.as_ref()?;
        Some((self.list.link_of(index), value))
    }
}

pub struct Drain<'a, T> {
    list: &'a mut SlotList<T>,
}

impl<T> Iterator for Drain<'_, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.list.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(list: &SlotList<u32>) -> Vec<u32> {
        list.iter().map(|(_, v)| *v).collect()
    }

    #[test]
    fn push_and_pop_keep_fifo_order() {
        let mut list = SlotList::new();
        list.push_back(1);
        list.push_back(2);
        list.push_front(0);

        assert_eq!(collect(&list), vec![0, 1, 2]);
        assert_eq!(list.pop_front(), Some(0));
        assert_eq!(list.front(), Some(&1));
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn sorted_insert_keeps_ties_in_submission_order() {
        let mut list: SlotList<(u32, char)> = SlotList::new();
        for entry in [(30, 'a'), (10, 'b'), (20, 'c'), (10, 'd'), (30, 'e')] {
            list.insert_sorted_by(entry, |new, cur| new.0 < cur.0);
        }

        let order: Vec<char> = list.iter().map(|(_, e)| e.1).collect();
        assert_eq!(order, vec!['b', 'd', 'c', 'a', 'e']);
    }

    #[test]
    fn removed_links_go_stale() {
        let mut list = SlotList::new();
        let a = list.push_back(1);
        let b = list.push_back(2);

        assert_eq!(list.remove(a), Some(1));
        assert_eq!(list.remove(a), None);
        assert!(!list.contains(a));

        // The slot of `a` is reused; the old link must not see the new value.
        let c = list.push_back(3);
        assert_eq!(list.get(a), None);
        assert_eq!(list.get(c), Some(&3));
        assert_eq!(collect(&list), vec![2, 3]);
        assert_eq!(list.remove(b), Some(2));
    }

    #[test]
    fn removal_from_the_middle_relinks_neighbours() {
        let mut list = SlotList::new();
        list.push_back(1);
        let mid = list.push_back(2);
        let last = list.push_back(3);

        list.remove(mid);
        assert_eq!(collect(&list), vec![1, 3]);

        assert!(list.insert_before(last, 9).is_ok());
        assert_eq!(collect(&list), vec![1, 9, 3]);
    }

    #[test]
    fn insert_before_a_stale_link_hands_the_value_back() {
        let mut list = SlotList::new();
        let gone = list.push_back(1);
        list.remove(gone);

        assert_eq!(list.insert_before(gone, 7), Err(7));
        assert!(list.is_empty());
    }

    #[test]
    fn drain_empties_in_order() {
        let mut list = SlotList::new();
        for v in 0..5u32 {
            list.push_back(v);
        }
        let drained: Vec<u32> = list.drain().collect();
        assert_eq!(drained, vec![0, 1, 2, 3, 4]);
        assert!(list.is_empty());
        assert_eq!(list.front(), None);
    }

    #[test]
    fn reserve_counts_free_slots() {
        let mut list = SlotList::new();
        let links: Vec<Link> = (0..4u32).map(|v| list.push_back(v)).collect();
        for link in links {
            list.remove(link);
        }
        let capacity = list.slots.capacity();

        assert!(list.try_reserve(4).is_ok());
        assert_eq!(list.slots.capacity(), capacity);
        assert!(list.try_reserve(6).is_ok());
        assert!(list.slots.capacity() >= 6);
    }
}
