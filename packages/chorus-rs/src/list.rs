//! Ordered registrant list.
//!
//! A circular doubly-linked list threaded through a slot arena. Slot 0 is the
//! sentinel: `slots[0].next` is the first registrant, and walking `next`
//! from any registrant eventually returns to slot 0.
//!
//! ```text
//!   ┌──────────────────────────────────────────────┐
//!   ▼                                              │
//! [0: sentinel] ──► [3: A] ──► [1: B] ──► [4: C] ──┘
//! ```
//!
//! Links are slot indices, never references, so removal and relocation
//! cannot leave anything dangling. Outside callers only ever see
//! [`RegistrantId`]s, which carry the slot generation and stop resolving once
//! their registrant is removed.

use crate::core::{Listener, Matcher, Pattern, RegistrantId};

const SENTINEL: usize = 0;

/// One subscription record.
#[derive(Debug, Clone)]
pub(crate) struct Registrant {
    pub(crate) listener: Listener,
    pub(crate) matcher: Option<Matcher>,
    pub(crate) pattern: Option<Pattern>,
}

impl Registrant {
    pub(crate) fn new(listener: Listener, matcher: Option<Matcher>, pattern: Option<Pattern>) -> Self {
        Self {
            listener,
            matcher,
            pattern,
        }
    }

    /// Exact identity: all three components equal.
    pub(crate) fn is_subscription(
        &self,
        listener: &Listener,
        matcher: Option<&Matcher>,
        pattern: Option<&Pattern>,
    ) -> bool {
        self.listener == *listener
            && self.matcher.as_ref() == matcher
            && self.pattern.as_ref() == pattern
    }

    /// Partial filter: `None` for matcher or pattern matches any value.
    pub(crate) fn matches_filter(
        &self,
        listener: &Listener,
        matcher: Option<&Matcher>,
        pattern: Option<&Pattern>,
    ) -> bool {
        self.listener == *listener
            && matcher.map_or(true, |m| self.matcher.as_ref() == Some(m))
            && pattern.map_or(true, |p| self.pattern.as_ref() == Some(p))
    }
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    prev: usize,
    next: usize,
    registrant: Option<Registrant>,
}

impl Slot {
    fn vacant(generation: u32) -> Self {
        Self {
            generation,
            prev: SENTINEL,
            next: SENTINEL,
            registrant: None,
        }
    }
}

/// Where a relocated registrant used to sit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct OldPosition {
    /// Predecessor before the move, `None` if it was first.
    pub(crate) prev: Option<RegistrantId>,
    /// Successor before the move. Always a real registrant: relocating the
    /// last registrant is a no-op and never produces an `OldPosition`.
    pub(crate) next: RegistrantId,
}

/// Arena-backed circular list of registrants.
#[derive(Debug)]
pub(crate) struct RegistrantList {
    slots: Vec<Slot>,
    free: Vec<usize>,
    len: usize,
}

impl RegistrantList {
    pub(crate) fn new() -> Self {
        Self {
            slots: vec![Slot::vacant(0)],
            free: Vec::new(),
            len: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Create a registrant and link it at the tail.
    pub(crate) fn append(&mut self, registrant: Registrant) -> RegistrantId {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot::vacant(0));
                self.slots.len() - 1
            }
        };
        self.slots[index].registrant = Some(registrant);
        self.link_at_tail(index);
        self.len += 1;
        self.id_at(index)
    }

    /// Resolve a handle. Fails for removed registrants and stale generations.
    pub(crate) fn get(&self, id: RegistrantId) -> Option<&Registrant> {
        let index = self.resolve(id)?;
        self.slots[index].registrant.as_ref()
    }

    pub(crate) fn contains(&self, id: RegistrantId) -> bool {
        self.resolve(id).is_some()
    }

    pub(crate) fn first(&self) -> Option<RegistrantId> {
        self.id_or_end(self.slots[SENTINEL].next)
    }

    pub(crate) fn last(&self) -> Option<RegistrantId> {
        self.id_or_end(self.slots[SENTINEL].prev)
    }

    pub(crate) fn is_last(&self, id: RegistrantId) -> bool {
        self.last() == Some(id)
    }

    /// Successor of a live registrant, `None` at the end of the list.
    pub(crate) fn next_of(&self, id: RegistrantId) -> Option<RegistrantId> {
        let index = self.resolve(id)?;
        self.id_or_end(self.slots[index].next)
    }

    /// Predecessor of a live registrant, `None` at the start of the list.
    pub(crate) fn prev_of(&self, id: RegistrantId) -> Option<RegistrantId> {
        let index = self.resolve(id)?;
        self.id_or_end(self.slots[index].prev)
    }

    /// Linear scan for an exact (listener, matcher, pattern) match.
    pub(crate) fn find(
        &self,
        listener: &Listener,
        matcher: Option<&Matcher>,
        pattern: Option<&Pattern>,
    ) -> Option<RegistrantId> {
        self.iter().find(|&id| {
            self.get(id)
                .is_some_and(|r| r.is_subscription(listener, matcher, pattern))
        })
    }

    /// Every registrant passing a partial filter, in list order.
    pub(crate) fn find_all(
        &self,
        listener: &Listener,
        matcher: Option<&Matcher>,
        pattern: Option<&Pattern>,
    ) -> Vec<RegistrantId> {
        self.iter()
            .filter(|&id| {
                self.get(id)
                    .is_some_and(|r| r.matches_filter(listener, matcher, pattern))
            })
            .collect()
    }

    /// Unlink and free a registrant. Its handle stops resolving.
    pub(crate) fn remove(&mut self, id: RegistrantId) -> Option<Registrant> {
        let index = self.resolve(id)?;
        self.unlink(index);
        let slot = &mut self.slots[index];
        let registrant = slot.registrant.take();
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(index);
        self.len -= 1;
        registrant
    }

    /// Physically move a registrant to the tail, keeping its slot and handle.
    ///
    /// Returns `None` if the handle is stale or the registrant is already
    /// last; otherwise returns where it used to be.
    pub(crate) fn relocate_to_tail(&mut self, id: RegistrantId) -> Option<OldPosition> {
        let index = self.resolve(id)?;
        let next = self.id_or_end(self.slots[index].next)?;
        let prev = self.id_or_end(self.slots[index].prev);
        self.unlink(index);
        self.link_at_tail(index);
        Some(OldPosition { prev, next })
    }

    /// Handles in list order.
    pub(crate) fn iter(&self) -> Iter<'_> {
        Iter {
            list: self,
            cursor: self.slots[SENTINEL].next,
        }
    }

    fn resolve(&self, id: RegistrantId) -> Option<usize> {
        let index = id.index as usize;
        if index == SENTINEL {
            return None;
        }
        let slot = self.slots.get(index)?;
        (slot.generation == id.generation && slot.registrant.is_some()).then_some(index)
    }

    fn id_at(&self, index: usize) -> RegistrantId {
        RegistrantId {
            index: index as u32,
            generation: self.slots[index].generation,
        }
    }

    fn id_or_end(&self, index: usize) -> Option<RegistrantId> {
        (index != SENTINEL).then(|| self.id_at(index))
    }

    fn link_at_tail(&mut self, index: usize) {
        let tail = self.slots[SENTINEL].prev;
        self.slots[index].prev = tail;
        self.slots[index].next = SENTINEL;
        self.slots[tail].next = index;
        self.slots[SENTINEL].prev = index;
    }

    fn unlink(&mut self, index: usize) {
        let (prev, next) = (self.slots[index].prev, self.slots[index].next);
        self.slots[prev].next = next;
        self.slots[next].prev = prev;
        self.slots[index].prev = SENTINEL;
        self.slots[index].next = SENTINEL;
    }

    /// Walk the whole ring checking link symmetry and the element count.
    #[cfg(test)]
    pub(crate) fn check_links(&self) -> bool {
        let mut count = 0;
        let mut index = SENTINEL;
        loop {
            let next = self.slots[index].next;
            if self.slots[next].prev != index {
                return false;
            }
            index = next;
            if index == SENTINEL {
                break;
            }
            if self.slots[index].registrant.is_none() || count > self.len {
                return false;
            }
            count += 1;
        }
        count == self.len
    }
}

/// Iterator over registrant handles in list order.
pub(crate) struct Iter<'a> {
    list: &'a RegistrantList,
    cursor: usize,
}

impl Iterator for Iter<'_> {
    type Item = RegistrantId;

    fn next(&mut self) -> Option<RegistrantId> {
        if self.cursor == SENTINEL {
            return None;
        }
        let id = self.list.id_at(self.cursor);
        self.cursor = self.list.slots[self.cursor].next;
        Some(id)
    }
}
