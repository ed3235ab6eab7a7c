//! Live dispatch passes.
//!
//! Every call to `dispatch` opens a pass over the registrant list. Because a
//! listener can dispatch again on the same registry, several passes may be
//! live at once, nested inside one another. All of them share the one list,
//! so every mutation has to keep every live pass consistent, not just the
//! innermost one.
//!
//! # Cursor
//!
//! A pass remembers how far it got, not what comes next:
//!
//! - `Start`: nothing consumed yet, resume at the head
//! - `At(id)`: consumed up to and including `id`, resume at its successor
//! - `Done`: finished
//!
//! When the registrant under an `At` cursor is removed or relocated, the
//! cursor is re-anchored on the old predecessor, so the pass resumes at the
//! old successor and never follows a link out of a node that has moved.
//!
//! # Skip-set
//!
//! Relocation may move an already-delivered registrant ahead of a pass's
//! walk. The catch-up walk in [`LivePass::passed`] decides when that has
//! happened and the registrant is recorded in the pass's skip-set so the
//! second physical encounter is suppressed.

use std::fmt;

use smallvec::SmallVec;

use crate::core::RegistrantId;
use crate::error::{ChorusError, Result};
use crate::list::RegistrantList;

/// Identifier of one dispatch pass, unique per registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PassId(pub(crate) u64);

impl PassId {
    /// Raw numeric value.
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for PassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pass-{}", self.0)
    }
}

/// Snapshot of a live pass, handed to hooks and inspectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassInfo {
    /// The pass's identifier.
    pub id: PassId,
    /// Nesting depth: 0 for an outermost dispatch, 1 for a dispatch made from
    /// inside one of its listeners, and so on.
    pub depth: usize,
    /// The registrant the pass is currently on, if any.
    pub current: Option<RegistrantId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Cursor {
    Start,
    At(RegistrantId),
    Done,
}

/// Bookkeeping for one in-progress dispatch.
#[derive(Debug)]
pub(crate) struct LivePass {
    pub(crate) id: PassId,
    pub(crate) depth: usize,
    cursor: Cursor,
    skip: SmallVec<[RegistrantId; 4]>,
}

impl LivePass {
    pub(crate) fn new(id: PassId, depth: usize) -> Self {
        Self {
            id,
            depth,
            cursor: Cursor::Start,
            skip: SmallVec::new(),
        }
    }

    pub(crate) fn info(&self) -> PassInfo {
        PassInfo {
            id: self.id,
            depth: self.depth,
            current: match self.cursor {
                Cursor::At(id) => Some(id),
                Cursor::Start | Cursor::Done => None,
            },
        }
    }

    #[cfg(test)]
    pub(crate) fn cursor(&self) -> Cursor {
        self.cursor
    }

    pub(crate) fn skips(&self, id: RegistrantId) -> bool {
        self.skip.contains(&id)
    }

    pub(crate) fn mark_delivered(&mut self, id: RegistrantId) {
        if !self.skips(id) {
            self.skip.push(id);
        }
    }

    pub(crate) fn finish(&mut self) {
        self.cursor = Cursor::Done;
    }

    /// Move to the next registrant this pass must deliver to.
    ///
    /// Skipped registrants are consumed silently. Returns `None` once the walk
    /// reaches the end of the list, leaving the cursor at `Done`.
    pub(crate) fn advance(&mut self, list: &RegistrantList) -> Result<Option<RegistrantId>> {
        loop {
            let candidate = match self.cursor {
                Cursor::Start => list.first(),
                Cursor::At(id) => {
                    if !list.contains(id) {
                        return Err(ChorusError::invariant(format!(
                            "{} is anchored on {id}, which is no longer in the list",
                            self.id
                        )));
                    }
                    list.next_of(id)
                }
                Cursor::Done => None,
            };

            let Some(id) = candidate else {
                self.cursor = Cursor::Done;
                return Ok(None);
            };

            self.cursor = Cursor::At(id);
            if !self.skips(id) {
                return Ok(Some(id));
            }
        }
    }

    /// Catch-up walk run after `moved` was relocated to the tail.
    ///
    /// Walks the list from the head until it meets either `old_next` (the
    /// moved registrant's former successor) or this pass's current node.
    /// Meeting `old_next` first means the pass had already reached the old
    /// position. `old_next` is checked first so a pass that is delivering to
    /// the moved registrant right now counts as having passed it.
    pub(crate) fn passed(&self, list: &RegistrantList, old_next: RegistrantId) -> Result<bool> {
        let current = match self.cursor {
            Cursor::At(current) => current,
            Cursor::Start | Cursor::Done => return Ok(false),
        };

        for id in list.iter() {
            if id == old_next {
                return Ok(true);
            }
            if id == current {
                return Ok(false);
            }
        }

        Err(ChorusError::invariant(format!(
            "catch-up walk for {} found neither {old_next} nor {current}",
            self.id
        )))
    }

    /// Re-anchor the cursor if it sits on a registrant leaving its position.
    pub(crate) fn reanchor(&mut self, leaving: RegistrantId, old_prev: Option<RegistrantId>) {
        if self.cursor == Cursor::At(leaving) {
            self.cursor = match old_prev {
                Some(prev) => Cursor::At(prev),
                None => Cursor::Start,
            };
        }
    }

    /// Drop a removed registrant from the skip-set.
    pub(crate) fn forget(&mut self, removed: RegistrantId) {
        self.skip.retain(|id| *id != removed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Listener;
    use crate::list::Registrant;

    fn list_of(n: usize) -> (RegistrantList, Vec<RegistrantId>) {
        let mut list = RegistrantList::new();
        let ids = (0..n)
            .map(|_| list.append(Registrant::new(Listener::observer(|_| {}), None, None)))
            .collect();
        (list, ids)
    }

    fn pass() -> LivePass {
        LivePass::new(PassId(1), 0)
    }

    #[test]
    fn test_advance_walks_in_order_then_finishes() {
        let (list, ids) = list_of(3);
        let mut pass = pass();

        let mut seen = Vec::new();
        while let Some(id) = pass.advance(&list).unwrap() {
            seen.push(id);
        }
        assert_eq!(seen, ids);
        assert_eq!(pass.cursor(), Cursor::Done);
        assert_eq!(pass.advance(&list).unwrap(), None);
    }

    #[test]
    fn test_advance_consumes_skipped() {
        let (list, ids) = list_of(3);
        let mut pass = pass();
        pass.mark_delivered(ids[1]);

        assert_eq!(pass.advance(&list).unwrap(), Some(ids[0]));
        assert_eq!(pass.advance(&list).unwrap(), Some(ids[2]));
        assert_eq!(pass.advance(&list).unwrap(), None);
    }

    #[test]
    fn test_passed_before_start_is_false() {
        let (list, ids) = list_of(3);
        assert!(!pass().passed(&list, ids[1]).unwrap());
    }

    #[test]
    fn test_passed_when_current_precedes_old_position() {
        let (mut list, ids) = list_of(4);
        let mut pass = pass();
        pass.advance(&list).unwrap(); // at ids[0]

        let old = list.relocate_to_tail(ids[2]).unwrap();
        assert!(!pass.passed(&list, old.next).unwrap());
    }

    #[test]
    fn test_passed_when_current_follows_old_position() {
        let (mut list, ids) = list_of(4);
        let mut pass = pass();
        for _ in 0..3 {
            pass.advance(&list).unwrap();
        } // at ids[2]

        let old = list.relocate_to_tail(ids[0]).unwrap();
        assert!(pass.passed(&list, old.next).unwrap());
    }

    #[test]
    fn test_passed_when_moving_current_node() {
        let (mut list, ids) = list_of(3);
        let mut pass = pass();
        pass.advance(&list).unwrap();
        pass.advance(&list).unwrap(); // at ids[1]

        let old = list.relocate_to_tail(ids[1]).unwrap();
        assert!(pass.passed(&list, old.next).unwrap());
    }

    #[test]
    fn test_passed_reports_invariant_violation_on_lost_anchor() {
        let (mut list, ids) = list_of(3);
        let mut pass = pass();
        pass.advance(&list).unwrap(); // at ids[0]

        // Remove the anchor without re-anchoring, and ask about a successor
        // that is not in the list either: the walk must not guess.
        list.remove(ids[0]);
        let orphan = RegistrantId {
            index: 99,
            generation: 0,
        };
        let err = pass.passed(&list, orphan).unwrap_err();
        assert!(err.is_invariant_violation());
    }

    #[test]
    fn test_reanchor_on_first_returns_to_start() {
        let (mut list, ids) = list_of(2);
        let mut pass = pass();
        pass.advance(&list).unwrap(); // at ids[0]

        let prev = list.prev_of(ids[0]);
        list.remove(ids[0]);
        pass.reanchor(ids[0], prev);

        assert_eq!(pass.cursor(), Cursor::Start);
        assert_eq!(pass.advance(&list).unwrap(), Some(ids[1]));
    }

    #[test]
    fn test_advance_from_stale_anchor_is_invariant_violation() {
        let (mut list, ids) = list_of(2);
        let mut pass = pass();
        pass.advance(&list).unwrap();
        list.remove(ids[0]);

        assert!(pass.advance(&list).unwrap_err().is_invariant_violation());
    }

    #[test]
    fn test_info_reports_current() {
        let (list, ids) = list_of(1);
        let mut pass = LivePass::new(PassId(7), 2);
        assert_eq!(pass.info().current, None);
        pass.advance(&list).unwrap();
        assert_eq!(
            pass.info(),
            PassInfo {
                id: PassId(7),
                depth: 2,
                current: Some(ids[0]),
            }
        );
    }
}
