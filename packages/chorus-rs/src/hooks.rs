//! Dispatch hooks - specialize a registry without touching the engine.
//!
//! # Execution Order
//!
//! ```text
//! dispatch(event)
//!  → normalize (inject registry name)
//!  → prepare_event      ← may substitute the event
//!  → open pass
//!  → for each registrant:
//!       abort_dispatch  ← may end the pass
//!       matcher → listener
//!  → close pass
//! ```
//!
//! # Example
//!
//! ```
//! use chorus::{DispatchHooks, Event, PassInfo, Registry};
//!
//! /// Never lets a dispatch nest deeper than two levels.
//! struct DepthLimit;
//!
//! impl DispatchHooks for DepthLimit {
//!     fn abort_dispatch(&self, _event: &Event, pass: &PassInfo) -> bool {
//!         pass.depth >= 2
//!     }
//! }
//!
//! let registry = Registry::builder().with_name("UI").with_hooks(DepthLimit).build();
//! registry.dispatch_default().unwrap();
//! ```

use crate::core::Event;
use crate::pass::PassInfo;

/// Extension points consulted by [`Registry::dispatch`].
///
/// Both methods have no-op defaults, so implementors override only what they
/// need. Hooks run with no internal borrows held and may call back into the
/// registry.
///
/// [`Registry::dispatch`]: crate::Registry::dispatch
pub trait DispatchHooks {
    /// Called before each delivery. Returning `true` ends the pass at once.
    ///
    /// This is a deliberate early stop, not an error: `dispatch` returns `Ok`.
    fn abort_dispatch(&self, _event: &Event, _pass: &PassInfo) -> bool {
        false
    }

    /// Called once per dispatch after name injection, before the pass goes
    /// live. Return `Some` to substitute the event every listener will see.
    fn prepare_event(&self, _event: &Event, _pass: &PassInfo) -> Option<Event> {
        None
    }
}

/// Hooks that do nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHooks;

impl DispatchHooks for NoHooks {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pass::PassId;

    #[test]
    fn test_default_hooks_are_inert() {
        let pass = PassInfo {
            id: PassId(1),
            depth: 0,
            current: None,
        };
        let event = Event::named("X");
        assert!(!NoHooks.abort_dispatch(&event, &pass));
        assert!(NoHooks.prepare_event(&event, &pass).is_none());
    }
}
