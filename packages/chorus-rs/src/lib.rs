//! # Chorus
//!
//! An ordered, in-process multi-listener event registry with exactly-once
//! delivery per dispatch, even while listeners mutate the registry that is
//! calling them.
//!
//! ## Core Concepts
//!
//! - [`Listener`] = a callable receiving an [`Event`]
//! - [`Matcher`] + [`Pattern`] = an optional gate deciding whether the
//!   listener runs for a given event
//! - Registrant = one (listener, matcher, pattern) subscription, addressed by
//!   a stable [`RegistrantId`]
//! - Pass = one in-progress [`Registry::dispatch`]; passes nest when
//!   listeners dispatch again
//!
//! ## Architecture
//!
//! ```text
//! add_listener ──► RegistrantList (arena, circular, ordered)
//!                        ▲   │
//!     relocate / remove  │   │ advance
//!     re-anchor passes   │   ▼
//! dispatch ──► prepare_event ──► LivePass (cursor + skip-set)
//!                                    │
//!                                    ├─► abort_dispatch?
//!                                    ├─► Matcher (guarded if protected)
//!                                    └─► Listener (guarded if protected)
//!                                            │
//!                                            └─► may add / remove / dispatch
//! ```
//!
//! ## Key Invariants
//!
//! 1. **Registration order** - listeners run in the order they were last
//!    registered
//! 2. **Re-registration moves** - registering an existing subscription moves
//!    it to the end instead of duplicating it
//! 3. **Exactly once** - within one pass, a registrant present for the whole
//!    pass is delivered to exactly once
//! 4. **Pass isolation** - a nested dispatch never disturbs the outer pass's
//!    position or skip-set
//! 5. **Contained failures** - in protected mode a failing listener never
//!    stops the others, and a failure nobody saw is escalated
//!
//! ## Example
//!
//! ```
//! use chorus::{Event, Listener, Matcher, Registry};
//! use serde_json::json;
//!
//! let registry = Registry::new("UNIT_HEALTH");
//! let listener = Listener::observer(|event: &Event| {
//!     assert_eq!(event.name(), Some("UNIT_HEALTH"));
//! });
//!
//! registry.add_listener(listener, Some(Matcher::field_equals("unit")), Some(json!("player")))?;
//! registry.dispatch(Some(Event::new().with("unit", "player")), Some(true))?;
//! # Ok::<(), chorus::ChorusError>(())
//! ```
//!
//! ## Scope
//!
//! Chorus is **single-threaded** and **synchronous**. It never
//! queues events: `dispatch` runs every listener before it returns.

// Core modules
mod config;
mod core;
mod error;
mod guard;
mod hooks;
mod list;
mod pass;
mod registry;

// Testing utilities (feature-gated)
#[cfg(any(test, feature = "testing"))]
pub mod testing;


// Re-export core types
pub use crate::core::{
    Event, Flow, Listener, Matcher, Pattern, RegistrantId, WeakListener, STOP_PROCESSING,
};

// Re-export error types
pub use crate::error::{ChorusError, Result};

// Re-export extension points
pub use guard::{CatchUnwind, FailureReport, FailureReporter, InvokeGuarded, LogReporter};
pub use hooks::{DispatchHooks, NoHooks};

// Re-export registry
pub use config::{RegistryConfig, NAME_VAR, PROTECTED_VAR};
pub use pass::{PassId, PassInfo};
pub use registry::{Registry, RegistryBuilder, WeakRegistry};
