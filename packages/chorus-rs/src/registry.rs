//! The registry: ordered listeners plus the dispatch engine driving them.
//!
//! # Re-registration moves to the end
//!
//! Registering a (listener, matcher, pattern) triple that is already present
//! does not create a duplicate. The existing registrant is physically moved
//! to the tail, keeping its handle. If passes are live at that moment, each
//! one runs the catch-up walk from [`crate::pass`] and records the
//! registrant in its skip-set if it had already delivered to it, so no pass
//! delivers to it twice.
//!
//! # Reentrancy
//!
//! Listeners may add, remove, re-register and dispatch on the registry that
//! is calling them. Internal state is only borrowed between listener calls,
//! never across one. Listeners that need a handle to their own registry
//! should capture a [`WeakRegistry`] to avoid an `Rc` cycle. The same goes
//! for a listener's handle to itself: capture a
//! [`WeakListener`](crate::WeakListener) from [`Listener::downgrade`].
//!
//! # Example
//!
//! ```
//! use std::cell::RefCell;
//! use std::rc::Rc;
//! use chorus::{Event, Listener, Registry};
//!
//! let seen = Rc::new(RefCell::new(Vec::new()));
//! let registry = Registry::new("PLAYER_LOGIN");
//!
//! let log = seen.clone();
//! let listener = Listener::observer(move |event: &Event| {
//!     log.borrow_mut().push(event.name().unwrap_or_default().to_string());
//! });
//!
//! registry.add_listener(listener, None, None)?;
//! registry.dispatch(None, None)?;
//!
//! assert_eq!(*seen.borrow(), vec!["PLAYER_LOGIN".to_string()]);
//! # Ok::<(), chorus::ChorusError>(())
//! ```

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::{debug, error, trace, warn};

use crate::config::RegistryConfig;
use crate::core::{Event, Flow, Listener, Matcher, Pattern, RegistrantId};
use crate::error::{ChorusError, Result};
use crate::guard::{call_guarded, CatchUnwind, FailureReport, FailureReporter, InvokeGuarded, LogReporter};
use crate::hooks::{DispatchHooks, NoHooks};
use crate::list::{Registrant, RegistrantList};
use crate::pass::{LivePass, PassId, PassInfo};

// =============================================================================
// Internal state
// =============================================================================

/// Everything a listener can mutate while a pass is in flight.
#[derive(Debug)]
struct State {
    list: RegistrantList,
    /// Live passes, outermost first.
    passes: Vec<LivePass>,
    next_pass: u64,
}

/// What a pass needs to deliver to one registrant, cloned out of the list so
/// no borrow is held while listener code runs.
struct Delivery {
    id: RegistrantId,
    listener: Listener,
    matcher: Option<Matcher>,
    pattern: Option<Pattern>,
    pass: PassInfo,
}

impl State {
    fn new() -> Self {
        Self {
            list: RegistrantList::new(),
            passes: Vec::new(),
            next_pass: 1,
        }
    }

    fn allocate_pass(&mut self) -> PassId {
        let id = PassId(self.next_pass);
        self.next_pass += 1;
        id
    }

    fn open_pass(&mut self, id: PassId) -> usize {
        let depth = self.passes.len();
        self.passes.push(LivePass::new(id, depth));
        depth
    }

    fn close_pass(&mut self, id: PassId) {
        if let Some(index) = self.passes.iter().rposition(|pass| pass.id == id) {
            let mut pass = self.passes.remove(index);
            pass.finish();
        }
    }

    fn next_delivery(&mut self, pass: PassId) -> Result<Option<Delivery>> {
        let State { list, passes, .. } = self;
        let pass = passes
            .iter_mut()
            .find(|live| live.id == pass)
            .ok_or_else(|| ChorusError::invariant(format!("{pass} is not registered as live")))?;

        let Some(id) = pass.advance(list)? else {
            return Ok(None);
        };
        let registrant = list
            .get(id)
            .ok_or_else(|| ChorusError::invariant(format!("{} advanced onto missing {id}", pass.id)))?;

        Ok(Some(Delivery {
            id,
            listener: registrant.listener.clone(),
            matcher: registrant.matcher.clone(),
            pattern: registrant.pattern.clone(),
            pass: pass.info(),
        }))
    }

    /// Move an existing registrant to the tail and settle every live pass.
    fn relocate(&mut self, id: RegistrantId) -> Result<()> {
        let Some(old) = self.list.relocate_to_tail(id) else {
            return Ok(());
        };
        for pass in &mut self.passes {
            if pass.passed(&self.list, old.next)? {
                pass.mark_delivered(id);
            }
            pass.reanchor(id, old.prev);
        }
        Ok(())
    }

    fn remove(&mut self, id: RegistrantId) -> bool {
        let old_prev = self.list.prev_of(id);
        if self.list.remove(id).is_none() {
            return false;
        }
        for pass in &mut self.passes {
            pass.reanchor(id, old_prev);
            pass.forget(id);
        }
        true
    }
}

struct Shared {
    name: Option<String>,
    protected_mode: Cell<bool>,
    hooks: Box<dyn DispatchHooks>,
    invoker: Box<dyn InvokeGuarded>,
    reporter: Box<dyn FailureReporter>,
    state: RefCell<State>,
}

impl Shared {
    fn label(&self) -> &str {
        self.name.as_deref().unwrap_or("<unnamed>")
    }
}

// =============================================================================
// Pass guard
// =============================================================================

/// Keeps a pass registered as live for exactly as long as it exists.
///
/// Dropping the guard deregisters the pass on every exit path: normal end,
/// stop sentinel, abort hook, propagated error, or unwinding panic.
struct PassGuard<'a> {
    shared: &'a Shared,
    id: PassId,
}

impl<'a> PassGuard<'a> {
    fn open(shared: &'a Shared, id: PassId) -> Self {
        let depth = shared.state.borrow_mut().open_pass(id);
        trace!(registry = shared.label(), pass = %id, depth, "pass opened");
        Self { shared, id }
    }
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        // Every borrow of `state` is scoped to a single registry call and ends
        // before user code runs, and unwinding drops inner borrows first. A
        // live borrow here is a bug in this module.
        match self.shared.state.try_borrow_mut() {
            Ok(mut state) => {
                state.close_pass(self.id);
                trace!(registry = self.shared.label(), pass = %self.id, "pass closed");
            }
            Err(_) => {
                error!(
                    registry = self.shared.label(),
                    pass = %self.id,
                    "registry state busy while closing pass, pass left registered"
                );
                debug_assert!(
                    std::thread::panicking(),
                    "registry state borrowed while closing pass {}",
                    self.id
                );
            }
        }
    }
}

// =============================================================================
// Registry
// =============================================================================

/// An ordered multi-listener event registry.
///
/// Cloning a `Registry` yields another handle to the same registry.
#[derive(Clone)]
pub struct Registry {
    shared: Rc<Shared>,
}

impl Registry {
    /// Create a named registry with default capabilities.
    pub fn new(name: impl Into<String>) -> Self {
        Self::builder().with_name(name).build()
    }

    /// Create a registry without a name. Events are dispatched as given.
    pub fn unnamed() -> Self {
        Self::builder().build()
    }

    /// Create a registry from configuration.
    pub fn from_config(config: RegistryConfig) -> Self {
        Self::builder().with_config(config).build()
    }

    /// Start building a registry with custom hooks or capabilities.
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// The registry's name, injected into events that lack one.
    pub fn name(&self) -> Option<&str> {
        self.shared.name.as_deref()
    }

    /// Default protected-mode flag for dispatches that don't choose.
    pub fn protected_mode(&self) -> bool {
        self.shared.protected_mode.get()
    }

    /// Change the default protected-mode flag.
    pub fn set_protected_mode(&self, protected: bool) -> &Self {
        self.shared.protected_mode.set(protected);
        self
    }

    /// A non-owning handle, suitable for capture inside listeners.
    pub fn downgrade(&self) -> WeakRegistry {
        WeakRegistry {
            shared: Rc::downgrade(&self.shared),
        }
    }

    /// Register a listener, or move an existing identical subscription to the
    /// end of the dispatch order.
    ///
    /// Re-registering the registrant that is already last is a no-op.
    ///
    /// # Errors
    ///
    /// - [`ChorusError::Subscription`] if a pattern is given without a matcher;
    ///   the registry is unchanged.
    /// - [`ChorusError::Invariant`] if relocation bookkeeping is inconsistent.
    pub fn add_listener(
        &self,
        listener: Listener,
        matcher: Option<Matcher>,
        pattern: Option<Pattern>,
    ) -> Result<&Self> {
        if pattern.is_some() && matcher.is_none() {
            return Err(ChorusError::Subscription {
                reason: "a pattern is only consulted through a matcher",
            });
        }

        let mut state = self.shared.state.borrow_mut();
        match state.list.find(&listener, matcher.as_ref(), pattern.as_ref()) {
            Some(id) if state.list.is_last(id) => {
                trace!(registry = self.shared.label(), registrant = %id, "already last");
            }
            Some(id) => {
                state.relocate(id).inspect_err(|err| {
                    error!(registry = self.shared.label(), registrant = %id, error = %err, "relocation failed");
                })?;
                debug!(
                    registry = self.shared.label(),
                    registrant = %id,
                    live_passes = state.passes.len(),
                    "listener moved to tail"
                );
            }
            None => {
                let id = state.list.append(Registrant::new(listener, matcher, pattern));
                debug!(registry = self.shared.label(), registrant = %id, "listener registered");
            }
        }
        Ok(self)
    }

    /// Remove every registrant matching the filter.
    ///
    /// `None` for `matcher` or `pattern` matches any value of that field.
    /// Removing nothing is logged as a warning, not reported as an error.
    pub fn remove_listener(
        &self,
        listener: &Listener,
        matcher: Option<&Matcher>,
        pattern: Option<&Pattern>,
    ) -> &Self {
        self.remove_listener_count(listener, matcher, pattern);
        self
    }

    /// Like [`remove_listener`](Self::remove_listener), returning how many
    /// registrants were removed.
    pub fn remove_listener_count(
        &self,
        listener: &Listener,
        matcher: Option<&Matcher>,
        pattern: Option<&Pattern>,
    ) -> usize {
        let mut state = self.shared.state.borrow_mut();
        let doomed = state.list.find_all(listener, matcher, pattern);
        let removed = doomed.into_iter().filter(|id| state.remove(*id)).count();

        if removed == 0 {
            warn!(
                registry = self.shared.label(),
                "remove_listener matched no registrant"
            );
        } else {
            debug!(registry = self.shared.label(), removed, "listeners removed");
        }
        removed
    }

    /// Remove every registrant. Live passes end at their next step.
    pub fn clear(&self) -> &Self {
        let mut state = self.shared.state.borrow_mut();
        let all: Vec<_> = state.list.iter().collect();
        for id in all {
            state.remove(id);
        }
        self
    }

    /// Dispatch an event to every registrant, in order.
    ///
    /// `event` defaults to an empty event; `protected` defaults to the
    /// registry's [`protected_mode`](Self::protected_mode).
    ///
    /// # Errors
    ///
    /// - [`ChorusError::ListenerFailed`]: unprotected mode, a listener or
    ///   matcher failed. Later registrants were not visited.
    /// - [`ChorusError::Unreported`]: protected mode, a failure the reporter
    ///   could not deliver. Later registrants were not visited.
    /// - [`ChorusError::Invariant`]: internal bookkeeping is broken.
    pub fn dispatch(&self, event: Option<Event>, protected: Option<bool>) -> Result<()> {
        let shared = &*self.shared;
        let protected = protected.unwrap_or_else(|| shared.protected_mode.get());

        let mut event = event.unwrap_or_default();
        if !event.has_name() {
            if let Some(name) = &shared.name {
                event.insert(Event::NAME_FIELD, name.clone());
            }
        }

        let (id, depth) = {
            let mut state = shared.state.borrow_mut();
            (state.allocate_pass(), state.passes.len())
        };
        let pending = PassInfo {
            id,
            depth,
            current: None,
        };
        if let Some(prepared) = shared.hooks.prepare_event(&event, &pending) {
            event = prepared;
        }

        let _pass = PassGuard::open(shared, id);

        loop {
            let next = shared
                .state
                .borrow_mut()
                .next_delivery(id)
                .inspect_err(|err| error!(registry = shared.label(), pass = %id, error = %err, "pass lost its place"))?;
            let Some(delivery) = next else {
                break;
            };

            if shared.hooks.abort_dispatch(&event, &delivery.pass) {
                trace!(registry = shared.label(), pass = %id, "pass aborted by hook");
                break;
            }

            if let Some(matcher) = &delivery.matcher {
                let pattern = delivery.pattern.as_ref();
                let verdict = if protected {
                    call_guarded(&*shared.invoker, || matcher.matches(&event, pattern))
                } else {
                    matcher.matches(&event, pattern)
                };
                match verdict {
                    Ok(true) => {}
                    Ok(false) => continue,
                    Err(err) => {
                        self.fail(delivery.id, err, protected)?;
                        continue;
                    }
                }
            }

            trace!(registry = shared.label(), pass = %id, registrant = %delivery.id, "delivering");
            let flow = if protected {
                call_guarded(&*shared.invoker, || delivery.listener.call(&event))
            } else {
                delivery.listener.call(&event)
            };
            match flow {
                Ok(Flow::Continue) => {}
                Ok(Flow::Stop) => {
                    trace!(registry = shared.label(), pass = %id, registrant = %delivery.id, "pass stopped by listener");
                    break;
                }
                Err(err) => self.fail(delivery.id, err, protected)?,
            }
        }

        Ok(())
    }

    /// Dispatch an empty event in the registry's default mode.
    pub fn dispatch_default(&self) -> Result<()> {
        self.dispatch(None, None)
    }

    fn fail(&self, registrant: RegistrantId, error: anyhow::Error, protected: bool) -> Result<()> {
        if !protected {
            return Err(ChorusError::ListenerFailed {
                registrant,
                source: error,
            });
        }

        let report = FailureReport {
            registry: self.name(),
            registrant,
            error: &error,
        };
        if self.shared.reporter.report_failure(&report) {
            Ok(())
        } else {
            Err(ChorusError::Unreported {
                registrant,
                source: error,
            })
        }
    }

    /// Number of registrants.
    pub fn len(&self) -> usize {
        self.shared.state.borrow().list.len()
    }

    /// Whether no listener is registered.
    pub fn is_empty(&self) -> bool {
        self.shared.state.borrow().list.is_empty()
    }

    /// Whether this exact subscription is registered.
    pub fn contains(
        &self,
        listener: &Listener,
        matcher: Option<&Matcher>,
        pattern: Option<&Pattern>,
    ) -> bool {
        self.shared
            .state
            .borrow()
            .list
            .find(listener, matcher, pattern)
            .is_some()
    }

    /// Handle of an exact subscription, if registered.
    pub fn registrant_id(
        &self,
        listener: &Listener,
        matcher: Option<&Matcher>,
        pattern: Option<&Pattern>,
    ) -> Option<RegistrantId> {
        self.shared.state.borrow().list.find(listener, matcher, pattern)
    }

    /// Registrant handles in dispatch order.
    pub fn registrants(&self) -> Vec<RegistrantId> {
        self.shared.state.borrow().list.iter().collect()
    }

    /// Snapshot of every live pass, outermost first.
    pub fn live_passes(&self) -> Vec<PassInfo> {
        self.shared
            .state
            .borrow()
            .passes
            .iter()
            .map(LivePass::info)
            .collect()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::unnamed()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Registry");
        s.field("name", &self.shared.name)
            .field("protected_mode", &self.shared.protected_mode.get());
        if let Ok(state) = self.shared.state.try_borrow() {
            s.field("registrants", &state.list.len())
                .field("live_passes", &state.passes.len());
        }
        s.finish_non_exhaustive()
    }
}

/// Non-owning handle to a [`Registry`].
#[derive(Clone, Default)]
pub struct WeakRegistry {
    shared: Weak<Shared>,
}

impl WeakRegistry {
    /// Get the registry back, if it is still alive.
    pub fn upgrade(&self) -> Option<Registry> {
        self.shared.upgrade().map(|shared| Registry { shared })
    }
}

impl fmt::Debug for WeakRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakRegistry")
            .field("alive", &(self.shared.strong_count() > 0))
            .finish()
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for a [`Registry`] with custom hooks or host capabilities.
///
/// # Example
///
/// ```
/// use chorus::{CatchUnwind, LogReporter, NoHooks, Registry};
///
/// let registry = Registry::builder()
///     .with_name("COMBAT_LOG")
///     .protected(true)
///     .with_hooks(NoHooks)
///     .with_invoker(CatchUnwind)
///     .with_reporter(LogReporter)
///     .build();
///
/// assert!(registry.protected_mode());
/// ```
pub struct RegistryBuilder {
    config: RegistryConfig,
    hooks: Box<dyn DispatchHooks>,
    invoker: Box<dyn InvokeGuarded>,
    reporter: Box<dyn FailureReporter>,
}

impl RegistryBuilder {
    /// Start from defaults: unnamed, unprotected, no hooks, [`CatchUnwind`],
    /// [`LogReporter`].
    pub fn new() -> Self {
        Self {
            config: RegistryConfig::default(),
            hooks: Box::new(NoHooks),
            invoker: Box::new(CatchUnwind),
            reporter: Box::new(LogReporter),
        }
    }

    /// Replace name and protected mode with the given configuration.
    pub fn with_config(mut self, config: RegistryConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the registry name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.config.name = Some(name.into());
        self
    }

    /// Set the default protected-mode flag.
    pub fn protected(mut self, protected: bool) -> Self {
        self.config.protected_mode = protected;
        self
    }

    /// Install dispatch hooks.
    pub fn with_hooks(mut self, hooks: impl DispatchHooks + 'static) -> Self {
        self.hooks = Box::new(hooks);
        self
    }

    /// Install the guarded-invocation capability used in protected mode.
    pub fn with_invoker(mut self, invoker: impl InvokeGuarded + 'static) -> Self {
        self.invoker = Box::new(invoker);
        self
    }

    /// Install the failure reporter used in protected mode.
    pub fn with_reporter(mut self, reporter: impl FailureReporter + 'static) -> Self {
        self.reporter = Box::new(reporter);
        self
    }

    pub fn build(self) -> Registry {
        Registry {
            shared: Rc::new(Shared {
                name: self.config.name,
                protected_mode: Cell::new(self.config.protected_mode),
                hooks: self.hooks,
                invoker: self.invoker,
                reporter: self.reporter,
                state: RefCell::new(State::new()),
            }),
        }
    }
}

impl Default for RegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RegistryBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryBuilder")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
