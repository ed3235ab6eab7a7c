//! Core value types shared by the registrant list and the dispatch engine.
//!
//! # Overview
//!
//! - [`Event`] = the field map handed to every listener of one dispatch
//! - [`Listener`] = the callable a registrant delivers to
//! - [`Matcher`] = optional gate consulted before the listener runs
//! - [`Pattern`] = opaque value handed to the matcher as its second argument
//! - [`Flow`] = what a listener tells the pass to do next
//!
//! # Identity
//!
//! A subscription is identified by the triple (listener, matcher, pattern).
//! Listeners and matchers compare by the identity of the shared closure, so
//! keep a clone of the [`Listener`] you registered if you want to re-register
//! or remove it later. Patterns compare by value.

use std::fmt;
use std::rc::{Rc, Weak};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Opaque value passed to a [`Matcher`] alongside the event.
pub type Pattern = Value;

// =============================================================================
// Event
// =============================================================================

/// Event payload: a mapping from field name to arbitrary value.
///
/// The `name` field is special. Events dispatched without one get the
/// registry's name injected before any listener sees them.
///
/// # Example
///
/// ```
/// use chorus::Event;
///
/// let event = Event::named("PLAYER_LOGIN").with("level", 60);
/// assert_eq!(event.name(), Some("PLAYER_LOGIN"));
/// assert_eq!(event.get("level"), Some(&serde_json::json!(60)));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Event(Map<String, Value>);

impl Event {
    /// Field holding the event's name.
    pub const NAME_FIELD: &'static str = "name";

    /// Create an empty event.
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Create an event carrying only a name.
    pub fn named(name: impl Into<String>) -> Self {
        Self::new().with(Self::NAME_FIELD, name.into())
    }

    /// Builder-style field insertion.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Insert a field, returning the previous value if there was one.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    /// Look up a field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// The event's name, if it has a string one.
    pub fn name(&self) -> Option<&str> {
        self.0.get(Self::NAME_FIELD).and_then(Value::as_str)
    }

    /// Whether a `name` field is present at all (of any type).
    pub fn has_name(&self) -> bool {
        self.0.contains_key(Self::NAME_FIELD)
    }

    /// Borrow the underlying field map.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Consume the event, returning the underlying field map.
    pub fn into_fields(self) -> Map<String, Value> {
        self.0
    }

    /// Build an event from a JSON value. Returns `None` unless it is an object.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }
}

impl From<Map<String, Value>> for Event {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

// =============================================================================
// Flow
// =============================================================================

/// What a listener asks the current pass to do after it returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Flow {
    /// Keep delivering to the remaining registrants.
    #[default]
    Continue,
    /// Stop-processing sentinel: end the current pass immediately.
    ///
    /// Only the pass that invoked the listener stops; outer passes that are
    /// still live resume normally.
    Stop,
}

/// The distinguished "stop processing" sentinel.
pub const STOP_PROCESSING: Flow = Flow::Stop;

// =============================================================================
// Listener / Matcher
// =============================================================================

type ListenerFn = dyn Fn(&Event) -> anyhow::Result<Flow>;
type MatcherFn = dyn Fn(&Event, Option<&Pattern>) -> anyhow::Result<bool>;

/// A callable registered to receive events.
///
/// Cloning a `Listener` yields the *same* listener: clones compare equal and
/// identify the same subscription.
#[derive(Clone)]
pub struct Listener {
    inner: Rc<ListenerFn>,
}

impl Listener {
    /// Wrap a closure that may fail or ask the pass to stop.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Event) -> anyhow::Result<Flow> + 'static,
    {
        Self { inner: Rc::new(f) }
    }

    /// Wrap an infallible closure that always lets the pass continue.
    pub fn observer<F>(f: F) -> Self
    where
        F: Fn(&Event) + 'static,
    {
        Self::new(move |event| {
            f(event);
            Ok(Flow::Continue)
        })
    }

    /// Invoke the listener.
    pub fn call(&self, event: &Event) -> anyhow::Result<Flow> {
        (self.inner)(event)
    }

    /// Non-owning handle to this listener.
    ///
    /// A listener that refers to itself should capture one of these, since a
    /// captured `Listener` would keep its own closure alive forever.
    pub fn downgrade(&self) -> WeakListener {
        WeakListener {
            inner: Rc::downgrade(&self.inner),
        }
    }

    fn addr(&self) -> *const () {
        Rc::as_ptr(&self.inner) as *const ()
    }
}

impl PartialEq for Listener {
    fn eq(&self, other: &Self) -> bool {
        self.addr() == other.addr()
    }
}

impl Eq for Listener {}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Listener").field(&self.addr()).finish()
    }
}

/// Weak counterpart of [`Listener`], made by [`Listener::downgrade`].
#[derive(Clone)]
pub struct WeakListener {
    inner: Weak<ListenerFn>,
}

impl WeakListener {
    /// The listener, if any strong handle (including a registration) is left.
    pub fn upgrade(&self) -> Option<Listener> {
        self.inner.upgrade().map(|inner| Listener { inner })
    }
}

impl fmt::Debug for WeakListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("WeakListener")
            .field(&(self.inner.as_ptr() as *const ()))
            .finish()
    }
}

/// Optional gate deciding whether a registrant's listener runs for an event.
///
/// Receives the event and the registrant's pattern (if any).
#[derive(Clone)]
pub struct Matcher {
    inner: Rc<MatcherFn>,
}

impl Matcher {
    /// Wrap a fallible predicate.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Event, Option<&Pattern>) -> anyhow::Result<bool> + 'static,
    {
        Self { inner: Rc::new(f) }
    }

    /// Wrap an infallible predicate.
    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&Event, Option<&Pattern>) -> bool + 'static,
    {
        Self::new(move |event, pattern| Ok(f(event, pattern)))
    }

    /// Matcher accepting events whose `field` equals the pattern.
    ///
    /// A registrant without a pattern never matches.
    pub fn field_equals(field: impl Into<String>) -> Self {
        let field = field.into();
        Self::predicate(move |event, pattern| match pattern {
            Some(expected) => event.get(&field) == Some(expected),
            None => false,
        })
    }

    /// Evaluate the matcher.
    pub fn matches(&self, event: &Event, pattern: Option<&Pattern>) -> anyhow::Result<bool> {
        (self.inner)(event, pattern)
    }

    fn addr(&self) -> *const () {
        Rc::as_ptr(&self.inner) as *const ()
    }
}

impl PartialEq for Matcher {
    fn eq(&self, other: &Self) -> bool {
        self.addr() == other.addr()
    }
}

impl Eq for Matcher {}

impl fmt::Debug for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Matcher").field(&self.addr()).finish()
    }
}

// =============================================================================
// Registrant handle
// =============================================================================

/// Stable, generation-checked handle to one registrant.
///
/// Handles never alias: once a registrant is removed its handle stops
/// resolving, even if the underlying slot is reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegistrantId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl RegistrantId {
    /// Slot index inside the owning registry.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Generation of the slot when this registrant was created.
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for RegistrantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}v{}", self.index, self.generation)
    }
}
