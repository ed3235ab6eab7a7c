//! Testing utilities for registry-driven code.
//!
//! Available under `cfg(test)` and with the `testing` feature.

use std::cell::{OnceCell, RefCell};
use std::rc::Rc;

use crate::core::{Listener, WeakListener};
use crate::guard::{FailureReport, FailureReporter};

/// Shared, ordered record of which listeners ran.
///
/// Clones share the same log.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    entries: Rc<RefCell<Vec<String>>>,
}

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry.
    pub fn record(&self, entry: impl Into<String>) {
        self.entries.borrow_mut().push(entry.into());
    }

    /// A listener that records `label` every time it is called.
    pub fn listener(&self, label: &str) -> Listener {
        let log = self.clone();
        let label = label.to_string();
        Listener::observer(move |_| log.record(label.clone()))
    }

    /// Snapshot of every entry so far.
    pub fn entries(&self) -> Vec<String> {
        self.entries.borrow().clone()
    }

    /// Return every entry and empty the log.
    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.entries.borrow_mut())
    }

    /// How many times `entry` was recorded.
    pub fn count(&self, entry: &str) -> usize {
        self.entries.borrow().iter().filter(|e| *e == entry).count()
    }
}

/// Late-bound slot for a listener that needs to refer to itself.
///
/// Capture a clone inside the listener's closure, then `set` it once the
/// listener exists. The slot only holds a [`WeakListener`], so the closure
/// capturing it does not keep itself alive.
#[derive(Debug, Clone, Default)]
pub struct ListenerCell {
    slot: Rc<OnceCell<WeakListener>>,
}

impl ListenerCell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fill the slot. Returns `false`, leaving the first listener in place,
    /// if the slot was already filled.
    #[must_use]
    pub fn set(&self, listener: &Listener) -> bool {
        self.slot.set(listener.downgrade()).is_ok()
    }

    /// The stored listener.
    ///
    /// # Panics
    ///
    /// Panics if [`set`](Self::set) was never called, or if every strong
    /// handle to the listener has been dropped.
    pub fn get(&self) -> Listener {
        self.slot
            .get()
            .and_then(WeakListener::upgrade)
            .expect("ListenerCell read before it was set or after its listener was dropped")
    }

    /// The stored listener, if the slot is filled and the listener is alive.
    pub fn try_get(&self) -> Option<Listener> {
        self.slot.get().and_then(WeakListener::upgrade)
    }
}

/// Failure reporter that remembers every failure message.
///
/// Clones share the same record, so keep one before handing the reporter to
/// a [`RegistryBuilder`](crate::RegistryBuilder).
#[derive(Debug, Clone)]
pub struct RecordingReporter {
    delivered: bool,
    failures: Rc<RefCell<Vec<String>>>,
}

impl RecordingReporter {
    /// Records failures and reports them as delivered.
    pub fn acknowledging() -> Self {
        Self {
            delivered: true,
            failures: Rc::default(),
        }
    }

    /// Records failures but reports that nobody saw them.
    pub fn unheard() -> Self {
        Self {
            delivered: false,
            failures: Rc::default(),
        }
    }

    /// Failure messages in the order they were reported.
    pub fn failures(&self) -> Vec<String> {
        self.failures.borrow().clone()
    }
}

impl FailureReporter for RecordingReporter {
    fn report_failure(&self, failure: &FailureReport<'_>) -> bool {
        self.failures.borrow_mut().push(failure.error.to_string());
        self.delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Event;

    #[test]
    fn test_listener_cell_keeps_first_listener() {
        let cell = ListenerCell::new();
        let first = Listener::observer(|_| {});
        let second = Listener::observer(|_| {});

        assert!(cell.set(&first));
        assert!(!cell.set(&second));
        assert_eq!(cell.get(), first);
    }

    #[test]
    fn test_self_referential_listener_is_freed() {
        let cell = ListenerCell::new();
        let inner = cell.clone();
        let listener = Listener::observer(move |_| {
            let _ = inner.try_get();
        });
        assert!(cell.set(&listener));
        listener.call(&Event::new()).unwrap();

        let weak = listener.downgrade();
        drop(listener);
        assert!(weak.upgrade().is_none());
        assert!(cell.try_get().is_none());
    }
}
