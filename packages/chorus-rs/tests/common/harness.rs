//! Shared fixtures for integration tests.
//!
//! Recorders here only use the public API, so every scenario exercises the
//! registry exactly as a host would.

#![allow(dead_code)]

use std::cell::{OnceCell, RefCell};
use std::rc::Rc;

use chorus::{Event, Listener, Registry, WeakListener, WeakRegistry};

/// Install a global fmt subscriber honouring `RUST_LOG`.
///
/// Run tests with: RUST_LOG=chorus=trace cargo test -- --nocapture
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Ordered record of `label` or `label:name` entries.
#[derive(Clone, Default)]
pub struct Recorder {
    entries: Rc<RefCell<Vec<String>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: impl Into<String>) {
        self.entries.borrow_mut().push(entry.into());
    }

    /// Listener recording just its label.
    pub fn tag(&self, label: &'static str) -> Listener {
        let recorder = self.clone();
        Listener::observer(move |_| recorder.push(label))
    }

    /// Listener recording its label and the event's `name` field.
    pub fn tag_with_name(&self, label: &'static str) -> Listener {
        let recorder = self.clone();
        Listener::observer(move |event: &Event| {
            recorder.push(format!("{label}:{}", event.name().unwrap_or("<none>")));
        })
    }

    /// Drain the record.
    pub fn drain(&self) -> Vec<String> {
        std::mem::take(&mut *self.entries.borrow_mut())
    }
}

/// A listener built from a closure that can see its own handle and the
/// registry it is registered with.
///
/// Both are held weakly, so the listener lives only as long as a
/// registration or a caller's clone.
pub fn reflexive<F>(registry: &Registry, body: F) -> Listener
where
    F: Fn(&Registry, &Listener, &Event) -> anyhow::Result<chorus::Flow> + 'static,
{
    let me: Rc<OnceCell<WeakListener>> = Rc::new(OnceCell::new());
    let weak: WeakRegistry = registry.downgrade();
    let slot = me.clone();
    let listener = Listener::new(move |event| {
        let me = slot.get().and_then(WeakListener::upgrade);
        let (Some(registry), Some(me)) = (weak.upgrade(), me) else {
            return Ok(chorus::Flow::Continue);
        };
        body(&registry, &me, event)
    });
    me.set(listener.downgrade())
        .expect("fresh cell is only filled here");
    listener
}

/// Register every listener in order, without matchers.
pub fn register_all(registry: &Registry, listeners: &[Listener]) {
    for listener in listeners {
        registry
            .add_listener(listener.clone(), None, None)
            .expect("plain registration cannot fail");
    }
}
