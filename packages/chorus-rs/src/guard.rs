//! Host capabilities used by protected-mode dispatch.
//!
//! Two seams, both injected through [`RegistryBuilder`]:
//!
//! - [`InvokeGuarded`]: run listener or matcher code so that any failure comes
//!   back as an `Err` instead of unwinding. The default, [`CatchUnwind`],
//!   turns panics into errors.
//! - [`FailureReporter`]: surface a contained failure to someone and say
//!   whether anyone saw it. The default, [`LogReporter`], logs through
//!   `tracing`.
//!
//! In protected mode a failure the reporter could not deliver is escalated to
//! the `dispatch` caller rather than swallowed.
//!
//! [`RegistryBuilder`]: crate::RegistryBuilder

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};

use anyhow::anyhow;
use tracing::{error, Level};

use crate::core::RegistrantId;

// =============================================================================
// Guarded invocation
// =============================================================================

/// Fault-isolating call wrapper.
///
/// `call` runs the listener or matcher. Implementations must invoke it at most
/// once and return whatever failure it produced, converted to an `Err`.
pub trait InvokeGuarded {
    fn invoke_guarded(&self, call: &mut dyn FnMut() -> anyhow::Result<()>) -> anyhow::Result<()>;
}

/// Converts panics into errors with `catch_unwind`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CatchUnwind;

impl InvokeGuarded for CatchUnwind {
    fn invoke_guarded(&self, call: &mut dyn FnMut() -> anyhow::Result<()>) -> anyhow::Result<()> {
        // AssertUnwindSafe: after a panic the registry only drops the
        // listener's clone; it never observes the listener's state again.
        match catch_unwind(AssertUnwindSafe(call)) {
            Ok(result) => result,
            Err(payload) => Err(anyhow!("listener panicked: {}", panic_message(&*payload))),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Run a value-returning closure through an [`InvokeGuarded`] capability.
pub(crate) fn call_guarded<T>(
    invoker: &dyn InvokeGuarded,
    f: impl FnOnce() -> anyhow::Result<T>,
) -> anyhow::Result<T> {
    let mut f = Some(f);
    let mut out = None;
    invoker.invoke_guarded(&mut || {
        let f = f
            .take()
            .ok_or_else(|| anyhow!("guarded call invoked more than once"))?;
        out = Some(f()?);
        Ok(())
    })?;
    out.ok_or_else(|| anyhow!("guarded call was never invoked"))
}

// =============================================================================
// Failure reporting
// =============================================================================

/// A contained listener or matcher failure.
#[derive(Debug)]
pub struct FailureReport<'a> {
    /// Name of the registry the failure happened in.
    pub registry: Option<&'a str>,
    /// The registrant whose code failed.
    pub registrant: RegistrantId,
    /// The failure itself.
    pub error: &'a anyhow::Error,
}

/// Sink for protected-mode failures.
pub trait FailureReporter {
    /// Surface the failure. Return `true` only if someone actually saw it.
    fn report_failure(&self, failure: &FailureReport<'_>) -> bool;
}

/// Logs failures at `error` level.
///
/// Reports as delivered when a `tracing` subscriber is listening at that
/// level; with none installed the failure escalates to the caller.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter;

impl FailureReporter for LogReporter {
    fn report_failure(&self, failure: &FailureReport<'_>) -> bool {
        error!(
            registry = failure.registry.unwrap_or("<unnamed>"),
            registrant = %failure.registrant,
            error = ?failure.error,
            "listener failed"
        );
        tracing::enabled!(Level::ERROR)
    }
}
