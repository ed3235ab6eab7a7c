//! Structured error types for chorus.
//!
//! `ChorusError` provides pattern-matchable errors instead of generic
//! `anyhow::Error`. Listener and matcher code still returns `anyhow::Result`;
//! those failures are wrapped on their way out of [`Registry::dispatch`].
//!
//! # Propagation Rules
//!
//! | Failure                          | Protected mode                  | Unprotected mode      |
//! |----------------------------------|---------------------------------|-----------------------|
//! | Listener/matcher returns `Err`   | reported, pass continues        | `ListenerFailed`      |
//! | ... and nobody saw the report    | `Unreported`, pass ends         | n/a                   |
//! | Relocation bookkeeping broken    | `Invariant`                     | `Invariant`           |
//!
//! Removing a listener that was never registered is *not* an error: it is
//! logged as a warning and the call completes normally.
//!
//! [`Registry::dispatch`]: crate::Registry::dispatch

use thiserror::Error;

use crate::core::RegistrantId;

/// Errors surfaced by the registry.
#[derive(Debug, Error)]
pub enum ChorusError {
    /// `add_listener` was called with arguments that can never form a
    /// valid subscription. The registry is left unchanged.
    #[error("invalid subscription: {reason}")]
    Subscription {
        /// What was wrong with the arguments.
        reason: &'static str,
    },

    /// A listener or matcher failed during an unprotected dispatch.
    ///
    /// The remainder of the pass was abandoned.
    #[error("listener {registrant} failed")]
    ListenerFailed {
        /// The registrant whose listener or matcher failed.
        registrant: RegistrantId,
        /// The underlying failure.
        #[source]
        source: anyhow::Error,
    },

    /// A protected-mode failure that the failure reporter could not deliver
    /// to anyone. Escalated instead of silently swallowed.
    #[error("listener {registrant} failed and the failure went unreported")]
    Unreported {
        /// The registrant whose listener or matcher failed.
        registrant: RegistrantId,
        /// The underlying failure.
        #[source]
        source: anyhow::Error,
    },

    /// Internal bookkeeping of the registrant list or a live pass is
    /// inconsistent. This is a bug in chorus, never a user error.
    #[error("registry invariant violated: {detail}")]
    Invariant {
        /// Description of the broken invariant.
        detail: String,
    },
}

impl ChorusError {
    pub(crate) fn invariant(detail: impl Into<String>) -> Self {
        Self::Invariant {
            detail: detail.into(),
        }
    }

    /// The registrant involved, for listener failures.
    pub fn registrant(&self) -> Option<RegistrantId> {
        match self {
            Self::ListenerFailed { registrant, .. } | Self::Unreported { registrant, .. } => {
                Some(*registrant)
            }
            _ => None,
        }
    }

    /// Whether this error indicates a defect inside the registry itself.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, Self::Invariant { .. })
    }
}

/// Result alias used throughout the crate.
pub type Result<T, E = ChorusError> = std::result::Result<T, E>;
