//! Error types for session operations

use crate::state::SessionState;

/// Errors surfaced by session operations and callbacks.
///
/// Clone because one failure can be delivered to the status callback and to
/// one or more reauthorize callbacks.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SessionError {
    /// Programmer error: the operation is not allowed in the current state.
    /// Not retried; surfaced to the caller of the method.
    #[error("{operation} is not allowed in state {state:?}")]
    InvalidStateTransition {
        operation: &'static str,
        state: SessionState,
    },

    /// Opening a session with no cached token requires a host context for
    /// the login flow
    #[error("a host context is required to open a session with no cached token")]
    MissingHostContext,

    /// The user aborted the login flow
    #[error("operation canceled")]
    OperationCanceled,

    /// The identity provider rejected the authorization request
    #[error("authorization failed: {0}")]
    Authorization(String),

    /// No allowed transport mode could be started
    #[error("no authorization transport mode could be started")]
    TransportUnavailable,
}

/// Result alias for session operations.
pub type Result<T> = std::result::Result<T, SessionError>;
