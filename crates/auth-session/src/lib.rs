//! Authentication session state machine
//!
//! A [`Session`] owns one user's credential lifecycle for one application:
//! loading the cached token, driving the login handshake through an
//! `AuthorizationTransport`, serializing pending authorization attempts,
//! extending SSO tokens in the background, and persisting every new token
//! through the `CredentialStore`.
//!
//! Session lifecycle:
//! 1. `Session::builder(..).build()` loads the cached token → `Created` or
//!    `CreatedTokenLoaded`
//! 2. `open` starts the login flow (or adopts the cached token) → `Opening`
//!    then `Opened`
//! 3. `reauthorize` requests more permissions; attempts queue FIFO behind
//!    the one in flight
//! 4. `extend_access_token_if_needed` refreshes aging SSO tokens silently
//! 5. `close` / `close_and_clear` end the session; `Closed` and
//!    `ClosedLoginFailed` are terminal
//!
//! An [`ActiveSessionRegistry`] tracks the process's designated session and
//! fans activation and open/close transitions out to subscribers.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod registry;
pub mod request;
pub mod session;
pub mod state;

pub use config::SessionConfig;
pub use dispatch::{Dispatcher, TokioDispatcher};
pub use error::{Result, SessionError};
pub use registry::{ActiveSessionEvent, ActiveSessionRegistry, EventCallback, EventMatcher};
pub use request::{AuthRequest, BehaviorFlags, LoginBehavior};
pub use session::{ReauthorizeCallback, Session, SessionBuilder, StatusCallback};
pub use state::SessionState;
