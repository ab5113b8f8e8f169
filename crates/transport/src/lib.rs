//! Transport abstraction for login and refresh handshakes
//!
//! Defines the collaborator traits that decouple the session state machine
//! from how authorization actually happens. A front-end implements
//! `AuthorizationTransport` over whatever surfaces it has (a native
//! companion-app handoff, an embedded web view) and `RefreshTransport` over
//! its out-of-process refresh channel (HTTP call, local IPC, subprocess).
//! The session core never sees wire details — results come back as explicit
//! values, never exceptions crossing the transport boundary.
//!
//! An authorization attempt is asynchronous in two steps: `try_start` only
//! reports whether the mode could be launched; the outcome arrives later
//! through `Session::on_authorization_result` with the attempt's
//! correlation `RequestId`.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use auth_token::{Token, TokenSource};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Mutually-exclusive login modes an authorization transport may support.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// Hand off to a trusted native companion application (single sign-on)
    NativeApp,
    /// Embedded web view login dialog
    WebView,
}

impl AuthMode {
    /// Mode label for logging.
    pub fn label(self) -> &'static str {
        match self {
            AuthMode::NativeApp => "native_app",
            AuthMode::WebView => "web_view",
        }
    }
}

/// Correlation token tying an authorization attempt to its later result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Opaque handle to the host surface (window, activity, terminal) a
/// transport may need to present login UI. The core never inspects it;
/// transports downcast to the concrete type they were built for.
#[derive(Clone)]
pub struct HostContext(Arc<dyn Any + Send + Sync>);

impl HostContext {
    pub fn new(value: impl Any + Send + Sync) -> Self {
        Self(Arc::new(value))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref()
    }
}

impl fmt::Debug for HostContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("HostContext")
    }
}

/// Outcome code of a finished authorization attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthResultCode {
    /// The flow completed; the response carries a token or an error field
    Ok,
    /// The user backed out, or the provider aborted with an error payload
    Canceled,
}

/// Data returned by the identity provider at the end of an attempt.
///
/// Exactly one of `access_token` or `error` is expected to be set on an `Ok`
/// outcome. `source` records which login path granted the token; transports
/// must fill it on success.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthResponse {
    pub access_token: Option<String>,
    /// Expiration as unix timestamp in milliseconds
    pub expires_at: Option<u64>,
    /// Granted permissions, when the provider reports them
    pub permissions: Option<Vec<String>>,
    #[serde(default)]
    pub source: TokenSource,
    /// Provider error code (e.g. `service_disabled`, `access_denied`)
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl AuthResponse {
    /// A successful response carrying a granted token.
    pub fn success(access_token: impl Into<String>, expires_at: u64, source: TokenSource) -> Self {
        Self {
            access_token: Some(access_token.into()),
            expires_at: Some(expires_at),
            source,
            ..Self::default()
        }
    }

    /// A response carrying a provider error code.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

/// Classification of provider error codes, driving the session's reaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthErrorClass {
    /// The native-app proxy path is disabled server-side; the attempt should
    /// be retried with the web view mode only
    ProxyAuthDisabled,
    /// The user declined the flow at the provider
    UserCanceled,
    /// Any other provider rejection
    Other,
}

/// Error codes indicating the native proxy-auth path is disabled for this
/// application. These trigger a web-view-only retry instead of a failure.
const PROXY_AUTH_DISABLED_ERRORS: &[&str] = &["service_disabled", "service_disabled_use_browser"];

/// Error codes indicating the user declined the flow.
const USER_CANCELED_ERRORS: &[&str] = &["access_denied", "OAuthAccessDeniedException"];

/// Classify a provider error code from an authorization response.
pub fn classify_auth_error(code: &str) -> AuthErrorClass {
    if PROXY_AUTH_DISABLED_ERRORS.contains(&code) {
        AuthErrorClass::ProxyAuthDisabled
    } else if USER_CANCELED_ERRORS.contains(&code) {
        AuthErrorClass::UserCanceled
    } else {
        AuthErrorClass::Other
    }
}

/// Attempt-scoped view of an authorization request handed to a transport.
#[derive(Debug, Clone)]
pub struct AuthAttempt {
    pub application_id: String,
    pub request_id: RequestId,
    pub permissions: Vec<String>,
}

/// Performs a login handshake with the identity provider.
///
/// `try_start` launches the flow for one mode and returns whether it could
/// be started at all (the companion app may be absent, the web view
/// unavailable). It must not block on user interaction; the outcome is
/// delivered later via `Session::on_authorization_result` with the attempt's
/// `request_id`.
pub trait AuthorizationTransport: Send + Sync {
    fn try_start(&self, mode: AuthMode, ctx: Option<&HostContext>, attempt: &AuthAttempt) -> bool;
}

/// Payload produced by a successful refresh handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshPayload {
    pub access_token: String,
    /// Expiration as unix timestamp in milliseconds
    pub expires_at: u64,
    /// Granted permissions, when the refresh handshake reports them
    pub permissions: Option<Vec<String>>,
}

/// Errors from a refresh handshake. Refreshes are best-effort: the session
/// logs these and retries after the next retry interval, never surfacing
/// them as session errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RefreshError {
    #[error("refresh service unavailable")]
    Unavailable,

    #[error("refresh transport failed: {0}")]
    Transport(String),
}

/// Extends a token's lifetime through an out-of-process handshake.
pub trait RefreshTransport: Send + Sync {
    /// Begin a refresh for the given token. Returns `None` when the
    /// handshake cannot be started (e.g. refresh service missing), otherwise
    /// a future resolving to the payload or failure. The session awaits the
    /// future on a background task; at most one refresh is in flight per
    /// session.
    fn try_start(
        &self,
        token: &Token,
    ) -> Option<Pin<Box<dyn Future<Output = Result<RefreshPayload, RefreshError>> + Send + 'static>>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_proxy_disabled_codes() {
        assert_eq!(
            classify_auth_error("service_disabled"),
            AuthErrorClass::ProxyAuthDisabled
        );
        assert_eq!(
            classify_auth_error("service_disabled_use_browser"),
            AuthErrorClass::ProxyAuthDisabled
        );
    }

    #[test]
    fn classify_user_canceled_codes() {
        assert_eq!(
            classify_auth_error("access_denied"),
            AuthErrorClass::UserCanceled
        );
        assert_eq!(
            classify_auth_error("OAuthAccessDeniedException"),
            AuthErrorClass::UserCanceled
        );
    }

    #[test]
    fn classify_unknown_code_is_other() {
        assert_eq!(
            classify_auth_error("invalid_scope"),
            AuthErrorClass::Other
        );
    }

    #[test]
    fn request_ids_are_unique() {
        assert_ne!(RequestId::new(), RequestId::new());
    }

    #[test]
    fn host_context_downcasts_to_concrete_type() {
        let ctx = HostContext::new(42u32);
        assert_eq!(ctx.downcast_ref::<u32>(), Some(&42));
        assert!(ctx.downcast_ref::<String>().is_none());
    }

    #[test]
    fn success_response_carries_token_and_source() {
        let resp = AuthResponse::success("at_abc", 1_000, TokenSource::Sso);
        assert_eq!(resp.access_token.as_deref(), Some("at_abc"));
        assert_eq!(resp.expires_at, Some(1_000));
        assert_eq!(resp.source, TokenSource::Sso);
        assert!(resp.error.is_none());
    }

    #[test]
    fn auth_response_deserializes_with_defaults() {
        let resp: AuthResponse =
            serde_json::from_str(r#"{"error":"service_disabled"}"#).unwrap();
        assert_eq!(resp.error.as_deref(), Some("service_disabled"));
        assert_eq!(resp.source, TokenSource::None);
        assert!(resp.access_token.is_none());
    }
}
