//! Queued authorization attempts

use std::fmt;

use transport::{AuthAttempt, AuthMode, RequestId};

use crate::session::ReauthorizeCallback;

/// How login should be attempted for one open/reauthorize call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoginBehavior {
    /// Try the native companion app first, fall back to the web view
    #[default]
    SsoWithFallback,
    /// Native companion app only
    SsoOnly,
    /// Web view only
    SuppressSso,
}

/// Transport modes one attempt is allowed to use, derived from
/// `LoginBehavior`. Native is always tried before the web view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BehaviorFlags {
    pub allow_native: bool,
    pub allow_webview: bool,
}

impl BehaviorFlags {
    pub fn from_behavior(behavior: LoginBehavior) -> Self {
        match behavior {
            LoginBehavior::SsoWithFallback => Self {
                allow_native: true,
                allow_webview: true,
            },
            LoginBehavior::SsoOnly => Self {
                allow_native: true,
                allow_webview: false,
            },
            LoginBehavior::SuppressSso => Self {
                allow_native: false,
                allow_webview: true,
            },
        }
    }

    /// The retry flag set used when the native proxy path is disabled.
    pub fn webview_only() -> Self {
        Self {
            allow_native: false,
            allow_webview: true,
        }
    }

    pub fn allows(self, mode: AuthMode) -> bool {
        match mode {
            AuthMode::NativeApp => self.allow_native,
            AuthMode::WebView => self.allow_webview,
        }
    }
}

/// One queued authorization or reauthorization attempt.
///
/// Consumed from the session's FIFO queue exactly once: on success, failure,
/// or cancellation. The only mutation-like operation is `retry`, which
/// derives a fresh request with adjusted flags.
#[derive(Clone)]
pub struct AuthRequest {
    pub(crate) flags: BehaviorFlags,
    pub(crate) id: RequestId,
    pub(crate) permissions: Vec<String>,
    pub(crate) reauthorize_callback: Option<ReauthorizeCallback>,
}

impl AuthRequest {
    pub(crate) fn new(behavior: LoginBehavior, id: RequestId, permissions: Vec<String>) -> Self {
        Self {
            flags: BehaviorFlags::from_behavior(behavior),
            id,
            permissions,
            reauthorize_callback: None,
        }
    }

    pub(crate) fn with_callback(
        behavior: LoginBehavior,
        id: RequestId,
        permissions: Vec<String>,
        callback: Option<ReauthorizeCallback>,
    ) -> Self {
        Self {
            flags: BehaviorFlags::from_behavior(behavior),
            id,
            permissions,
            reauthorize_callback: callback,
        }
    }

    /// Derive a retry of this request: same correlation id and permissions,
    /// replaced flags, no reauthorize callback.
    pub(crate) fn retry(&self, flags: BehaviorFlags) -> Self {
        Self {
            flags,
            id: self.id,
            permissions: self.permissions.clone(),
            reauthorize_callback: None,
        }
    }

    /// The transport-facing view of this request.
    pub(crate) fn attempt(&self, application_id: &str) -> AuthAttempt {
        AuthAttempt {
            application_id: application_id.to_owned(),
            request_id: self.id,
            permissions: self.permissions.clone(),
        }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn permissions(&self) -> &[String] {
        &self.permissions
    }
}

impl fmt::Debug for AuthRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthRequest")
            .field("id", &self.id)
            .field("flags", &self.flags)
            .field("permissions", &self.permissions)
            .field("has_callback", &self.reauthorize_callback.is_some())
            .finish()
    }
}
