//! Session lifecycle states

/// Lifecycle state of a `Session`.
///
/// Transitions:
/// - Created → Opening (open with no cached token)
/// - Created → CreatedTokenLoaded happens at construction, not via open
/// - CreatedTokenLoaded → Opened (open with a usable cached token)
/// - Opening → Opened (first authorization succeeded)
/// - Opened → OpenedTokenUpdated (reauthorization or refresh landed)
/// - any open state → Closed (close)
/// - Opening → ClosedLoginFailed (authorization failed or close mid-flight)
///
/// `Closed` and `ClosedLoginFailed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Constructed, no usable cached token
    Created,
    /// Constructed with a usable cached token; open completes without a
    /// transport call
    CreatedTokenLoaded,
    /// An authorization attempt is in flight for the initial open
    Opening,
    /// Usable: the initial authorization (or cached token) is installed
    Opened,
    /// Usable: the token changed after open (reauthorization or refresh)
    OpenedTokenUpdated,
    /// Closed normally
    Closed,
    /// Closed because the initial login failed or was abandoned
    ClosedLoginFailed,
}

impl SessionState {
    /// Whether the session is usable for requests.
    pub fn is_opened(self) -> bool {
        matches!(self, SessionState::Opened | SessionState::OpenedTokenUpdated)
    }

    /// Whether this is a terminal state.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Closed | SessionState::ClosedLoginFailed)
    }

    /// State label for logging.
    pub fn label(self) -> &'static str {
        match self {
            SessionState::Created => "created",
            SessionState::CreatedTokenLoaded => "created_token_loaded",
            SessionState::Opening => "opening",
            SessionState::Opened => "opened",
            SessionState::OpenedTokenUpdated => "opened_token_updated",
            SessionState::Closed => "closed",
            SessionState::ClosedLoginFailed => "closed_login_failed",
        }
    }
}
