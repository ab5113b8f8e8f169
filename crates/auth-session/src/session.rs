//! Session state machine
//!
//! A `Session` manages the lifecycle of one access credential for a single
//! application/user pairing: it loads the cached token at construction,
//! drives login handshakes through an `AuthorizationTransport`, serializes
//! pending authorization attempts in a FIFO queue, and extends SSO tokens in
//! the background through a `RefreshTransport`.
//!
//! All mutable state lives in one mutex-guarded aggregate so `state`,
//! `token`, and the queue can never be observed torn. The lock is released
//! before every transport call and before any callback dispatch; callbacks
//! can re-enter the session freely. At most one authorization attempt is
//! outstanding per session at any time — a second reauthorize only enqueues.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use auth_token::{CredentialStore, Token, now_millis};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use transport::{
    AuthErrorClass, AuthMode, AuthResponse, AuthResultCode, AuthorizationTransport, HostContext,
    RefreshError, RefreshPayload, RefreshTransport, RequestId, classify_auth_error,
};

use crate::config::SessionConfig;
use crate::dispatch::{Dispatcher, TokioDispatcher};
use crate::error::{Result, SessionError};
use crate::registry::ActiveSessionRegistry;
use crate::request::{AuthRequest, BehaviorFlags, LoginBehavior};
use crate::state::SessionState;

/// Asynchronous notification of session state changes, delivered on every
/// transition as `(session, new_state, error_or_none)`.
pub type StatusCallback =
    Arc<dyn Fn(Arc<Session>, SessionState, Option<SessionError>) + Send + Sync>;

/// Asynchronous notification of the outcome of one reauthorize call,
/// delivered exactly once as `(session, error_or_none)`.
pub type ReauthorizeCallback = Arc<dyn Fn(Arc<Session>, Option<SessionError>) + Send + Sync>;

/// Mutable session state. Guarded as a single aggregate; the queue is
/// non-empty only while the session is opening or open with an attempt
/// outstanding.
struct SessionInner {
    state: SessionState,
    token: Token,
    pending: VecDeque<AuthRequest>,
    status_callback: Option<StatusCallback>,
    last_auth_response: Option<AuthResponse>,
    last_attempted_extend_at: u64,
    refresh_in_flight: bool,
}

/// Authentication session for one application id.
///
/// Construct via [`Session::builder`]; the builder loads the persisted
/// credential and picks the starting state. Sessions are shared as
/// `Arc<Session>` and all methods take `&self`.
pub struct Session {
    application_id: String,
    store: Arc<dyn CredentialStore>,
    auth_transport: Arc<dyn AuthorizationTransport>,
    refresh_transport: Option<Arc<dyn RefreshTransport>>,
    dispatcher: Arc<dyn Dispatcher>,
    registry: Weak<ActiveSessionRegistry>,
    config: SessionConfig,
    self_ref: Weak<Session>,
    inner: Mutex<SessionInner>,
    // Serializes the session's own save/clear calls; the store contract only
    // requires tolerating non-overlapping calls. Disjoint from `inner` and
    // never held while `inner` is.
    persist_lock: Mutex<()>,
}

impl Session {
    /// Start building a session for one application/store/transport pairing.
    pub fn builder(
        application_id: impl Into<String>,
        store: Arc<dyn CredentialStore>,
        auth_transport: Arc<dyn AuthorizationTransport>,
    ) -> SessionBuilder {
        SessionBuilder {
            application_id: application_id.into(),
            permissions: Vec::new(),
            store,
            auth_transport,
            refresh_transport: None,
            dispatcher: None,
            registry: Weak::new(),
            config: SessionConfig::default(),
        }
    }

    pub fn application_id(&self) -> &str {
        &self.application_id
    }

    pub async fn state(&self) -> SessionState {
        self.inner.lock().await.state
    }

    pub async fn is_opened(&self) -> bool {
        self.inner.lock().await.state.is_opened()
    }

    /// The current access token value; empty until a token is installed.
    pub async fn access_token_value(&self) -> String {
        self.inner.lock().await.token.value().to_owned()
    }

    /// Expiration of the current token as unix milliseconds.
    pub async fn expiration(&self) -> u64 {
        self.inner.lock().await.token.expires_at()
    }

    /// Permissions granted by the current token. Reauthorization can change
    /// these.
    pub async fn permissions(&self) -> Vec<String> {
        self.inner.lock().await.token.permissions().to_vec()
    }

    /// Data returned by the provider for the most recent resolved attempt.
    pub async fn authorization_response(&self) -> Option<AuthResponse> {
        self.inner.lock().await.last_auth_response.clone()
    }

    /// Open the session.
    ///
    /// From `Created` this requires a host context, enqueues an
    /// authorization attempt, and starts the login flow; from
    /// `CreatedTokenLoaded` the cached token makes the session usable
    /// immediately with no transport call. May be called at most once; any
    /// other state yields `InvalidStateTransition`.
    pub async fn open(
        &self,
        ctx: Option<HostContext>,
        status_callback: Option<StatusCallback>,
        behavior: LoginBehavior,
        correlation_id: RequestId,
    ) -> Result<()> {
        let (old, new, callback, request) = {
            let mut inner = self.inner.lock().await;
            let old = inner.state;
            let request = match old {
                SessionState::Created => {
                    if ctx.is_none() {
                        return Err(SessionError::MissingHostContext);
                    }
                    let request = AuthRequest::new(
                        behavior,
                        correlation_id,
                        inner.token.permissions().to_vec(),
                    );
                    inner.state = SessionState::Opening;
                    inner.pending.push_back(request.clone());
                    Some(request)
                }
                SessionState::CreatedTokenLoaded => {
                    inner.state = SessionState::Opened;
                    None
                }
                state => {
                    return Err(SessionError::InvalidStateTransition {
                        operation: "open",
                        state,
                    });
                }
            };
            inner.status_callback = status_callback;
            (old, inner.state, inner.status_callback.clone(), request)
        };

        info!(
            application_id = %self.application_id,
            from = old.label(),
            to = new.label(),
            "session opening"
        );
        self.post_state_change(old, new, None, callback).await;

        if let Some(request) = request {
            self.authorize(ctx.as_ref(), request).await;
        }
        Ok(())
    }

    /// Request additional (or different) permissions on an open session.
    ///
    /// The attempt is enqueued behind any in-flight attempt and started
    /// immediately only when the queue was empty. The callback fires exactly
    /// once when this attempt resolves. A failed reauthorize leaves the
    /// session open with its previous token.
    pub async fn reauthorize(
        &self,
        ctx: Option<HostContext>,
        callback: Option<ReauthorizeCallback>,
        behavior: LoginBehavior,
        new_permissions: Vec<String>,
        correlation_id: RequestId,
    ) -> Result<()> {
        let start = {
            let mut inner = self.inner.lock().await;
            match inner.state {
                SessionState::Opened | SessionState::OpenedTokenUpdated => {}
                state => {
                    return Err(SessionError::InvalidStateTransition {
                        operation: "reauthorize",
                        state,
                    });
                }
            }
            let request =
                AuthRequest::with_callback(behavior, correlation_id, new_permissions, callback);
            let start = inner.pending.is_empty();
            inner.pending.push_back(request.clone());
            debug!(
                request_id = %correlation_id,
                queued = inner.pending.len(),
                "reauthorize enqueued"
            );
            start.then_some(request)
        };

        if let Some(request) = start {
            self.authorize(ctx.as_ref(), request).await;
        }
        Ok(())
    }

    /// Resolve the in-flight authorization attempt.
    ///
    /// Called by the platform glue once the login flow finishes. Returns
    /// whether `correlation_id` matched the pending attempt; stale or
    /// duplicate resolutions return `false` and change nothing.
    pub async fn on_authorization_result(
        &self,
        ctx: Option<&HostContext>,
        correlation_id: RequestId,
        code: AuthResultCode,
        response: Option<AuthResponse>,
    ) -> bool {
        let head = {
            let mut inner = self.inner.lock().await;
            match inner.pending.front().cloned() {
                Some(request) if request.id == correlation_id => {
                    inner.last_auth_response = response.clone();
                    request
                }
                _ => {
                    debug!(
                        request_id = %correlation_id,
                        "authorization result does not match the pending attempt"
                    );
                    return false;
                }
            }
        };

        let mut retry = false;
        let mut new_token = None;
        let mut error = None;

        match (code, &response) {
            (AuthResultCode::Canceled, None) => {
                // The user backed out before the provider answered
                error = Some(SessionError::OperationCanceled);
            }
            (AuthResultCode::Ok, None) => {
                error = Some(SessionError::Authorization(
                    "empty authorization response".into(),
                ));
            }
            (code, Some(resp)) => {
                if let Some(error_code) = &resp.error {
                    match classify_auth_error(error_code) {
                        AuthErrorClass::ProxyAuthDisabled => retry = true,
                        AuthErrorClass::UserCanceled => {
                            error = Some(SessionError::OperationCanceled);
                        }
                        AuthErrorClass::Other => {
                            let message = match &resp.error_description {
                                Some(description) => format!("{error_code}: {description}"),
                                None => error_code.clone(),
                            };
                            error = Some(SessionError::Authorization(message));
                        }
                    }
                } else if code == AuthResultCode::Canceled {
                    error = Some(SessionError::OperationCanceled);
                } else if let (Some(value), Some(expires_at)) =
                    (&resp.access_token, resp.expires_at)
                {
                    new_token = Some(Token::from_authorization(
                        value.clone(),
                        resp.permissions
                            .clone()
                            .unwrap_or_else(|| head.permissions.clone()),
                        expires_at,
                        resp.source,
                        now_millis(),
                    ));
                } else if resp.access_token.is_some() {
                    // A token with no expiry would install as already expired
                    error = Some(SessionError::Authorization(
                        "authorization response carried no expiry".into(),
                    ));
                } else {
                    error = Some(SessionError::Authorization(
                        "authorization response carried no token".into(),
                    ));
                }
            }
        }

        if retry {
            // The native proxy path is disabled server-side: replace the head
            // in place with a web-view-only derivation and start it again.
            // The slot is not consumed, so the queue length is unchanged.
            let next = {
                let mut inner = self.inner.lock().await;
                if inner.pending.front().map(|r| r.id) != Some(correlation_id) {
                    return false;
                }
                let Some(request) = inner.pending.pop_front() else {
                    return false;
                };
                let retried = request.retry(BehaviorFlags::webview_only());
                inner.pending.push_front(retried.clone());
                retried
            };
            info!(
                request_id = %correlation_id,
                "native proxy auth disabled, retrying with web view"
            );
            self.authorize(ctx, next).await;
            true
        } else {
            self.finish_auth(ctx, correlation_id, new_token, error).await
        }
    }

    /// Close the session without clearing the persisted credential.
    ///
    /// From `Opening` this is a login failure (the flow was abandoned);
    /// from any usable state it is a normal close. Terminal and
    /// not-yet-opened states make this a no-op.
    pub async fn close(&self) {
        let (old, new, error, callback, drained) = {
            let mut inner = self.inner.lock().await;
            let old = inner.state;
            let (new, error) = match old {
                SessionState::Opening => (
                    SessionState::ClosedLoginFailed,
                    Some(SessionError::OperationCanceled),
                ),
                SessionState::CreatedTokenLoaded
                | SessionState::Opened
                | SessionState::OpenedTokenUpdated => (SessionState::Closed, None),
                _ => return,
            };
            inner.state = new;
            let drained: Vec<AuthRequest> = inner.pending.drain(..).collect();
            (old, new, error, inner.status_callback.clone(), drained)
        };

        info!(
            application_id = %self.application_id,
            from = old.label(),
            to = new.label(),
            "session closed"
        );
        self.post_state_change(old, new, error, callback).await;
        self.post_drained(drained, Some(SessionError::OperationCanceled));
    }

    /// Clear the persisted credential, then close.
    pub async fn close_and_clear(&self) {
        {
            let _persist = self.persist_lock.lock().await;
            if let Err(e) = self.store.clear().await {
                warn!(error = %e, "failed to clear credential store");
            }
        }
        self.close().await;
    }

    /// Whether a background token extension is due now.
    pub async fn should_extend(&self) -> bool {
        self.should_extend_at(now_millis()).await
    }

    pub(crate) async fn should_extend_at(&self, now: u64) -> bool {
        let inner = self.inner.lock().await;
        Self::should_extend_inner(&inner, &self.config, now)
    }

    fn should_extend_inner(inner: &SessionInner, config: &SessionConfig, now: u64) -> bool {
        inner.state.is_opened()
            && inner.token.source().is_sso()
            && !inner.refresh_in_flight
            && now.saturating_sub(inner.last_attempted_extend_at) >= config.retry_interval_millis()
            && now.saturating_sub(inner.token.last_refreshed_at())
                >= config.extend_threshold_millis()
    }

    /// Start one background token extension when due.
    ///
    /// At most one refresh is in flight per session; concurrent calls while
    /// one is outstanding are suppressed. The attempt time is recorded at
    /// start regardless of outcome, so a failed handshake is not retried
    /// before the next retry interval. Failures are silent — the current
    /// token is left unchanged and no session error is surfaced.
    pub async fn extend_access_token_if_needed(&self) {
        let Some(transport) = &self.refresh_transport else {
            return;
        };
        let token = {
            let mut inner = self.inner.lock().await;
            let now = now_millis();
            if !Self::should_extend_inner(&inner, &self.config, now) {
                return;
            }
            inner.refresh_in_flight = true;
            inner.last_attempted_extend_at = now;
            inner.token.clone()
        };

        let Some(handshake) = transport.try_start(&token) else {
            debug!("refresh transport could not be started");
            self.inner.lock().await.refresh_in_flight = false;
            return;
        };
        debug!(application_id = %self.application_id, "token refresh started");

        let Some(session) = self.self_ref.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            let result = handshake.await;
            session.handle_refresh_result(result).await;
        });
    }

    /// Try each allowed transport mode in order; the first that starts wins.
    /// When none can be started the session fails terminally, unless it is
    /// already closed.
    async fn authorize(&self, ctx: Option<&HostContext>, request: AuthRequest) {
        let attempt = request.attempt(&self.application_id);

        let mut started = false;
        for mode in [AuthMode::NativeApp, AuthMode::WebView] {
            if request.flags.allows(mode) {
                started = self.auth_transport.try_start(mode, ctx, &attempt);
                if started {
                    break;
                }
            }
        }
        if started {
            debug!(request_id = %request.id, "authorization attempt started");
            return;
        }

        let (old, new, callback, drained) = {
            let mut inner = self.inner.lock().await;
            if inner.state.is_terminal() {
                return;
            }
            let old = inner.state;
            inner.state = SessionState::ClosedLoginFailed;
            let drained: Vec<AuthRequest> = inner.pending.drain(..).collect();
            (old, inner.state, inner.status_callback.clone(), drained)
        };

        warn!(
            application_id = %self.application_id,
            request_id = %request.id,
            "no authorization transport mode available"
        );
        self.post_state_change(old, new, Some(SessionError::TransportUnavailable), callback)
            .await;
        self.post_drained(drained, Some(SessionError::TransportUnavailable));
    }

    /// Consume the head of the queue and apply the outcome of its attempt.
    ///
    /// Dequeue, token install, state transition, and next-candidate
    /// selection happen in one critical section; a resolution that no longer
    /// matches the head (a duplicate that lost the race) returns `false`
    /// without touching anything.
    async fn finish_auth(
        &self,
        ctx: Option<&HostContext>,
        expected: RequestId,
        mut new_token: Option<Token>,
        mut error: Option<SessionError>,
    ) -> bool {
        // A token-shaped response with an empty value is a failed auth
        if new_token.as_ref().is_some_and(|t| t.is_invalid()) {
            new_token = None;
            error = Some(SessionError::Authorization(
                "authorization produced an invalid token".into(),
            ));
        }

        // Cheap head check so a resolution that cannot match never reaches
        // the store; the critical section below re-checks
        {
            let inner = self.inner.lock().await;
            if inner.pending.front().map(|r| r.id) != Some(expected) {
                return false;
            }
        }

        // Persist before installing so the cache never lags a live token
        if let Some(token) = &new_token {
            let _persist = self.persist_lock.lock().await;
            if let Err(e) = self.store.save(token.to_record()).await {
                warn!(error = %e, "failed to persist new token");
            }
        }

        let (finished, next, old, new, callback, drained) = {
            let mut inner = self.inner.lock().await;
            if inner.pending.front().map(|r| r.id) != Some(expected) {
                return false;
            }
            let Some(request) = inner.pending.pop_front() else {
                return false;
            };

            let old = inner.state;
            let mut drained = Vec::new();
            match old {
                SessionState::Opening | SessionState::Opened | SessionState::OpenedTokenUpdated => {
                    if let Some(token) = new_token.take() {
                        inner.token = token;
                        inner.state = if old == SessionState::Opening {
                            SessionState::Opened
                        } else {
                            SessionState::OpenedTokenUpdated
                        };
                    } else if error.is_some() && old == SessionState::Opening {
                        // Initial login failed; queued attempts cannot proceed
                        inner.state = SessionState::ClosedLoginFailed;
                        drained = inner.pending.drain(..).collect();
                    }
                    // A failed reauthorize leaves the open state unchanged
                }
                _ => {}
            }
            let next = inner.pending.front().cloned();
            (
                request,
                next,
                old,
                inner.state,
                inner.status_callback.clone(),
                drained,
            )
        };

        info!(
            request_id = %expected,
            from = old.label(),
            to = new.label(),
            ok = error.is_none(),
            "authorization attempt resolved"
        );

        if matches!(
            old,
            SessionState::Opening | SessionState::Opened | SessionState::OpenedTokenUpdated
        ) {
            self.post_state_change(old, new, error.clone(), callback)
                .await;
        }
        self.post_reauthorize(finished, error.clone());
        self.post_drained(drained, error);

        if let Some(next) = next {
            Box::pin(self.authorize(ctx, next)).await;
        }
        true
    }

    /// Apply a finished refresh handshake. Only open sessions fold the
    /// payload in; everything else is ignored silently.
    async fn handle_refresh_result(&self, result: std::result::Result<RefreshPayload, RefreshError>) {
        let payload = match result {
            Ok(payload) => payload,
            Err(e) => {
                // Best-effort: token unchanged, eligible again after the
                // retry interval
                debug!(error = %e, "token refresh failed");
                self.inner.lock().await.refresh_in_flight = false;
                return;
            }
        };

        let (transition, refreshed) = {
            let mut inner = self.inner.lock().await;
            inner.refresh_in_flight = false;
            let old = inner.state;
            match old {
                SessionState::Opened | SessionState::OpenedTokenUpdated => {
                    let refreshed = inner.token.for_refresh(
                        payload.access_token,
                        payload.expires_at,
                        payload.permissions,
                        now_millis(),
                    );
                    inner.token = refreshed.clone();
                    if old == SessionState::Opened {
                        inner.state = SessionState::OpenedTokenUpdated;
                    }
                    (
                        Some((old, inner.state, inner.status_callback.clone())),
                        Some(refreshed),
                    )
                }
                state => {
                    debug!(state = state.label(), "refresh result ignored");
                    (None, None)
                }
            }
        };

        if let Some(token) = refreshed {
            let _persist = self.persist_lock.lock().await;
            if let Err(e) = self.store.save(token.to_record()).await {
                warn!(error = %e, "failed to persist refreshed token");
            }
            info!(application_id = %self.application_id, "access token extended");
        }
        if let Some((old, new, callback)) = transition {
            if old != new {
                self.post_state_change(old, new, None, callback).await;
            }
        }
    }

    /// Deliver a state change to the status callback and, when the opened
    /// flag flipped, to the registry. Callers must not hold the session
    /// lock.
    async fn post_state_change(
        &self,
        old: SessionState,
        new: SessionState,
        error: Option<SessionError>,
        callback: Option<StatusCallback>,
    ) {
        debug!(from = old.label(), to = new.label(), "session state change");
        let Some(session) = self.self_ref.upgrade() else {
            return;
        };

        if let Some(callback) = callback {
            let session = Arc::clone(&session);
            self.dispatcher
                .dispatch(Box::new(move || callback(session, new, error)));
        }

        if old.is_opened() != new.is_opened() {
            if let Some(registry) = self.registry.upgrade() {
                registry.session_transition(&session, new.is_opened()).await;
            }
        }
    }

    fn post_reauthorize(&self, request: AuthRequest, error: Option<SessionError>) {
        let Some(callback) = request.reauthorize_callback else {
            return;
        };
        let Some(session) = self.self_ref.upgrade() else {
            return;
        };
        self.dispatcher
            .dispatch(Box::new(move || callback(session, error)));
    }

    fn post_drained(&self, drained: Vec<AuthRequest>, error: Option<SessionError>) {
        for request in drained {
            self.post_reauthorize(request, error.clone());
        }
    }
}

/// Builder for [`Session`]. `build` loads the cached credential and picks
/// the starting state.
pub struct SessionBuilder {
    application_id: String,
    permissions: Vec<String>,
    store: Arc<dyn CredentialStore>,
    auth_transport: Arc<dyn AuthorizationTransport>,
    refresh_transport: Option<Arc<dyn RefreshTransport>>,
    dispatcher: Option<Arc<dyn Dispatcher>>,
    registry: Weak<ActiveSessionRegistry>,
    config: SessionConfig,
}

impl SessionBuilder {
    /// Permissions to request during authorization. Empty means basic
    /// permissions.
    pub fn permissions(mut self, permissions: Vec<String>) -> Self {
        self.permissions = permissions;
        self
    }

    pub fn refresh_transport(mut self, transport: Arc<dyn RefreshTransport>) -> Self {
        self.refresh_transport = Some(transport);
        self
    }

    /// Dispatcher for user-facing callbacks. Defaults to the shared tokio
    /// worker queue.
    pub fn dispatcher(mut self, dispatcher: Arc<dyn Dispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Registry to notify when this session's opened flag flips while it is
    /// the active session.
    pub fn registry(mut self, registry: &Arc<ActiveSessionRegistry>) -> Self {
        self.registry = Arc::downgrade(registry);
        self
    }

    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Load the persisted credential and construct the session.
    ///
    /// A cached token that is missing, expired, or does not cover the
    /// requested permissions is cleared from the store and the session
    /// starts in `Created`; otherwise it starts in `CreatedTokenLoaded`
    /// holding the cached token.
    pub async fn build(self) -> auth_token::Result<Arc<Session>> {
        let mut state = SessionState::Created;
        let mut token = Token::empty(self.permissions.clone());

        if let Some(record) = self.store.load().await? {
            let cached = Token::from_record(record);
            if cached.is_invalid()
                || cached.is_expired_at(now_millis())
                || !cached.grants_all(&self.permissions)
            {
                debug!(
                    application_id = %self.application_id,
                    "cached token unusable, clearing store"
                );
                self.store.clear().await?;
            } else {
                token = cached;
                state = SessionState::CreatedTokenLoaded;
            }
        }

        info!(
            application_id = %self.application_id,
            state = state.label(),
            "session created"
        );

        let dispatcher = self
            .dispatcher
            .unwrap_or_else(|| Arc::new(TokioDispatcher::new()));

        Ok(Arc::new_cyclic(|weak| Session {
            application_id: self.application_id,
            store: self.store,
            auth_transport: self.auth_transport,
            refresh_transport: self.refresh_transport,
            dispatcher,
            registry: self.registry,
            config: self.config,
            self_ref: weak.clone(),
            inner: Mutex::new(SessionInner {
                state,
                token,
                pending: VecDeque::new(),
                status_callback: None,
                last_auth_response: None,
                last_attempted_extend_at: 0,
                refresh_in_flight: false,
            }),
            persist_lock: Mutex::new(()),
        }))
    }
}
