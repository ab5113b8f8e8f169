//! Active-session tracking
//!
//! A process usually designates one session as "the" session that request
//! helpers use by default. The registry holds that slot and fans
//! activation and open/close transitions out to subscribers. It is an
//! ordinary object with its own lock rather than a process global, so each
//! embedder (and each test) constructs its own.
//!
//! The registry lock is disjoint from every session lock and is never
//! acquired while a session lock is held.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::dispatch::{Dispatcher, TokioDispatcher};
use crate::session::Session;

/// Notification kinds delivered to registry subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveSessionEvent {
    /// A session became the active session
    Set,
    /// The previously active session was displaced or removed
    Unset,
    /// The active session became open
    Opened,
    /// The active session stopped being open
    Closed,
}

impl ActiveSessionEvent {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Set => "set",
            Self::Unset => "unset",
            Self::Opened => "opened",
            Self::Closed => "closed",
        }
    }
}

/// Predicate deciding which events a subscriber wants.
pub type EventMatcher = Arc<dyn Fn(ActiveSessionEvent) -> bool + Send + Sync>;

/// Subscriber callback. Identity (the `Arc` pointer) is what `unregister`
/// matches on.
pub type EventCallback = Arc<dyn Fn(ActiveSessionEvent) + Send + Sync>;

struct Subscription {
    matcher: EventMatcher,
    callback: EventCallback,
}

struct RegistryInner {
    current: Option<Arc<Session>>,
    subscribers: Vec<Subscription>,
}

/// Holds at most one active session and notifies subscribers of
/// activation and open/close transitions.
pub struct ActiveSessionRegistry {
    inner: Mutex<RegistryInner>,
    dispatcher: Arc<dyn Dispatcher>,
}

impl ActiveSessionRegistry {
    /// Must be created inside a tokio runtime.
    pub fn new() -> Arc<Self> {
        Self::with_dispatcher(Arc::new(TokioDispatcher::new()))
    }

    pub fn with_dispatcher(dispatcher: Arc<dyn Dispatcher>) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(RegistryInner {
                current: None,
                subscribers: Vec::new(),
            }),
            dispatcher,
        })
    }

    pub async fn active(&self) -> Option<Arc<Session>> {
        self.inner.lock().await.current.clone()
    }

    /// Replace the active session.
    ///
    /// Setting the session that is already active is a no-op. Otherwise the
    /// displaced session, if any, is closed and `Unset` fires; then, for a
    /// non-empty replacement, `Set` fires, followed by `Opened` when the new
    /// session is already open.
    pub async fn set_active(&self, session: Option<Arc<Session>>) {
        let previous = {
            let mut inner = self.inner.lock().await;
            match (&inner.current, &session) {
                (None, None) => return,
                (Some(current), Some(new)) if Arc::ptr_eq(current, new) => return,
                _ => {}
            }
            std::mem::replace(&mut inner.current, session.clone())
        };

        info!(
            replaced = previous.is_some(),
            set = session.is_some(),
            "active session changed"
        );

        if let Some(previous) = previous {
            self.notify(ActiveSessionEvent::Unset).await;
            // The slot already points elsewhere, so this close does not
            // produce a Closed event of its own; Unset covers it.
            previous.close().await;
        }
        if let Some(session) = session {
            self.notify(ActiveSessionEvent::Set).await;
            if session.is_opened().await {
                self.notify(ActiveSessionEvent::Opened).await;
            }
        }
    }

    /// Subscribe to events accepted by `matcher`. Subscribers are notified
    /// in registration order.
    pub async fn register(&self, matcher: EventMatcher, callback: EventCallback) {
        self.inner
            .lock()
            .await
            .subscribers
            .push(Subscription { matcher, callback });
    }

    /// Remove every registration of `callback`, by identity.
    pub async fn unregister(&self, callback: &EventCallback) {
        self.inner
            .lock()
            .await
            .subscribers
            .retain(|s| !Arc::ptr_eq(&s.callback, callback));
    }

    /// Called by a session whose opened flag flipped. Only the currently
    /// active session produces `Opened`/`Closed` events.
    pub(crate) async fn session_transition(&self, session: &Arc<Session>, now_open: bool) {
        let is_active = {
            let inner = self.inner.lock().await;
            inner
                .current
                .as_ref()
                .is_some_and(|current| Arc::ptr_eq(current, session))
        };
        if is_active {
            let event = if now_open {
                ActiveSessionEvent::Opened
            } else {
                ActiveSessionEvent::Closed
            };
            self.notify(event).await;
        }
    }

    /// Snapshot the matching callbacks under the lock, then dispatch outside
    /// it; a subscriber can register or unregister from inside its callback.
    async fn notify(&self, event: ActiveSessionEvent) {
        let callbacks: Vec<EventCallback> = {
            let inner = self.inner.lock().await;
            inner
                .subscribers
                .iter()
                .filter(|s| (s.matcher)(event))
                .map(|s| s.callback.clone())
                .collect()
        };
        debug!(
            event = event.label(),
            subscribers = callbacks.len(),
            "active session event"
        );
        for callback in callbacks {
            self.dispatcher
                .dispatch(Box::new(move || callback(event)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::LoginBehavior;
    use crate::state::SessionState;
    use auth_token::{MemoryCredentialStore, TokenRecord, TokenSource};
    use std::sync::Mutex as StdMutex;
    use transport::{AuthMode, AuthorizationTransport, HostContext, RequestId};

    struct InlineDispatcher;

    impl Dispatcher for InlineDispatcher {
        fn dispatch(&self, task: crate::dispatch::Task) {
            task();
        }
    }

    struct NoTransport;

    impl AuthorizationTransport for NoTransport {
        fn try_start(
            &self,
            _mode: AuthMode,
            _ctx: Option<&HostContext>,
            _attempt: &transport::AuthAttempt,
        ) -> bool {
            false
        }
    }

    fn inline_registry() -> Arc<ActiveSessionRegistry> {
        ActiveSessionRegistry::with_dispatcher(Arc::new(InlineDispatcher))
    }

    async fn cached_session(registry: Option<&Arc<ActiveSessionRegistry>>) -> Arc<Session> {
        let store = Arc::new(MemoryCredentialStore::with_record(TokenRecord {
            value: "at".into(),
            permissions: vec!["email".into()],
            expires_at: 4_102_444_800_000,
            last_refreshed_at: 1_000,
            source: TokenSource::Sso,
        }));
        let mut builder = Session::builder("app-1", store, Arc::new(NoTransport))
            .permissions(vec!["email".into()])
            .dispatcher(Arc::new(InlineDispatcher));
        if let Some(registry) = registry {
            builder = builder.registry(registry);
        }
        builder.build().await.unwrap()
    }

    async fn opened_session(registry: Option<&Arc<ActiveSessionRegistry>>) -> Arc<Session> {
        let session = cached_session(registry).await;
        session
            .open(None, None, LoginBehavior::SsoWithFallback, RequestId::new())
            .await
            .unwrap();
        session
    }

    fn recording_subscriber() -> (EventCallback, Arc<StdMutex<Vec<ActiveSessionEvent>>>) {
        let events = Arc::new(StdMutex::new(Vec::new()));
        let callback: EventCallback = {
            let events = events.clone();
            Arc::new(move |event| events.lock().unwrap().push(event))
        };
        (callback, events)
    }

    fn match_all() -> EventMatcher {
        Arc::new(|_| true)
    }

    #[tokio::test]
    async fn replacing_active_session_fires_ordered_events() {
        let registry = inline_registry();
        let (callback, events) = recording_subscriber();
        registry.register(match_all(), callback).await;

        let first = opened_session(None).await;
        let second = opened_session(None).await;

        registry.set_active(Some(first.clone())).await;
        assert_eq!(
            *events.lock().unwrap(),
            vec![ActiveSessionEvent::Set, ActiveSessionEvent::Opened]
        );

        registry.set_active(Some(second.clone())).await;
        assert_eq!(
            *events.lock().unwrap(),
            vec![
                ActiveSessionEvent::Set,
                ActiveSessionEvent::Opened,
                ActiveSessionEvent::Unset,
                ActiveSessionEvent::Set,
                ActiveSessionEvent::Opened,
            ]
        );

        // The displaced session was closed; the replacement was not
        assert_eq!(first.state().await, SessionState::Closed);
        assert!(second.is_opened().await);
        assert!(Arc::ptr_eq(&registry.active().await.unwrap(), &second));
    }

    #[tokio::test]
    async fn setting_same_session_is_a_no_op() {
        let registry = inline_registry();
        let session = opened_session(None).await;
        registry.set_active(Some(session.clone())).await;

        let (callback, events) = recording_subscriber();
        registry.register(match_all(), callback).await;
        registry.set_active(Some(session.clone())).await;

        assert!(events.lock().unwrap().is_empty());
        assert!(session.is_opened().await);
    }

    #[tokio::test]
    async fn clearing_active_session_closes_it() {
        let registry = inline_registry();
        let session = opened_session(None).await;
        registry.set_active(Some(session.clone())).await;

        let (callback, events) = recording_subscriber();
        registry.register(match_all(), callback).await;
        registry.set_active(None).await;

        assert_eq!(*events.lock().unwrap(), vec![ActiveSessionEvent::Unset]);
        assert_eq!(session.state().await, SessionState::Closed);
        assert!(registry.active().await.is_none());

        // Clearing an empty slot does nothing
        registry.set_active(None).await;
        assert_eq!(*events.lock().unwrap(), vec![ActiveSessionEvent::Unset]);
    }

    #[tokio::test]
    async fn matcher_filters_events() {
        let registry = inline_registry();
        let (callback, events) = recording_subscriber();
        let opened_only: EventMatcher =
            Arc::new(|event| event == ActiveSessionEvent::Opened);
        registry.register(opened_only, callback).await;

        registry.set_active(Some(opened_session(None).await)).await;
        assert_eq!(*events.lock().unwrap(), vec![ActiveSessionEvent::Opened]);
    }

    #[tokio::test]
    async fn unregister_removes_all_registrations() {
        let registry = inline_registry();
        let (callback, events) = recording_subscriber();
        registry.register(match_all(), callback.clone()).await;
        registry.register(match_all(), callback.clone()).await;

        registry.set_active(Some(opened_session(None).await)).await;
        assert_eq!(events.lock().unwrap().len(), 4);

        registry.unregister(&callback).await;
        registry.set_active(None).await;
        assert_eq!(events.lock().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn active_session_transitions_are_edge_triggered() {
        let registry = inline_registry();
        let (callback, events) = recording_subscriber();
        registry.register(match_all(), callback).await;

        // Loaded but not yet open: activation fires Set only
        let session = cached_session(Some(&registry)).await;
        registry.set_active(Some(session.clone())).await;
        assert_eq!(*events.lock().unwrap(), vec![ActiveSessionEvent::Set]);

        session
            .open(None, None, LoginBehavior::SsoWithFallback, RequestId::new())
            .await
            .unwrap();
        assert_eq!(
            *events.lock().unwrap(),
            vec![ActiveSessionEvent::Set, ActiveSessionEvent::Opened]
        );

        session.close().await;
        assert_eq!(
            *events.lock().unwrap(),
            vec![
                ActiveSessionEvent::Set,
                ActiveSessionEvent::Opened,
                ActiveSessionEvent::Closed,
            ]
        );
    }

    #[tokio::test]
    async fn inactive_session_transitions_are_ignored() {
        let registry = inline_registry();
        let (callback, events) = recording_subscriber();
        registry.register(match_all(), callback).await;

        let active = opened_session(None).await;
        registry.set_active(Some(active)).await;
        let count = events.lock().unwrap().len();

        // A session wired to the registry but never activated stays silent
        let bystander = cached_session(Some(&registry)).await;
        bystander
            .open(None, None, LoginBehavior::SsoWithFallback, RequestId::new())
            .await
            .unwrap();
        bystander.close().await;

        assert_eq!(events.lock().unwrap().len(), count);
    }
}
