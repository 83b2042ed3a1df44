//! Explicit session context.
//!
//! `SessionContext` is constructed once by the application and handed to
//! every component that needs the caller's identity. It is cheap to clone;
//! clones share the same session and subscriber list.

use crate::subscription::{Subscribers, Subscription};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, PoisonError, RwLock};

/// Identity of the signed-in user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

impl UserIdentity {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: None,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }
}

/// An authenticated session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub user: UserIdentity,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(access_token: impl Into<String>, user: UserIdentity) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            user,
            expires_at: None,
        }
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Whether the access token has expired at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// A change of session state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    SignedIn(UserIdentity),
    SignedOut,
    TokenRefreshed,
}

struct SessionInner {
    current: RwLock<Option<Session>>,
    subscribers: Subscribers<SessionEvent>,
}

/// Shared handle on the current session.
#[derive(Clone)]
pub struct SessionContext {
    inner: Arc<SessionInner>,
}

impl SessionContext {
    /// A context with nobody signed in.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SessionInner {
                current: RwLock::new(None),
                subscribers: Subscribers::new(),
            }),
        }
    }

    /// A context that starts signed in.
    pub fn with_session(session: Session) -> Self {
        let context = Self::new();
        context.set_session(session);
        context
    }

    /// Replace the current session.
    ///
    /// Publishes `SignedIn` when the user changes and `TokenRefreshed` when
    /// only the token does. Setting an identical session publishes nothing.
    pub fn set_session(&self, session: Session) {
        let event = {
            let mut current = self
                .inner
                .current
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            let event = match current.as_ref() {
                Some(previous) if *previous == session => None,
                Some(previous) if previous.user.id == session.user.id => {
                    Some(SessionEvent::TokenRefreshed)
                }
                _ => Some(SessionEvent::SignedIn(session.user.clone())),
            };
            *current = Some(session);
            event
        };
        if let Some(event) = event {
            tracing::debug!(?event, "Session changed");
            self.inner.subscribers.publish(&event);
        }
    }

    /// Sign out locally. Publishes `SignedOut` if a session was present.
    pub fn clear(&self) {
        let had_session = self
            .inner
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some();
        if had_session {
            self.inner.subscribers.publish(&SessionEvent::SignedOut);
        }
    }

    pub fn current(&self) -> Option<Session> {
        self.inner
            .current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn user(&self) -> Option<UserIdentity> {
        self.current().map(|s| s.user)
    }

    /// Access token of the current session.
    pub fn bearer_token(&self) -> Option<String> {
        self.current().map(|s| s.access_token)
    }

    pub fn is_signed_in(&self) -> bool {
        self.current().is_some()
    }

    /// Be notified of every session change.
    pub fn subscribe(
        &self,
        callback: impl Fn(&SessionEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.subscribers.subscribe(callback)
    }

    /// Tear down: forget the session and every subscriber without notifying.
    pub fn shutdown(&self) {
        self.inner.subscribers.clear();
        *self
            .inner
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("user", &self.user().map(|u| u.id))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::sync::Mutex;

    fn recorder(context: &SessionContext) -> (Arc<Mutex<Vec<SessionEvent>>>, Subscription) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let sub = context.subscribe(move |e| sink.lock().unwrap().push(e.clone()));
        (events, sub)
    }

    #[test]
    fn test_events_once_per_change() {
        let context = SessionContext::new();
        let (events, _sub) = recorder(&context);
        let user = UserIdentity::new("scout-1");

        context.set_session(Session::new("t1", user.clone()));
        context.set_session(Session::new("t1", user.clone()));
        context.set_session(Session::new("t2", user.clone()));
        context.clear();
        context.clear();

        assert_eq!(
            *events.lock().unwrap(),
            vec![
                SessionEvent::SignedIn(user),
                SessionEvent::TokenRefreshed,
                SessionEvent::SignedOut,
            ]
        );
    }

    #[test]
    fn test_switching_user_is_a_sign_in() {
        let context = SessionContext::with_session(Session::new("t1", UserIdentity::new("a")));
        let (events, _sub) = recorder(&context);
        context.set_session(Session::new("t2", UserIdentity::new("b")));
        assert_eq!(
            *events.lock().unwrap(),
            vec![SessionEvent::SignedIn(UserIdentity::new("b"))]
        );
        assert_eq!(context.bearer_token().as_deref(), Some("t2"));
    }

    #[test]
    fn test_clones_share_state() {
        let context = SessionContext::new();
        let clone = context.clone();
        context.set_session(Session::new("t", UserIdentity::new("u")));
        assert!(clone.is_signed_in());
        assert_eq!(clone.user().unwrap().id, "u");
    }

    #[test]
    fn test_shutdown_drops_subscribers_silently() {
        let context = SessionContext::with_session(Session::new("t", UserIdentity::new("u")));
        let (events, _sub) = recorder(&context);
        context.shutdown();
        assert!(!context.is_signed_in());
        context.set_session(Session::new("t", UserIdentity::new("u")));
        assert!(events.lock().unwrap().is_empty());
    }

    #[test]
    fn test_expiry() {
        let now = Utc::now();
        let session = Session::new("t", UserIdentity::new("u")).with_expiry(now);
        assert!(session.is_expired(now));
        assert!(!session.is_expired(now - Duration::seconds(5)));
        assert!(!Session::new("t", UserIdentity::new("u")).is_expired(now));
    }
}
