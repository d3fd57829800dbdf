//! Authentication-expired notifications
//!
//! When a request is answered with 401 the client tells every registered
//! observer before failing the call, so an outer layer can force a new login.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

/// Emitted when the server rejects the client's credentials
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthExpired {
    /// Method of the rejected request
    pub method: String,
    /// Fully resolved URL of the rejected request
    pub url: String,
    /// Correlation id of the rejected request
    pub request_id: String,
}

type Handler = Arc<dyn Fn(&AuthExpired) + Send + Sync>;

/// Registered auth-expired observers, shared by all clones of a client
#[derive(Clone, Default)]
pub(crate) struct AuthObservers {
    handlers: Arc<RwLock<Vec<Handler>>>,
}

impl AuthObservers {
    pub(crate) fn register<F>(&self, handler: F)
    where
        F: Fn(&AuthExpired) + Send + Sync + 'static,
    {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(handler));
    }

    pub(crate) fn notify(&self, event: &AuthExpired) {
        // Handlers run outside the lock so they may register further observers
        let handlers: Vec<Handler> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        for handler in handlers {
            handler(event);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl fmt::Debug for AuthObservers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthObservers")
            .field("handlers", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn event() -> AuthExpired {
        AuthExpired {
            method: "GET".to_string(),
            url: "http://localhost/api/me".to_string(),
            request_id: "req-1".to_string(),
        }
    }

    #[test]
    fn test_every_observer_is_notified() {
        let observers = AuthObservers::default();
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let calls = Arc::clone(&calls);
            observers.register(move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
            });
        }

        observers.notify(&event());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(observers.len(), 3);
    }

    #[test]
    fn test_clones_share_registrations() {
        let observers = AuthObservers::default();
        let clone = observers.clone();
        let seen = Arc::new(RwLock::new(Vec::new()));

        let sink = Arc::clone(&seen);
        clone.register(move |e| sink.write().unwrap().push(e.url.clone()));

        observers.notify(&event());
        assert_eq!(*seen.read().unwrap(), vec!["http://localhost/api/me".to_string()]);
    }

    #[test]
    fn test_observer_may_register_during_notify() {
        let observers = AuthObservers::default();
        let inner = observers.clone();
        observers.register(move |_| inner.register(|_| {}));

        observers.notify(&event());
        assert_eq!(observers.len(), 2);
    }
}
