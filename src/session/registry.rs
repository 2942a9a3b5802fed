use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use futures::future::join_all;
use tracing::{error, info, warn};

use super::session::{ConnectionSession, SessionError, SessionId};

/// Live sessions of this process. Cloning shares the same set.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    sessions: Mutex<HashMap<SessionId, Arc<ConnectionSession>>>,
    next_id: AtomicU64,
}

/// Non-owning handle sessions keep back to their registry
#[derive(Clone)]
pub struct WeakRegistry(Weak<Inner>);

impl WeakRegistry {
    pub fn upgrade(&self) -> Option<SessionRegistry> {
        self.0.upgrade().map(|inner| SessionRegistry { inner })
    }
}

/// Outcome of [`SessionRegistry::close_all`]
#[derive(Debug, Default)]
pub struct ShutdownReport {
    pub closed: usize,
    pub failed: Vec<(SessionId, SessionError)>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn downgrade(&self) -> WeakRegistry {
        WeakRegistry(Arc::downgrade(&self.inner))
    }

    pub(crate) fn next_id(&self) -> SessionId {
        SessionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Register a live session. Sessions already in a terminal state are
    /// refused.
    pub fn add(&self, session: Arc<ConnectionSession>) {
        if session.state().is_terminal() {
            warn!(session = %session.id(), "Not registering a finished session");
            return;
        }
        let mut sessions = self.lock();
        sessions.insert(session.id(), session);
        metrics::gauge!("active_sessions").set(sessions.len() as f64);
    }

    pub fn remove(&self, id: SessionId) -> Option<Arc<ConnectionSession>> {
        let mut sessions = self.lock();
        let removed = sessions.remove(&id);
        metrics::gauge!("active_sessions").set(sessions.len() as f64);
        removed
    }

    pub fn get(&self, id: SessionId) -> Option<Arc<ConnectionSession>> {
        self.lock().get(&id).cloned()
    }

    pub fn ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<_> = self.lock().keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Close every registered session concurrently and wait for all of them.
    /// Failures are logged and collected; they never stop the other closes.
    pub async fn close_all(&self) -> ShutdownReport {
        let sessions: Vec<_> = self.lock().drain().map(|(_, session)| session).collect();
        metrics::gauge!("active_sessions").set(0.0);

        let mut report = ShutdownReport::default();
        if sessions.is_empty() {
            return report;
        }

        info!(count = sessions.len(), "Closing all sessions");
        let results = join_all(
            sessions
                .iter()
                .map(|session| async move { (session.id(), session.close().await) }),
        )
        .await;

        for (id, result) in results {
            match result {
                Ok(()) => report.closed += 1,
                Err(e) => {
                    error!(session = %id, "Failed to close session: {}", e);
                    report.failed.push((id, e));
                }
            }
        }
        info!(
            closed = report.closed,
            failed = report.failed.len(),
            "Sessions closed"
        );
        report
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SessionId, Arc<ConnectionSession>>> {
        self.inner
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
