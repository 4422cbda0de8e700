use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::query_service::{QueryServiceError, RemoteQueryService, SessionId};
use crate::row_log::RowLog;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Running,
    Paused,
    Stopped,
    Finished,
}

impl SessionState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Finished)
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
            Self::Finished => "finished",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Published to subscribers after every state or row change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionProgress {
    pub state: SessionState,
    pub has_next: bool,
    pub row_count: usize,
}

/// Result of a single `fetch_next` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Appended { rows: usize },
    /// The remote stream returned an empty page; the session is finished.
    Exhausted,
    /// No remote call was made because the session was not running.
    Skipped { state: SessionState },
    /// The page arrived after the session was stopped and was dropped.
    Discarded { rows: usize },
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("query service failed: {0}")]
    Service(#[source] QueryServiceError),
    #[error("a fetch is already in flight for session {id}")]
    FetchInProgress { id: SessionId },
}

/// Owned copy of a session's data at one point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub query: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub has_next: bool,
    pub state: SessionState,
}

#[derive(Debug)]
struct Progress {
    rows: RowLog<Vec<String>>,
    has_next: bool,
    state: SessionState,
}

impl Progress {
    fn summary(&self) -> SessionProgress {
        SessionProgress {
            state: self.state,
            has_next: self.has_next,
            row_count: self.rows.len(),
        }
    }
}

#[derive(Debug)]
struct Shared {
    id: SessionId,
    query: String,
    columns: Vec<String>,
    progress: Mutex<Progress>,
    fetching: AtomicBool,
    notifier: watch::Sender<SessionProgress>,
}

impl Shared {
    fn publish(&self, progress: &Progress) {
        self.notifier.send_replace(progress.summary());
    }
}

struct FetchGuard<'a>(&'a AtomicBool);

impl Drop for FetchGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Handle to one paginated remote result stream.
///
/// Clones share the same rows and state, so a pane and the history log can
/// both hold the session.
pub struct StreamSession<S: RemoteQueryService + ?Sized> {
    shared: Arc<Shared>,
    service: Arc<S>,
}

impl<S: RemoteQueryService + ?Sized> Clone for StreamSession<S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            service: Arc::clone(&self.service),
        }
    }
}

impl<S: RemoteQueryService + ?Sized> fmt::Debug for StreamSession<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSession")
            .field("id", &self.shared.id)
            .field("query", &self.shared.query)
            .field("progress", &self.progress())
            .finish_non_exhaustive()
    }
}

/// Non-owning handle to a session; it does not keep the rows alive.
pub struct WeakSession<S: RemoteQueryService + ?Sized> {
    shared: Weak<Shared>,
    service: Arc<S>,
}

impl<S: RemoteQueryService + ?Sized> WeakSession<S> {
    #[must_use]
    pub fn upgrade(&self) -> Option<StreamSession<S>> {
        self.shared.upgrade().map(|shared| StreamSession {
            shared,
            service: Arc::clone(&self.service),
        })
    }
}

impl<S: RemoteQueryService + ?Sized> Clone for WeakSession<S> {
    fn clone(&self) -> Self {
        Self {
            shared: Weak::clone(&self.shared),
            service: Arc::clone(&self.service),
        }
    }
}

impl<S: RemoteQueryService + ?Sized> fmt::Debug for WeakSession<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakSession")
            .field("alive", &(self.shared.strong_count() > 0))
            .finish_non_exhaustive()
    }
}

impl<S: RemoteQueryService + ?Sized> StreamSession<S> {
    /// Starts `query` remotely and fetches its first page.
    pub async fn create(service: Arc<S>, query: &str) -> Result<Self, SessionError> {
        let id = service.stream(query).await.map_err(SessionError::Service)?;
        let first_page = service.next(&id).await.map_err(SessionError::Service)?;

        let first_columns = first_page.first().map(|row| row.columns.clone());
        let (columns, progress) = match first_columns {
            Some(columns) => {
                let mut rows = RowLog::new();
                rows.append_page(first_page.into_iter().map(|row| row.values));
                (
                    columns,
                    Progress {
                        rows,
                        has_next: true,
                        state: SessionState::Running,
                    },
                )
            }
            None => (
                Vec::new(),
                Progress {
                    rows: RowLog::new(),
                    has_next: false,
                    state: SessionState::Finished,
                },
            ),
        };

        info!(
            session = %id,
            rows = progress.rows.len(),
            state = %progress.state,
            "query session created"
        );

        let (notifier, _) = watch::channel(progress.summary());
        Ok(Self {
            shared: Arc::new(Shared {
                id,
                query: query.to_string(),
                columns,
                progress: Mutex::new(progress),
                fetching: AtomicBool::new(false),
                notifier,
            }),
            service,
        })
    }

    #[must_use]
    pub fn id(&self) -> &SessionId {
        &self.shared.id
    }

    #[must_use]
    pub fn query(&self) -> &str {
        &self.shared.query
    }

    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.shared.columns
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.shared.progress.lock().state
    }

    #[must_use]
    pub fn has_next(&self) -> bool {
        self.shared.progress.lock().has_next
    }

    #[must_use]
    pub fn row_count(&self) -> usize {
        self.shared.progress.lock().rows.len()
    }

    #[must_use]
    pub fn progress(&self) -> SessionProgress {
        self.shared.progress.lock().summary()
    }

    #[must_use]
    pub fn rows(&self) -> Vec<Vec<String>> {
        self.shared.progress.lock().rows.as_slice().to_vec()
    }

    #[must_use]
    pub fn visible_rows(&self, start: usize, limit: usize) -> Vec<Vec<String>> {
        self.shared
            .progress
            .lock()
            .rows
            .visible_rows(start, limit)
            .to_vec()
    }

    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        let progress = self.shared.progress.lock();
        SessionSnapshot {
            id: self.shared.id.clone(),
            query: self.shared.query.clone(),
            columns: self.shared.columns.clone(),
            rows: progress.rows.as_slice().to_vec(),
            has_next: progress.has_next,
            state: progress.state,
        }
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionProgress> {
        self.shared.notifier.subscribe()
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    #[must_use]
    pub fn downgrade(&self) -> WeakSession<S> {
        WeakSession {
            shared: Arc::downgrade(&self.shared),
            service: Arc::clone(&self.service),
        }
    }

    /// Requests one more page while the session is running.
    ///
    /// Paused, stopped and finished sessions make no remote call. Overlapping
    /// calls on one session are rejected with [`SessionError::FetchInProgress`].
    pub async fn fetch_next(&self) -> Result<FetchOutcome, SessionError> {
        let state = self.state();
        if state != SessionState::Running {
            return Ok(FetchOutcome::Skipped { state });
        }

        if self.shared.fetching.swap(true, Ordering::AcqRel) {
            return Err(SessionError::FetchInProgress {
                id: self.shared.id.clone(),
            });
        }
        let _guard = FetchGuard(&self.shared.fetching);

        let page = self
            .service
            .next(&self.shared.id)
            .await
            .map_err(SessionError::Service)?;

        let mut progress = self.shared.progress.lock();
        if progress.state == SessionState::Stopped {
            debug!(session = %self.shared.id, rows = page.len(), "dropping page for stopped session");
            return Ok(FetchOutcome::Discarded { rows: page.len() });
        }

        let outcome = if page.is_empty() {
            progress.has_next = false;
            progress.state = SessionState::Finished;
            info!(
                session = %self.shared.id,
                rows = progress.rows.len(),
                "query session finished"
            );
            FetchOutcome::Exhausted
        } else {
            let rows = progress
                .rows
                .append_page(page.into_iter().map(|row| row.values));
            FetchOutcome::Appended { rows }
        };
        self.shared.publish(&progress);
        Ok(outcome)
    }

    /// Returns whether the session moved from running to paused.
    pub fn pause(&self) -> bool {
        self.transition(SessionState::Running, SessionState::Paused)
    }

    /// Returns whether the session moved from paused to running.
    pub fn resume(&self) -> bool {
        self.transition(SessionState::Paused, SessionState::Running)
    }

    /// Ends pagination for good, even if the backend holds more pages.
    pub fn stop(&self) -> bool {
        let mut progress = self.shared.progress.lock();
        if progress.state.is_terminal() {
            return false;
        }

        progress.state = SessionState::Stopped;
        progress.has_next = false;
        info!(session = %self.shared.id, rows = progress.rows.len(), "query session stopped");
        self.shared.publish(&progress);
        true
    }

    /// Stops the session and asks the service to drop its cursor.
    pub async fn release(&self) -> Result<(), SessionError> {
        self.stop();
        self.service
            .close(&self.shared.id)
            .await
            .map_err(SessionError::Service)
    }

    fn transition(&self, from: SessionState, to: SessionState) -> bool {
        let mut progress = self.shared.progress.lock();
        if progress.state != from {
            return false;
        }

        progress.state = to;
        debug!(session = %self.shared.id, %from, %to, "query session transition");
        self.shared.publish(&progress);
        true
    }
}
