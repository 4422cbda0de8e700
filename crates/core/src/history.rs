use std::collections::VecDeque;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::query_service::{RemoteQueryService, SessionId};
use crate::stream_session::{SessionError, StreamSession, WeakSession};

pub const DEFAULT_TITLE: &str = "Unnamed";

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("failed to start query session: {0}")]
    Session(#[from] SessionError),
    #[error("failed to release session {id}: {source}")]
    Release {
        id: SessionId,
        #[source]
        source: SessionError,
    },
}

/// How much of a past run the history keeps.
#[derive(Debug)]
pub enum EntryStage<S: RemoteQueryService + ?Sized> {
    /// Only the query text is known; the pane must re-run it to get rows.
    Reference { query: String },
    /// The live session with its accumulated rows.
    Hydrated { session: StreamSession<S> },
}

impl<S: RemoteQueryService + ?Sized> Clone for EntryStage<S> {
    fn clone(&self) -> Self {
        match self {
            Self::Reference { query } => Self::Reference {
                query: query.clone(),
            },
            Self::Hydrated { session } => Self::Hydrated {
                session: session.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    Reference,
    Hydrated,
}

#[derive(Debug)]
pub struct HistoryEntry<S: RemoteQueryService + ?Sized> {
    id: SessionId,
    title: String,
    stage: EntryStage<S>,
    live: WeakSession<S>,
}

impl<S: RemoteQueryService + ?Sized> HistoryEntry<S> {
    #[must_use]
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    #[must_use]
    pub fn stage(&self) -> &EntryStage<S> {
        &self.stage
    }

    #[must_use]
    pub fn stage_kind(&self) -> StageKind {
        match self.stage {
            EntryStage::Reference { .. } => StageKind::Reference,
            EntryStage::Hydrated { .. } => StageKind::Hydrated,
        }
    }

    #[must_use]
    pub fn query(&self) -> &str {
        match &self.stage {
            EntryStage::Reference { query } => query,
            EntryStage::Hydrated { session } => session.query(),
        }
    }

    #[must_use]
    pub fn session(&self) -> Option<&StreamSession<S>> {
        match &self.stage {
            EntryStage::Reference { .. } => None,
            EntryStage::Hydrated { session } => Some(session),
        }
    }

    /// Stops the entry's session if anything still holds it and closes the
    /// remote cursor either way.
    async fn release(&self, service: &S) -> Result<(), SessionError> {
        match self.live.upgrade() {
            Some(session) => session.release().await,
            None => service.close(&self.id).await.map_err(SessionError::Service),
        }
    }
}

/// Row of [`HistoryStore::summaries`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistorySummary {
    pub id: SessionId,
    pub title: String,
    pub query: String,
    pub stage: StageKind,
    pub row_count: Option<usize>,
}

/// Bounded log of query runs, oldest first.
///
/// Once `max_entries` is reached the oldest entry is evicted before a new one
/// is appended, whatever its stage. Evicted and deleted entries release their
/// session, so its remote cursor is closed.
#[derive(Debug)]
pub struct HistoryStore<S: RemoteQueryService + ?Sized> {
    service: Arc<S>,
    max_entries: Option<usize>,
    entries: VecDeque<HistoryEntry<S>>,
}

impl<S: RemoteQueryService + ?Sized> HistoryStore<S> {
    /// A `max_entries` of `None` or `Some(0)` keeps every entry.
    #[must_use]
    pub fn new(service: Arc<S>, max_entries: Option<usize>) -> Self {
        Self {
            service,
            max_entries: max_entries.filter(|max| *max > 0),
            entries: VecDeque::new(),
        }
    }

    #[must_use]
    pub fn service(&self) -> &Arc<S> {
        &self.service
    }

    #[must_use]
    pub fn max_entries(&self) -> Option<usize> {
        self.max_entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &HistoryEntry<S>> {
        self.entries.iter()
    }

    /// Starts `query` and records it as a reference entry.
    pub async fn run(
        &mut self,
        query: &str,
        title: Option<&str>,
    ) -> Result<StreamSession<S>, HistoryError> {
        let session = StreamSession::create(Arc::clone(&self.service), query).await?;
        let id = session.id().clone();

        if let Some(index) = self.position(&id) {
            // The id now names the new cursor, so the stale session is only stopped.
            let stale = self
                .entries
                .remove(index)
                .and_then(|entry| entry.live.upgrade());
            if let Some(stale) = stale {
                stale.stop();
            }
        }
        if let Some(max_entries) = self.max_entries {
            while self.entries.len() >= max_entries {
                let Some(evicted) = self.entries.pop_front() else {
                    break;
                };
                debug!(session = %evicted.id, title = %evicted.title, "evicted history entry");
                if let Err(error) = evicted.release(&self.service).await {
                    warn!(session = %evicted.id, %error, "failed to release evicted session");
                }
            }
        }

        let title = title
            .filter(|title| !title.trim().is_empty())
            .unwrap_or(DEFAULT_TITLE);
        self.entries.push_back(HistoryEntry {
            id: id.clone(),
            title: title.to_string(),
            stage: EntryStage::Reference {
                query: query.to_string(),
            },
            live: session.downgrade(),
        });
        info!(session = %id, entries = self.entries.len(), "recorded query in history");

        Ok(session)
    }

    /// Attaches the live session to its entry. Returns `false` when the entry
    /// is gone.
    pub fn save(&mut self, session: &StreamSession<S>) -> bool {
        let Some(index) = self.position(session.id()) else {
            debug!(session = %session.id(), "no history entry to hydrate");
            return false;
        };

        self.entries[index].stage = EntryStage::Hydrated {
            session: session.clone(),
        };
        true
    }

    pub fn set_title(&mut self, id: &SessionId, title: &str) -> bool {
        let Some(index) = self.position(id) else {
            return false;
        };

        self.entries[index].title = title.to_string();
        true
    }

    #[must_use]
    pub fn get(&self, id: &SessionId) -> Option<&HistoryEntry<S>> {
        self.position(id).map(|index| &self.entries[index])
    }

    /// Removes the entry and releases its session. Returns `false` when no
    /// entry has `id`.
    pub async fn delete(&mut self, id: &SessionId) -> Result<bool, HistoryError> {
        let Some(entry) = self.position(id).and_then(|index| self.entries.remove(index)) else {
            return Ok(false);
        };

        info!(session = %id, "deleted history entry");
        entry
            .release(&self.service)
            .await
            .map_err(|source| HistoryError::Release {
                id: id.clone(),
                source,
            })?;
        Ok(true)
    }

    #[must_use]
    pub fn summaries(&self) -> Vec<HistorySummary> {
        self.entries
            .iter()
            .map(|entry| HistorySummary {
                id: entry.id.clone(),
                title: entry.title.clone(),
                query: entry.query().to_string(),
                stage: entry.stage_kind(),
                row_count: entry.session().map(StreamSession::row_count),
            })
            .collect()
    }

    fn position(&self, id: &SessionId) -> Option<usize> {
        self.entries.iter().position(|entry| &entry.id == id)
    }
}
