use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::query_service::{QueryRow, QueryServiceError, RemoteQueryService, SessionId};

/// Builds a page whose rows all share `columns`.
pub(crate) fn page(columns: &[&str], rows: &[&[&str]]) -> Vec<QueryRow> {
    let columns = columns
        .iter()
        .map(|column| (*column).to_string())
        .collect::<Vec<_>>();
    rows.iter()
        .map(|values| {
            QueryRow::new(
                columns.clone(),
                values.iter().map(|value| (*value).to_string()).collect(),
            )
        })
        .collect()
}

/// Service whose pages are scripted per query text. Unscripted queries yield an
/// empty first page.
#[derive(Debug, Default)]
pub(crate) struct ScriptedService {
    scripts: Mutex<HashMap<String, VecDeque<Vec<QueryRow>>>>,
    cursors: Mutex<HashMap<SessionId, VecDeque<Vec<QueryRow>>>>,
    gate: Mutex<Option<Arc<Notify>>>,
    pub(crate) stream_calls: AtomicUsize,
    pub(crate) next_calls: AtomicUsize,
    pub(crate) close_calls: AtomicUsize,
    pub(crate) fail_stream: AtomicBool,
    pub(crate) fail_next: AtomicBool,
}

impl ScriptedService {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn script(&self, query: &str, pages: Vec<Vec<QueryRow>>) {
        self.scripts.lock().insert(query.to_string(), pages.into());
    }

    /// Makes every subsequent `next` wait until the returned handle is notified.
    pub(crate) fn hold_pages(&self) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        *self.gate.lock() = Some(Arc::clone(&notify));
        notify
    }

    pub(crate) fn next_calls(&self) -> usize {
        self.next_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteQueryService for ScriptedService {
    async fn stream(&self, sql: &str) -> Result<SessionId, QueryServiceError> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_stream.load(Ordering::SeqCst) {
            return Err(QueryServiceError::new("stream failed"));
        }

        let pages = self.scripts.lock().get(sql).cloned().unwrap_or_default();
        let id = SessionId::new();
        self.cursors.lock().insert(id.clone(), pages);
        Ok(id)
    }

    async fn next(&self, id: &SessionId) -> Result<Vec<QueryRow>, QueryServiceError> {
        self.next_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.fail_next.load(Ordering::SeqCst) {
            return Err(QueryServiceError::new("next failed"));
        }

        let mut cursors = self.cursors.lock();
        let pages = cursors
            .get_mut(id)
            .ok_or_else(|| QueryServiceError::unknown_session(id))?;
        Ok(pages.pop_front().unwrap_or_default())
    }

    async fn close(&self, id: &SessionId) -> Result<(), QueryServiceError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.cursors.lock().remove(id);
        Ok(())
    }
}
