use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use lens_core::query_service::{QueryRow, QueryServiceError, RemoteQueryService, SessionId};
use parking_lot::{Mutex, RwLock};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl ResultSet {
    #[must_use]
    pub fn new(columns: &[&str], rows: Vec<Vec<String>>) -> Self {
        Self {
            columns: columns.iter().map(|column| (*column).to_string()).collect(),
            rows,
        }
    }
}

#[derive(Debug)]
struct Cursor {
    result: Arc<ResultSet>,
    offset: usize,
}

/// Serves registered result sets page by page. Queries are matched on their
/// normalized text, so `select * from users;` finds `SELECT * FROM users`.
#[derive(Debug)]
pub struct InMemoryQueryService {
    page_size: usize,
    results: RwLock<HashMap<String, Arc<ResultSet>>>,
    cursors: Mutex<HashMap<SessionId, Cursor>>,
}

impl InMemoryQueryService {
    #[must_use]
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size: page_size.max(1),
            results: RwLock::new(HashMap::new()),
            cursors: Mutex::new(HashMap::new()),
        }
    }

    /// A service preloaded with a few sample tables.
    #[must_use]
    pub fn demo(page_size: usize) -> Self {
        let service = Self::new(page_size);

        let users = (1..=1_200)
            .map(|id| {
                vec![
                    id.to_string(),
                    format!("user{id}@example.com"),
                    format!("2026-03-{day:02}", day = ((id - 1) % 28) + 1),
                ]
            })
            .collect();
        service.register(
            "SELECT * FROM users",
            ResultSet::new(&["id", "email", "created_at"], users),
        );
        service.register(
            "SELECT * FROM playlists",
            ResultSet::new(
                &["id", "name"],
                vec![
                    vec!["1".to_string(), "focus".to_string()],
                    vec!["2".to_string(), "commute".to_string()],
                    vec!["3".to_string(), "late night".to_string()],
                ],
            ),
        );
        service.register(
            "SELECT 1",
            ResultSet::new(&["1"], vec![vec!["1".to_string()]]),
        );
        service.register("SELECT * FROM empty", ResultSet::new(&["id"], Vec::new()));
        service
    }

    #[must_use]
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn register(&self, query: &str, result: ResultSet) {
        self.results
            .write()
            .insert(normalize_query(query), Arc::new(result));
    }

    #[must_use]
    pub fn open_cursors(&self) -> usize {
        self.cursors.lock().len()
    }
}

#[async_trait]
impl RemoteQueryService for InMemoryQueryService {
    async fn stream(&self, sql: &str) -> Result<SessionId, QueryServiceError> {
        let result = self
            .results
            .read()
            .get(&normalize_query(sql))
            .cloned()
            .ok_or_else(|| QueryServiceError::new(format!("no table matches query `{sql}`")))?;

        let id = SessionId::new();
        self.cursors
            .lock()
            .insert(id.clone(), Cursor { result, offset: 0 });
        debug!(session = %id, "opened in-memory cursor");
        Ok(id)
    }

    async fn next(&self, id: &SessionId) -> Result<Vec<QueryRow>, QueryServiceError> {
        let mut cursors = self.cursors.lock();
        let cursor = cursors
            .get_mut(id)
            .ok_or_else(|| QueryServiceError::unknown_session(id))?;

        if cursor.offset >= cursor.result.rows.len() {
            cursors.remove(id);
            debug!(session = %id, "in-memory cursor exhausted");
            return Ok(Vec::new());
        }

        let end = (cursor.offset + self.page_size).min(cursor.result.rows.len());
        let page = cursor.result.rows[cursor.offset..end]
            .iter()
            .map(|values| QueryRow::new(cursor.result.columns.clone(), values.clone()))
            .collect();
        cursor.offset = end;
        Ok(page)
    }

    async fn close(&self, id: &SessionId) -> Result<(), QueryServiceError> {
        if self.cursors.lock().remove(id).is_some() {
            debug!(session = %id, "closed in-memory cursor");
        }
        Ok(())
    }
}

fn normalize_query(query: &str) -> String {
    query
        .trim()
        .trim_end_matches(';')
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
