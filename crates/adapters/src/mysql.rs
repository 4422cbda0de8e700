use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use lens_core::query_service::{QueryRow, QueryServiceError, RemoteQueryService, SessionId};
use lens_core::settings::{ConnectionSettings, TlsMode};
use mysql_async::prelude::Query;
use mysql_async::{OptsBuilder, Pool, ResultSetStream, Row, SslOpts, TextProtocol, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

type RowStream = ResultSetStream<'static, 'static, 'static, Row, TextProtocol>;

/// Server-side result stream. `None` once the server reported the end.
struct Cursor<St = RowStream> {
    stream: Option<St>,
}

#[derive(Debug)]
enum PageError<E> {
    UnknownSession,
    Stream(E),
}

/// Reads up to `page_size` rows from the session's stream.
///
/// The cursor is dropped once its stream has been drained, and also when the
/// stream fails, so a retry reports an unknown session instead of skipping
/// the rows lost with the failed page.
async fn next_page<St, T, E>(
    cursors: &mut HashMap<SessionId, Cursor<St>>,
    id: &SessionId,
    page_size: usize,
) -> Result<Vec<T>, PageError<E>>
where
    St: Stream<Item = Result<T, E>> + Unpin,
{
    let cursor = cursors.get_mut(id).ok_or(PageError::UnknownSession)?;
    let Some(stream) = cursor.stream.as_mut() else {
        cursors.remove(id);
        return Ok(Vec::new());
    };

    let mut page = Vec::with_capacity(page_size);
    while page.len() < page_size {
        match stream.next().await {
            Some(Ok(row)) => page.push(row),
            Some(Err(error)) => {
                cursors.remove(id);
                return Err(PageError::Stream(error));
            }
            None => {
                debug!(session = %id, rows = page.len(), "mysql result stream exhausted");
                if page.is_empty() {
                    cursors.remove(id);
                } else {
                    cursor.stream = None;
                }
                break;
            }
        }
    }
    Ok(page)
}

/// Pages MySQL result streams, one open stream per session id.
pub struct MysqlQueryService {
    pool: Pool,
    page_size: usize,
    cursors: Mutex<HashMap<SessionId, Cursor>>,
}

impl std::fmt::Debug for MysqlQueryService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MysqlQueryService")
            .field("page_size", &self.page_size)
            .finish_non_exhaustive()
    }
}

impl MysqlQueryService {
    #[must_use]
    pub fn from_settings(settings: &ConnectionSettings) -> Self {
        Self {
            pool: Pool::new(opts_from_settings(settings)),
            page_size: settings.page_size.max(1),
            cursors: Mutex::new(HashMap::new()),
        }
    }

    pub async fn disconnect(&self) -> Result<(), mysql_async::Error> {
        self.cursors.lock().await.clear();
        self.pool.clone().disconnect().await
    }
}

#[async_trait]
impl RemoteQueryService for MysqlQueryService {
    async fn stream(&self, sql: &str) -> Result<SessionId, QueryServiceError> {
        let stream = sql
            .to_string()
            .stream::<Row, _>(self.pool.clone())
            .await
            .map_err(to_query_error)?;

        let id = SessionId::new();
        self.cursors.lock().await.insert(
            id.clone(),
            Cursor {
                stream: Some(stream),
            },
        );
        info!(session = %id, "opened mysql result stream");
        Ok(id)
    }

    async fn next(&self, id: &SessionId) -> Result<Vec<QueryRow>, QueryServiceError> {
        let mut cursors = self.cursors.lock().await;
        match next_page(&mut cursors, id, self.page_size).await {
            Ok(page) => Ok(page.into_iter().map(row_to_query_row).collect()),
            Err(PageError::UnknownSession) => Err(QueryServiceError::unknown_session(id)),
            Err(PageError::Stream(error)) => {
                warn!(session = %id, %error, "mysql result stream failed; cursor dropped");
                Err(to_query_error(error))
            }
        }
    }

    async fn close(&self, id: &SessionId) -> Result<(), QueryServiceError> {
        if self.cursors.lock().await.remove(id).is_some() {
            debug!(session = %id, "closed mysql result stream");
        }
        Ok(())
    }
}

fn opts_from_settings(settings: &ConnectionSettings) -> OptsBuilder {
    let mut builder = OptsBuilder::default()
        .ip_or_hostname(settings.host.clone())
        .tcp_port(settings.port)
        .user(Some(settings.user.clone()));

    if let Some(password) = resolve_password() {
        builder = builder.pass(Some(password));
    }

    if let Some(database) = &settings.database {
        builder = builder.db_name(Some(database.clone()));
    }

    if let Some(ssl_opts) = ssl_opts_from_settings(settings) {
        builder = builder.ssl_opts(ssl_opts);
    }

    if matches!(settings.tls_mode, TlsMode::Disabled) {
        builder = builder.prefer_socket(false);
    }

    builder
}

fn resolve_password() -> Option<String> {
    std::env::var("LENS_DB_PASSWORD")
        .ok()
        .filter(|password| !password.is_empty())
}

fn ssl_opts_from_settings(settings: &ConnectionSettings) -> Option<SslOpts> {
    if !settings_request_tls(settings) {
        return None;
    }

    let mut ssl_opts = SslOpts::default();
    if let Some(ca_cert_path) = non_empty(settings.tls_ca_cert_path.as_deref()) {
        ssl_opts = ssl_opts.with_root_certs(vec![PathBuf::from(ca_cert_path).into()]);
    }
    Some(ssl_opts)
}

fn settings_request_tls(settings: &ConnectionSettings) -> bool {
    match settings.tls_mode {
        TlsMode::Disabled => false,
        TlsMode::Prefer => non_empty(settings.tls_ca_cert_path.as_deref()).is_some(),
        TlsMode::Require => true,
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.and_then(|raw| {
        let trimmed = raw.trim();
        (!trimmed.is_empty()).then_some(trimmed)
    })
}

fn row_to_query_row(row: Row) -> QueryRow {
    let columns = row
        .columns_ref()
        .iter()
        .map(|column| column.name_str().into_owned())
        .collect::<Vec<_>>();
    let values = row
        .unwrap()
        .into_iter()
        .map(mysql_value_to_string)
        .collect::<Vec<_>>();
    QueryRow::new(columns, values)
}

fn mysql_value_to_string(value: Value) -> String {
    match value {
        Value::NULL => "NULL".to_string(),
        Value::Bytes(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Value::Int(value) => value.to_string(),
        Value::UInt(value) => value.to_string(),
        Value::Float(value) => value.to_string(),
        Value::Double(value) => value.to_string(),
        Value::Date(year, month, day, hour, minute, second, micros) => format!(
            "{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}.{micros:06}"
        ),
        Value::Time(is_negative, days, hours, minutes, seconds, micros) => {
            let sign = if is_negative { "-" } else { "" };
            format!("{sign}{days:03} {hours:02}:{minutes:02}:{seconds:02}.{micros:06}")
        }
    }
}

fn to_query_error(error: mysql_async::Error) -> QueryServiceError {
    QueryServiceError::new(error.to_string())
}
