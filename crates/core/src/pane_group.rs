use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::history::{EntryStage, HistoryError, HistoryStore, StageKind, DEFAULT_TITLE};
use crate::query_service::{RemoteQueryService, SessionId};
use crate::stopwatch::{Stopwatch, StopwatchState, DEFAULT_TICK_INTERVAL};
use crate::stream_session::{FetchOutcome, SessionError, StreamSession};

pub const MAX_PANES: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitDirection {
    Vertical,
    Horizontal,
}

impl fmt::Display for SplitDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Vertical => f.write_str("vertical"),
            Self::Horizontal => f.write_str("horizontal"),
        }
    }
}

#[derive(Debug, Error)]
pub enum PaneError {
    #[error("invalid pane {index} (pane count is {len})")]
    InvalidPane { index: usize, len: usize },
    #[error("cannot close the last remaining pane")]
    LastPane,
    #[error("no history entry for session {0}")]
    UnknownSession(SessionId),
    #[error(transparent)]
    History(#[from] HistoryError),
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// One editable query slot.
///
/// The pane shares its session with the history log. A session that is
/// dropped from a pane is released unless another pane or a hydrated history
/// entry still holds it.
#[derive(Debug)]
pub struct Pane<S: RemoteQueryService + ?Sized> {
    query: String,
    title: String,
    session: Option<StreamSession<S>>,
    session_id: Option<SessionId>,
    stopwatch: Stopwatch,
}

impl<S: RemoteQueryService + ?Sized> Pane<S> {
    fn new(tick_interval: Duration) -> Self {
        Self {
            query: String::new(),
            title: DEFAULT_TITLE.to_string(),
            session: None,
            session_id: None,
            stopwatch: Stopwatch::new(tick_interval),
        }
    }

    #[must_use]
    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn set_query(&mut self, query: impl Into<String>) {
        self.query = query.into();
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = title.into();
    }

    #[must_use]
    pub fn session(&self) -> Option<&StreamSession<S>> {
        self.session.as_ref()
    }

    #[must_use]
    pub fn session_id(&self) -> Option<&SessionId> {
        self.session_id.as_ref()
    }

    #[must_use]
    pub fn stopwatch(&self) -> &Stopwatch {
        &self.stopwatch
    }

    fn unbind(&mut self) -> Option<StreamSession<S>> {
        self.session_id = None;
        self.session.take()
    }
}

/// The set of open panes plus the history they run against.
#[derive(Debug)]
pub struct PaneGroup<S: RemoteQueryService + ?Sized> {
    history: HistoryStore<S>,
    panes: Vec<Pane<S>>,
    direction: Option<SplitDirection>,
    overlay_visible: bool,
    tick_interval: Duration,
}

impl<S: RemoteQueryService + ?Sized> PaneGroup<S> {
    #[must_use]
    pub fn new(history: HistoryStore<S>) -> Self {
        Self::with_tick_interval(history, DEFAULT_TICK_INTERVAL)
    }

    #[must_use]
    pub fn with_tick_interval(history: HistoryStore<S>, tick_interval: Duration) -> Self {
        Self {
            history,
            panes: vec![Pane::new(tick_interval)],
            direction: None,
            overlay_visible: false,
            tick_interval,
        }
    }

    #[must_use]
    pub fn history(&self) -> &HistoryStore<S> {
        &self.history
    }

    #[must_use]
    pub fn panes(&self) -> &[Pane<S>] {
        &self.panes
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.panes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.panes.is_empty()
    }

    #[must_use]
    pub fn direction(&self) -> Option<SplitDirection> {
        self.direction
    }

    #[must_use]
    pub fn overlay_visible(&self) -> bool {
        self.overlay_visible
    }

    pub fn pane(&self, pane_id: usize) -> Result<&Pane<S>, PaneError> {
        let len = self.panes.len();
        self.panes
            .get(pane_id)
            .ok_or(PaneError::InvalidPane { index: pane_id, len })
    }

    pub fn pane_mut(&mut self, pane_id: usize) -> Result<&mut Pane<S>, PaneError> {
        let len = self.panes.len();
        self.panes
            .get_mut(pane_id)
            .ok_or(PaneError::InvalidPane { index: pane_id, len })
    }

    /// Sets the split direction, adding a second pane when only one exists.
    pub fn split(&mut self, direction: SplitDirection) {
        self.direction = Some(direction);
        if self.panes.len() < MAX_PANES {
            self.panes.push(Pane::new(self.tick_interval));
            debug!(%direction, panes = self.panes.len(), "split pane group");
        }
    }

    pub async fn close(&mut self, pane_id: usize) -> Result<(), PaneError> {
        self.pane(pane_id)?;
        if self.panes.len() == 1 {
            return Err(PaneError::LastPane);
        }

        let mut pane = self.panes.remove(pane_id);
        pane.stopwatch.stop();
        if self.panes.len() < MAX_PANES {
            self.direction = None;
        }
        debug!(pane = pane_id, "closed pane");
        self.release_detached(pane.unbind()).await
    }

    /// Reopens a history entry in `pane_id`. Reference entries only restore
    /// the query text; hydrated ones rebind the live session.
    pub async fn renew(&mut self, pane_id: usize, session_id: &SessionId) -> Result<(), PaneError> {
        self.pane(pane_id)?;
        let entry = self
            .history
            .get(session_id)
            .ok_or_else(|| PaneError::UnknownSession(session_id.clone()))?;

        let title = entry.title().to_string();
        let (query, session) = match entry.stage() {
            EntryStage::Reference { query } => (query.clone(), None),
            EntryStage::Hydrated { session } => {
                (session.query().to_string(), Some(session.clone()))
            }
        };

        let pane = &mut self.panes[pane_id];
        pane.query = query;
        pane.title = title;
        let previous = std::mem::replace(&mut pane.session, session);
        pane.session_id = Some(session_id.clone());
        pane.stopwatch.reset();
        info!(pane = pane_id, session = %session_id, hydrated = pane.session.is_some(), "renewed pane");
        self.release_detached(previous).await
    }

    /// Hydrates the history entry of the pane's bound session.
    pub fn save(&mut self, pane_id: usize) -> Result<bool, PaneError> {
        let pane = self.pane(pane_id)?;
        let Some(session) = pane.session.clone() else {
            return Ok(false);
        };
        Ok(self.history.save(&session))
    }

    /// Copies the pane's title onto its history entry.
    pub fn set_title(&mut self, pane_id: usize) -> Result<bool, PaneError> {
        let pane = self.pane(pane_id)?;
        let Some(session_id) = pane.session_id.clone() else {
            return Ok(false);
        };
        let title = pane.title.clone();
        Ok(self.history.set_title(&session_id, &title))
    }

    pub async fn clear(&mut self, pane_id: usize) -> Result<(), PaneError> {
        let pane = self.pane_mut(pane_id)?;
        pane.query.clear();
        pane.title = DEFAULT_TITLE.to_string();
        let previous = pane.unbind();
        pane.stopwatch.reset();
        self.release_detached(previous).await
    }

    /// Runs the pane's query text and binds the resulting session.
    pub async fn run(&mut self, pane_id: usize) -> Result<StreamSession<S>, PaneError> {
        let pane = self.pane(pane_id)?;
        let query = pane.query.clone();
        let title = pane.title.clone();

        let session = self.history.run(&query, Some(&title)).await?;

        let pane = &mut self.panes[pane_id];
        pane.stopwatch.restart();
        if session.state().is_terminal() {
            pane.stopwatch.stop();
        }
        pane.session_id = Some(session.id().clone());
        let previous = pane.session.replace(session.clone());
        info!(pane = pane_id, session = %session.id(), "pane bound to new session");

        self.settle_stopwatches();
        self.release_detached(previous).await?;
        Ok(session)
    }

    /// Fetches one page for the pane's session. When the stream ends, every
    /// pane bound to that session stops its stopwatch.
    pub async fn fetch_next(&mut self, pane_id: usize) -> Result<Option<FetchOutcome>, PaneError> {
        let Some(session) = self.pane(pane_id)?.session.clone() else {
            return Ok(None);
        };

        let outcome = session.fetch_next().await?;
        if outcome == FetchOutcome::Exhausted {
            self.settle_stopwatches();
        }
        Ok(Some(outcome))
    }

    pub fn pause(&mut self, pane_id: usize) -> Result<(), PaneError> {
        let pane = self.pane_mut(pane_id)?;
        pane.stopwatch.pause();
        if let Some(session) = &pane.session {
            session.pause();
        }
        Ok(())
    }

    pub fn resume(&mut self, pane_id: usize) -> Result<(), PaneError> {
        let pane = self.pane_mut(pane_id)?;
        let resumed = pane.session.as_ref().map_or(true, StreamSession::resume);
        if resumed {
            pane.stopwatch.resume();
        }
        Ok(())
    }

    pub fn stop(&mut self, pane_id: usize) -> Result<(), PaneError> {
        let pane = self.pane_mut(pane_id)?;
        pane.stopwatch.stop();
        if let Some(session) = &pane.session {
            session.stop();
        }
        Ok(())
    }

    /// Stops the pane and releases the remote cursor of its session.
    pub async fn cancel(&mut self, pane_id: usize) -> Result<(), PaneError> {
        self.stop(pane_id)?;
        if let Some(session) = self.pane(pane_id)?.session.clone() {
            session.release().await?;
        }
        Ok(())
    }

    /// Deletes a history entry, releasing its session. Panes keep showing the
    /// rows they already hold.
    pub async fn delete_entry(&mut self, session_id: &SessionId) -> Result<bool, PaneError> {
        let deleted = self.history.delete(session_id).await?;
        self.settle_stopwatches();
        Ok(deleted)
    }

    /// Stops the stopwatch of every pane whose session reached a terminal
    /// state, including ones ended through a shared handle or by eviction.
    fn settle_stopwatches(&mut self) {
        for pane in &mut self.panes {
            let ended = pane
                .session
                .as_ref()
                .is_some_and(|session| session.state().is_terminal());
            let timing = matches!(
                pane.stopwatch.state(),
                StopwatchState::Running | StopwatchState::Paused
            );
            if ended && timing {
                pane.stopwatch.stop();
            }
        }
    }

    /// Releases a session dropped from a pane unless a pane still shows it or
    /// its history entry is hydrated.
    async fn release_detached(&self, session: Option<StreamSession<S>>) -> Result<(), PaneError> {
        let Some(session) = session else {
            return Ok(());
        };
        let shown = self.panes.iter().any(|pane| {
            pane.session
                .as_ref()
                .is_some_and(|bound| bound.id() == session.id())
        });
        let hydrated = self
            .history
            .get(session.id())
            .is_some_and(|entry| entry.stage_kind() == StageKind::Hydrated);
        if shown || hydrated {
            return Ok(());
        }

        debug!(session = %session.id(), "releasing detached session");
        session.release().await?;
        Ok(())
    }

    pub fn show_overlay(&mut self) {
        self.overlay_visible = true;
    }

    pub fn hide_overlay(&mut self) {
        self.overlay_visible = false;
    }

    pub fn toggle_overlay(&mut self, visible: bool) {
        if visible {
            self.show_overlay();
        } else {
            self.hide_overlay();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::time::Duration;

    use super::{PaneError, PaneGroup, SplitDirection};
    use crate::history::{HistoryStore, StageKind, DEFAULT_TITLE};
    use crate::query_service::SessionId;
    use crate::stopwatch::StopwatchState;
    use crate::stream_session::{FetchOutcome, SessionState};
    use crate::testing::{page, ScriptedService};

    fn group_with(service: &Arc<ScriptedService>, max: Option<usize>) -> PaneGroup<ScriptedService> {
        PaneGroup::new(HistoryStore::new(Arc::clone(service), max))
    }

    fn scripted() -> Arc<ScriptedService> {
        let service = ScriptedService::new();
        service.script(
            "SELECT * FROM t",
            vec![
                page(&["id"], &[&["1"], &["2"]]),
                page(&["id"], &[&["3"]]),
            ],
        );
        service
    }

    #[test]
    fn split_adds_at_most_one_pane() {
        let service = ScriptedService::new();
        let mut group = group_with(&service, None);
        assert_eq!(group.len(), 1);
        assert_eq!(group.direction(), None);

        group.split(SplitDirection::Vertical);
        assert_eq!(group.len(), 2);
        assert_eq!(group.direction(), Some(SplitDirection::Vertical));

        group.split(SplitDirection::Horizontal);
        group.split(SplitDirection::Horizontal);
        assert_eq!(group.len(), 2);
        assert_eq!(group.direction(), Some(SplitDirection::Horizontal));
    }

    #[tokio::test]
    async fn out_of_range_panes_fail_fast() {
        let service = ScriptedService::new();
        let mut group = group_with(&service, None);

        assert!(matches!(
            group.save(1),
            Err(PaneError::InvalidPane { index: 1, len: 1 })
        ));
        assert!(matches!(group.set_title(3), Err(PaneError::InvalidPane { .. })));
        assert!(matches!(group.clear(1).await, Err(PaneError::InvalidPane { .. })));
        assert!(matches!(group.pause(1), Err(PaneError::InvalidPane { .. })));
        assert!(matches!(group.stop(1), Err(PaneError::InvalidPane { .. })));
        assert!(matches!(
            group.renew(2, &SessionId::new()).await,
            Err(PaneError::InvalidPane { .. })
        ));
        assert!(matches!(group.close(5).await, Err(PaneError::InvalidPane { .. })));
    }

    #[tokio::test]
    async fn close_shifts_panes_and_keeps_the_last_one() {
        let service = ScriptedService::new();
        let mut group = group_with(&service, None);
        group.split(SplitDirection::Vertical);
        group
            .pane_mut(1)
            .expect("second pane")
            .set_query("SELECT 2");

        group.close(0).await.expect("close first pane");
        assert_eq!(group.len(), 1);
        assert_eq!(group.direction(), None);
        assert_eq!(group.pane(0).expect("pane").query(), "SELECT 2");
        assert!(matches!(group.close(0).await, Err(PaneError::LastPane)));
    }

    #[tokio::test]
    async fn run_binds_session_and_restarts_stopwatch() {
        let service = scripted();
        let mut group = group_with(&service, None);
        {
            let pane = group.pane_mut(0).expect("pane");
            pane.set_query("SELECT * FROM t");
            pane.set_title("numbers");
        }

        let session = group.run(0).await.expect("run");
        let pane = group.pane(0).expect("pane");

        assert_eq!(pane.session_id(), Some(session.id()));
        assert!(pane.session().is_some_and(|bound| bound.ptr_eq(&session)));
        assert_eq!(pane.stopwatch().state(), StopwatchState::Running);
        let entry = group.history().get(session.id()).expect("entry");
        assert_eq!(entry.title(), "numbers");
        assert_eq!(entry.stage_kind(), StageKind::Reference);
    }

    #[tokio::test]
    async fn failed_run_leaves_pane_unbound() {
        let service = ScriptedService::new();
        service.fail_stream.store(true, Ordering::SeqCst);
        let mut group = group_with(&service, None);
        group.pane_mut(0).expect("pane").set_query("SELECT 1");

        assert!(matches!(group.run(0).await, Err(PaneError::History(_))));
        let pane = group.pane(0).expect("pane");
        assert!(pane.session().is_none());
        assert!(pane.session_id().is_none());
        assert!(group.history().is_empty());
        assert_eq!(pane.stopwatch().state(), StopwatchState::Idle);
    }

    #[tokio::test]
    async fn pane_fetch_stops_stopwatch_when_stream_ends() {
        let service = scripted();
        let mut group = group_with(&service, None);
        group.pane_mut(0).expect("pane").set_query("SELECT * FROM t");
        group.run(0).await.expect("run");

        assert_eq!(
            group.fetch_next(0).await.expect("page"),
            Some(FetchOutcome::Appended { rows: 1 })
        );
        assert_eq!(
            group.fetch_next(0).await.expect("end"),
            Some(FetchOutcome::Exhausted)
        );
        let pane = group.pane(0).expect("pane");
        assert_eq!(pane.stopwatch().state(), StopwatchState::Stopped);
        assert_eq!(pane.session().map(|s| s.row_count()), Some(3));
    }

    #[tokio::test]
    async fn pause_and_stop_drive_session_and_stopwatch_together() {
        let service = scripted();
        let mut group = group_with(&service, None);
        group.pane_mut(0).expect("pane").set_query("SELECT * FROM t");
        let session = group.run(0).await.expect("run");

        group.pause(0).expect("pause");
        assert_eq!(session.state(), SessionState::Paused);
        assert_eq!(
            group.pane(0).expect("pane").stopwatch().state(),
            StopwatchState::Paused
        );

        group.resume(0).expect("resume");
        assert_eq!(session.state(), SessionState::Running);
        assert_eq!(
            group.pane(0).expect("pane").stopwatch().state(),
            StopwatchState::Running
        );

        group.stop(0).expect("stop");
        assert_eq!(session.state(), SessionState::Stopped);
        assert!(!session.has_next());
        assert_eq!(
            group.pane(0).expect("pane").stopwatch().state(),
            StopwatchState::Stopped
        );
    }

    #[test]
    fn pause_and_stop_without_session_only_touch_the_stopwatch() {
        let service = ScriptedService::new();
        let mut group = group_with(&service, None);

        group.pause(0).expect("pause succeeds");
        group.stop(0).expect("stop succeeds");

        let pane = group.pane(0).expect("pane");
        assert!(pane.session().is_none());
        assert_eq!(pane.stopwatch().state(), StopwatchState::Stopped);
    }

    #[tokio::test]
    async fn renew_reference_restores_query_without_session() {
        let service = scripted();
        let mut group = group_with(&service, None);
        group.split(SplitDirection::Horizontal);
        group.pane_mut(0).expect("pane").set_query("SELECT * FROM t");
        let session = group.run(0).await.expect("run");

        group.renew(1, session.id()).await.expect("renew");
        let pane = group.pane(1).expect("pane");

        assert_eq!(pane.query(), "SELECT * FROM t");
        assert_eq!(pane.session_id(), Some(session.id()));
        assert!(pane.session().is_none());
        assert_eq!(pane.title(), DEFAULT_TITLE);
    }

    #[tokio::test]
    async fn renew_hydrated_rebinds_live_rows() {
        let service = scripted();
        let mut group = group_with(&service, None);
        group.split(SplitDirection::Vertical);
        group.pane_mut(0).expect("pane").set_query("SELECT * FROM t");
        let session = group.run(0).await.expect("run");
        group.fetch_next(0).await.expect("page");
        assert!(group.save(0).expect("save"));

        group.renew(1, session.id()).await.expect("renew");
        let rebound = group
            .pane(1)
            .expect("pane")
            .session()
            .expect("live session")
            .clone();

        assert!(rebound.ptr_eq(&session));
        assert_eq!(rebound.row_count(), 3);
    }

    #[tokio::test]
    async fn renew_unknown_session_fails_loudly() {
        let service = ScriptedService::new();
        let mut group = group_with(&service, None);

        let missing = SessionId::new();
        let error = group
            .renew(0, &missing)
            .await
            .expect_err("unknown session");
        assert!(matches!(error, PaneError::UnknownSession(id) if id == missing));
    }

    #[tokio::test]
    async fn set_title_and_save_are_best_effort_after_eviction() {
        let service = scripted();
        let mut group = group_with(&service, Some(1));
        group.split(SplitDirection::Vertical);
        group.pane_mut(0).expect("pane").set_query("SELECT * FROM t");
        group.pane_mut(1).expect("pane").set_query("SELECT 1");

        let first = group.run(0).await.expect("run");
        group.pane_mut(0).expect("pane").set_title("renamed");
        assert!(group.set_title(0).expect("title"));
        assert_eq!(
            group.history().get(first.id()).map(|entry| entry.title()),
            Some("renamed")
        );

        group.run(1).await.expect("run evicts first");
        assert!(!group.set_title(0).expect("no entry"));
        assert!(!group.save(0).expect("no entry"));
        let pane = group.pane(0).expect("pane");
        assert!(pane.session().is_some_and(|bound| bound.ptr_eq(&first)));
        assert_eq!(first.state(), SessionState::Stopped);
        assert_eq!(pane.stopwatch().state(), StopwatchState::Stopped);
    }

    #[tokio::test]
    async fn clear_returns_pane_to_new_state() {
        let service = scripted();
        let mut group = group_with(&service, None);
        group.pane_mut(0).expect("pane").set_query("SELECT * FROM t");
        group.run(0).await.expect("run");

        group.clear(0).await.expect("clear");
        let pane = group.pane(0).expect("pane");

        assert!(pane.query().is_empty());
        assert_eq!(pane.title(), DEFAULT_TITLE);
        assert!(pane.session().is_none());
        assert!(pane.session_id().is_none());
        assert_eq!(pane.stopwatch().elapsed(), None::<Duration>);
        assert_eq!(pane.stopwatch().state(), StopwatchState::Idle);
    }

    #[tokio::test]
    async fn cancel_releases_remote_cursor() {
        let service = scripted();
        let mut group = group_with(&service, None);
        group.pane_mut(0).expect("pane").set_query("SELECT * FROM t");
        let session = group.run(0).await.expect("run");

        group.cancel(0).await.expect("cancel");

        assert_eq!(session.state(), SessionState::Stopped);
        assert_eq!(service.close_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rerun_releases_the_replaced_session() {
        let service = scripted();
        let mut group = group_with(&service, None);
        group.pane_mut(0).expect("pane").set_query("SELECT * FROM t");

        let first = group.run(0).await.expect("run");
        let second = group.run(0).await.expect("rerun");

        assert_eq!(first.state(), SessionState::Stopped);
        assert_eq!(second.state(), SessionState::Running);
        assert_eq!(service.close_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rerun_keeps_a_hydrated_session_alive() {
        let service = scripted();
        let mut group = group_with(&service, None);
        group.pane_mut(0).expect("pane").set_query("SELECT * FROM t");

        let saved = group.run(0).await.expect("run");
        assert!(group.save(0).expect("save"));
        group.run(0).await.expect("rerun");

        assert_eq!(saved.state(), SessionState::Running);
        assert_eq!(service.close_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn closing_a_pane_releases_its_session() {
        let service = scripted();
        let mut group = group_with(&service, None);
        group.split(SplitDirection::Vertical);
        group.pane_mut(1).expect("pane").set_query("SELECT * FROM t");
        let session = group.run(1).await.expect("run");

        group.close(1).await.expect("close");

        assert_eq!(session.state(), SessionState::Stopped);
        assert_eq!(service.close_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn closing_a_pane_keeps_a_session_another_pane_shows() {
        let service = scripted();
        let mut group = group_with(&service, None);
        group.split(SplitDirection::Vertical);
        group.pane_mut(0).expect("pane").set_query("SELECT * FROM t");
        let session = group.run(0).await.expect("run");
        assert!(group.save(0).expect("save"));
        group.renew(1, session.id()).await.expect("renew");

        group.close(1).await.expect("close");
        group.clear(0).await.expect("clear");

        assert_eq!(session.state(), SessionState::Running);
        assert_eq!(service.close_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn exhausting_a_shared_session_stops_every_bound_stopwatch() {
        let service = scripted();
        let mut group = group_with(&service, None);
        group.split(SplitDirection::Horizontal);
        group.pane_mut(0).expect("pane").set_query("SELECT * FROM t");
        let session = group.run(0).await.expect("run");
        assert!(group.save(0).expect("save"));
        group.renew(1, session.id()).await.expect("renew");

        assert_eq!(
            group.fetch_next(1).await.expect("page"),
            Some(FetchOutcome::Appended { rows: 1 })
        );
        assert_eq!(
            group.fetch_next(1).await.expect("end"),
            Some(FetchOutcome::Exhausted)
        );

        assert_eq!(
            group.pane(0).expect("pane").stopwatch().state(),
            StopwatchState::Stopped
        );
        assert_eq!(
            group.pane(1).expect("pane").stopwatch().state(),
            StopwatchState::Idle
        );
    }

    #[tokio::test]
    async fn deleting_the_entry_of_a_bound_session_releases_it() {
        let service = scripted();
        let mut group = group_with(&service, None);
        group.pane_mut(0).expect("pane").set_query("SELECT * FROM t");
        let session = group.run(0).await.expect("run");

        assert!(group.delete_entry(session.id()).await.expect("delete"));
        assert!(!group.delete_entry(session.id()).await.expect("already gone"));

        assert!(group.history().is_empty());
        assert_eq!(session.state(), SessionState::Stopped);
        assert_eq!(service.close_calls.load(Ordering::SeqCst), 1);
        let pane = group.pane(0).expect("pane");
        assert!(pane.session().is_some_and(|bound| bound.ptr_eq(&session)));
        assert_eq!(pane.stopwatch().state(), StopwatchState::Stopped);
    }

    #[test]
    fn overlay_flag_toggles() {
        let service = ScriptedService::new();
        let mut group = group_with(&service, None);

        group.show_overlay();
        assert!(group.overlay_visible());
        group.toggle_overlay(false);
        assert!(!group.overlay_visible());
        group.toggle_overlay(true);
        assert!(group.overlay_visible());
        group.hide_overlay();
        assert!(!group.overlay_visible());
    }
}
