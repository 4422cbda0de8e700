use std::io::{self, Stdout};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crossterm::event::{
    self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind,
    KeyModifiers,
};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use lens_adapters::export::{export_snapshot, ExportFormat};
use lens_core::history::StageKind;
use lens_core::pane_group::{Pane, PaneGroup, SplitDirection};
use lens_core::query_service::RemoteQueryService;
use lens_core::stream_session::{FetchOutcome, SessionState};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Clear, Paragraph};
use ratatui::{Frame, Terminal};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

const TICK_RATE: Duration = Duration::from_millis(120);
const SCROLL_PAGE: usize = 20;
/// Fetch another page once the viewport is this close to the last loaded row.
const PREFETCH_MARGIN: usize = 50;

#[derive(Debug, Error)]
pub enum TuiError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InputTarget {
    Query,
    Title,
}

impl InputTarget {
    fn toggle(self) -> Self {
        match self {
            Self::Query => Self::Title,
            Self::Title => Self::Query,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DirectionKey {
    Up,
    Down,
    PageUp,
    PageDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Msg {
    Quit,
    Input(char),
    Backspace,
    Submit,
    Dismiss,
    Run,
    TogglePause,
    Cancel,
    Save,
    ToggleOverlay,
    DeleteEntry,
    Split(SplitDirection),
    ClosePane,
    ClearPane,
    NextPane,
    ToggleTitleInput,
    Export,
    Navigate(DirectionKey),
    Tick,
}

struct TuiApp<S: RemoteQueryService + ?Sized> {
    group: PaneGroup<S>,
    focus: usize,
    input: InputTarget,
    scroll: Vec<usize>,
    overlay_cursor: usize,
    export_dir: PathBuf,
    status_line: String,
    should_quit: bool,
}

impl<S: RemoteQueryService + ?Sized> TuiApp<S> {
    fn new(group: PaneGroup<S>, export_dir: PathBuf) -> Self {
        let scroll = vec![0; group.len()];
        Self {
            group,
            focus: 0,
            input: InputTarget::Query,
            scroll,
            overlay_cursor: 0,
            export_dir,
            status_line: "Type a query and press F2 to run it".to_string(),
            should_quit: false,
        }
    }

    async fn handle(&mut self, msg: Msg) {
        match msg {
            Msg::Quit => self.should_quit = true,
            Msg::Input(character) => self.edit_input(|text| text.push(character)),
            Msg::Backspace => self.edit_input(|text| {
                text.pop();
            }),
            Msg::Submit => {
                if self.group.overlay_visible() {
                    self.renew_selected().await;
                } else if self.input == InputTarget::Title {
                    self.commit_title();
                } else {
                    self.run_focused().await;
                }
            }
            Msg::Dismiss => {
                if self.group.overlay_visible() {
                    self.group.hide_overlay();
                } else {
                    self.input = InputTarget::Query;
                }
            }
            Msg::Run => self.run_focused().await,
            Msg::TogglePause => self.toggle_pause(),
            Msg::Cancel => match self.group.cancel(self.focus).await {
                Ok(()) => self.status_line = "Query stopped".to_string(),
                Err(error) => self.status_line = format!("Stop failed: {error}"),
            },
            Msg::Save => self.save_focused(),
            Msg::ToggleOverlay => {
                let visible = !self.group.overlay_visible();
                self.group.toggle_overlay(visible);
                self.overlay_cursor = self.group.history().len().saturating_sub(1);
            }
            Msg::DeleteEntry => self.delete_selected().await,
            Msg::Split(direction) => {
                self.group.split(direction);
                self.scroll.resize(self.group.len(), 0);
                self.status_line = format!("Split {direction}");
            }
            Msg::ClosePane => self.close_focused().await,
            Msg::ClearPane => {
                if let Err(error) = self.group.clear(self.focus).await {
                    self.status_line = format!("Clear failed: {error}");
                } else {
                    self.reset_scroll();
                }
            }
            Msg::NextPane => self.focus = (self.focus + 1) % self.group.len().max(1),
            Msg::ToggleTitleInput => self.input = self.input.toggle(),
            Msg::Export => self.export_focused(),
            Msg::Navigate(direction) => self.navigate(direction),
            Msg::Tick => self.on_tick().await,
        }
    }

    fn edit_input(&mut self, edit: impl FnOnce(&mut String)) {
        let input = self.input;
        let Ok(pane) = self.group.pane_mut(self.focus) else {
            return;
        };
        match input {
            InputTarget::Query => {
                let mut query = pane.query().to_string();
                edit(&mut query);
                pane.set_query(query);
            }
            InputTarget::Title => {
                let mut title = pane.title().to_string();
                edit(&mut title);
                pane.set_title(title);
            }
        }
    }

    async fn run_focused(&mut self) {
        match self.group.run(self.focus).await {
            Ok(session) => {
                self.reset_scroll();
                self.status_line = format!(
                    "Streaming {} ({} rows loaded)",
                    session.id(),
                    session.row_count()
                );
            }
            Err(error) => {
                warn!(%error, pane = self.focus, "query failed to start");
                self.status_line = format!("Query failed: {error}");
            }
        }
    }

    fn toggle_pause(&mut self) {
        let state = self
            .group
            .pane(self.focus)
            .ok()
            .and_then(Pane::session)
            .map(|session| session.state());
        let result = match state {
            Some(SessionState::Paused) => self.group.resume(self.focus),
            Some(SessionState::Running) => self.group.pause(self.focus),
            Some(state) => {
                self.status_line = format!("Session is already {state}");
                return;
            }
            None => {
                self.status_line = "No session in this pane".to_string();
                return;
            }
        };
        match result {
            Ok(()) => {
                self.status_line = format!("Session {}", self.focused_state_label());
            }
            Err(error) => self.status_line = format!("Pause failed: {error}"),
        }
    }

    fn save_focused(&mut self) {
        let saved = match self.group.save(self.focus) {
            Ok(true) => self.group.set_title(self.focus),
            other => other,
        };
        self.status_line = match saved {
            Ok(true) => "Saved to history".to_string(),
            Ok(false) => "Nothing to save: run a query first".to_string(),
            Err(error) => format!("Save failed: {error}"),
        };
    }

    fn commit_title(&mut self) {
        self.input = InputTarget::Query;
        self.status_line = match self.group.set_title(self.focus) {
            Ok(true) => "Title updated".to_string(),
            Ok(false) => "Title kept for the next run".to_string(),
            Err(error) => format!("Rename failed: {error}"),
        };
    }

    async fn renew_selected(&mut self) {
        let Some(id) = self
            .group
            .history()
            .entries()
            .nth(self.overlay_cursor)
            .map(|entry| entry.id().clone())
        else {
            self.status_line = "History is empty".to_string();
            return;
        };

        match self.group.renew(self.focus, &id).await {
            Ok(()) => {
                self.group.hide_overlay();
                self.reset_scroll();
                self.status_line = format!("Reopened {id}");
            }
            Err(error) => self.status_line = format!("Reopen failed: {error}"),
        }
    }

    async fn delete_selected(&mut self) {
        if !self.group.overlay_visible() {
            return;
        }
        let Some(id) = self
            .group
            .history()
            .entries()
            .nth(self.overlay_cursor)
            .map(|entry| entry.id().clone())
        else {
            self.status_line = "History is empty".to_string();
            return;
        };

        self.status_line = match self.group.delete_entry(&id).await {
            Ok(_) => format!("Deleted {id}"),
            Err(error) => format!("Delete failed: {error}"),
        };
        self.overlay_cursor = self
            .overlay_cursor
            .min(self.group.history().len().saturating_sub(1));
    }

    async fn close_focused(&mut self) {
        match self.group.close(self.focus).await {
            Ok(()) => {
                if self.focus < self.scroll.len() {
                    self.scroll.remove(self.focus);
                }
                self.focus = self.focus.min(self.group.len().saturating_sub(1));
                self.status_line = "Pane closed".to_string();
            }
            Err(error) => self.status_line = format!("Close failed: {error}"),
        }
    }

    fn export_focused(&mut self) {
        let Some(session) = self.group.pane(self.focus).ok().and_then(Pane::session) else {
            self.status_line = "Nothing to export".to_string();
            return;
        };
        let path = export_path(&self.export_dir, &session.id().to_string(), ExportFormat::Csv);
        self.status_line = match export_snapshot(&path, &session.snapshot(), ExportFormat::Csv) {
            Ok(rows) => format!("Exported {rows} rows to {}", path.display()),
            Err(error) => format!("Export failed: {error}"),
        };
    }

    fn navigate(&mut self, direction: DirectionKey) {
        if self.group.overlay_visible() {
            let last = self.group.history().len().saturating_sub(1);
            self.overlay_cursor = match direction {
                DirectionKey::Up => self.overlay_cursor.saturating_sub(1),
                DirectionKey::PageUp => 0,
                DirectionKey::Down => (self.overlay_cursor + 1).min(last),
                DirectionKey::PageDown => last,
            };
            return;
        }

        let row_count = self.focused_row_count();
        let Some(offset) = self.scroll.get_mut(self.focus) else {
            return;
        };
        let last = row_count.saturating_sub(1);
        *offset = match direction {
            DirectionKey::Up => offset.saturating_sub(1),
            DirectionKey::PageUp => offset.saturating_sub(SCROLL_PAGE),
            DirectionKey::Down => (*offset + 1).min(last),
            DirectionKey::PageDown => (*offset + SCROLL_PAGE).min(last),
        };
    }

    /// Pulls one page for every running pane scrolled near its last row.
    async fn on_tick(&mut self) {
        for pane_id in 0..self.group.len() {
            let wants_rows = self
                .group
                .pane(pane_id)
                .ok()
                .and_then(Pane::session)
                .is_some_and(|session| {
                    session.state() == SessionState::Running
                        && self.scroll_offset(pane_id) + PREFETCH_MARGIN >= session.row_count()
                });
            if !wants_rows {
                continue;
            }

            match self.group.fetch_next(pane_id).await {
                Ok(Some(FetchOutcome::Exhausted)) => {
                    debug!(pane = pane_id, "stream exhausted");
                }
                Ok(_) => {}
                Err(error) => {
                    warn!(%error, pane = pane_id, "page fetch failed");
                    self.status_line = format!("Fetch failed: {error}");
                }
            }
        }
    }

    fn reset_scroll(&mut self) {
        if let Some(offset) = self.scroll.get_mut(self.focus) {
            *offset = 0;
        }
    }

    fn scroll_offset(&self, pane_id: usize) -> usize {
        self.scroll.get(pane_id).copied().unwrap_or(0)
    }

    fn focused_row_count(&self) -> usize {
        self.group
            .pane(self.focus)
            .ok()
            .and_then(Pane::session)
            .map_or(0, |session| session.row_count())
    }

    fn focused_state_label(&self) -> &'static str {
        self.group
            .pane(self.focus)
            .ok()
            .and_then(Pane::session)
            .map_or("idle", |session| session.state().label())
    }
}

fn export_path(dir: &Path, stem: &str, format: ExportFormat) -> PathBuf {
    dir.join(format!("lens-{stem}.{}", format.extension()))
}

fn format_elapsed(elapsed: Option<Duration>) -> String {
    elapsed.map_or_else(
        || "--".to_string(),
        |elapsed| format!("{}.{:03}s", elapsed.as_secs(), elapsed.subsec_millis()),
    )
}

/// Runs the terminal UI until the user quits.
pub async fn run<S: RemoteQueryService + ?Sized>(
    group: PaneGroup<S>,
    export_dir: PathBuf,
) -> Result<(), TuiError> {
    let mut terminal = setup_terminal()?;
    let run_result = run_loop(&mut terminal, TuiApp::new(group, export_dir)).await;
    let restore_result = restore_terminal(&mut terminal);

    if let Err(error) = run_result {
        restore_result?;
        return Err(error);
    }

    restore_result?;
    Ok(())
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>, TuiError> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;
    Ok(terminal)
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<(), TuiError> {
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;
    Ok(())
}

async fn run_loop<S: RemoteQueryService + ?Sized>(
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    mut app: TuiApp<S>,
) -> Result<(), TuiError> {
    let mut last_tick = Instant::now();

    loop {
        terminal.draw(|frame| render(frame, &app))?;

        while event::poll(Duration::ZERO)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    if let Some(message) = map_key_event(key) {
                        app.handle(message).await;
                    }
                }
            }
        }

        if last_tick.elapsed() >= TICK_RATE {
            app.handle(Msg::Tick).await;
            last_tick = Instant::now();
        }

        if app.should_quit {
            break;
        }

        // Yields so stopwatch tickers keep publishing between frames.
        tokio::time::sleep(TICK_RATE.saturating_sub(last_tick.elapsed()).min(TICK_RATE / 4))
            .await;
    }

    Ok(())
}

fn render<S: RemoteQueryService + ?Sized>(frame: &mut Frame<'_>, app: &TuiApp<S>) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(8),
            Constraint::Length(4),
        ])
        .split(frame.area());

    let split = app
        .group
        .direction()
        .map_or_else(|| "none".to_string(), |direction| direction.to_string());
    let history_bound = app
        .group
        .history()
        .max_entries()
        .map_or_else(|| "unbounded".to_string(), |max| max.to_string());
    let header = Paragraph::new(Line::from(vec![
        Span::styled(
            format!(" Pane {}/{} ", app.focus + 1, app.group.len()),
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(" | "),
        Span::raw(format!("Split: {split}")),
        Span::raw(" | "),
        Span::raw(format!(
            "History: {} (max {history_bound})",
            app.group.history().len()
        )),
        Span::raw(" | "),
        Span::raw(format!(
            "Editing: {}",
            match app.input {
                InputTarget::Query => "query",
                InputTarget::Title => "title",
            }
        )),
    ]))
    .block(Block::default().borders(Borders::ALL).title("Lens"));
    frame.render_widget(header, chunks[0]);

    let layout_direction = match app.group.direction() {
        Some(SplitDirection::Horizontal) => Direction::Vertical,
        Some(SplitDirection::Vertical) | None => Direction::Horizontal,
    };
    let pane_count = u32::try_from(app.group.len().max(1)).unwrap_or(1);
    let pane_areas = Layout::default()
        .direction(layout_direction)
        .constraints(
            (0..pane_count)
                .map(|_| Constraint::Ratio(1, pane_count))
                .collect::<Vec<_>>(),
        )
        .split(chunks[1]);
    for (pane_id, (pane, area)) in app.group.panes().iter().zip(pane_areas.iter()).enumerate() {
        render_pane(frame, app, pane_id, pane, *area);
    }

    let footer = Paragraph::new(vec![
        Line::from(
            "F2 run | F3 pause/resume | F4 stop | F5 save | F6 history | F7/F8 split | F9 close | F10 clear | Tab focus | ^T title | ^E export | ^Q quit",
        ),
        Line::from(format!("Status: {}", app.status_line)),
    ])
    .block(Block::default().borders(Borders::ALL).title("Keys"));
    frame.render_widget(footer, chunks[2]);

    if app.group.overlay_visible() {
        render_history_overlay(frame, app);
    }
}

fn render_pane<S: RemoteQueryService + ?Sized>(
    frame: &mut Frame<'_>,
    app: &TuiApp<S>,
    pane_id: usize,
    pane: &Pane<S>,
    area: Rect,
) {
    let focused = pane_id == app.focus;
    let marker = |target: InputTarget| {
        if focused && app.input == target {
            ">"
        } else {
            " "
        }
    };

    let mut lines = vec![
        Line::from(format!("{} Title: {}", marker(InputTarget::Title), pane.title())),
        Line::from(format!("{} Query: {}", marker(InputTarget::Query), pane.query())),
    ];

    match pane.session() {
        Some(session) => {
            let progress = session.progress();
            lines.push(Line::from(format!(
                "State: {} | rows: {} | more: {} | elapsed: {}",
                progress.state,
                progress.row_count,
                if progress.has_next { "yes" } else { "no" },
                format_elapsed(pane.stopwatch().elapsed()),
            )));
            lines.push(Line::from(session.columns().join(" | ")));

            let visible_limit = usize::from(area.height.saturating_sub(6)).max(1);
            let start = app.scroll_offset(pane_id);
            for (offset, row) in session
                .visible_rows(start, visible_limit)
                .into_iter()
                .enumerate()
            {
                lines.push(Line::from(format!(
                    "{:05} | {}",
                    start + offset + 1,
                    row.join(" | ")
                )));
            }
            if progress.row_count == 0 {
                lines.push(Line::from("No rows"));
            }
        }
        None => lines.push(Line::from("No session bound")),
    }

    let border_style = if focused {
        Style::default().fg(Color::Cyan)
    } else {
        Style::default()
    };
    let body = Paragraph::new(lines)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(border_style)
                .title(format!(" {} ", pane.title())),
        )
        .alignment(Alignment::Left);
    frame.render_widget(body, area);
}

fn render_history_overlay<S: RemoteQueryService + ?Sized>(frame: &mut Frame<'_>, app: &TuiApp<S>) {
    let area = centered_rect(70, 60, frame.area());
    frame.render_widget(Clear, area);

    let summaries = app.group.history().summaries();
    let mut lines = vec![Line::from("Enter: reopen in focused pane | Del: delete | Esc: close")];
    if summaries.is_empty() {
        lines.push(Line::from("No queries yet"));
    }
    for (index, summary) in summaries.iter().enumerate() {
        let cursor = if index == app.overlay_cursor { ">" } else { " " };
        let stage = match summary.stage {
            StageKind::Reference => "ref",
            StageKind::Hydrated => "live",
        };
        let rows = summary
            .row_count
            .map_or_else(String::new, |rows| format!(" ({rows} rows)"));
        lines.push(Line::from(format!(
            "{cursor} [{stage}] {} | {}{rows}",
            summary.title, summary.query
        )));
    }

    let overlay =
        Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("History"));
    frame.render_widget(overlay, area);
}

fn centered_rect(width_percent: u16, height_percent: u16, area: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100_u16 - height_percent) / 2),
            Constraint::Percentage(height_percent),
            Constraint::Percentage((100_u16 - height_percent) / 2),
        ])
        .split(area);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100_u16 - width_percent) / 2),
            Constraint::Percentage(width_percent),
            Constraint::Percentage((100_u16 - width_percent) / 2),
        ])
        .split(vertical[1])[1]
}

fn map_key_event(key: KeyEvent) -> Option<Msg> {
    match (key.modifiers, key.code) {
        (KeyModifiers::CONTROL, KeyCode::Char('q')) => Some(Msg::Quit),
        (KeyModifiers::CONTROL, KeyCode::Char('t')) => Some(Msg::ToggleTitleInput),
        (KeyModifiers::CONTROL, KeyCode::Char('e')) => Some(Msg::Export),
        (_, KeyCode::F(2)) => Some(Msg::Run),
        (_, KeyCode::F(3)) => Some(Msg::TogglePause),
        (_, KeyCode::F(4)) => Some(Msg::Cancel),
        (_, KeyCode::F(5)) => Some(Msg::Save),
        (_, KeyCode::F(6)) => Some(Msg::ToggleOverlay),
        (_, KeyCode::F(7)) => Some(Msg::Split(SplitDirection::Vertical)),
        (_, KeyCode::F(8)) => Some(Msg::Split(SplitDirection::Horizontal)),
        (_, KeyCode::F(9)) => Some(Msg::ClosePane),
        (_, KeyCode::F(10)) => Some(Msg::ClearPane),
        (_, KeyCode::Tab) => Some(Msg::NextPane),
        (_, KeyCode::Delete) => Some(Msg::DeleteEntry),
        (_, KeyCode::Enter) => Some(Msg::Submit),
        (_, KeyCode::Esc) => Some(Msg::Dismiss),
        (_, KeyCode::Backspace) => Some(Msg::Backspace),
        (_, KeyCode::Up) => Some(Msg::Navigate(DirectionKey::Up)),
        (_, KeyCode::Down) => Some(Msg::Navigate(DirectionKey::Down)),
        (_, KeyCode::PageUp) => Some(Msg::Navigate(DirectionKey::PageUp)),
        (_, KeyCode::PageDown) => Some(Msg::Navigate(DirectionKey::PageDown)),
        (KeyModifiers::NONE | KeyModifiers::SHIFT, KeyCode::Char(character)) => {
            Some(Msg::Input(character))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
    use lens_adapters::memory::InMemoryQueryService;
    use lens_core::history::{HistoryStore, StageKind};
    use lens_core::pane_group::{PaneGroup, SplitDirection};
    use lens_core::stream_session::SessionState;
    use tempfile::TempDir;

    use super::{format_elapsed, map_key_event, DirectionKey, InputTarget, Msg, TuiApp};

    fn demo_app(export_dir: &std::path::Path) -> TuiApp<InMemoryQueryService> {
        let service = Arc::new(InMemoryQueryService::demo(40));
        TuiApp::new(
            PaneGroup::new(HistoryStore::new(service, Some(3))),
            export_dir.to_path_buf(),
        )
    }

    async fn type_text(app: &mut TuiApp<InMemoryQueryService>, text: &str) {
        for character in text.chars() {
            app.handle(Msg::Input(character)).await;
        }
    }

    fn key(code: KeyCode, modifiers: KeyModifiers) -> Option<Msg> {
        map_key_event(KeyEvent::new(code, modifiers))
    }

    #[test]
    fn keymap_covers_pane_commands() {
        assert_eq!(key(KeyCode::F(2), KeyModifiers::NONE), Some(Msg::Run));
        assert_eq!(key(KeyCode::F(6), KeyModifiers::NONE), Some(Msg::ToggleOverlay));
        assert_eq!(key(KeyCode::Delete, KeyModifiers::NONE), Some(Msg::DeleteEntry));
        assert_eq!(
            key(KeyCode::F(8), KeyModifiers::NONE),
            Some(Msg::Split(SplitDirection::Horizontal))
        );
        assert_eq!(key(KeyCode::Char('q'), KeyModifiers::CONTROL), Some(Msg::Quit));
        assert_eq!(
            key(KeyCode::PageDown, KeyModifiers::NONE),
            Some(Msg::Navigate(DirectionKey::PageDown))
        );
    }

    #[test]
    fn plain_characters_are_text_input() {
        assert_eq!(key(KeyCode::Char('q'), KeyModifiers::NONE), Some(Msg::Input('q')));
        assert_eq!(key(KeyCode::Char('S'), KeyModifiers::SHIFT), Some(Msg::Input('S')));
        assert_eq!(key(KeyCode::Char('x'), KeyModifiers::ALT), None);
    }

    #[test]
    fn elapsed_is_shown_with_millis() {
        assert_eq!(format_elapsed(None), "--");
        assert_eq!(format_elapsed(Some(Duration::from_millis(1_234))), "1.234s");
    }

    #[tokio::test]
    async fn typed_query_runs_and_streams_on_tick() {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let mut app = demo_app(temp_dir.path());
        type_text(&mut app, "select * from users").await;
        app.handle(Msg::Submit).await;

        let session = app.group.panes()[0].session().expect("bound").clone();
        assert_eq!(session.row_count(), 40);

        app.handle(Msg::Tick).await;
        assert_eq!(session.row_count(), 80);

        app.handle(Msg::TogglePause).await;
        assert_eq!(session.state(), SessionState::Paused);
        app.handle(Msg::Tick).await;
        assert_eq!(session.row_count(), 80);
    }

    #[tokio::test]
    async fn tick_waits_until_viewport_nears_the_end() {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let service = Arc::new(InMemoryQueryService::demo(500));
        let mut app = TuiApp::new(
            PaneGroup::new(HistoryStore::new(service, None)),
            temp_dir.path().to_path_buf(),
        );
        type_text(&mut app, "SELECT * FROM users").await;
        app.handle(Msg::Run).await;

        app.handle(Msg::Tick).await;
        assert_eq!(app.focused_row_count(), 500);

        for _ in 0..23 {
            app.handle(Msg::Navigate(DirectionKey::PageDown)).await;
        }
        app.handle(Msg::Tick).await;
        assert_eq!(app.focused_row_count(), 1_000);
    }

    #[tokio::test]
    async fn title_input_renames_history_entry() {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let mut app = demo_app(temp_dir.path());
        type_text(&mut app, "SELECT 1").await;
        app.handle(Msg::Run).await;

        app.handle(Msg::ToggleTitleInput).await;
        for _ in 0.."Unnamed".len() {
            app.handle(Msg::Backspace).await;
        }
        type_text(&mut app, "ping").await;
        app.handle(Msg::Submit).await;

        assert_eq!(app.input, InputTarget::Query);
        let summaries = app.group.history().summaries();
        assert_eq!(summaries[0].title, "ping");
    }

    #[tokio::test]
    async fn overlay_reopens_saved_session_in_other_pane() {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let mut app = demo_app(temp_dir.path());
        type_text(&mut app, "SELECT * FROM playlists").await;
        app.handle(Msg::Run).await;
        app.handle(Msg::Save).await;

        app.handle(Msg::Split(SplitDirection::Vertical)).await;
        app.handle(Msg::NextPane).await;
        app.handle(Msg::ToggleOverlay).await;
        app.handle(Msg::Submit).await;

        assert!(!app.group.overlay_visible());
        let first = app.group.panes()[0].session().expect("first pane session");
        let second = app.group.panes()[1].session().expect("second pane session");
        assert!(first.ptr_eq(second));
        assert_eq!(
            app.group.history().summaries()[0].stage,
            StageKind::Hydrated
        );
    }

    #[tokio::test]
    async fn overlay_delete_releases_the_selected_run() {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let service = Arc::new(InMemoryQueryService::demo(40));
        let mut app = TuiApp::new(
            PaneGroup::new(HistoryStore::new(Arc::clone(&service), Some(3))),
            temp_dir.path().to_path_buf(),
        );
        type_text(&mut app, "SELECT * FROM users").await;
        app.handle(Msg::Run).await;
        assert_eq!(service.open_cursors(), 1);

        app.handle(Msg::DeleteEntry).await;
        assert_eq!(app.group.history().len(), 1);

        app.handle(Msg::ToggleOverlay).await;
        app.handle(Msg::DeleteEntry).await;

        assert!(app.group.history().is_empty());
        assert_eq!(service.open_cursors(), 0);
        assert!(app.status_line.starts_with("Deleted"));
    }

    #[tokio::test]
    async fn closing_last_pane_reports_error() {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let mut app = demo_app(temp_dir.path());

        app.handle(Msg::ClosePane).await;
        assert!(app.status_line.starts_with("Close failed"));

        app.handle(Msg::Split(SplitDirection::Horizontal)).await;
        app.handle(Msg::NextPane).await;
        app.handle(Msg::ClosePane).await;
        assert_eq!(app.focus, 0);
        assert_eq!(app.group.len(), 1);
        assert_eq!(app.group.direction(), None);
    }

    #[tokio::test]
    async fn export_writes_csv_into_export_dir() {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let mut app = demo_app(temp_dir.path());
        type_text(&mut app, "SELECT * FROM playlists").await;
        app.handle(Msg::Run).await;
        app.handle(Msg::Export).await;

        assert!(app.status_line.starts_with("Exported 3 rows"));
        let exported = std::fs::read_dir(temp_dir.path())
            .expect("read export dir")
            .count();
        assert_eq!(exported, 1);
    }
}
