//! Terminal interface: application state, rendering, and the interactive
//! event loop.

pub mod chat_loop;

use std::path::PathBuf;

use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, Paragraph, Wrap},
    Frame,
};
use unicode_width::UnicodeWidthStr;

use crate::core::controller::ChatController;
use crate::core::message::Role;
use crate::core::persist::save_store;
use crate::core::session::SessionId;
use crate::utils::logging::TranscriptLog;

const SESSION_PANE_WIDTH: u16 = 26;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Focus {
    Input,
    Sessions,
    Transcript,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    Info,
    Error,
}

/// All mutable UI state, owned by the chat loop. Explicit lifecycle: built at
/// startup, saved and dropped on exit.
pub struct App {
    pub controller: ChatController,
    pub active_session: SessionId,
    pub input: String,
    /// Cursor position in the input, in characters.
    pub cursor: usize,
    /// Index of the message being edited, when the input holds an edit.
    pub editing: Option<usize>,
    /// Session being renamed, when the input holds a new name.
    pub renaming: Option<SessionId>,
    pub focus: Focus,
    /// Selected message index while the transcript pane has focus.
    pub selected_message: Option<usize>,
    pub scroll_offset: u16,
    pub auto_scroll: bool,
    pub notice: Option<(NoticeKind, String)>,
    pub transcript_log: TranscriptLog,
    pub state_path: PathBuf,
}

impl App {
    pub fn new(
        controller: ChatController,
        active_session: SessionId,
        transcript_log: TranscriptLog,
        state_path: PathBuf,
    ) -> Self {
        Self {
            controller,
            active_session,
            input: String::new(),
            cursor: 0,
            editing: None,
            renaming: None,
            focus: Focus::Input,
            selected_message: None,
            scroll_offset: 0,
            auto_scroll: true,
            notice: None,
            transcript_log,
            state_path,
        }
    }

    pub fn notice_info(&mut self, message: impl Into<String>) {
        self.notice = Some((NoticeKind::Info, message.into()));
    }

    pub fn notice_error(&mut self, message: impl Into<String>) {
        self.notice = Some((NoticeKind::Error, message.into()));
    }

    /// Persist the session store, surfacing failures as a notice rather than
    /// interrupting the chat.
    pub fn save_state(&mut self) {
        if let Err(e) = save_store(&self.controller.store, &self.state_path) {
            tracing::warn!(error = %e, "failed to save session state");
            self.notice_error(format!("Could not save sessions: {e}"));
        }
    }

    // Input editing. The cursor is tracked in characters; byte offsets are
    // derived on demand.

    fn cursor_byte_index(&self) -> usize {
        self.input
            .char_indices()
            .nth(self.cursor)
            .map(|(i, _)| i)
            .unwrap_or(self.input.len())
    }

    pub fn insert_char(&mut self, c: char) {
        let idx = self.cursor_byte_index();
        self.input.insert(idx, c);
        self.cursor += 1;
    }

    pub fn backspace(&mut self) {
        if self.cursor == 0 {
            return;
        }
        self.cursor -= 1;
        let idx = self.cursor_byte_index();
        self.input.remove(idx);
    }

    pub fn move_cursor_left(&mut self) {
        self.cursor = self.cursor.saturating_sub(1);
    }

    pub fn move_cursor_right(&mut self) {
        if self.cursor < self.input.chars().count() {
            self.cursor += 1;
        }
    }

    pub fn move_cursor_home(&mut self) {
        self.cursor = 0;
    }

    pub fn move_cursor_end(&mut self) {
        self.cursor = self.input.chars().count();
    }

    /// Take the input buffer, resetting cursor and edit state.
    pub fn take_input(&mut self) -> String {
        self.cursor = 0;
        std::mem::take(&mut self.input)
    }

    pub fn set_input(&mut self, text: impl Into<String>) {
        self.input = text.into();
        self.cursor = self.input.chars().count();
    }

    /// Abandon a pending edit or rename, clearing the input it occupied.
    pub fn cancel_edit(&mut self) {
        let had_edit = self.editing.take().is_some();
        let had_rename = self.renaming.take().is_some();
        if had_edit || had_rename {
            self.input.clear();
            self.cursor = 0;
        }
    }

    // Session navigation.

    pub fn session_index(&self) -> Option<usize> {
        self.controller
            .store
            .list()
            .iter()
            .position(|s| s.id == self.active_session)
    }

    pub fn activate_session(&mut self, id: SessionId) {
        if self.active_session != id {
            self.active_session = id;
            self.selected_message = None;
            self.scroll_offset = 0;
            self.auto_scroll = true;
            self.cancel_edit();
        }
    }

    pub fn select_adjacent_session(&mut self, delta: isize) {
        let sessions = self.controller.store.list();
        if sessions.is_empty() {
            return;
        }
        let current = self.session_index().unwrap_or(0) as isize;
        let next = (current + delta).clamp(0, sessions.len() as isize - 1) as usize;
        let id = sessions[next].id;
        self.activate_session(id);
    }

    pub fn select_adjacent_message(&mut self, delta: isize) {
        let count = match self.controller.store.get(self.active_session) {
            Ok(session) => session.messages.len(),
            Err(_) => return,
        };
        if count == 0 {
            self.selected_message = None;
            return;
        }
        let current = self.selected_message.unwrap_or(count - 1) as isize;
        let next = (current + delta).clamp(0, count as isize - 1) as usize;
        self.selected_message = Some(next);
    }

    // Transcript rendering.

    pub fn build_display_lines(&self) -> Vec<Line<'_>> {
        let Ok(session) = self.controller.store.get(self.active_session) else {
            return Vec::new();
        };
        let selected = match self.focus {
            Focus::Transcript => self.selected_message,
            _ => None,
        };

        let mut lines = Vec::new();
        for (i, msg) in session.messages.iter().enumerate() {
            let is_selected = selected == Some(i);
            match msg.role {
                Role::User => {
                    let mut prefix_style =
                        Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD);
                    if is_selected {
                        prefix_style = prefix_style.add_modifier(Modifier::REVERSED);
                    }
                    let mut content_lines = msg.content.lines();
                    lines.push(Line::from(vec![
                        Span::styled("You: ", prefix_style),
                        Span::styled(
                            content_lines.next().unwrap_or("").to_string(),
                            Style::default().fg(Color::Cyan),
                        ),
                    ]));
                    for content_line in content_lines {
                        lines.push(Line::from(Span::styled(
                            content_line.to_string(),
                            Style::default().fg(Color::Cyan),
                        )));
                    }
                    lines.push(Line::from(""));
                }
                Role::System => {
                    lines.push(Line::from(Span::styled(
                        msg.content.clone(),
                        Style::default().fg(Color::DarkGray),
                    )));
                    lines.push(Line::from(""));
                }
                Role::Assistant => {
                    let mut style = Style::default().fg(Color::White);
                    if is_selected {
                        style = style.add_modifier(Modifier::REVERSED);
                    }
                    let mut first = true;
                    for content_line in msg.content.lines() {
                        let line_style = if first { style } else { Style::default().fg(Color::White) };
                        first = false;
                        if content_line.trim().is_empty() {
                            lines.push(Line::from(""));
                        } else {
                            lines.push(Line::from(Span::styled(
                                content_line.to_string(),
                                line_style,
                            )));
                        }
                    }
                    if msg.content.is_empty() {
                        lines.push(Line::from(Span::styled("…", style)));
                    }
                    lines.push(Line::from(""));
                }
            }
        }

        if self.controller.is_busy(self.active_session) {
            lines.push(Line::from(Span::styled(
                "…",
                Style::default().fg(Color::DarkGray),
            )));
        }

        lines
    }

    pub fn max_scroll_offset(&self, available_height: u16) -> u16 {
        let total_lines = u16::try_from(self.build_display_lines().len()).unwrap_or(u16::MAX);
        total_lines.saturating_sub(available_height)
    }
}

pub(crate) fn ui(f: &mut Frame, app: &App) {
    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Length(SESSION_PANE_WIDTH), Constraint::Min(1)])
        .split(f.area());

    draw_session_pane(f, app, columns[0]);

    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(1), Constraint::Length(3)])
        .split(columns[1]);

    draw_transcript(f, app, rows[0]);
    draw_input(f, app, rows[1]);
}

fn border_style(active: bool) -> Style {
    if active {
        Style::default().fg(Color::Green)
    } else {
        Style::default().fg(Color::DarkGray)
    }
}

fn draw_session_pane(f: &mut Frame, app: &App, area: Rect) {
    let active_index = app.session_index();
    let items: Vec<ListItem> = app
        .controller
        .store
        .list()
        .iter()
        .enumerate()
        .map(|(i, session)| {
            let mut style = Style::default();
            if Some(i) == active_index {
                style = style.fg(Color::Green).add_modifier(Modifier::BOLD);
            }
            let marker = if app.controller.is_busy(session.id) { "… " } else { "" };
            ListItem::new(Line::from(Span::styled(
                format!("{marker}{}", session.label()),
                style,
            )))
        })
        .collect();

    let list = List::new(items).block(
        Block::default()
            .borders(Borders::ALL)
            .title("Sessions")
            .border_style(border_style(app.focus == Focus::Sessions)),
    );
    f.render_widget(list, area);
}

fn draw_transcript(f: &mut Frame, app: &App, area: Rect) {
    let title = match app.controller.store.get(app.active_session) {
        Ok(session) => format!(" {} [{}] ", session.label(), session.profile),
        Err(_) => " causerie ".to_string(),
    };

    let available_height = area.height.saturating_sub(2);
    let offset = if app.auto_scroll {
        app.max_scroll_offset(available_height)
    } else {
        app.scroll_offset.min(app.max_scroll_offset(available_height))
    };

    let paragraph = Paragraph::new(app.build_display_lines())
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(title)
                .border_style(border_style(app.focus == Focus::Transcript)),
        )
        .wrap(Wrap { trim: false })
        .scroll((offset, 0));
    f.render_widget(paragraph, area);
}

fn draw_input(f: &mut Frame, app: &App, area: Rect) {
    let title = if let Some((kind, message)) = &app.notice {
        let color = match kind {
            NoticeKind::Error => Color::Red,
            NoticeKind::Info => Color::DarkGray,
        };
        Span::styled(format!(" {message} "), Style::default().fg(color))
    } else if app.renaming.is_some() {
        Span::styled(
            " Renaming session (Esc to cancel) ".to_string(),
            Style::default().fg(Color::Yellow),
        )
    } else if let Some(index) = app.editing {
        Span::styled(
            format!(" Editing message {index} (Esc to cancel) "),
            Style::default().fg(Color::Yellow),
        )
    } else {
        Span::styled(" Message ".to_string(), Style::default().fg(Color::DarkGray))
    };

    let paragraph = Paragraph::new(app.input.as_str()).block(
        Block::default()
            .borders(Borders::ALL)
            .title(title)
            .border_style(border_style(app.focus == Focus::Input)),
    );
    f.render_widget(paragraph, area);

    if app.focus == Focus::Input {
        let prefix: String = app.input.chars().take(app.cursor).collect();
        let cursor_x = area.x + 1 + prefix.width() as u16;
        f.set_cursor_position((cursor_x.min(area.x + area.width.saturating_sub(2)), area.y + 1));
    }
}
