//! Main chat event loop: multiplexes terminal input with completion events
//! and drives the controller.

use std::error::Error;
use std::io;
use std::time::Duration;

use ratatui::crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Terminal};

use crate::api::stream::{CompletionEvent, CompletionService};
use crate::core::config::Config;
use crate::core::controller::{Applied, ChatController};
use crate::core::message::Role;
use crate::core::persist::{default_state_path, load_store};
use crate::core::profile::ProfileRegistry;
use crate::core::providers::resolve_env_session;
use crate::ui::{ui, App, Focus};
use crate::utils::logging::TranscriptLog;

#[derive(PartialEq, Eq)]
enum LoopAction {
    Continue,
    Quit,
}

/// Launch the interactive chat interface.
pub async fn run_chat(
    config: Config,
    profile_override: Option<String>,
    model_override: Option<String>,
    log_file: Option<String>,
) -> Result<(), Box<dyn Error>> {
    let mut registry = ProfileRegistry::new(config.profiles.clone());
    let requested = profile_override.as_deref().or(config.default_profile.as_deref());
    let initial_profile = registry.resolve_initial(requested)?.name.clone();

    // A `--model` override applies to this run only; the config file keeps
    // the profile's own model.
    if let Some(model) = model_override {
        let mut profile = registry.get(&initial_profile)?.clone();
        profile.model = model;
        registry.upsert(profile);
    }

    let provider = resolve_env_session()?;
    let transcript_log = TranscriptLog::new(log_file)?;

    let state_path = default_state_path()?;
    let store = load_store(&state_path)?;
    let mut controller = ChatController::new(store, registry);

    // Resume the most recent session, or start fresh.
    let active_session = match controller.store.list().last() {
        Some(session) => session.id,
        None => controller.create_session(Some(&initial_profile))?,
    };

    let (service, mut rx) = CompletionService::new(provider);
    let mut app = App::new(controller, active_session, transcript_log, state_path);
    if app.transcript_log.is_active() {
        app.notice_info(format!("Transcript logging {}", app.transcript_log.status()));
    }

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(io::stdout()))?;

    let result = run_loop(&mut terminal, &mut app, &service, &mut rx, &initial_profile).await;

    // Restore the terminal even when the loop errored.
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    app.save_state();
    result
}

async fn run_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
    service: &CompletionService,
    rx: &mut tokio::sync::mpsc::UnboundedReceiver<CompletionEvent>,
    initial_profile: &str,
) -> Result<(), Box<dyn Error>> {
    loop {
        terminal.draw(|f| ui(f, app))?;

        while let Ok(completion) = rx.try_recv() {
            handle_completion(app, completion);
        }

        if event::poll(Duration::from_millis(50))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press
                    && handle_key(app, service, initial_profile, key) == LoopAction::Quit
                {
                    return Ok(());
                }
            }
        }
    }
}

fn handle_completion(app: &mut App, completion: CompletionEvent) {
    match app.controller.apply_event(completion) {
        Some(Applied::Assistant { session_id }) => {
            if let Ok(session) = app.controller.store.get(session_id) {
                if let Some(message) = session.messages.last() {
                    if let Err(e) = app.transcript_log.log_message(&message.content) {
                        tracing::warn!(error = %e, "transcript logging failed");
                    }
                }
            }
            app.save_state();
        }
        Some(Applied::Failed { message, .. }) => {
            app.notice_error(message);
        }
        None => {}
    }
}

fn handle_key(
    app: &mut App,
    service: &CompletionService,
    initial_profile: &str,
    key: KeyEvent,
) -> LoopAction {
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);

    match key.code {
        KeyCode::Char('c') | KeyCode::Char('q') if ctrl => {
            app.save_state();
            return LoopAction::Quit;
        }
        KeyCode::Char('n') if ctrl => new_session(app, initial_profile),
        KeyCode::Char('x') if ctrl => delete_active_session(app, initial_profile),
        KeyCode::Char('p') if ctrl => cycle_profile(app),
        KeyCode::Tab => {
            app.focus = match app.focus {
                Focus::Input => Focus::Transcript,
                Focus::Transcript => Focus::Sessions,
                Focus::Sessions => Focus::Input,
            };
            if app.focus == Focus::Transcript && app.selected_message.is_none() {
                app.select_adjacent_message(0);
            }
        }
        KeyCode::Esc => {
            app.cancel_edit();
            app.notice = None;
            app.focus = Focus::Input;
        }
        _ => match app.focus {
            Focus::Input => handle_input_key(app, service, key),
            Focus::Sessions => handle_sessions_key(app, key),
            Focus::Transcript => handle_transcript_key(app, key),
        },
    }
    LoopAction::Continue
}

fn handle_input_key(app: &mut App, service: &CompletionService, key: KeyEvent) {
    match key.code {
        KeyCode::Enter => submit_input(app, service),
        KeyCode::Char(c) if !key.modifiers.contains(KeyModifiers::CONTROL) => app.insert_char(c),
        KeyCode::Backspace => app.backspace(),
        KeyCode::Left => app.move_cursor_left(),
        KeyCode::Right => app.move_cursor_right(),
        KeyCode::Home => app.move_cursor_home(),
        KeyCode::End => app.move_cursor_end(),
        KeyCode::Up => {
            app.auto_scroll = false;
            app.scroll_offset = app.scroll_offset.saturating_sub(1);
        }
        KeyCode::Down => {
            app.scroll_offset = app.scroll_offset.saturating_add(1);
        }
        KeyCode::PageUp => {
            app.auto_scroll = false;
            app.scroll_offset = app.scroll_offset.saturating_sub(10);
        }
        KeyCode::PageDown => {
            app.scroll_offset = app.scroll_offset.saturating_add(10);
        }
        _ => {}
    }
}

fn handle_sessions_key(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Up => app.select_adjacent_session(-1),
        KeyCode::Down => app.select_adjacent_session(1),
        KeyCode::Char('r') => start_rename(app),
        KeyCode::Enter => app.focus = Focus::Input,
        _ => {}
    }
}

fn handle_transcript_key(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Up => app.select_adjacent_message(-1),
        KeyCode::Down => app.select_adjacent_message(1),
        KeyCode::Enter | KeyCode::Char('e') => start_edit(app),
        KeyCode::Backspace | KeyCode::Delete => delete_selected_message(app),
        KeyCode::PageUp => {
            app.auto_scroll = false;
            app.scroll_offset = app.scroll_offset.saturating_sub(10);
        }
        KeyCode::PageDown => {
            app.scroll_offset = app.scroll_offset.saturating_add(10);
        }
        _ => {}
    }
}

fn submit_input(app: &mut App, service: &CompletionService) {
    let text = app.input.trim().to_string();

    // A rename submission, unlike a message, may be blank: that clears the
    // name and the label falls back to the first user message.
    if let Some(id) = app.renaming.take() {
        app.take_input();
        let name = if text.is_empty() { None } else { Some(text) };
        match app.controller.store.rename_session(id, name) {
            Ok(()) => app.save_state(),
            Err(e) => app.notice_error(e.to_string()),
        }
        return;
    }

    if text.is_empty() {
        return;
    }
    let session_id = app.active_session;

    let request = match app.editing {
        Some(index) => match app.controller.edit_message(session_id, index, text.clone()) {
            Ok(request) => {
                app.editing = None;
                request
            }
            Err(e) => {
                app.notice_error(e.to_string());
                return;
            }
        },
        None => match app.controller.send_message(session_id, text.clone()) {
            Ok(request) => Some(request),
            Err(e) => {
                app.notice_error(e.to_string());
                return;
            }
        },
    };

    app.take_input();
    app.notice = None;
    app.auto_scroll = true;

    if let Err(e) = app.transcript_log.log_message(&format!("You: {text}")) {
        tracing::warn!(error = %e, "transcript logging failed");
    }
    app.save_state();

    if let Some(request) = request {
        service.spawn(request);
    }
}

fn start_edit(app: &mut App) {
    let Some(index) = app.selected_message else {
        return;
    };
    let Ok(session) = app.controller.store.get(app.active_session) else {
        return;
    };
    let Some(message) = session.messages.get(index) else {
        return;
    };
    if message.role != Role::User {
        app.notice_info("Only your own messages can be edited");
        return;
    }
    let content = message.content.clone();
    app.set_input(content);
    app.editing = Some(index);
    app.focus = Focus::Input;
}

fn start_rename(app: &mut App) {
    let Ok(session) = app.controller.store.get(app.active_session) else {
        return;
    };
    app.set_input(session.name.clone().unwrap_or_default());
    app.renaming = Some(app.active_session);
    app.focus = Focus::Input;
}

fn delete_selected_message(app: &mut App) {
    let Some(index) = app.selected_message else {
        return;
    };
    let session_id = app.active_session;
    let Ok(session) = app.controller.store.get(session_id) else {
        return;
    };
    let Some(message) = session.messages.get(index) else {
        return;
    };
    if message.role != Role::User {
        app.notice_info("Only your own messages can be deleted");
        return;
    }

    if let Err(e) = app.controller.delete_message(session_id, index) {
        app.notice_error(e.to_string());
        return;
    }

    let remaining = app
        .controller
        .store
        .get(session_id)
        .map(|s| s.messages.len())
        .unwrap_or(0);
    app.selected_message = if remaining == 0 {
        None
    } else {
        Some(index.min(remaining - 1))
    };
    app.save_state();
}

fn new_session(app: &mut App, initial_profile: &str) {
    match app.controller.create_session(Some(initial_profile)) {
        Ok(id) => {
            app.activate_session(id);
            app.focus = Focus::Input;
            app.save_state();
        }
        Err(e) => app.notice_error(e.to_string()),
    }
}

fn delete_active_session(app: &mut App, initial_profile: &str) {
    let doomed = app.active_session;
    let index = app.session_index().unwrap_or(0);
    if let Err(e) = app.controller.delete_session(doomed) {
        app.notice_error(e.to_string());
        return;
    }

    let sessions = app.controller.store.list();
    let next = sessions
        .get(index.min(sessions.len().saturating_sub(1)))
        .map(|s| s.id);
    match next {
        Some(id) => app.activate_session(id),
        // The list never stays empty; the UI always has a session to show.
        None => match app.controller.create_session(Some(initial_profile)) {
            Ok(id) => app.activate_session(id),
            Err(e) => app.notice_error(e.to_string()),
        },
    }
    app.save_state();
}

fn cycle_profile(app: &mut App) {
    let session_id = app.active_session;
    let current = match app.controller.store.get(session_id) {
        Ok(session) => session.profile.clone(),
        Err(e) => {
            app.notice_error(e.to_string());
            return;
        }
    };

    let profiles = app.controller.profiles.list();
    let position = profiles.iter().position(|p| p.name == current).unwrap_or(0);
    let next = profiles[(position + 1) % profiles.len()].clone();

    match app.controller.set_session_profile(session_id, &next.name) {
        Ok(()) => {
            app.notice_info(format!("Profile: {} ({})", next.name, next.model));
            app.save_state();
        }
        Err(e) => app.notice_error(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::stream::CompletionOutcome;
    use crate::core::profile::Profile;
    use crate::core::session::SessionStore;

    fn test_app() -> (App, CompletionService) {
        let mut registry = ProfileRegistry::default();
        registry.upsert(Profile::new("fast", "gpt-4o-mini"));
        let mut controller = ChatController::new(SessionStore::new(), registry);
        let id = controller.create_session(Some("default")).unwrap();
        let app = App::new(
            controller,
            id,
            TranscriptLog::new(None).unwrap(),
            std::env::temp_dir().join("causerie-chat-loop-test.json"),
        );
        let (service, _rx) = CompletionService::new(crate::core::providers::ProviderSession {
            api_key: "test".into(),
            base_url: "http://localhost/v1".into(),
        });
        (app, service)
    }

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn ctrl(c: char) -> KeyEvent {
        KeyEvent::new(KeyCode::Char(c), KeyModifiers::CONTROL)
    }

    #[tokio::test]
    async fn typing_and_submitting_appends_a_user_message() {
        let (mut app, service) = test_app();
        for c in "hi".chars() {
            handle_key(&mut app, &service, "default", key(KeyCode::Char(c)));
        }
        handle_key(&mut app, &service, "default", key(KeyCode::Enter));

        let session = app.controller.store.get(app.active_session).unwrap();
        assert_eq!(session.messages.len(), 1);
        assert_eq!(session.messages[0].content, "hi");
        assert!(app.input.is_empty());
        assert!(app.controller.is_busy(app.active_session));
    }

    #[tokio::test]
    async fn blank_input_is_not_submitted() {
        let (mut app, service) = test_app();
        handle_key(&mut app, &service, "default", key(KeyCode::Char(' ')));
        handle_key(&mut app, &service, "default", key(KeyCode::Enter));
        assert!(app
            .controller
            .store
            .get(app.active_session)
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn submitting_while_busy_surfaces_a_notice() {
        let (mut app, service) = test_app();
        app.set_input("first");
        handle_key(&mut app, &service, "default", key(KeyCode::Enter));

        app.set_input("second");
        handle_key(&mut app, &service, "default", key(KeyCode::Enter));

        assert!(matches!(app.notice, Some((crate::ui::NoticeKind::Error, _))));
        // The rejected message is still in the input for a later retry.
        assert_eq!(app.input, "second");
        assert_eq!(
            app.controller.store.get(app.active_session).unwrap().messages.len(),
            1
        );
    }

    #[tokio::test]
    async fn edit_flow_truncates_and_replaces() {
        let (mut app, service) = test_app();
        let id = app.active_session;
        let request = app.controller.send_message(id, "hi").unwrap();
        app.controller
            .apply_event(CompletionEvent {
                session_id: id,
                stream_id: request.stream_id,
                outcome: CompletionOutcome::Success("hey there".into()),
            })
            .unwrap();

        // Select the user message in the transcript and start an edit.
        handle_key(&mut app, &service, "default", key(KeyCode::Tab));
        assert_eq!(app.focus, Focus::Transcript);
        handle_key(&mut app, &service, "default", key(KeyCode::Up));
        handle_key(&mut app, &service, "default", key(KeyCode::Enter));
        assert_eq!(app.editing, Some(0));
        assert_eq!(app.input, "hi");

        app.set_input("hello");
        handle_key(&mut app, &service, "default", key(KeyCode::Enter));

        let messages = &app.controller.store.get(id).unwrap().messages;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "hello");
        assert!(app.controller.is_busy(id));
    }

    #[tokio::test]
    async fn assistant_messages_cannot_be_edited() {
        let (mut app, service) = test_app();
        let id = app.active_session;
        let request = app.controller.send_message(id, "hi").unwrap();
        app.controller
            .apply_event(CompletionEvent {
                session_id: id,
                stream_id: request.stream_id,
                outcome: CompletionOutcome::Success("hey".into()),
            })
            .unwrap();

        app.focus = Focus::Transcript;
        app.selected_message = Some(1);
        handle_key(&mut app, &service, "default", key(KeyCode::Char('e')));
        assert_eq!(app.editing, None);
        assert!(matches!(app.notice, Some((crate::ui::NoticeKind::Info, _))));
    }

    #[tokio::test]
    async fn ctrl_n_creates_and_activates_a_session() {
        let (mut app, service) = test_app();
        let first = app.active_session;
        handle_key(&mut app, &service, "default", ctrl('n'));
        assert_ne!(app.active_session, first);
        assert_eq!(app.controller.store.len(), 2);
    }

    #[tokio::test]
    async fn ctrl_x_deletes_and_keeps_a_session_active() {
        let (mut app, service) = test_app();
        let first = app.active_session;
        handle_key(&mut app, &service, "default", ctrl('x'));

        assert!(app.controller.store.get(first).is_err());
        // A replacement session exists and is active.
        assert_eq!(app.controller.store.len(), 1);
        assert!(app.controller.store.get(app.active_session).is_ok());
    }

    #[tokio::test]
    async fn ctrl_p_cycles_the_session_profile() {
        let (mut app, service) = test_app();
        handle_key(&mut app, &service, "default", ctrl('p'));
        let profile = &app.controller.store.get(app.active_session).unwrap().profile;
        assert_eq!(profile, "fast");

        handle_key(&mut app, &service, "default", ctrl('p'));
        let profile = &app.controller.store.get(app.active_session).unwrap().profile;
        assert_eq!(profile, "default");
    }

    #[tokio::test]
    async fn failed_completion_keeps_ui_usable() {
        let (mut app, service) = test_app();
        let id = app.active_session;
        app.set_input("hi");
        handle_key(&mut app, &service, "default", key(KeyCode::Enter));
        let before = app.controller.store.get(id).unwrap().messages.len();

        // The in-flight request registered by submit has the first stream id.
        let stream_id = 1;
        handle_completion(
            &mut app,
            CompletionEvent {
                session_id: id,
                stream_id,
                outcome: CompletionOutcome::Error("API error: rate limited".into()),
            },
        );

        assert_eq!(app.controller.store.get(id).unwrap().messages.len(), before);
        assert!(!app.controller.is_busy(id));
        assert!(matches!(app.notice, Some((crate::ui::NoticeKind::Error, _))));

        // The next send goes through normally.
        app.set_input("again");
        handle_key(&mut app, &service, "default", key(KeyCode::Enter));
        assert_eq!(app.controller.store.get(id).unwrap().messages.len(), before + 1);
    }

    #[tokio::test]
    async fn backspace_deletes_selected_message_and_its_reply() {
        let (mut app, service) = test_app();
        let id = app.active_session;
        let request = app.controller.send_message(id, "hi").unwrap();
        app.controller
            .apply_event(CompletionEvent {
                session_id: id,
                stream_id: request.stream_id,
                outcome: CompletionOutcome::Success("hey".into()),
            })
            .unwrap();

        app.focus = Focus::Transcript;
        app.selected_message = Some(0);
        handle_key(&mut app, &service, "default", key(KeyCode::Backspace));

        assert!(app.controller.store.get(id).unwrap().is_empty());
        assert_eq!(app.selected_message, None);
    }

    #[tokio::test]
    async fn assistant_messages_cannot_be_deleted() {
        let (mut app, service) = test_app();
        let id = app.active_session;
        let request = app.controller.send_message(id, "hi").unwrap();
        app.controller
            .apply_event(CompletionEvent {
                session_id: id,
                stream_id: request.stream_id,
                outcome: CompletionOutcome::Success("hey".into()),
            })
            .unwrap();

        app.focus = Focus::Transcript;
        app.selected_message = Some(1);
        handle_key(&mut app, &service, "default", key(KeyCode::Backspace));

        assert_eq!(app.controller.store.get(id).unwrap().messages.len(), 2);
        assert!(matches!(app.notice, Some((crate::ui::NoticeKind::Info, _))));
    }

    #[tokio::test]
    async fn rename_flow_sets_and_clears_the_name() {
        let (mut app, service) = test_app();
        let id = app.active_session;

        app.focus = Focus::Sessions;
        handle_key(&mut app, &service, "default", key(KeyCode::Char('r')));
        assert_eq!(app.renaming, Some(id));
        assert_eq!(app.focus, Focus::Input);

        for c in "errands".chars() {
            handle_key(&mut app, &service, "default", key(KeyCode::Char(c)));
        }
        handle_key(&mut app, &service, "default", key(KeyCode::Enter));
        assert_eq!(
            app.controller.store.get(id).unwrap().name.as_deref(),
            Some("errands")
        );
        assert!(app.input.is_empty());

        // Renaming again pre-fills the current name; submitting it blank
        // drops the name.
        app.focus = Focus::Sessions;
        handle_key(&mut app, &service, "default", key(KeyCode::Char('r')));
        assert_eq!(app.input, "errands");
        app.set_input("");
        handle_key(&mut app, &service, "default", key(KeyCode::Enter));
        assert_eq!(app.controller.store.get(id).unwrap().name, None);
    }

    #[tokio::test]
    async fn esc_abandons_a_rename() {
        let (mut app, service) = test_app();
        let id = app.active_session;

        app.focus = Focus::Sessions;
        handle_key(&mut app, &service, "default", key(KeyCode::Char('r')));
        handle_key(&mut app, &service, "default", key(KeyCode::Char('x')));
        handle_key(&mut app, &service, "default", key(KeyCode::Esc));

        assert_eq!(app.renaming, None);
        assert!(app.input.is_empty());
        assert_eq!(app.controller.store.get(id).unwrap().name, None);
    }

    #[tokio::test]
    async fn profile_changes_survive_a_reload() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("sessions.json");

        let mut registry = ProfileRegistry::default();
        registry.upsert(Profile::new("fast", "gpt-4o-mini"));
        let mut controller = ChatController::new(SessionStore::new(), registry);
        let id = controller.create_session(Some("default")).unwrap();
        let mut app = App::new(controller, id, TranscriptLog::new(None).unwrap(), path.clone());
        let (service, _rx) = CompletionService::new(crate::core::providers::ProviderSession {
            api_key: "test".into(),
            base_url: "http://localhost/v1".into(),
        });

        handle_key(&mut app, &service, "default", ctrl('p'));

        let reloaded = load_store(&path).unwrap();
        assert_eq!(reloaded.get(id).unwrap().profile, "fast");
    }

    #[tokio::test]
    async fn esc_cancels_an_edit_in_progress() {
        let (mut app, service) = test_app();
        let id = app.active_session;
        app.controller.send_message(id, "hi").unwrap();
        app.controller.cancel_in_flight(id);

        app.focus = Focus::Transcript;
        app.selected_message = Some(0);
        handle_key(&mut app, &service, "default", key(KeyCode::Char('e')));
        assert_eq!(app.editing, Some(0));

        handle_key(&mut app, &service, "default", key(KeyCode::Esc));
        assert_eq!(app.editing, None);
        assert!(app.input.is_empty());
        assert_eq!(app.focus, Focus::Input);
    }
}
