//! Input handling and keybindings.

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

use crate::activity::ConnectionParams;

use super::state::{AppState, PopupState};

/// Result of handling a key event.
#[derive(Debug, PartialEq, Eq)]
pub enum KeyAction {
    /// No action, continue.
    None,
    /// Quit the application.
    Quit,
    Refresh,
    Connect(ConnectionParams),
    Disconnect,
    /// Cancel the running query of a backend.
    Cancel(i32),
    /// Terminate a backend (already confirmed).
    Terminate(i32),
}

/// What the key handler needs to know about the controller.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyContext {
    pub rows: usize,
    pub selected_pid: Option<i32>,
    pub connected: bool,
    /// Whether the status line has an error trace to show.
    pub has_trace: bool,
}

impl KeyContext {
    fn signal_target(&self) -> Option<i32> {
        if self.connected { self.selected_pid } else { None }
    }
}

/// Handles key input and updates state.
pub fn handle_key(state: &mut AppState, ctx: &KeyContext, key: KeyEvent) -> KeyAction {
    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
        return KeyAction::Quit;
    }
    match &state.popup {
        PopupState::None => handle_normal_mode(state, ctx, key),
        PopupState::Help { .. } | PopupState::Trace { .. } => handle_scroll_popup(state, key),
        PopupState::Connect(_) => handle_connect_form(state, key),
        PopupState::TerminateConfirm { pid } => {
            let pid = *pid;
            handle_terminate_confirm(state, pid, key)
        }
    }
}

fn handle_normal_mode(state: &mut AppState, ctx: &KeyContext, key: KeyEvent) -> KeyAction {
    let page = state.page_size.max(1) as isize;
    match key.code {
        KeyCode::Char('q') => KeyAction::Quit,
        KeyCode::Char('?') => {
            state.popup = PopupState::Help { scroll: 0 };
            KeyAction::None
        }
        KeyCode::Up | KeyCode::Char('k') => {
            state.move_cursor(-1, ctx.rows);
            KeyAction::None
        }
        KeyCode::Down | KeyCode::Char('j') => {
            state.move_cursor(1, ctx.rows);
            KeyAction::None
        }
        KeyCode::PageUp => {
            state.move_cursor(-page, ctx.rows);
            KeyAction::None
        }
        KeyCode::PageDown => {
            state.move_cursor(page, ctx.rows);
            KeyAction::None
        }
        KeyCode::Home | KeyCode::Char('g') => {
            state.move_cursor(isize::MIN / 2, ctx.rows);
            KeyAction::None
        }
        KeyCode::End | KeyCode::Char('G') => {
            state.move_cursor(isize::MAX / 2, ctx.rows);
            KeyAction::None
        }
        KeyCode::Char('r') | KeyCode::F(5) if ctx.connected => KeyAction::Refresh,
        KeyCode::Char('c') => {
            state.open_connect();
            KeyAction::None
        }
        KeyCode::Char('d') if ctx.connected => KeyAction::Disconnect,
        KeyCode::Char('x') => match ctx.signal_target() {
            Some(pid) => KeyAction::Cancel(pid),
            None => KeyAction::None,
        },
        KeyCode::Char('K') => {
            if let Some(pid) = ctx.signal_target() {
                state.popup = PopupState::TerminateConfirm { pid };
            }
            KeyAction::None
        }
        KeyCode::Char('e') if ctx.has_trace => {
            state.popup = PopupState::Trace { scroll: 0 };
            KeyAction::None
        }
        _ => KeyAction::None,
    }
}

fn handle_scroll_popup(state: &mut AppState, key: KeyEvent) -> KeyAction {
    let page = state.page_size.max(1);
    let (PopupState::Help { scroll } | PopupState::Trace { scroll }) = &mut state.popup else {
        return KeyAction::None;
    };
    match key.code {
        KeyCode::Esc | KeyCode::Char('q') | KeyCode::Char('?') | KeyCode::Char('e') => {
            state.popup = PopupState::None;
        }
        KeyCode::Up | KeyCode::Char('k') => *scroll = scroll.saturating_sub(1),
        KeyCode::Down | KeyCode::Char('j') => *scroll = scroll.saturating_add(1),
        KeyCode::PageUp => *scroll = scroll.saturating_sub(page),
        KeyCode::PageDown => *scroll = scroll.saturating_add(page),
        KeyCode::Home => *scroll = 0,
        _ => {}
    }
    KeyAction::None
}

fn handle_connect_form(state: &mut AppState, key: KeyEvent) -> KeyAction {
    let PopupState::Connect(form) = &mut state.popup else {
        return KeyAction::None;
    };
    match key.code {
        KeyCode::Esc => state.popup = PopupState::None,
        KeyCode::Tab | KeyCode::Down => form.next_field(),
        KeyCode::BackTab | KeyCode::Up => form.prev_field(),
        KeyCode::Backspace => form.backspace(),
        KeyCode::Enter => match form.to_params() {
            Ok(params) => {
                state.last_params = params.clone();
                state.popup = PopupState::None;
                return KeyAction::Connect(params);
            }
            Err(e) => form.error = Some(e),
        },
        KeyCode::Char(c) => form.insert(c),
        _ => {}
    }
    KeyAction::None
}

fn handle_terminate_confirm(state: &mut AppState, pid: i32, key: KeyEvent) -> KeyAction {
    match key.code {
        KeyCode::Enter | KeyCode::Char('y') | KeyCode::Char('Y') => {
            state.popup = PopupState::None;
            KeyAction::Terminate(pid)
        }
        KeyCode::Esc | KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Char('q') => {
            state.popup = PopupState::None;
            KeyAction::None
        }
        _ => KeyAction::None,
    }
}
