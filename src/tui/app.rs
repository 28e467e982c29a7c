//! Main TUI application.

use std::io;

use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use ratatui::Terminal;
use ratatui::backend::{Backend, CrosstermBackend};
use tracing::{debug, info};

use crate::activity::ConnectionParams;
use crate::controller::ActivityController;

use super::event::{Event, EventHandler};
use super::input::{KeyAction, KeyContext, handle_key};
use super::render::render;
use super::state::AppState;

/// Main TUI application.
pub struct App {
    controller: ActivityController,
    events: EventHandler,
    state: AppState,
    connect_on_start: bool,
    should_quit: bool,
}

impl App {
    /// Creates the app. With `connect_on_start` the app connects with
    /// `params` right away, otherwise it opens the connect dialog prefilled
    /// with them.
    pub fn new(
        controller: ActivityController,
        events: EventHandler,
        params: ConnectionParams,
        connect_on_start: bool,
    ) -> Self {
        Self {
            controller,
            events,
            state: AppState::new(params),
            connect_on_start,
            should_quit: false,
        }
    }

    /// Runs the TUI application until the user quits, then closes the
    /// connection and stops the background lane.
    pub fn run(mut self) -> io::Result<()> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;

        let result = self.event_loop(&mut terminal);

        // Restore the terminal even if the loop failed.
        disable_raw_mode()?;
        execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
        terminal.show_cursor()?;

        info!("shutting down");
        self.controller.shutdown();
        result
    }

    fn event_loop<B: Backend>(&mut self, terminal: &mut Terminal<B>) -> io::Result<()> {
        if self.connect_on_start {
            self.controller.connect(self.state.last_params.clone());
        } else {
            self.state.open_connect();
        }

        while !self.should_quit {
            terminal.draw(|frame| render(frame, &mut self.state, &self.controller))?;

            match self.events.next() {
                Ok(Event::Key(key)) => {
                    let ctx = self.key_context();
                    let action = handle_key(&mut self.state, &ctx, key);
                    self.apply(action);
                    self.select_cursor_row();
                }
                Ok(Event::Tick) | Ok(Event::Wake) | Ok(Event::Resize(..)) => {}
                Err(_) => self.should_quit = true,
            }

            if self.controller.pump() {
                self.follow_selection();
            }
        }
        Ok(())
    }

    fn key_context(&self) -> KeyContext {
        KeyContext {
            rows: self.controller.rows().len(),
            selected_pid: self.controller.selected(),
            connected: self.controller.is_connected(),
            has_trace: self
                .controller
                .status()
                .is_some_and(|s| s.trace.is_some()),
        }
    }

    fn apply(&mut self, action: KeyAction) {
        match action {
            KeyAction::None => {}
            KeyAction::Quit => self.should_quit = true,
            KeyAction::Refresh => {
                if !self.controller.refresh() {
                    debug!("refresh ignored");
                }
            }
            KeyAction::Connect(params) => {
                self.state.table.select(None);
                self.controller.connect(params);
            }
            KeyAction::Disconnect => self.controller.disconnect(),
            KeyAction::Cancel(pid) => {
                self.controller.select(Some(pid));
                self.controller.cancel_selected();
            }
            KeyAction::Terminate(pid) => {
                self.controller.select(Some(pid));
                self.controller.terminate_selected();
            }
        }
    }

    /// Makes the row under the cursor the controller's selection.
    fn select_cursor_row(&mut self) {
        let rows = self.controller.rows();
        self.state.clamp_cursor(rows.len());
        let pid = self
            .state
            .cursor()
            .and_then(|i| rows.get(i))
            .map(|r| r.pid);
        self.controller.select(pid);
    }

    /// Moves the cursor to the selected backend after the snapshot changed.
    fn follow_selection(&mut self) {
        let position = self
            .controller
            .selected()
            .and_then(|pid| self.controller.rows().iter().position(|r| r.pid == pid));
        match position {
            Some(i) => self.state.table.select(Some(i)),
            None => self.select_cursor_row(),
        }
    }
}
