//! Main rendering logic for TUI.

use ratatui::Frame;
use ratatui::layout::{Constraint, Layout};

use crate::controller::ActivityController;

use super::state::{AppState, PopupState};
use super::widgets::{
    render_activity, render_connect, render_header, render_help, render_query, render_status,
    render_terminate_confirm, render_trace,
};

/// Height of the query pane including borders.
const QUERY_PANE_HEIGHT: u16 = 8;

/// Main render function.
pub fn render(frame: &mut Frame, state: &mut AppState, ctl: &ActivityController) {
    let area = frame.area();

    let chunks = Layout::vertical([
        Constraint::Length(1),                 // Header
        Constraint::Min(5),                    // Activity table
        Constraint::Length(QUERY_PANE_HEIGHT), // Query text
        Constraint::Length(1),                 // Status
    ])
    .split(area);

    render_header(frame, chunks[0], ctl);
    render_activity(frame, chunks[1], state, ctl);
    render_query(frame, chunks[2], ctl);
    render_status(frame, chunks[3], ctl);

    // Popups are rendered last to overlay everything.
    match &mut state.popup {
        PopupState::None => {}
        PopupState::Help { scroll } => render_help(frame, area, scroll),
        PopupState::Connect(form) => render_connect(frame, area, form),
        PopupState::TerminateConfirm { pid } => render_terminate_confirm(frame, area, *pid),
        PopupState::Trace { scroll } => {
            let trace = ctl
                .status()
                .and_then(|s| s.trace.as_deref())
                .unwrap_or("No error details.");
            render_trace(frame, area, trace, scroll);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use ratatui::Terminal;
    use ratatui::backend::TestBackend;

    use super::*;
    use crate::activity::ConnectionParams;
    use crate::activity::mock::{MockConnector, scenarios};

    fn screen_text(terminal: &Terminal<TestBackend>) -> String {
        let buffer = terminal.backend().buffer();
        let mut text = String::new();
        for y in 0..buffer.area.height {
            for x in 0..buffer.area.width {
                text.push_str(buffer[(x, y)].symbol());
            }
            text.push('\n');
        }
        text
    }

    #[test]
    fn renders_disconnected_screen_and_connect_dialog() {
        let ctl = ActivityController::spawn(
            Box::new(MockConnector::new(scenarios::demo_server())),
            Duration::from_secs(10),
            || {},
        )
        .unwrap();
        let mut state = AppState::new(ConnectionParams::default());
        let mut terminal = Terminal::new(TestBackend::new(120, 30)).unwrap();

        terminal.draw(|f| render(f, &mut state, &ctl)).unwrap();
        let text = screen_text(&terminal);
        assert!(text.contains("not connected"));
        assert!(text.contains("Press c to connect"));

        state.open_connect();
        terminal.draw(|f| render(f, &mut state, &ctl)).unwrap();
        assert!(screen_text(&terminal).contains("Connect to PostgreSQL"));
    }

    #[test]
    fn renders_sessions_after_connect() {
        let mut ctl = ActivityController::spawn(
            Box::new(MockConnector::new(scenarios::demo_server())),
            Duration::from_secs(10),
            || {},
        )
        .unwrap();
        ctl.connect(ConnectionParams::default());
        let deadline = Instant::now() + Duration::from_secs(5);
        while ctl.rows().is_empty() && Instant::now() < deadline {
            ctl.pump_wait(Duration::from_millis(20));
        }

        let mut state = AppState::new(ConnectionParams::default());
        state.clamp_cursor(ctl.rows().len());
        let mut terminal = Terminal::new(TestBackend::new(260, 30)).unwrap();
        terminal.draw(|f| render(f, &mut state, &ctl)).unwrap();

        let text = screen_text(&terminal);
        assert!(text.contains("PostgreSQL 16.2"));
        assert!(text.contains("Backend Start"));
        assert!(text.contains("4101"));
        assert!(text.contains("5 sessions"));
    }
}
