//! Header bar and status line.

use ratatui::Frame;
use ratatui::layout::{Constraint, Layout, Rect};
use ratatui::text::{Line, Span};
use ratatui::widgets::Paragraph;

use crate::controller::{ActivityController, ConnectionState, StatusLevel};
use crate::fmt::format_countdown;
use crate::refresh::RefreshState;
use crate::tui::style::Styles;

/// Renders the header bar: connection title, server version, refresh state.
pub fn render_header(frame: &mut Frame, area: Rect, ctl: &ActivityController) {
    let chunks = Layout::horizontal([
        Constraint::Min(20),    // Connection
        Constraint::Length(18), // Version
        Constraint::Length(24), // Refresh
        Constraint::Length(14), // Sessions
    ])
    .split(area);

    let connection = match ctl.connection() {
        ConnectionState::Disconnected => " pgactivity: not connected".to_string(),
        ConnectionState::Connecting(params) => format!(" pgactivity: connecting to {}", params.label()),
        ConnectionState::Connected { .. } => format!(" pgactivity: {}", ctl.title()),
    };
    frame.render_widget(Paragraph::new(connection).style(Styles::header()), chunks[0]);

    let version = ctl
        .version()
        .map(|v| format!("PostgreSQL {}", v))
        .unwrap_or_default();
    frame.render_widget(Paragraph::new(version).style(Styles::header()), chunks[1]);

    let refresh = match ctl.refresh_state() {
        _ if !ctl.is_connected() => String::new(),
        RefreshState::Fetching => "refreshing...".to_string(),
        RefreshState::WaitingToRetry => match ctl.next_refresh() {
            Some(left) => format!("next refresh {}", format_countdown(left)),
            None => String::new(),
        },
        RefreshState::Idle => "auto-refresh off".to_string(),
    };
    let refresh_style = if ctl.is_connected() && ctl.refresh_state() == RefreshState::Idle {
        Styles::header().patch(Styles::waiting())
    } else {
        Styles::header()
    };
    frame.render_widget(Paragraph::new(refresh).style(refresh_style), chunks[2]);

    let sessions = if ctl.is_connected() {
        format!("{} sessions", ctl.rows().len())
    } else {
        String::new()
    };
    frame.render_widget(Paragraph::new(sessions).style(Styles::header()), chunks[3]);
}

/// Renders the status line with the last message, or key hints.
pub fn render_status(frame: &mut Frame, area: Rect, ctl: &ActivityController) {
    let line = match ctl.status() {
        Some(status) => {
            let style = match status.level {
                StatusLevel::Info => Styles::default(),
                StatusLevel::Error => Styles::critical(),
            };
            let mut spans = vec![Span::styled(format!(" {}", status.message), style)];
            if status.trace.is_some() {
                spans.push(Span::styled("  (e: details)", Styles::help()));
            }
            Line::from(spans)
        }
        None => hints(),
    };
    frame.render_widget(Paragraph::new(line), area);
}

fn hints() -> Line<'static> {
    let keys = [
        ("r", "refresh"),
        ("c", "connect"),
        ("d", "disconnect"),
        ("x", "cancel"),
        ("K", "terminate"),
        ("?", "help"),
        ("q", "quit"),
    ];
    let mut spans = vec![Span::raw(" ")];
    for (key, label) in keys {
        spans.push(Span::styled(key, Styles::help_key()));
        spans.push(Span::styled(format!(" {}  ", label), Styles::help()));
    }
    Line::from(spans)
}
