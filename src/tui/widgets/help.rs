//! Help popup.

use ratatui::Frame;
use ratatui::layout::{Constraint, Layout, Rect};
use ratatui::style::{Color, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Clear, Paragraph, Wrap};

use super::popup_area;
use crate::tui::style::Styles;

const KEYS: &[(&str, &str)] = &[
    ("↑/k ↓/j", "Move selection"),
    ("PgUp/PgDn", "Move by page"),
    ("Home/g End/G", "First / last session"),
    ("r, F5", "Refresh now (restarts automatic refresh)"),
    ("c", "Connect to a server"),
    ("d", "Disconnect"),
    ("x", "Cancel the selected backend's query"),
    ("K", "Terminate the selected backend"),
    ("e", "Show details of the last error"),
    ("?", "Toggle this help"),
    ("q, Ctrl-C", "Quit"),
];

const STATES: &[(&str, &str)] = &[
    ("active", "Running a query (green, yellow when waiting)"),
    ("idle", "Waiting for a client command"),
    ("idle in transaction", "Inside a transaction, not running a query (red)"),
];

/// Renders the help popup centered on screen with scroll support.
pub fn render_help(frame: &mut Frame, area: Rect, scroll: &mut usize) {
    let popup = popup_area(area, 60, 40, 80, (area.height * 80 / 100).clamp(10, 30));
    frame.render_widget(Clear, popup);

    let block = Block::default()
        .title(" Help ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));
    let inner = block.inner(popup);
    frame.render_widget(block, popup);

    let chunks = Layout::vertical([Constraint::Min(1), Constraint::Length(1)]).split(inner);

    let content = help_lines();
    let max_scroll = content.len().saturating_sub(chunks[0].height as usize);
    if *scroll > max_scroll {
        *scroll = max_scroll;
    }

    let paragraph = Paragraph::new(content)
        .wrap(Wrap { trim: false })
        .scroll((*scroll as u16, 0))
        .style(Style::default().fg(Color::White));
    frame.render_widget(paragraph, chunks[0]);

    let footer = Line::from(vec![
        Span::styled("Esc", Style::default().fg(Color::Yellow)),
        Span::styled(" → close", Style::default().fg(Color::DarkGray)),
    ]);
    frame.render_widget(Paragraph::new(footer), chunks[1]);
}

fn help_lines() -> Vec<Line<'static>> {
    let mut lines = vec![Line::from(Span::styled("Keys", Styles::section_header()))];
    for (key, desc) in KEYS {
        lines.push(Line::from(vec![
            Span::styled(format!("  {:<14}", key), Styles::help_key()),
            Span::raw(*desc),
        ]));
    }
    lines.push(Line::from(""));
    lines.push(Line::from(Span::styled("States", Styles::section_header())));
    for (state, desc) in STATES {
        lines.push(Line::from(vec![
            Span::styled(format!("  {:<22}", state), Styles::help_key()),
            Span::raw(*desc),
        ]));
    }
    lines.push(Line::from(""));
    lines.push(Line::from(Span::styled(
        "A failed refresh keeps the last snapshot and stops automatic refresh until r is pressed.",
        Styles::help(),
    )));
    lines
}
