//! Activity table widget.

use ratatui::Frame;
use ratatui::layout::{Constraint, Rect};
use ratatui::text::Span;
use ratatui::widgets::{Block, Borders, Paragraph, Row, Table};

use crate::activity::{ACTIVITY_HEADER, ActivityRow};
use crate::controller::{ActivityController, ConnectionState};
use crate::fmt::row_cells;
use crate::tui::state::AppState;
use crate::tui::style::Styles;

/// Fixed column widths; the rest share what is left.
const WIDTHS: [u16; ACTIVITY_HEADER.len()] = [7, 16, 12, 25, 16, 16, 11, 25, 20, 25, 12, 14, 25];

/// Renders the activity table. Updates the visible page size in `state`.
pub fn render_activity(frame: &mut Frame, area: Rect, state: &mut AppState, ctl: &ActivityController) {
    let title = format!(" Activity ({}) ", ctl.rows().len());
    let block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .style(Styles::default());

    if ctl.rows().is_empty() {
        let message = match ctl.connection() {
            ConnectionState::Disconnected => "Not connected. Press c to connect.",
            ConnectionState::Connecting(_) => "Connecting...",
            ConnectionState::Connected { .. } => "No sessions",
        };
        frame.render_widget(Paragraph::new(message).style(Styles::dim()).block(block), area);
        return;
    }

    // Borders and header row.
    state.page_size = area.height.saturating_sub(3).max(1) as usize;

    let header = Row::new(
        ACTIVITY_HEADER
            .iter()
            .map(|(_, title)| Span::styled(*title, Styles::table_header())),
    )
    .style(Styles::table_header())
    .height(1);

    let rows: Vec<Row> = ctl
        .rows()
        .iter()
        .map(|row| Row::new(row_cells(row)).style(row_style(row)).height(1))
        .collect();

    let widths = WIDTHS.iter().map(|&w| Constraint::Length(w));
    let table = Table::new(rows, widths)
        .header(header)
        .block(block)
        .row_highlight_style(Styles::selected());

    frame.render_stateful_widget(table, area, &mut state.table);
}

fn row_style(row: &ActivityRow) -> ratatui::style::Style {
    match row.state.as_str() {
        "active" if row.wait_event.is_some() => Styles::waiting(),
        "active" => Styles::active(),
        "idle in transaction" | "idle in transaction (aborted)" => Styles::critical(),
        "idle" | "" => Styles::default(),
        _ => Styles::dim(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn row(state: &str, wait_event: Option<&str>) -> ActivityRow {
        ActivityRow {
            pid: 1,
            application_name: None,
            datname: String::new(),
            backend_start: Utc.timestamp_opt(0, 0).unwrap(),
            client_addr: None,
            client_hostname: None,
            client_port: None,
            query_start: None,
            state: state.to_string(),
            state_change: None,
            usename: String::new(),
            wait_event: wait_event.map(str::to_string),
            xact_start: None,
        }
    }

    #[test]
    fn styles_follow_state() {
        assert_eq!(row_style(&row("active", None)), Styles::active());
        assert_eq!(row_style(&row("active", Some("Lock"))), Styles::waiting());
        assert_eq!(row_style(&row("idle in transaction", None)), Styles::critical());
        assert_eq!(row_style(&row("idle", None)), Styles::default());
        assert_eq!(row_style(&row("fastpath function call", None)), Styles::dim());
    }
}
