//! Query text pane for the selected backend.

use ratatui::Frame;
use ratatui::layout::Rect;
use ratatui::widgets::{Block, Borders, Paragraph, Wrap};

use crate::controller::ActivityController;
use crate::tui::style::Styles;

pub fn render_query(frame: &mut Frame, area: Rect, ctl: &ActivityController) {
    let title = match ctl.selected_row() {
        Some(row) => format!(" Query: pid {} ({}) ", row.pid, row.state),
        None => " Query ".to_string(),
    };
    let block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .style(Styles::default());

    let paragraph = match ctl.query_text() {
        Some(text) => Paragraph::new(text.to_string()).style(Styles::default()),
        None if ctl.selected_row().is_some() => {
            Paragraph::new("(no running query)").style(Styles::dim())
        }
        None => Paragraph::new(""),
    };
    frame.render_widget(paragraph.wrap(Wrap { trim: false }).block(block), area);
}
