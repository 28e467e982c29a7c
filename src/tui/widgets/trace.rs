//! Error details popup.

use ratatui::Frame;
use ratatui::layout::Rect;
use ratatui::style::{Color, Style};
use ratatui::widgets::{Block, Borders, Clear, Paragraph};

use super::popup_area;

/// Renders the diagnostic trace of the last error, scrollable.
pub fn render_trace(frame: &mut Frame, area: Rect, trace: &str, scroll: &mut usize) {
    let popup = popup_area(area, 80, 50, 140, area.height.saturating_sub(4).max(8));
    frame.render_widget(Clear, popup);

    let block = Block::default()
        .title(" Error details (Esc to close) ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Red));

    let visible = popup.height.saturating_sub(2) as usize;
    let max_scroll = trace.lines().count().saturating_sub(visible);
    if *scroll > max_scroll {
        *scroll = max_scroll;
    }

    let paragraph = Paragraph::new(trace.to_string())
        .block(block)
        .scroll((*scroll as u16, 0))
        .style(Style::default().fg(Color::White));
    frame.render_widget(paragraph, popup);
}
