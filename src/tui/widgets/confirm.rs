//! Terminate confirmation popup.

use ratatui::Frame;
use ratatui::layout::{Alignment, Rect};
use ratatui::style::{Color, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Clear, Paragraph};

use super::popup_area;

/// Renders a centered confirmation for terminating backend `pid`.
pub fn render_terminate_confirm(frame: &mut Frame, area: Rect, pid: i32) {
    let popup = popup_area(area, 50, 40, 60, 8);
    frame.render_widget(Clear, popup);

    let block = Block::default()
        .title(" Terminate backend ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Red));
    let inner = block.inner(popup);
    frame.render_widget(block, popup);

    let content = vec![
        Line::from(Span::styled(
            format!("Terminate backend process {pid}?"),
            Style::default().fg(Color::White),
        )),
        Line::from(Span::styled(
            "The client session will be disconnected.",
            Style::default().fg(Color::DarkGray),
        )),
        Line::from(""),
        Line::from(vec![
            Span::styled("y", Style::default().fg(Color::Yellow)),
            Span::styled(" or ", Style::default().fg(Color::DarkGray)),
            Span::styled("Enter", Style::default().fg(Color::Yellow)),
            Span::styled(" → terminate", Style::default().fg(Color::DarkGray)),
        ]),
        Line::from(vec![
            Span::styled("Esc", Style::default().fg(Color::Yellow)),
            Span::styled(" or ", Style::default().fg(Color::DarkGray)),
            Span::styled("n", Style::default().fg(Color::Yellow)),
            Span::styled(" → cancel", Style::default().fg(Color::DarkGray)),
        ]),
    ];

    let paragraph = Paragraph::new(content)
        .alignment(Alignment::Center)
        .style(Style::default().fg(Color::White));
    frame.render_widget(paragraph, inner);
}
