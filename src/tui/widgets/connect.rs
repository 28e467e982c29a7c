//! Connect dialog.

use ratatui::Frame;
use ratatui::layout::{Alignment, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Clear, Paragraph};

use super::popup_area;
use crate::tui::state::{CONNECT_FIELDS, ConnectForm};

/// Renders the connect dialog with the focused field highlighted.
pub fn render_connect(frame: &mut Frame, area: Rect, form: &ConnectForm) {
    let popup = popup_area(area, 50, 44, 70, 13);
    frame.render_widget(Clear, popup);

    let block = Block::default()
        .title(" Connect to PostgreSQL ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));
    let inner = block.inner(popup);
    frame.render_widget(block, popup);

    let mut lines = Vec::with_capacity(CONNECT_FIELDS.len() + 5);
    for (i, label) in CONNECT_FIELDS.iter().enumerate() {
        let focused = i == form.focus;
        let value_style = if focused {
            Style::default()
                .fg(Color::White)
                .add_modifier(Modifier::BOLD | Modifier::UNDERLINED)
        } else {
            Style::default().fg(Color::White)
        };
        let cursor = if focused { "█" } else { "" };
        lines.push(Line::from(vec![
            Span::styled(format!("{:>10}: ", label), Style::default().fg(Color::Yellow)),
            Span::styled(format!("{}{}", form.display_value(i), cursor), value_style),
        ]));
    }

    if let Some(err) = &form.error {
        lines.push(Line::from(""));
        lines.push(Line::from(Span::styled(
            format!("Error: {err}"),
            Style::default().fg(Color::Red),
        )));
    }

    lines.push(Line::from(""));
    lines.push(Line::from(vec![
        Span::styled("Tab", Style::default().fg(Color::Yellow)),
        Span::styled(" → next field", Style::default().fg(Color::DarkGray)),
        Span::styled("   Enter", Style::default().fg(Color::Yellow)),
        Span::styled(" → connect", Style::default().fg(Color::DarkGray)),
        Span::styled("   Esc", Style::default().fg(Color::Yellow)),
        Span::styled(" → cancel", Style::default().fg(Color::DarkGray)),
    ]));

    let paragraph = Paragraph::new(lines).alignment(Alignment::Left);
    frame.render_widget(paragraph, inner);
}
