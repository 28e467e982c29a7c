//! TUI widgets.

mod activity;
mod confirm;
mod connect;
mod header;
mod help;
mod query;
mod trace;

pub use activity::render_activity;
pub use confirm::render_terminate_confirm;
pub use connect::render_connect;
pub use header::{render_header, render_status};
pub use help::render_help;
pub use query::render_query;
pub use trace::render_trace;

use ratatui::layout::Rect;

/// Centered popup rectangle: `percent` of the width clamped to
/// `min_w..=max_w`, and `height` rows clamped to the area.
pub(crate) fn popup_area(area: Rect, percent: u16, min_w: u16, max_w: u16, height: u16) -> Rect {
    let width = (area.width * percent / 100).clamp(min_w, max_w).min(area.width);
    let height = height.min(area.height);
    let x = area.x + (area.width.saturating_sub(width)) / 2;
    let y = area.y + (area.height.saturating_sub(height)) / 2;
    Rect::new(x, y, width, height)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn popup_is_centered_and_clamped() {
        let area = Rect::new(0, 0, 100, 40);
        let popup = popup_area(area, 50, 40, 60, 9);
        assert_eq!(popup, Rect::new(25, 15, 50, 9));

        let small = Rect::new(0, 0, 30, 5);
        let popup = popup_area(small, 50, 40, 60, 9);
        assert_eq!(popup, Rect::new(0, 0, 30, 5));
    }
}
