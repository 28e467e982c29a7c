//! Display formatting for activity values.

use std::time::Duration;

use chrono::{DateTime, Local, Utc};

use crate::activity::{ACTIVITY_HEADER, ActivityRow};

/// Timestamp layout used in tables.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S %z";

/// Formats a timestamp in local time.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.with_timezone(&Local).format(TIMESTAMP_FORMAT).to_string()
}

/// Formats an optional timestamp; absent values render empty.
pub fn format_optional_timestamp(ts: Option<&DateTime<Utc>>) -> String {
    ts.map(format_timestamp).unwrap_or_default()
}

/// Short countdown text: `7s`, `1m05s`.
pub fn format_countdown(d: Duration) -> String {
    let secs = d.as_secs() + u64::from(d.subsec_nanos() > 0);
    if secs >= 60 {
        format!("{}m{:02}s", secs / 60, secs % 60)
    } else {
        format!("{}s", secs)
    }
}

/// Collapses all whitespace runs (newlines, tabs) into single spaces.
pub fn single_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Table cell texts for one row, in [`ACTIVITY_HEADER`] order.
pub fn row_cells(row: &ActivityRow) -> [String; ACTIVITY_HEADER.len()] {
    [
        row.pid.to_string(),
        row.application_name.clone().unwrap_or_default(),
        row.datname.clone(),
        format_timestamp(&row.backend_start),
        row.client_addr.clone().unwrap_or_default(),
        row.client_hostname.clone().unwrap_or_default(),
        row.client_port.map(|p| p.to_string()).unwrap_or_default(),
        format_optional_timestamp(row.query_start.as_ref()),
        row.state.clone(),
        format_optional_timestamp(row.state_change.as_ref()),
        row.usename.clone(),
        row.wait_event.clone().unwrap_or_default(),
        format_optional_timestamp(row.xact_start.as_ref()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_row() -> ActivityRow {
        let start = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        ActivityRow {
            pid: 4242,
            application_name: Some("psql".to_string()),
            datname: "postgres".to_string(),
            backend_start: start,
            client_addr: Some("10.0.0.1/32".to_string()),
            client_hostname: None,
            client_port: Some(51234),
            query_start: Some(start),
            state: "active".to_string(),
            state_change: None,
            usename: "alice".to_string(),
            wait_event: Some("Lock".to_string()),
            xact_start: None,
        }
    }

    #[test]
    fn timestamp_round_trips_through_layout() {
        let ts = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let text = format_timestamp(&ts);
        let parsed = DateTime::parse_from_str(&text, TIMESTAMP_FORMAT).unwrap();
        assert_eq!(parsed.with_timezone(&Utc), ts);
    }

    #[test]
    fn absent_values_render_empty() {
        assert_eq!(format_optional_timestamp(None), "");
        let cells = row_cells(&sample_row());
        assert_eq!(cells[0], "4242");
        assert_eq!(cells[5], "");
        assert_eq!(cells[6], "51234");
        assert_eq!(cells[9], "");
        assert_eq!(cells[11], "Lock");
        assert_eq!(cells[12], "");
    }

    #[test]
    fn countdown_rounds_up() {
        assert_eq!(format_countdown(Duration::from_millis(6_100)), "7s");
        assert_eq!(format_countdown(Duration::from_secs(65)), "1m05s");
        assert_eq!(format_countdown(Duration::ZERO), "0s");
    }

    #[test]
    fn single_line_collapses_whitespace() {
        assert_eq!(
            single_line("SELECT a,\n\tb\n  FROM t"),
            "SELECT a, b FROM t"
        );
    }
}
