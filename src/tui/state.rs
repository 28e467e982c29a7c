//! TUI view state: cursor, popups and the connect form.

use ratatui::widgets::TableState;

use crate::activity::ConnectionParams;

/// Fields of the connect dialog, in tab order.
pub const CONNECT_FIELDS: [&str; 5] = ["Host", "Port", "Database", "User", "Password"];
const PASSWORD_FIELD: usize = 4;

/// Editable connection form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectForm {
    pub values: [String; 5],
    pub focus: usize,
    pub error: Option<String>,
}

impl ConnectForm {
    pub fn from_params(params: &ConnectionParams) -> Self {
        Self {
            values: [
                params.host.clone(),
                params.port.to_string(),
                params.database.clone(),
                params.user.clone(),
                params.password.clone(),
            ],
            focus: 0,
            error: None,
        }
    }

    /// Builds connection parameters. Fails on an empty host, user or
    /// database, or an invalid port.
    pub fn to_params(&self) -> Result<ConnectionParams, String> {
        let [host, port, database, user, password] = &self.values;
        let port: u16 = port
            .trim()
            .parse()
            .map_err(|_| format!("invalid port '{}'", port.trim()))?;
        for (name, value) in [("host", host), ("database", database), ("user", user)] {
            if value.trim().is_empty() {
                return Err(format!("{} is required", name));
            }
        }
        Ok(ConnectionParams {
            host: host.trim().to_string(),
            port,
            database: database.trim().to_string(),
            user: user.trim().to_string(),
            password: password.clone(),
        })
    }

    pub fn next_field(&mut self) {
        self.focus = (self.focus + 1) % CONNECT_FIELDS.len();
    }

    pub fn prev_field(&mut self) {
        self.focus = (self.focus + CONNECT_FIELDS.len() - 1) % CONNECT_FIELDS.len();
    }

    pub fn insert(&mut self, c: char) {
        self.values[self.focus].push(c);
        self.error = None;
    }

    pub fn backspace(&mut self) {
        self.values[self.focus].pop();
        self.error = None;
    }

    /// Field text as shown; the password is masked.
    pub fn display_value(&self, field: usize) -> String {
        if field == PASSWORD_FIELD {
            "*".repeat(self.values[field].chars().count())
        } else {
            self.values[field].clone()
        }
    }
}

/// Popup overlay.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PopupState {
    #[default]
    None,
    Help {
        scroll: usize,
    },
    Connect(ConnectForm),
    TerminateConfirm {
        pid: i32,
    },
    /// Diagnostic trace of the last error.
    Trace {
        scroll: usize,
    },
}

/// Main TUI state.
pub struct AppState {
    pub table: TableState,
    pub popup: PopupState,
    /// Parameters of the last connect attempt, used to prefill the dialog.
    pub last_params: ConnectionParams,
    /// Visible height of the activity table body, for paging.
    pub page_size: usize,
}

impl AppState {
    pub fn new(last_params: ConnectionParams) -> Self {
        Self {
            table: TableState::default(),
            popup: PopupState::None,
            last_params,
            page_size: 10,
        }
    }

    pub fn cursor(&self) -> Option<usize> {
        self.table.selected()
    }

    /// Keeps the cursor inside `0..len`, placing it on the first row when
    /// there was none.
    pub fn clamp_cursor(&mut self, len: usize) {
        let cursor = match (len, self.table.selected()) {
            (0, _) => None,
            (_, None) => Some(0),
            (len, Some(i)) => Some(i.min(len - 1)),
        };
        self.table.select(cursor);
    }

    pub fn move_cursor(&mut self, delta: isize, len: usize) {
        if len == 0 {
            self.table.select(None);
            return;
        }
        let current = self.table.selected().unwrap_or(0) as isize;
        let next = (current + delta).clamp(0, len as isize - 1);
        self.table.select(Some(next as usize));
    }

    pub fn open_connect(&mut self) {
        self.popup = PopupState::Connect(ConnectForm::from_params(&self.last_params));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn form_round_trips_params() {
        let params = ConnectionParams {
            host: "db1".to_string(),
            port: 6432,
            database: "app".to_string(),
            user: "ops".to_string(),
            password: "s3cret".to_string(),
        };
        let form = ConnectForm::from_params(&params);
        assert_eq!(form.display_value(4), "******");
        assert_eq!(form.display_value(0), "db1");
        assert_eq!(form.to_params().unwrap(), params);
    }

    #[test]
    fn form_rejects_bad_port_and_empty_host() {
        let mut form = ConnectForm::from_params(&ConnectionParams::default());
        form.values[1] = "54x".to_string();
        assert_eq!(form.to_params().unwrap_err(), "invalid port '54x'");

        form.values[1] = "5432".to_string();
        form.values[0] = "  ".to_string();
        assert_eq!(form.to_params().unwrap_err(), "host is required");
    }

    #[test]
    fn focus_wraps_both_ways() {
        let mut form = ConnectForm::from_params(&ConnectionParams::default());
        form.prev_field();
        assert_eq!(form.focus, 4);
        form.next_field();
        assert_eq!(form.focus, 0);
    }

    #[test]
    fn cursor_is_clamped_to_rows() {
        let mut state = AppState::new(ConnectionParams::default());
        state.clamp_cursor(3);
        assert_eq!(state.cursor(), Some(0));
        state.move_cursor(10, 3);
        assert_eq!(state.cursor(), Some(2));
        state.clamp_cursor(2);
        assert_eq!(state.cursor(), Some(1));
        state.move_cursor(-5, 2);
        assert_eq!(state.cursor(), Some(0));
        state.clamp_cursor(0);
        assert_eq!(state.cursor(), None);
    }
}
