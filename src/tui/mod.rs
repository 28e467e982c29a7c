//! Terminal user interface for watching PostgreSQL activity.
//!
//! The UI runs on the main thread and drives an
//! [`ActivityController`](crate::controller::ActivityController): keys become
//! controller actions, and every loop turn pumps completed background work.

mod app;
mod event;
mod input;
mod render;
mod state;
mod style;
mod widgets;

pub use app::App;
pub use event::{Event, EventHandler};
