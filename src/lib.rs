//! pgactivity - PostgreSQL activity viewer library.
//!
//! Layers, from the database up:
//! - [`activity`]: version-aware access to `pg_stat_activity` and backend signals
//! - [`worker`]: a single background lane for blocking calls, with futures
//!   completed on the foreground thread
//! - [`refresh`]: the periodic refresh scheduler
//! - [`controller`]: connection lifecycle, selection and status for a front end
//! - [`tui`]: the terminal front end

pub mod activity;
pub mod controller;
pub mod fmt;
pub mod refresh;
pub mod tui;
pub mod worker;
