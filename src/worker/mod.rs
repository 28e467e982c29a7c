//! Background work execution.
//!
//! Blocking calls (database round-trips) run on a [`WorkLane`] thread.
//! Their outcomes come back as [`WorkFuture`]s that are completed, and whose
//! callbacks run, on the thread that owns the lane.

mod error;
mod future;
mod lane;

pub use error::{WorkError, panic_message};
pub use future::WorkFuture;
pub use lane::{LaneClosed, WorkLane, Worker};
