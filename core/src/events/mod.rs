//! Run lifecycle events.
//!
//! The engine and coordinator publish [`RunEvent`]s on an [`EventBus`];
//! subscribers (the JSONL writer, tests) observe them without blocking the run.

mod bus;
mod types;
mod writer;

pub use crate::config::EventsOutConfig;
pub use bus::EventBus;
pub use types::RunEvent;
pub use writer::{start_events_out, EventsOutTx};
