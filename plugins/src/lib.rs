//! Concrete sources, warehouse stores, notifiers and retry strategies
//! plugged into the batchflow core.

pub mod executor;
pub mod factory;
pub mod notify;
pub mod source;
pub mod warehouse;
