pub mod strategies;

pub use strategies::{ExponentialBackoffPlugin, FixedDelayPlugin, LinearRetryPlugin};
