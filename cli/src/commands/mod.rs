pub mod cli;
pub mod run;
pub mod schedule;
pub mod validate;
