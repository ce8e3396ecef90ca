pub mod common;
pub mod config;
pub mod diff;
pub mod drain;
pub mod queue;
pub mod status;
