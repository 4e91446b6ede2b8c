#![forbid(unsafe_code)]

pub mod config;
pub mod errors;
pub mod ipc;
pub mod orchestrator;
pub mod pane;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
