pub mod batch;
pub mod config;
pub mod pairing;
pub mod pipeline;
pub mod services;
pub mod session;
pub mod stage_commands;

pub use config::ToolConfig;
pub use session::{run_session, RunSummary, SessionError, SessionOptions};
