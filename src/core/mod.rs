pub mod config;
pub mod extract;
pub mod fetch;
pub mod orchestrator;
pub mod progress;
pub mod prompt;
pub mod receipt;
pub mod resolver;
