//! Engine environment bootstrap library
//!
//! This library provides the core functionality for the `sdk-setup` CLI: it
//! probes for the Vulkan SDK and its debug libraries and installs whatever
//! is missing after asking the user.

pub mod commands;
pub mod core;
pub mod error;
pub mod utils;
