//! Application configuration.
//!
//! This module provides:
//! - Default values for every recognized option (`constants`)
//! - The environment-driven `Settings` struct and CLI enums (`types`)

mod constants;
mod types;

pub use constants::*;
pub use types::{LogFormat, LogLevel, PublisherBackend, Settings};
