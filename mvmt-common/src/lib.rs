//! # Movement Common Library
//!
//! Shared code for the movement ingest tools:
//! - Error types shared by every crate
//! - Configuration loading (environment, TOML, defaults)
//! - Tracing initialisation

pub mod config;
pub mod error;
pub mod logging;

pub use config::IngestConfig;
pub use error::{Error, Result};
