//! Runtime Core - Foundation for the training iteration runtime
//!
//! Provides core types, error handling, and configuration shared by
//! the iteration controller and its batch sources.

pub mod config;
pub mod error;
pub mod types;

pub use config::{IterationConfig, LoggingConfig, RuntimeConfig, WorkerConfig};
pub use error::{BoxError, Error, Result};
pub use types::*;
