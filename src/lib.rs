// Core modules
pub mod api;
pub mod config;
pub mod error;
pub mod execution;
pub mod health;
pub mod indicators;
pub mod models;
pub mod persistence;
pub mod risk;
pub mod strategy;

// Re-export commonly used types
pub use error::{ConfigError, DataUnavailableError, ExecutionError, ValidationError};
pub use models::*;
pub use strategy::{LadderConfig, LadderEngine};

// Error handling
pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;
