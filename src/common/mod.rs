//! Common Infrastructure Module
//!
//! This module contains:
//! - Configuration loading from environment variables
//! - Structured logging setup
//! - The root error type

pub mod config;
pub mod error;
pub mod logging;

// Re-exports for convenience
pub use config::{ConfigError, KeySource, ToolboxConfig};
pub use error::{Result, ToolboxError};
pub use logging::{
    generate_correlation_id, init_from_config, init_logging, log_chain_event,
    log_transaction_event, ChainCall, EventCategory, LogEvent, LogLevel, LoggingError,
    TransactionLog,
};
