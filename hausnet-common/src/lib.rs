//! Hausnet Common
//!
//! Common traits and utilities for the hausnet home-automation stack.
//!
//! This crate provides:
//! - Component-based structured logging with host ID context
//! - The validated `HostId` participant identifier and its canonical pair type

// Export modules
pub mod logging;
pub mod types;

// Re-export traits and types at the root level
pub use logging::{Component, LogLevel, Logger, LoggingConfig};
pub use types::{HostId, HostIdError, HostIdPair};
