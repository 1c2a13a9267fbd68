// Logging utilities for the hausnet system
//
// This module provides a structured logging layer on top of the `log` facade:
// - Component-based categorization
// - Host ID tracking through logger inheritance
// - Optional request-path tracing for RPC diagnostics

use log::{debug, error, info, warn};

/// Predefined components for logging categorization
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Component {
    Node,
    Registry,
    Executor,
    Inverse,
    Transporter,
    Sessions,
    Security,
    Keys,
    Custom(&'static str),
}

impl Component {
    /// Get the string representation of the component
    pub fn as_str(&self) -> &str {
        match self {
            Component::Node => "Node",
            Component::Registry => "Registry",
            Component::Executor => "Executor",
            Component::Inverse => "Inverse",
            Component::Transporter => "Network",
            Component::Sessions => "Sessions",
            Component::Security => "Security",
            Component::Keys => "Keys",
            Component::Custom(name) => name,
        }
    }
}

/// A helper for creating component-specific loggers with host ID tracking
#[derive(Clone)]
pub struct Logger {
    /// Component this logger is for
    component: Component,
    /// Host ID for distributed tracing
    host_id: String,
    /// Parent component for hierarchical logging (if any)
    parent_component: Option<Component>,
    /// Request path for RPC tracing
    request_path: Option<String>,
}

impl Logger {
    /// Create a new root logger for a specific component and host ID
    /// This should only be called by the Node root component
    pub fn new_root(component: Component, host_id: &str) -> Self {
        Self {
            component,
            host_id: host_id.to_string(),
            parent_component: None,
            request_path: None,
        }
    }

    /// Create a child logger with the same host ID but different component
    /// This is the preferred way to create loggers in subsystems
    pub fn with_component(&self, component: Component) -> Self {
        Self {
            component,
            host_id: self.host_id.clone(),
            parent_component: Some(self.component),
            request_path: self.request_path.clone(),
        }
    }

    /// Create a logger with a request path attached
    /// This is used to track an RPC request through the system
    pub fn with_request_path(&self, path: impl Into<String>) -> Self {
        Self {
            component: self.component,
            host_id: self.host_id.clone(),
            parent_component: self.parent_component,
            request_path: Some(path.into()),
        }
    }

    /// Get a reference to the host ID
    pub fn host_id(&self) -> &str {
        &self.host_id
    }

    /// Get the request path if available
    pub fn request_path(&self) -> Option<&str> {
        self.request_path.as_deref()
    }

    /// Get the full prefix including component and request path
    fn full_prefix(&self) -> String {
        let mut parts = Vec::new();

        match self.parent_component {
            Some(parent) if parent != Component::Node => {
                parts.push(format!("{}.{}", parent.as_str(), self.component.as_str()))
            }
            _ => parts.push(self.component.as_str().to_string()),
        }

        if let Some(path) = &self.request_path {
            parts.push(format!("request={path}"));
        }

        parts.join("|")
    }

    /// Log a debug message
    pub fn debug(&self, message: impl Into<String>) {
        if log::log_enabled!(log::Level::Debug) {
            // Skip displaying the component if it's Node to avoid redundancy
            if self.component == Component::Node && self.parent_component.is_none() {
                debug!("[{}] {}", self.host_id, message.into());
            } else {
                debug!(
                    "[{}][{}] {}",
                    self.host_id,
                    self.full_prefix(),
                    message.into()
                );
            }
        }
    }

    /// Log an info message
    pub fn info(&self, message: impl Into<String>) {
        if log::log_enabled!(log::Level::Info) {
            if self.component == Component::Node && self.parent_component.is_none() {
                info!("[{}] {}", self.host_id, message.into());
            } else {
                info!(
                    "[{}][{}] {}",
                    self.host_id,
                    self.full_prefix(),
                    message.into()
                );
            }
        }
    }

    /// Log a warning message
    pub fn warn(&self, message: impl Into<String>) {
        if log::log_enabled!(log::Level::Warn) {
            if self.component == Component::Node && self.parent_component.is_none() {
                warn!("[{}] {}", self.host_id, message.into());
            } else {
                warn!(
                    "[{}][{}] {}",
                    self.host_id,
                    self.full_prefix(),
                    message.into()
                );
            }
        }
    }

    /// Log an error message
    pub fn error(&self, message: impl Into<String>) {
        if log::log_enabled!(log::Level::Error) {
            if self.component == Component::Node && self.parent_component.is_none() {
                error!("[{}] {}", self.host_id, message.into());
            } else {
                error!(
                    "[{}][{}] {}",
                    self.host_id,
                    self.full_prefix(),
                    message.into()
                );
            }
        }
    }
}

/// Log level configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

/// Logging configuration applied at process start
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Default log level for all components
    pub default_level: LogLevel,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default_level: LogLevel::Info,
        }
    }
}

impl LoggingConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.default_level = level;
        self
    }

    /// Install an `env_logger` backend honoring this configuration.
    /// Safe to call more than once; later calls are no-ops.
    pub fn apply(&self) {
        let _ = env_logger::Builder::from_default_env()
            .filter_level(self.default_level.to_filter())
            .try_init();
    }
}
