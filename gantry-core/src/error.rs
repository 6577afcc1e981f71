//! Error types for Gantry.
//!
//! All errors use `thiserror` for ergonomic error handling and proper error chains.

use crate::security::SecurityViolation;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for Gantry operations.
pub type Result<T> = std::result::Result<T, GantryError>;

/// Main error type for Gantry.
#[derive(Error, Debug)]
pub enum GantryError {
    // Compose validation errors
    #[error("Compose parse error: {reason}")]
    ComposeParse { reason: String },

    #[error("Compose text rejected: contains unsafe marker '{marker}'")]
    UnsafeCompose { marker: String },

    #[error("Undefined variable '{name}' and no default value provided")]
    MissingVariable { name: String },

    #[error(
        "Service '{service}' uses a build directive, which is not supported. \
         Build the image separately and reference it with 'image:'"
    )]
    BuildNotSupported { service: String },

    #[error("Service '{service}' has invalid port mapping '{port}': {reason}")]
    InvalidPort { service: String, port: String, reason: String },

    #[error("Service '{service}' depends on '{dependency}' which is not defined")]
    MissingDependency { service: String, dependency: String },

    #[error("Service '{service}' depends on itself")]
    SelfDependency { service: String },

    #[error("Dependency cycle detected: {path}")]
    DependencyCycle { path: String },

    #[error("Service '{service}' declares both network_mode and networks; they are mutually exclusive")]
    ConflictingNetworkConfig { service: String },

    // Security policy errors
    #[error("Deployment blocked by {} critical security violation(s)", violations.len())]
    SecurityBlocked { violations: Vec<SecurityViolation> },

    // Host backend errors
    #[error("Host operation '{operation}' failed: {reason}")]
    HostOperation { operation: String, reason: String },

    #[error("External network '{network}' does not exist on the host")]
    ExternalNetworkMissing { network: String },

    #[error("External volume '{volume}' does not exist on the host")]
    ExternalVolumeMissing { volume: String },

    // Agent channel errors
    #[error("Agent '{agent_id}' is not connected")]
    AgentUnavailable { agent_id: String },

    #[error("Agent command '{command}' timed out after {seconds}s")]
    AgentTimeout { command: String, seconds: u64 },

    #[error("Agent rejected command '{command}': {reason}")]
    AgentCommand { command: String, reason: String },

    // Executor errors
    #[error("Deployment timed out after {minutes} minutes")]
    DeploymentTimeout { minutes: u64 },

    #[error("Deployment not found: {deployment_id}")]
    DeploymentNotFound { deployment_id: String },

    #[error("Deployment {deployment_id} already has an execution in flight")]
    ExecutionInFlight { deployment_id: String },

    // Stack storage errors
    #[error("Stack not found: {name}")]
    StackNotFound { name: String },

    #[error("Invalid stack name: {name}")]
    InvalidStackName { name: String },

    #[error("Stack path escapes the managed root: {path:?}")]
    UnsafeStackPath { path: PathBuf },

    // Database errors
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Database migration failed: {reason}")]
    MigrationFailed { reason: String },

    // Configuration errors
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    // File system errors
    #[error("I/O error at {path:?}: {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl GantryError {
    /// Create an Internal error from any error type.
    pub fn internal(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Internal(err.to_string())
    }

    /// True for the validation family raised before any host mutation.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            GantryError::ComposeParse { .. }
                | GantryError::UnsafeCompose { .. }
                | GantryError::MissingVariable { .. }
                | GantryError::BuildNotSupported { .. }
                | GantryError::InvalidPort { .. }
                | GantryError::MissingDependency { .. }
                | GantryError::SelfDependency { .. }
                | GantryError::DependencyCycle { .. }
                | GantryError::ConflictingNetworkConfig { .. }
        )
    }
}
