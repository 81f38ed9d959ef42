// SPDX-License-Identifier: MPL-2.0

//! Error types for the plugin engine
//!
//! The taxonomy follows the recovery policy of the engine:
//!
//! - [`InitError`] and [`ProcessError`] are recovered locally (the module is
//!   marked `Error`/`Disabled`, the pipeline keeps running)
//! - [`BindError`] is surfaced to the caller of `bind_camera` with the
//!   provider's cause attached
//! - [`ResourceExhaustion`] is a signal for load shedding, never a hard failure

use crate::backends::camera::ProviderError;
use crate::backends::recognition::RecognitionError;
use crate::config::ConfigError;
use crate::settings::SettingsError;
use std::time::Duration;
use thiserror::Error;

/// Result type alias using EngineError
pub type EngineResult<T> = Result<T, EngineError>;

/// Module setup failure
#[derive(Debug, Clone, Error)]
pub enum InitError {
    /// A capability the module needs is not provided by the context
    #[error("missing capability: {0}")]
    MissingCapability(String),
    /// An overlay's mount point does not exist in the view host
    #[error("overlay '{module}' requires mount point '{mount_point}' which does not exist")]
    MissingMountPoint { module: String, mount_point: String },
    /// Module-specific setup failure
    #[error("initialization failed: {0}")]
    Failed(String),
}

/// Camera provider refused a configuration
#[derive(Debug, Clone, Error)]
pub enum BindError {
    /// `bind_camera` called before `initialize`
    #[error("engine is not initialized")]
    NotInitialized,
    /// Engine has been cleaned up
    #[error("engine has been shut down")]
    ShutDown,
    /// Requested camera index is not enumerated by the provider
    #[error("camera index {index} is not available ({available} cameras enumerated)")]
    InvalidCameraIndex { index: usize, available: usize },
    /// The provider rejected the bind or the stream start
    #[error("camera {index} could not be bound")]
    Provider {
        index: usize,
        #[source]
        source: ProviderError,
    },
    /// Both the requested camera and the fallback camera failed
    #[error(
        "camera {requested} failed and fallback camera {fallback} also failed: {fallback_error}"
    )]
    FallbackExhausted {
        requested: usize,
        fallback: usize,
        #[source]
        primary: Box<BindError>,
        fallback_error: Box<BindError>,
    },
}

impl BindError {
    /// Whether this failure is terminal (no automatic retry will happen)
    pub fn is_terminal(&self) -> bool {
        !matches!(self, BindError::NotInitialized)
    }
}

/// A module failed while handling a frame
#[derive(Debug, Clone, Error)]
pub enum ProcessError {
    /// Module reported a failure
    #[error("{0}")]
    Failed(String),
    /// Module exceeded its processing time budget
    #[error("processing exceeded {}ms budget", .budget.as_millis())]
    Timeout { budget: Duration },
    /// Module panicked inside `process`
    #[error("module panicked: {0}")]
    Panicked(String),
    /// External recognition service failed
    #[error("recognition failed: {0}")]
    Recognition(#[from] RecognitionError),
}

/// Memory pressure crossed the monitor's high-water mark
#[derive(Debug, Clone, Error)]
#[error(
    "memory usage {used_bytes}/{limit_bytes} bytes exceeds high-water mark {:.0}%",
    .high_water * 100.0
)]
pub struct ResourceExhaustion {
    pub used_bytes: u64,
    pub limit_bytes: u64,
    pub high_water: f64,
}

/// Module contract errors
#[derive(Debug, Clone, Error)]
pub enum ModuleError {
    /// Caller broke a pairing contract (e.g. mounting a view twice)
    #[error("contract violation in '{module}': {detail}")]
    ContractViolation { module: String, detail: String },
    /// Operation requires a module of a different kind
    #[error("module '{module}' is not an {expected} module")]
    WrongKind {
        module: String,
        expected: &'static str,
    },
    /// Module is not bound to a camera session
    #[error("module '{0}' is not bound")]
    NotBound(String),
    /// Module-specific failure
    #[error("{0}")]
    Failed(String),
}

/// Typed plugin lookup failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LookupError {
    #[error("no module named '{0}'")]
    NotFound(String),
    #[error("module '{name}' is not a {expected}")]
    WrongType { name: String, expected: &'static str },
}

/// Module registration failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegisterError {
    #[error("a module named '{0}' is already registered")]
    DuplicateName(String),
    #[error("engine has been shut down")]
    EngineShutDown,
}

/// Main engine error type
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("camera provider error: {0}")]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Bind(#[from] BindError),
    #[error(transparent)]
    Register(#[from] RegisterError),
    #[error(transparent)]
    Lookup(#[from] LookupError),
    #[error(transparent)]
    Module(#[from] ModuleError),
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// No tokio runtime was available to host dispatch workers
    #[error("no tokio runtime available for dispatch workers")]
    NoRuntime,
    #[error("engine has been shut down")]
    ShutDown,
}
