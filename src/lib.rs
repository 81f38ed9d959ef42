// SPDX-License-Identifier: MPL-2.0

//! Camera Plugins - plugin orchestration for a camera pipeline
//!
//! Feature modules (scanners, analyzers, overlays, lens controls) plug into a
//! single engine that owns the camera session. Frames from the camera are
//! dispatched to the processing modules on a bounded worker pool; results are
//! fanned out to overlays.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`engine`]: Engine façade, camera binding and fallback
//! - [`plugins`]: Module traits, registry, lifecycle and frame dispatcher
//! - [`backends`]: Camera provider and recognition service abstractions
//! - [`settings`]: Observable key/value settings with persistence
//! - [`monitor`]: Memory pressure and latency monitoring
//! - [`config`]: Engine configuration
//! - [`logging`]: Structured log events
//!
//! # Example
//!
//! ```ignore
//! let engine = Engine::builder(Arc::new(SimulatedCamera::with_fps(2, 30))).build()?;
//! engine.register_plugin(Plugin::processing(Arc::new(ExposureAnalyzer::new())))?;
//! engine.initialize().await?;
//! engine.bind_camera(CameraConfig::new(0)).await?;
//! ```

pub mod backends;
pub mod config;
pub mod constants;
pub mod engine;
pub mod errors;
pub mod logging;
pub mod monitor;
pub mod plugins;
pub mod settings;

// Re-export commonly used types
pub use backends::camera::{CameraCapability, CameraConfig, CameraProvider, Frame};
pub use config::EngineConfig;
pub use engine::{BindState, Engine, EngineBuilder};
pub use errors::{BindError, EngineError, InitError, ProcessError};
pub use logging::{EventLevel, LogEvent, LogSink};
pub use plugins::{
    ControlModule, Module, ModuleState, OverlayModule, Plugin, ProcessingModule,
    ProcessingResult, Requirements,
};
pub use settings::SettingsStore;
