// SPDX-License-Identifier: MPL-2.0

//! Plugin framework
//!
//! Feature modules (scanners, analyzers, overlays, lens controls) plug into
//! the camera pipeline through the traits in this module. The [`Registry`]
//! owns every module and drives its lifecycle; the [`Dispatcher`] feeds
//! frames to processing modules through a bounded worker pool.
//!
//! # Lifecycle
//!
//! ```text
//!  Uninitialized ──► Initializing ──► Ready ◄──► Processing
//!        ▲                 │            │            │
//!        │                 ▼            ▼            ▼
//!        └──────────── Error ◄──────────────────── Error
//!                          │
//!                          ▼
//!                      Disabled (until re-registered)
//! ```

pub mod context;
pub mod dispatcher;
pub mod lifecycle;
pub mod registry;
pub mod tasks;
pub mod types;

pub use context::{MountPoint, SharedContext, StaticViewHost, ViewHost, ViewId};
pub use dispatcher::{DispatchStats, Dispatcher, DropReason, SubmitOutcome};
pub use lifecycle::ModuleState;
pub use registry::Registry;
pub use types::{
    Detection, DispatchReport, FrameRegion, ModuleReport, Payload, ProcessingResult,
    SequenceGate, TaggedResult,
};

use crate::backends::camera::{CameraCapability, CameraConfig, CameraControls, Frame};
use crate::errors::{InitError, ModuleError};
use futures::future::BoxFuture;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Default priority for modules that do not care about ordering
pub const DEFAULT_PRIORITY: i32 = 100;

/// Camera use cases a module needs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Requirements {
    pub preview: bool,
    pub analysis: bool,
    pub video: bool,
    pub capture: bool,
}

impl Requirements {
    pub fn analysis() -> Self {
        Self {
            analysis: true,
            ..Self::default()
        }
    }

    pub fn preview() -> Self {
        Self {
            preview: true,
            ..Self::default()
        }
    }

    pub fn union(self, other: Self) -> Self {
        Self {
            preview: self.preview || other.preview,
            analysis: self.analysis || other.analysis,
            video: self.video || other.video,
            capture: self.capture || other.capture,
        }
    }

    /// Whether `config` enables everything required
    pub fn satisfied_by(&self, config: &CameraConfig) -> bool {
        (!self.preview || config.preview_enabled())
            && (!self.analysis || config.analysis_enabled())
            && (!self.video || config.video_enabled())
            && (!self.capture || config.capture_enabled())
    }
}

/// Base contract shared by every module
pub trait Module: Send + Sync + 'static {
    /// Unique name within an engine
    fn name(&self) -> &str;

    fn version(&self) -> &str {
        "0.0.0"
    }

    /// Lower runs earlier
    fn priority(&self) -> i32 {
        DEFAULT_PRIORITY
    }

    fn requirements(&self) -> Requirements {
        Requirements::default()
    }

    /// Non-critical modules are skipped while the engine sheds load
    fn is_critical(&self) -> bool {
        true
    }

    /// One-time setup for a camera session
    fn initialize(&self, context: &SharedContext) -> Result<(), InitError>;

    /// Called once per successful bind, after `initialize`
    fn on_camera_ready(&self, _camera: &CameraCapability) {}

    /// Release everything acquired since `initialize`
    ///
    /// Must be idempotent. The registry calls it exactly once per session,
    /// including when `initialize` failed partway.
    fn cleanup(&self);
}

/// Module that analyzes frames
pub trait ProcessingModule: Module {
    /// Analyze one frame
    ///
    /// Any asynchronous work (recognition services, blocking decode) must be
    /// awaited inside the returned future.
    fn process<'a>(&'a self, frame: &'a Frame) -> BoxFuture<'a, ProcessingResult>;

    /// Per-call time limit, overriding the engine default
    fn timeout(&self) -> Option<Duration> {
        None
    }
}

/// Module that owns a UI surface
pub trait OverlayModule: Module {
    /// Mount point id this overlay attaches to
    fn mount_point(&self) -> &str;

    /// Create the view. Calling this twice without `unmount_view` is a
    /// contract violation.
    fn mount_view(&self, point: &MountPoint) -> Result<ViewId, ModuleError>;

    fn unmount_view(&self, view: ViewId) -> Result<(), ModuleError>;

    /// Successful processing result from any processing module
    fn on_result(&self, _result: &TaggedResult) {}
}

/// Module that adjusts camera parameters
pub trait ControlModule: Module {
    /// Called after `on_camera_ready` with the session's control queue
    fn attach_controls(&self, controls: CameraControls);

    /// Called when the session ends, before `cleanup`
    fn detach_controls(&self) {}
}

/// Module category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleKind {
    Processing,
    Overlay,
    Control,
}

impl ModuleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleKind::Processing => "processing",
            ModuleKind::Overlay => "overlay",
            ModuleKind::Control => "control",
        }
    }
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone)]
enum Role {
    Processing(Arc<dyn ProcessingModule>),
    Overlay(Arc<dyn OverlayModule>),
    Control(Arc<dyn ControlModule>),
}

/// A module ready for registration
///
/// Keeps the concrete type around so [`Registry::lookup`] can hand back a
/// typed `Arc<M>`.
#[derive(Clone)]
pub struct Plugin {
    role: Role,
    base: Arc<dyn Module>,
    any: Arc<dyn Any + Send + Sync>,
}

impl Plugin {
    pub fn processing<M: ProcessingModule>(module: Arc<M>) -> Self {
        Self {
            role: Role::Processing(module.clone()),
            base: module.clone(),
            any: module,
        }
    }

    pub fn overlay<M: OverlayModule>(module: Arc<M>) -> Self {
        Self {
            role: Role::Overlay(module.clone()),
            base: module.clone(),
            any: module,
        }
    }

    pub fn control<M: ControlModule>(module: Arc<M>) -> Self {
        Self {
            role: Role::Control(module.clone()),
            base: module.clone(),
            any: module,
        }
    }

    pub fn kind(&self) -> ModuleKind {
        match self.role {
            Role::Processing(_) => ModuleKind::Processing,
            Role::Overlay(_) => ModuleKind::Overlay,
            Role::Control(_) => ModuleKind::Control,
        }
    }

    pub fn module(&self) -> &Arc<dyn Module> {
        &self.base
    }

    pub fn name(&self) -> &str {
        self.base.name()
    }

    /// Effective requirements (processing modules always need analysis)
    pub fn requirements(&self) -> Requirements {
        match self.role {
            Role::Processing(_) => self.base.requirements().union(Requirements::analysis()),
            _ => self.base.requirements(),
        }
    }

    pub fn as_processing(&self) -> Option<&Arc<dyn ProcessingModule>> {
        match &self.role {
            Role::Processing(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_overlay(&self) -> Option<&Arc<dyn OverlayModule>> {
        match &self.role {
            Role::Overlay(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_control(&self) -> Option<&Arc<dyn ControlModule>> {
        match &self.role {
            Role::Control(m) => Some(m),
            _ => None,
        }
    }

    pub(crate) fn as_any(&self) -> Arc<dyn Any + Send + Sync> {
        Arc::clone(&self.any)
    }
}

impl fmt::Debug for Plugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plugin")
            .field("name", &self.base.name())
            .field("kind", &self.kind())
            .field("version", &self.base.version())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requirements_against_config() {
        let config = CameraConfig::new(0).with_analysis(false);
        assert!(!Requirements::analysis().satisfied_by(&config));
        assert!(Requirements::preview().satisfied_by(&config));
        assert!(Requirements::default().satisfied_by(&config));

        let video = Requirements {
            video: true,
            ..Requirements::default()
        };
        assert!(!video.satisfied_by(&CameraConfig::new(0)));
        assert!(video.satisfied_by(&CameraConfig::new(0).with_video(true)));
    }
}
