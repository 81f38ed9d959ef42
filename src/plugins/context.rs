// SPDX-License-Identifier: MPL-2.0

//! Shared module context
//!
//! Built once per engine and handed to every module's `initialize`. Modules
//! get read-only access to the settings store, the log sink, the view host
//! and the capability of the currently bound camera.

use crate::backends::camera::CameraCapability;
use crate::logging::LogSink;
use crate::settings::SettingsStore;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identifier of a mounted overlay view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ViewId(u64);

impl ViewId {
    /// Allocate a process-unique id
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        ViewId(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

/// A surface an overlay can attach a view to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountPoint {
    pub id: String,
    pub width: u32,
    pub height: u32,
}

/// Host UI that exposes mount points
pub trait ViewHost: Send + Sync {
    fn mount_point(&self, id: &str) -> Option<MountPoint>;
}

/// Fixed set of mount points
#[derive(Debug, Default, Clone)]
pub struct StaticViewHost {
    points: HashMap<String, MountPoint>,
}

impl StaticViewHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mount_point(mut self, id: &str, width: u32, height: u32) -> Self {
        self.points.insert(
            id.to_string(),
            MountPoint {
                id: id.to_string(),
                width,
                height,
            },
        );
        self
    }
}

impl ViewHost for StaticViewHost {
    fn mount_point(&self, id: &str) -> Option<MountPoint> {
        self.points.get(id).cloned()
    }
}

struct ContextInner {
    settings: SettingsStore,
    log: Arc<dyn LogSink>,
    views: Arc<dyn ViewHost>,
    camera: RwLock<Option<CameraCapability>>,
}

/// Context injected into every module
#[derive(Clone)]
pub struct SharedContext {
    inner: Arc<ContextInner>,
}

impl SharedContext {
    pub fn new(settings: SettingsStore, log: Arc<dyn LogSink>, views: Arc<dyn ViewHost>) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                settings,
                log,
                views,
                camera: RwLock::new(None),
            }),
        }
    }

    pub fn settings(&self) -> &SettingsStore {
        &self.inner.settings
    }

    pub fn log(&self) -> &Arc<dyn LogSink> {
        &self.inner.log
    }

    pub fn views(&self) -> &Arc<dyn ViewHost> {
        &self.inner.views
    }

    /// Capability of the bound camera, `None` while unbound
    pub fn camera(&self) -> Option<CameraCapability> {
        self.inner.camera.read().clone()
    }

    pub(crate) fn set_camera(&self, camera: Option<CameraCapability>) {
        *self.inner.camera.write() = camera;
    }
}

impl std::fmt::Debug for SharedContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedContext")
            .field("camera", &self.camera().map(|c| c.descriptor().name.clone()))
            .finish()
    }
}
