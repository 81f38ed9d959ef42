// SPDX-License-Identifier: GPL-3.0-only

//! Detection overlay
//!
//! Shows the newest detection result on the preview surface. Results can
//! arrive out of order from concurrent workers; anything older than the
//! result on screen is discarded.

use crate::constants::PREVIEW_MOUNT_POINT;
use crate::errors::{InitError, ModuleError};
use crate::plugins::context::{MountPoint, SharedContext, ViewId};
use crate::plugins::types::{Payload, SequenceGate, TaggedResult};
use crate::plugins::{Module, OverlayModule, Requirements};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

pub const DETECTION_OVERLAY: &str = "detection-overlay";

#[derive(Debug, Clone, Copy)]
struct MountedView {
    id: ViewId,
    width: u32,
    height: u32,
}

/// Overlay rendering the latest detections
pub struct DetectionOverlay {
    mount_point: String,
    view: Mutex<Option<MountedView>>,
    gate: SequenceGate,
    current: Mutex<Option<TaggedResult>>,
    discarded: AtomicU64,
    mounts: AtomicU64,
}

impl Default for DetectionOverlay {
    fn default() -> Self {
        Self::new(PREVIEW_MOUNT_POINT)
    }
}

impl DetectionOverlay {
    pub fn new(mount_point: impl Into<String>) -> Self {
        Self {
            mount_point: mount_point.into(),
            view: Mutex::new(None),
            gate: SequenceGate::new(),
            current: Mutex::new(None),
            discarded: AtomicU64::new(0),
            mounts: AtomicU64::new(0),
        }
    }

    /// Result currently on screen
    pub fn current(&self) -> Option<TaggedResult> {
        self.current.lock().clone()
    }

    /// Stale results thrown away
    pub fn discarded(&self) -> u64 {
        self.discarded.load(Ordering::Relaxed)
    }

    pub fn is_mounted(&self) -> bool {
        self.view.lock().is_some()
    }

    /// Successful `mount_view` calls so far
    pub fn mount_count(&self) -> u64 {
        self.mounts.load(Ordering::Relaxed)
    }
}

impl Module for DetectionOverlay {
    fn name(&self) -> &str {
        DETECTION_OVERLAY
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn priority(&self) -> i32 {
        300
    }

    fn requirements(&self) -> Requirements {
        Requirements::preview()
    }

    fn initialize(&self, _context: &SharedContext) -> Result<(), InitError> {
        self.gate.reset();
        Ok(())
    }

    fn cleanup(&self) {
        self.view.lock().take();
        self.current.lock().take();
        self.gate.reset();
    }
}

impl OverlayModule for DetectionOverlay {
    fn mount_point(&self) -> &str {
        &self.mount_point
    }

    fn mount_view(&self, point: &MountPoint) -> Result<ViewId, ModuleError> {
        let mut view = self.view.lock();
        if let Some(existing) = *view {
            return Err(ModuleError::ContractViolation {
                module: DETECTION_OVERLAY.to_string(),
                detail: format!("mount_view called while view {} is mounted", existing.id.get()),
            });
        }
        let id = ViewId::next();
        *view = Some(MountedView {
            id,
            width: point.width,
            height: point.height,
        });
        self.mounts.fetch_add(1, Ordering::Relaxed);
        debug!(view = id.get(), mount_point = %point.id, width = point.width, height = point.height, "Overlay view mounted");
        Ok(id)
    }

    fn unmount_view(&self, id: ViewId) -> Result<(), ModuleError> {
        let mut view = self.view.lock();
        match *view {
            Some(mounted) if mounted.id == id => {
                *view = None;
                debug!(view = id.get(), "Overlay view unmounted");
                Ok(())
            }
            _ => Err(ModuleError::ContractViolation {
                module: DETECTION_OVERLAY.to_string(),
                detail: format!("view {} is not mounted", id.get()),
            }),
        }
    }

    fn on_result(&self, result: &TaggedResult) {
        if !matches!(result.payload, Payload::Detections { .. }) {
            return;
        }
        if !self.gate.accept(result.sequence) {
            self.discarded.fetch_add(1, Ordering::Relaxed);
            return;
        }
        if let Some(view) = *self.view.lock() {
            debug!(
                view = view.id.get(),
                sequence = result.sequence,
                surface = %format!("{}x{}", view.width, view.height),
                "Rendering detections"
            );
        }
        *self.current.lock() = Some(result.clone());
    }
}
