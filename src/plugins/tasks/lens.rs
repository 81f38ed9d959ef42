// SPDX-License-Identifier: GPL-3.0-only

//! Lens control module
//!
//! Applies the `camera.zoom` and `camera.torch` settings to the bound camera.
//! Writes go through the session's control queue, so they are serialized
//! with every other control module's writes.

use crate::backends::camera::{CameraCapability, CameraControls};
use crate::constants::settings_keys;
use crate::errors::InitError;
use crate::plugins::context::SharedContext;
use crate::plugins::{ControlModule, Module, Requirements};
use crate::settings::{SettingsStore, Subscription};
use parking_lot::Mutex;
use tracing::{debug, warn};

pub const LENS_CONTROL: &str = "lens";

/// Zoom and torch controller
#[derive(Default)]
pub struct LensControl {
    settings: Mutex<Option<SettingsStore>>,
    max_zoom: Mutex<Option<f32>>,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl LensControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the module currently drives a camera
    pub fn is_attached(&self) -> bool {
        !self.subscriptions.lock().is_empty()
    }

    fn release(&self) {
        // Dropping the handles cancels the subscriptions
        self.subscriptions.lock().clear();
    }
}

impl Module for LensControl {
    fn name(&self) -> &str {
        LENS_CONTROL
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn priority(&self) -> i32 {
        10
    }

    fn requirements(&self) -> Requirements {
        Requirements::preview()
    }

    fn initialize(&self, context: &SharedContext) -> Result<(), InitError> {
        *self.settings.lock() = Some(context.settings().clone());
        Ok(())
    }

    fn on_camera_ready(&self, camera: &CameraCapability) {
        *self.max_zoom.lock() = Some(camera.descriptor().max_zoom);
    }

    fn cleanup(&self) {
        self.release();
        self.settings.lock().take();
        self.max_zoom.lock().take();
    }
}

impl ControlModule for LensControl {
    fn attach_controls(&self, controls: CameraControls) {
        let Some(settings) = self.settings.lock().clone() else {
            warn!("Lens control attached before initialize");
            return;
        };

        let zoom_controls = controls.clone();
        let zoom = settings.subscribe(settings_keys::ZOOM, move |setting| {
            let Some(ratio) = setting.value.as_f64() else {
                return;
            };
            match zoom_controls.set_zoom(ratio as f32) {
                Ok(applied) => debug!(requested = ratio, applied, "Zoom queued"),
                Err(e) => warn!(error = %e, "Zoom request rejected"),
            }
        });

        let torch = settings.subscribe(settings_keys::TORCH, move |setting| {
            let Some(enabled) = setting.value.as_bool() else {
                return;
            };
            if let Err(e) = controls.set_torch(enabled) {
                warn!(error = %e, "Torch request rejected");
            }
        });

        let mut subscriptions = self.subscriptions.lock();
        subscriptions.clear();
        subscriptions.push(zoom);
        subscriptions.push(torch);
        debug!(max_zoom = ?*self.max_zoom.lock(), "Lens control attached");
    }

    fn detach_controls(&self) {
        self.release();
    }
}
