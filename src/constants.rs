// SPDX-License-Identifier: GPL-3.0-only

//! Engine-wide constants

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Memory pressure bands used by the resource monitor
///
/// Between the low- and high-water marks the monitor keeps whatever mode it
/// is already in, so usage hovering around one mark does not flap shedding
/// on and off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PressureLevel {
    /// Below the low-water mark
    #[default]
    Normal,
    /// Between the low- and high-water marks
    Elevated,
    /// At or above the high-water mark
    Critical,
}

impl PressureLevel {
    /// Get all levels, lowest first
    pub const ALL: [PressureLevel; 3] = [
        PressureLevel::Normal,
        PressureLevel::Elevated,
        PressureLevel::Critical,
    ];

    /// Classify a usage ratio (0.0 to 1.0)
    pub fn classify(ratio: f64, low_water: f64, high_water: f64) -> Self {
        if ratio >= high_water {
            PressureLevel::Critical
        } else if ratio < low_water {
            PressureLevel::Normal
        } else {
            PressureLevel::Elevated
        }
    }

    /// Get display name for the level
    pub fn display_name(&self) -> &'static str {
        match self {
            PressureLevel::Normal => "Normal",
            PressureLevel::Elevated => "Elevated",
            PressureLevel::Critical => "Critical",
        }
    }
}

/// Frame dispatch defaults
pub mod dispatch {
    use std::time::Duration;

    /// Lower bound for the default worker pool
    pub const MIN_WORKERS: usize = 2;

    /// Upper bound for the default worker pool
    pub const MAX_WORKERS: usize = 4;

    /// Per-frame budget at 30 fps
    pub const FRAME_BUDGET: Duration = Duration::from_millis(33);

    /// Default upper bound for a single `process` call
    pub const PROCESS_TIMEOUT: Duration = Duration::from_millis(250);

    /// Failures within the window before a module is disabled
    pub const FAILURE_THRESHOLD: u32 = 5;

    /// Sliding window for the failure threshold
    pub const FAILURE_WINDOW: Duration = Duration::from_secs(10);

    /// Worker pool size derived from the number of CPU cores
    pub fn default_workers() -> usize {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(MIN_WORKERS)
            .clamp(MIN_WORKERS, MAX_WORKERS)
    }
}

/// Resource monitor defaults
pub mod monitor {
    use std::time::Duration;

    pub const SAMPLE_INTERVAL: Duration = Duration::from_secs(2);

    pub const MIN_SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

    pub const MAX_SAMPLE_INTERVAL: Duration = Duration::from_secs(10);

    /// Usage ratio that starts load shedding
    pub const HIGH_WATER_RATIO: f64 = 0.85;

    /// Usage ratio that ends load shedding
    pub const LOW_WATER_RATIO: f64 = 0.70;

    /// Worker pool size while shedding
    pub const SHED_WORKERS: usize = 1;

    /// Latency samples kept per module
    pub const LATENCY_WINDOW: usize = 256;

    /// Samples required before a module's P99 is trusted
    pub const MIN_LATENCY_SAMPLES: usize = 30;
}

/// Well-known settings keys
pub mod settings_keys {
    /// Zoom ratio requested by the user (f32)
    pub const ZOOM: &str = "camera.zoom";

    /// Torch on/off (bool)
    pub const TORCH: &str = "camera.torch";

    /// Minimum confidence for scanner detections (f32)
    pub const SCANNER_MIN_CONFIDENCE: &str = "scanner.min_confidence";

    /// Mean luminance of the last analyzed frame (f64, 0.0 to 1.0)
    pub const MEAN_LUMA: &str = "analysis.mean_luma";
}

/// Camera control defaults
pub mod controls {
    /// Pending control writes per session
    pub const CONTROL_QUEUE_DEPTH: usize = 16;

    /// Zoom ratio with no magnification
    pub const MIN_ZOOM: f32 = 1.0;
}

/// Application info
pub mod app_info {
    /// Get the application version from the build-time environment
    pub fn version() -> &'static str {
        env!("GIT_VERSION")
    }

    /// Settings directory name under the user config dir
    pub const CONFIG_DIR: &str = "camera-plugins";

    /// Engine configuration file name
    pub const CONFIG_FILE: &str = "engine.json";

    /// Persisted settings file name
    pub const SETTINGS_FILE: &str = "settings.json";
}

/// Default overlay mount point for the preview surface
pub const PREVIEW_MOUNT_POINT: &str = "preview";

/// How long `cleanup` waits for in-flight work before giving up on a worker
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);
