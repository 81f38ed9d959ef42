// SPDX-License-Identifier: GPL-3.0-only

//! Built-in modules
//!
//! - [`ScannerModule`]: processing, awaits an external recognition service
//! - [`ExposureAnalyzer`]: processing, publishes mean luminance
//! - [`DetectionOverlay`]: overlay, renders the newest detections
//! - [`LensControl`]: control, applies zoom and torch settings

pub mod exposure;
pub mod lens;
pub mod overlay;
pub mod scanner;

pub use exposure::ExposureAnalyzer;
pub use lens::LensControl;
pub use overlay::DetectionOverlay;
pub use scanner::ScannerModule;
