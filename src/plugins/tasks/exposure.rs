// SPDX-License-Identifier: GPL-3.0-only

//! Exposure analyzer
//!
//! Computes the mean luminance of each frame and publishes it to the
//! settings store, where exposure or UI modules can react to it. The
//! computation runs on a blocking thread so it does not stall the runtime.

use crate::backends::camera::{Frame, FrameData, PixelFormat};
use crate::constants::settings_keys;
use crate::errors::{InitError, ProcessError};
use crate::plugins::context::SharedContext;
use crate::plugins::types::{Payload, ProcessingResult};
use crate::plugins::{Module, ProcessingModule};
use crate::settings::SettingsStore;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tracing::{trace, warn};

pub const EXPOSURE_ANALYZER: &str = "exposure";

/// Mean-luminance analyzer
///
/// Non-critical: skipped while the engine sheds load.
#[derive(Default)]
pub struct ExposureAnalyzer {
    settings: Mutex<Option<SettingsStore>>,
}

impl ExposureAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Module for ExposureAnalyzer {
    fn name(&self) -> &str {
        EXPOSURE_ANALYZER
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn priority(&self) -> i32 {
        200
    }

    fn is_critical(&self) -> bool {
        false
    }

    fn initialize(&self, context: &SharedContext) -> Result<(), InitError> {
        *self.settings.lock() = Some(context.settings().clone());
        Ok(())
    }

    fn cleanup(&self) {
        self.settings.lock().take();
    }
}

impl ProcessingModule for ExposureAnalyzer {
    fn process<'a>(&'a self, frame: &'a Frame) -> BoxFuture<'a, ProcessingResult> {
        Box::pin(async move {
            let data = frame.data().clone();
            let info = frame.info().clone();

            let luma = match tokio::task::spawn_blocking(move || {
                mean_luma(&data, info.format, info.width, info.height)
            })
            .await
            {
                Ok(Some(luma)) => luma,
                Ok(None) => {
                    return ProcessingResult::Error(ProcessError::Failed(format!(
                        "{} byte buffer is too small for {}x{} {:?}",
                        frame.data().len(),
                        info.width,
                        info.height,
                        info.format
                    )));
                }
                Err(e) => {
                    return ProcessingResult::Error(ProcessError::Failed(format!(
                        "luminance task failed: {e}"
                    )));
                }
            };

            // Two decimals is plenty and lets the store suppress repeats
            let luma = (luma * 100.0).round() / 100.0;
            trace!(sequence = frame.sequence(), luma, "Mean luminance");

            let settings = self.settings.lock().clone();
            if let Some(settings) = settings
                && let Err(e) = settings.set(settings_keys::MEAN_LUMA, luma)
            {
                warn!(error = %e, "Failed to publish mean luminance");
            }

            ProcessingResult::Success(Payload::Measurement {
                name: "mean_luma".to_string(),
                value: luma,
            })
        })
    }
}

/// Mean luminance in [0.0, 1.0], `None` if the buffer is too short
pub fn mean_luma(data: &FrameData, format: PixelFormat, width: u32, height: u32) -> Option<f64> {
    let pixels = width as usize * height as usize;
    if pixels == 0 || data.len() < format.frame_size(width, height) {
        return None;
    }
    let bytes: &[u8] = data;

    let sum: u64 = match format {
        PixelFormat::Gray8 | PixelFormat::NV12 | PixelFormat::NV21 => {
            // Y plane comes first in the semi-planar formats
            bytes[..pixels].iter().map(|&b| b as u64).sum()
        }
        PixelFormat::YUYV => bytes
            .chunks_exact(2)
            .take(pixels)
            .map(|c| c[0] as u64)
            .sum(),
        PixelFormat::RGB24 | PixelFormat::RGBA => {
            let stride = if format == PixelFormat::RGBA { 4 } else { 3 };
            bytes
                .chunks_exact(stride)
                .take(pixels)
                .map(|c| (299 * c[0] as u64 + 587 * c[1] as u64 + 114 * c[2] as u64) / 1000)
                .sum()
        }
    };

    Some(sum as f64 / pixels as f64 / 255.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_luma_gray() {
        let data = FrameData::from_vec(vec![0, 255, 0, 255]);
        assert_eq!(mean_luma(&data, PixelFormat::Gray8, 2, 2), Some(0.5));
    }

    #[test]
    fn test_mean_luma_ignores_chroma_plane() {
        // 2x2 NV12: 4 luma bytes + 2 chroma bytes
        let data = FrameData::from_vec(vec![255, 255, 255, 255, 0, 0]);
        assert_eq!(mean_luma(&data, PixelFormat::NV12, 2, 2), Some(1.0));
    }

    #[test]
    fn test_mean_luma_rgba_white() {
        let data = FrameData::from_vec(vec![255; 16]);
        assert_eq!(mean_luma(&data, PixelFormat::RGBA, 2, 2), Some(1.0));
    }

    #[test]
    fn test_mean_luma_short_buffer() {
        let data = FrameData::from_vec(vec![0; 3]);
        assert_eq!(mean_luma(&data, PixelFormat::Gray8, 2, 2), None);
    }
}
