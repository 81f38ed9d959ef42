// SPDX-License-Identifier: GPL-3.0-only
// Shared types for camera provider abstraction

//! Shared types for camera providers

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Frame data storage - either pre-copied bytes or a provider-owned buffer
///
/// Both variants are reference counted, so handing a frame's pixels to a
/// blocking task does not copy them.
#[derive(Clone)]
pub enum FrameData {
    /// Pre-copied bytes (used for simulated sources, tests, etc.)
    Copied(Arc<[u8]>),
    /// Buffer owned by the camera provider, kept alive until all references drop
    Shared(Arc<dyn AsRef<[u8]> + Send + Sync>),
}

impl FrameData {
    /// Create FrameData by taking ownership of a byte vector
    pub fn from_vec(bytes: Vec<u8>) -> Self {
        FrameData::Copied(Arc::from(bytes))
    }

    /// Get the length of the frame data in bytes
    pub fn len(&self) -> usize {
        self.as_ref().len()
    }

    /// Check if the frame data is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for FrameData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameData::Copied(data) => write!(f, "FrameData::Copied({} bytes)", data.len()),
            FrameData::Shared(buf) => {
                write!(f, "FrameData::Shared({} bytes)", (**buf).as_ref().len())
            }
        }
    }
}

impl AsRef<[u8]> for FrameData {
    fn as_ref(&self) -> &[u8] {
        match self {
            FrameData::Copied(data) => data.as_ref(),
            FrameData::Shared(buf) => (**buf).as_ref(),
        }
    }
}

impl std::ops::Deref for FrameData {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_ref()
    }
}

/// Sensor rotation in degrees (clockwise)
///
/// Camera sensors on phones are usually mounted at 90° or 270° relative to
/// the natural display orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SensorRotation {
    /// No rotation (sensor is oriented correctly)
    #[default]
    None,
    /// 90 degrees clockwise
    Rotate90,
    /// 180 degrees (upside down)
    Rotate180,
    /// 270 degrees clockwise (90 degrees counter-clockwise)
    Rotate270,
}

impl SensorRotation {
    /// Create rotation from an integer degree value (normalised to 0-360).
    pub fn from_degrees_int(degrees: i32) -> Self {
        match degrees.rem_euclid(360) {
            90 => SensorRotation::Rotate90,
            180 => SensorRotation::Rotate180,
            270 => SensorRotation::Rotate270,
            _ => SensorRotation::None,
        }
    }

    /// Get the rotation in degrees
    pub fn degrees(&self) -> u32 {
        match self {
            SensorRotation::None => 0,
            SensorRotation::Rotate90 => 90,
            SensorRotation::Rotate180 => 180,
            SensorRotation::Rotate270 => 270,
        }
    }
}

impl std::fmt::Display for SensorRotation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}°", self.degrees())
    }
}

/// Pixel format of a frame's data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    /// RGBA - 32-bit with alpha (4 bytes per pixel)
    RGBA,
    /// RGB24 - 24-bit RGB (3 bytes per pixel, no alpha)
    RGB24,
    /// NV12 - Semi-planar 4:2:0 (Y plane + interleaved UV plane)
    NV12,
    /// NV21 - Semi-planar 4:2:0 (Y plane + interleaved VU plane)
    NV21,
    /// YUYV - Packed 4:2:2 (Y0 U Y1 V interleaved)
    YUYV,
    /// Gray8 - 8-bit grayscale (single channel)
    Gray8,
}

impl PixelFormat {
    /// Average bytes per pixel (accounting for chroma subsampling)
    pub fn bytes_per_pixel(&self) -> f32 {
        match self {
            Self::RGBA => 4.0,
            Self::RGB24 => 3.0,
            Self::NV12 | Self::NV21 => 1.5, // 4:2:0 subsampling
            Self::YUYV => 2.0,              // 4:2:2 subsampling
            Self::Gray8 => 1.0,
        }
    }

    /// Expected buffer size for a frame of the given dimensions
    pub fn frame_size(&self, width: u32, height: u32) -> usize {
        (width as f32 * height as f32 * self.bytes_per_pixel()) as usize
    }
}

/// Physical placement of a camera
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LensFacing {
    Front,
    #[default]
    Back,
    External,
}

/// A camera enumerated by the provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraDescriptor {
    /// Position in the provider's enumeration (what `CameraConfig` selects)
    pub index: usize,
    /// Provider-specific identifier
    pub id: String,
    pub name: String,
    pub facing: LensFacing,
    /// Sensor rotation reported by the provider
    pub rotation: SensorRotation,
    /// Largest zoom ratio the lens supports
    pub max_zoom: f32,
    /// Whether the camera has a torch LED
    pub has_torch: bool,
}

/// Use cases requested from the provider when binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub preview: bool,
    pub capture: bool,
    pub video: bool,
    pub analysis: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            preview: true,
            capture: true,
            video: false,
            analysis: true,
        }
    }
}

/// Camera binding configuration
///
/// Immutable value: every `with_*` method returns a new configuration, and a
/// new `bind_camera` call replaces the active one wholesale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CameraConfig {
    camera_index: usize,
    capabilities: Capabilities,
}

impl CameraConfig {
    /// Configuration for the given camera with default use cases
    pub fn new(camera_index: usize) -> Self {
        Self {
            camera_index,
            capabilities: Capabilities::default(),
        }
    }

    pub fn camera_index(&self) -> usize {
        self.camera_index
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn preview_enabled(&self) -> bool {
        self.capabilities.preview
    }

    pub fn capture_enabled(&self) -> bool {
        self.capabilities.capture
    }

    pub fn video_enabled(&self) -> bool {
        self.capabilities.video
    }

    pub fn analysis_enabled(&self) -> bool {
        self.capabilities.analysis
    }

    pub fn with_camera_index(self, camera_index: usize) -> Self {
        Self {
            camera_index,
            ..self
        }
    }

    pub fn with_capabilities(self, capabilities: Capabilities) -> Self {
        Self {
            capabilities,
            ..self
        }
    }

    pub fn with_analysis(self, enabled: bool) -> Self {
        self.with_capabilities(Capabilities {
            analysis: enabled,
            ..self.capabilities
        })
    }

    pub fn with_video(self, enabled: bool) -> Self {
        self.with_capabilities(Capabilities {
            video: enabled,
            ..self.capabilities
        })
    }
}

/// Raw handle to a bound camera
///
/// Owned by the engine's camera session; modules only ever see a
/// [`CameraCapability`](super::CameraCapability).
#[derive(Debug, Clone, PartialEq)]
pub struct CameraHandle {
    /// Provider-assigned session id
    pub id: u64,
    pub descriptor: CameraDescriptor,
    pub capabilities: Capabilities,
}

/// Timing and layout metadata for one frame
#[derive(Debug, Clone)]
pub struct FrameInfo {
    /// Monotonic sequence number assigned by the provider
    pub sequence: u64,
    /// Sensor timestamp relative to stream start
    pub timestamp: Duration,
    /// Rotation to apply for display
    pub rotation: SensorRotation,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// When the frame entered the process (for latency diagnostics)
    pub captured_at: Instant,
}

type ReleaseFn = Box<dyn FnOnce() + Send>;

/// A single frame from the camera
///
/// The frame owns a release hook that hands the buffer back to the provider.
/// The hook runs exactly once: when the frame is closed explicitly or, failing
/// that, when it is dropped.
pub struct Frame {
    info: FrameInfo,
    data: FrameData,
    release: Mutex<Option<ReleaseFn>>,
}

impl Frame {
    pub fn new(info: FrameInfo, data: FrameData) -> Self {
        Self {
            info,
            data,
            release: Mutex::new(None),
        }
    }

    /// Attach the hook that returns this frame's buffer to the provider
    pub fn with_release<F>(self, release: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        *self.release.lock() = Some(Box::new(release));
        self
    }

    pub fn info(&self) -> &FrameInfo {
        &self.info
    }

    pub fn sequence(&self) -> u64 {
        self.info.sequence
    }

    pub fn data(&self) -> &FrameData {
        &self.data
    }

    /// Release the frame back to the provider
    pub fn close(self) {
        drop(self);
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        if let Some(release) = self.release.get_mut().take() {
            release();
        }
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("sequence", &self.info.sequence)
            .field("width", &self.info.width)
            .field("height", &self.info.height)
            .field("format", &self.info.format)
            .field("data", &self.data)
            .finish()
    }
}

/// Camera parameter write issued by a control module
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlRequest {
    Torch(bool),
    Zoom(f32),
}

/// Result type for provider operations
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Error types for camera provider operations
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// Provider is not available on this system
    #[error("camera provider not available: {0}")]
    NotAvailable(String),
    /// Camera device not found
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    /// Provider refused the requested configuration
    #[error("bind rejected: {0}")]
    BindRejected(String),
    /// Camera disconnected during operation
    #[error("camera disconnected")]
    Disconnected,
    /// Operation needs a bound camera
    #[error("no camera bound")]
    NotBound,
    /// Hardware primitive not supported by this camera
    #[error("unsupported: {0}")]
    Unsupported(String),
    /// Other errors
    #[error("{0}")]
    Other(String),
}
