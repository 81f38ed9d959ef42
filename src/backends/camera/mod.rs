// SPDX-License-Identifier: MPL-2.0

//! Camera provider abstraction
//!
//! The operating system's camera stack is an external collaborator. The
//! engine talks to it only through the [`CameraProvider`] trait and owns the
//! resulting raw handle inside a [`CameraSession`].
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────┐
//! │       Engine        │
//! └──────────┬──────────┘
//!            │
//!            ▼
//! ┌─────────────────────┐
//! │    CameraSession    │  ← Owns the raw handle, serializes control writes
//! └──────────┬──────────┘
//!            │
//!            ▼
//! ┌─────────────────────┐
//! │ CameraProvider Trait│  ← Enumeration, bind, frame stream, torch/zoom
//! └─────────────────────┘
//! ```
//!
//! Modules never see a [`CameraHandle`]. They receive a read-only
//! [`CameraCapability`] and, for control modules, a [`CameraControls`] queue.

pub mod frame_loop;
pub mod manager;
pub mod types;

pub use manager::{CameraCapability, CameraControls, CameraSession, ControlError};
pub use types::*;

use futures::future::BoxFuture;
use std::sync::Arc;

/// Callback the provider invokes for every captured frame
///
/// May be called from any thread; it must not block.
pub type FrameCallback = Arc<dyn Fn(Frame) + Send + Sync>;

/// Camera provider trait
///
/// Every operation is fallible and asynchronous. Implementations wrap the
/// platform camera stack (enumeration, sensor binding, preview surface,
/// torch/zoom primitives).
pub trait CameraProvider: Send + Sync {
    // ===== Enumeration =====

    /// Enumerate available cameras
    fn enumerate(&self) -> BoxFuture<'_, ProviderResult<Vec<CameraDescriptor>>>;

    // ===== Lifecycle =====

    /// Bind a camera with the requested use cases
    ///
    /// # Returns
    /// * `Ok(CameraHandle)` - Camera bound, no frames are delivered yet
    /// * `Err(ProviderError)` - The provider refused the configuration
    fn bind<'a>(
        &'a self,
        descriptor: &'a CameraDescriptor,
        capabilities: Capabilities,
    ) -> BoxFuture<'a, ProviderResult<CameraHandle>>;

    /// Start pushing frames for a bound camera into `on_frame`
    fn start_stream<'a>(
        &'a self,
        handle: &'a CameraHandle,
        on_frame: FrameCallback,
    ) -> BoxFuture<'a, ProviderResult<()>>;

    /// Stop the frame stream and release the camera
    ///
    /// Once this resolves the provider must not invoke the frame callback again.
    fn unbind<'a>(&'a self, handle: &'a CameraHandle) -> BoxFuture<'a, ProviderResult<()>>;

    // ===== Hardware primitives =====

    /// Turn the torch LED on or off
    fn set_torch<'a>(
        &'a self,
        handle: &'a CameraHandle,
        enabled: bool,
    ) -> BoxFuture<'a, ProviderResult<()>>;

    /// Set the zoom ratio (1.0 = no zoom)
    fn set_zoom<'a>(&'a self, handle: &'a CameraHandle, ratio: f32)
    -> BoxFuture<'a, ProviderResult<()>>;
}
