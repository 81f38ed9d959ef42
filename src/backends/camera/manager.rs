// SPDX-License-Identifier: GPL-3.0-only

//! Camera session manager
//!
//! The session provides:
//! - Exclusive ownership of the raw camera handle
//! - A read-only capability object handed to modules
//! - Serialized hardware parameter writes (one writer task per bound camera)

use super::types::*;
use super::{CameraProvider, FrameCallback};
use crate::constants::controls::{CONTROL_QUEUE_DEPTH, MIN_ZOOM};
use crate::logging::{EventLevel, LogEvent, LogSink};
use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

/// Read-only view of the bound camera
///
/// This is what modules receive instead of the raw [`CameraHandle`].
#[derive(Debug, Clone)]
pub struct CameraCapability {
    descriptor: CameraDescriptor,
    config: CameraConfig,
    session_id: Uuid,
}

impl CameraCapability {
    pub fn descriptor(&self) -> &CameraDescriptor {
        &self.descriptor
    }

    pub fn config(&self) -> &CameraConfig {
        &self.config
    }

    /// Unique id of this bind (changes on every rebind)
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn rotation(&self) -> SensorRotation {
        self.descriptor.rotation
    }

    pub fn facing(&self) -> LensFacing {
        self.descriptor.facing
    }
}

/// Errors when queueing a control write
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControlError {
    #[error("control queue is full")]
    QueueFull,
    #[error("camera session closed")]
    Closed,
    #[error("camera does not support {0}")]
    Unsupported(&'static str),
}

/// Queue for camera parameter writes
///
/// All control modules of a session share one queue drained by a single
/// writer, so conflicting hardware calls are applied one at a time in
/// submission order.
#[derive(Debug, Clone)]
pub struct CameraControls {
    tx: mpsc::Sender<ControlRequest>,
    max_zoom: f32,
    has_torch: bool,
}

impl CameraControls {
    /// Queue a zoom change, clamped to the lens range
    pub fn set_zoom(&self, ratio: f32) -> Result<f32, ControlError> {
        let ratio = ratio.clamp(MIN_ZOOM, self.max_zoom.max(MIN_ZOOM));
        self.send(ControlRequest::Zoom(ratio))?;
        Ok(ratio)
    }

    /// Queue a torch change
    pub fn set_torch(&self, enabled: bool) -> Result<(), ControlError> {
        if !self.has_torch {
            return Err(ControlError::Unsupported("torch"));
        }
        self.send(ControlRequest::Torch(enabled))
    }

    pub fn max_zoom(&self) -> f32 {
        self.max_zoom
    }

    fn send(&self, request: ControlRequest) -> Result<(), ControlError> {
        self.tx.try_send(request).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ControlError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => ControlError::Closed,
        })
    }
}

struct ActiveCamera {
    handle: CameraHandle,
    capability: CameraCapability,
}

/// Camera session
///
/// Owns the provider and, while bound, the raw camera handle.
pub struct CameraSession {
    provider: Arc<dyn CameraProvider>,
    active: Mutex<Option<ActiveCamera>>,
}

impl CameraSession {
    pub fn new(provider: Arc<dyn CameraProvider>) -> Self {
        Self {
            provider,
            active: Mutex::new(None),
        }
    }

    /// Enumerate available cameras
    pub async fn enumerate(&self) -> ProviderResult<Vec<CameraDescriptor>> {
        let cameras = self.provider.enumerate().await?;
        if cameras.is_empty() {
            Err(ProviderError::DeviceNotFound("No cameras found".to_string()))
        } else {
            Ok(cameras)
        }
    }

    /// Bind a camera and take ownership of its handle
    pub async fn open(
        &self,
        descriptor: &CameraDescriptor,
        config: CameraConfig,
    ) -> ProviderResult<CameraCapability> {
        if self.is_open() {
            return Err(ProviderError::Other("a camera is already bound".to_string()));
        }

        info!(camera = %descriptor.name, index = descriptor.index, "Binding camera");
        let handle = self.provider.bind(descriptor, config.capabilities()).await?;

        let capability = CameraCapability {
            descriptor: handle.descriptor.clone(),
            config,
            session_id: Uuid::new_v4(),
        };
        *self.active.lock() = Some(ActiveCamera {
            handle,
            capability: capability.clone(),
        });
        Ok(capability)
    }

    /// Start the provider's frame stream for the bound camera
    pub async fn start_stream(&self, on_frame: FrameCallback) -> ProviderResult<()> {
        let handle = self.handle().ok_or(ProviderError::NotBound)?;
        self.provider.start_stream(&handle, on_frame).await
    }

    /// Stop the stream and release the camera handle
    pub async fn close(&self) -> ProviderResult<()> {
        let Some(active) = self.active.lock().take() else {
            return Ok(());
        };
        info!(camera = %active.handle.descriptor.name, "Releasing camera");
        self.provider.unbind(&active.handle).await
    }

    pub fn is_open(&self) -> bool {
        self.active.lock().is_some()
    }

    /// Capability for the bound camera, if any
    pub fn capability(&self) -> Option<CameraCapability> {
        self.active.lock().as_ref().map(|a| a.capability.clone())
    }

    fn handle(&self) -> Option<CameraHandle> {
        self.active.lock().as_ref().map(|a| a.handle.clone())
    }

    /// Create the control queue for the bound camera
    ///
    /// Returns the cloneable queue handle and the writer future that drains
    /// it. The writer stops when `token` is cancelled or every queue handle
    /// has been dropped.
    pub fn control_channel(
        &self,
        token: CancellationToken,
        log: Arc<dyn LogSink>,
    ) -> ProviderResult<(CameraControls, BoxFuture<'static, ()>)> {
        let handle = self.handle().ok_or(ProviderError::NotBound)?;
        let (tx, rx) = mpsc::channel(CONTROL_QUEUE_DEPTH);

        let controls = CameraControls {
            tx,
            max_zoom: handle.descriptor.max_zoom,
            has_torch: handle.descriptor.has_torch,
        };
        let writer = run_control_writer(Arc::clone(&self.provider), handle, rx, token, log).boxed();
        Ok((controls, writer))
    }
}

impl std::fmt::Debug for CameraSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let active = self.active.lock();
        f.debug_struct("CameraSession")
            .field(
                "camera",
                &active.as_ref().map(|a| a.handle.descriptor.name.clone()),
            )
            .finish()
    }
}

async fn run_control_writer(
    provider: Arc<dyn CameraProvider>,
    handle: CameraHandle,
    mut rx: mpsc::Receiver<ControlRequest>,
    token: CancellationToken,
    log: Arc<dyn LogSink>,
) {
    loop {
        let request = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            request = rx.recv() => match request {
                Some(request) => request,
                None => break,
            },
        };

        let result = match request {
            ControlRequest::Torch(enabled) => provider.set_torch(&handle, enabled).await,
            ControlRequest::Zoom(ratio) => provider.set_zoom(&handle, ratio).await,
        };

        match result {
            Ok(()) => debug!(?request, "Applied camera control"),
            Err(e) => log.emit(
                LogEvent::new(EventLevel::Warn, "control write failed")
                    .with("request", format!("{request:?}"))
                    .with("error", e.to_string()),
            ),
        }
    }
    debug!(camera = %handle.descriptor.name, "Control writer stopped");
}
