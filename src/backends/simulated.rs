// SPDX-License-Identifier: GPL-3.0-only

//! Simulated camera provider and recognizer
//!
//! Used by the `simulate` command and by tests. The camera produces synthetic
//! grayscale frames either on its own producer thread (`fps > 0`) or on demand
//! via [`SimulatedCamera::push_frame`]. Every frame carries a release hook, so
//! callers can check that each produced frame is released exactly once.

use crate::backends::camera::frame_loop::{LoopAction, LoopController};
use crate::backends::camera::{
    CameraDescriptor, CameraHandle, CameraProvider, Capabilities, ControlRequest, Frame,
    FrameCallback, FrameData, FrameInfo, LensFacing, PixelFormat, ProviderError,
    ProviderResult, SensorRotation,
};
use crate::backends::recognition::{CallbackRecognizer, DetectionCallback, RecognitionError};
use crate::plugins::types::{Detection, FrameRegion};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info};

const DEFAULT_WIDTH: u32 = 320;
const DEFAULT_HEIGHT: u32 = 240;

#[derive(Default)]
struct FrameCounters {
    sequence: AtomicU64,
    emitted: AtomicU64,
    released: AtomicU64,
}

struct ActiveStream {
    handle_id: u64,
    callback: FrameCallback,
    started: Instant,
    producer: Option<LoopController>,
}

struct SimState {
    cameras: Vec<CameraDescriptor>,
    fps: u32,
    width: u32,
    height: u32,
    failing: Mutex<HashSet<usize>>,
    bind_attempts: Mutex<Vec<usize>>,
    control_log: Mutex<Vec<ControlRequest>>,
    stream: Mutex<Option<ActiveStream>>,
    next_handle: AtomicU64,
    unbinds: AtomicU64,
    counters: Arc<FrameCounters>,
}

/// In-process camera provider
///
/// Cloning shares the same simulated hardware.
#[derive(Clone)]
pub struct SimulatedCamera {
    state: Arc<SimState>,
}

impl SimulatedCamera {
    /// Simulated device with `count` cameras in manual frame mode
    pub fn new(count: usize) -> Self {
        Self::with_fps(count, 0)
    }

    /// Simulated device producing `fps` frames per second once streaming
    ///
    /// `fps == 0` selects manual mode.
    pub fn with_fps(count: usize, fps: u32) -> Self {
        let cameras = (0..count).map(describe).collect();
        Self {
            state: Arc::new(SimState {
                cameras,
                fps,
                width: DEFAULT_WIDTH,
                height: DEFAULT_HEIGHT,
                failing: Mutex::new(HashSet::new()),
                bind_attempts: Mutex::new(Vec::new()),
                control_log: Mutex::new(Vec::new()),
                stream: Mutex::new(None),
                next_handle: AtomicU64::new(1),
                unbinds: AtomicU64::new(0),
                counters: Arc::new(FrameCounters::default()),
            }),
        }
    }

    /// Make every bind of camera `index` fail
    pub fn fail_bind(&self, index: usize) {
        self.state.failing.lock().insert(index);
    }

    pub fn clear_failures(&self) {
        self.state.failing.lock().clear();
    }

    /// Camera indices passed to `bind`, in call order
    pub fn bind_attempts(&self) -> Vec<usize> {
        self.state.bind_attempts.lock().clone()
    }

    /// Control writes applied to the hardware, in order
    pub fn control_log(&self) -> Vec<ControlRequest> {
        self.state.control_log.lock().clone()
    }

    pub fn unbind_count(&self) -> u64 {
        self.state.unbinds.load(Ordering::SeqCst)
    }

    pub fn is_streaming(&self) -> bool {
        self.state.stream.lock().is_some()
    }

    /// Frames handed to the frame callback
    pub fn emitted(&self) -> u64 {
        self.state.counters.emitted.load(Ordering::SeqCst)
    }

    /// Frames whose release hook has run
    pub fn released(&self) -> u64 {
        self.state.counters.released.load(Ordering::SeqCst)
    }

    /// Deliver one frame to the active stream
    ///
    /// Returns false if no stream is running.
    pub fn push_frame(&self) -> bool {
        let (callback, started) = {
            let stream = self.state.stream.lock();
            match stream.as_ref() {
                Some(s) => (Arc::clone(&s.callback), s.started),
                None => return false,
            }
        };
        let frame = synthesize(
            &self.state.counters,
            self.state.width,
            self.state.height,
            started,
        );
        callback(frame);
        true
    }
}

fn describe(index: usize) -> CameraDescriptor {
    // Sensor mounting angle, as a phone reports it
    let (facing, degrees) = match index {
        0 => (LensFacing::Back, 90),
        1 => (LensFacing::Front, 270),
        _ => (LensFacing::External, 0),
    };
    CameraDescriptor {
        index,
        id: format!("sim-{index}"),
        name: format!("Simulated Camera {index}"),
        facing,
        rotation: SensorRotation::from_degrees_int(degrees),
        max_zoom: if facing == LensFacing::Back { 8.0 } else { 2.0 },
        has_torch: facing == LensFacing::Back,
    }
}

fn synthesize(counters: &Arc<FrameCounters>, width: u32, height: u32, started: Instant) -> Frame {
    let sequence = counters.sequence.fetch_add(1, Ordering::SeqCst);
    let format = PixelFormat::Gray8;
    let luma = (sequence % 256) as u8;
    let info = FrameInfo {
        sequence,
        timestamp: started.elapsed(),
        rotation: SensorRotation::None,
        width,
        height,
        format,
        captured_at: Instant::now(),
    };

    counters.emitted.fetch_add(1, Ordering::SeqCst);
    let released = Arc::clone(counters);
    Frame::new(info, FrameData::from_vec(vec![luma; format.frame_size(width, height)]))
        .with_release(move || {
            released.released.fetch_add(1, Ordering::SeqCst);
        })
}

impl CameraProvider for SimulatedCamera {
    fn enumerate(&self) -> BoxFuture<'_, ProviderResult<Vec<CameraDescriptor>>> {
        Box::pin(async move { Ok(self.state.cameras.clone()) })
    }

    fn bind<'a>(
        &'a self,
        descriptor: &'a CameraDescriptor,
        capabilities: Capabilities,
    ) -> BoxFuture<'a, ProviderResult<CameraHandle>> {
        Box::pin(async move {
            self.state.bind_attempts.lock().push(descriptor.index);

            if self.state.failing.lock().contains(&descriptor.index) {
                return Err(ProviderError::BindRejected(format!(
                    "camera {} refused the configuration",
                    descriptor.index
                )));
            }
            let Some(camera) = self.state.cameras.get(descriptor.index) else {
                return Err(ProviderError::DeviceNotFound(descriptor.id.clone()));
            };

            let id = self.state.next_handle.fetch_add(1, Ordering::SeqCst);
            debug!(camera = %camera.name, handle = id, "Simulated camera bound");
            Ok(CameraHandle {
                id,
                descriptor: camera.clone(),
                capabilities,
            })
        })
    }

    fn start_stream<'a>(
        &'a self,
        handle: &'a CameraHandle,
        on_frame: FrameCallback,
    ) -> BoxFuture<'a, ProviderResult<()>> {
        Box::pin(async move {
            let mut stream = self.state.stream.lock();
            if stream.is_some() {
                return Err(ProviderError::Other("stream already running".to_string()));
            }

            let started = Instant::now();
            let producer = (self.state.fps > 0).then(|| {
                let interval = Duration::from_secs_f64(1.0 / self.state.fps as f64);
                let counters = Arc::clone(&self.state.counters);
                let callback = Arc::clone(&on_frame);
                let (width, height) = (self.state.width, self.state.height);
                LoopController::start("simulated-camera", interval, move || {
                    callback(synthesize(&counters, width, height, started));
                    LoopAction::Continue
                })
            });

            info!(handle = handle.id, fps = self.state.fps, "Simulated stream started");
            *stream = Some(ActiveStream {
                handle_id: handle.id,
                callback: on_frame,
                started,
                producer,
            });
            Ok(())
        })
    }

    fn unbind<'a>(&'a self, handle: &'a CameraHandle) -> BoxFuture<'a, ProviderResult<()>> {
        Box::pin(async move {
            let stream = {
                let mut stream = self.state.stream.lock();
                match stream.as_ref() {
                    Some(s) if s.handle_id == handle.id => stream.take(),
                    _ => None,
                }
            };
            if let Some(mut stream) = stream
                && let Some(mut producer) = stream.producer.take()
            {
                producer.stop();
            }
            self.state.unbinds.fetch_add(1, Ordering::SeqCst);
            debug!(handle = handle.id, "Simulated camera unbound");
            Ok(())
        })
    }

    fn set_torch<'a>(
        &'a self,
        handle: &'a CameraHandle,
        enabled: bool,
    ) -> BoxFuture<'a, ProviderResult<()>> {
        Box::pin(async move {
            if !handle.descriptor.has_torch {
                return Err(ProviderError::Unsupported("torch".to_string()));
            }
            self.state
                .control_log
                .lock()
                .push(ControlRequest::Torch(enabled));
            Ok(())
        })
    }

    fn set_zoom<'a>(
        &'a self,
        handle: &'a CameraHandle,
        ratio: f32,
    ) -> BoxFuture<'a, ProviderResult<()>> {
        Box::pin(async move {
            if ratio > handle.descriptor.max_zoom {
                return Err(ProviderError::Unsupported(format!("zoom {ratio}")));
            }
            self.state.control_log.lock().push(ControlRequest::Zoom(ratio));
            Ok(())
        })
    }
}

/// Recognizer that reports one centered detection per frame
///
/// Completes on its own thread after `delay`, like a platform detector.
pub struct SimulatedRecognizer {
    delay: Duration,
    fail_every: Option<u64>,
}

impl SimulatedRecognizer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            fail_every: None,
        }
    }

    /// Fail every `n`th frame (by sequence number)
    pub fn failing_every(mut self, n: u64) -> Self {
        self.fail_every = Some(n.max(1));
        self
    }
}

impl CallbackRecognizer for SimulatedRecognizer {
    fn name(&self) -> &str {
        "simulated"
    }

    fn detect(&self, frame: &Frame, done: DetectionCallback) {
        let sequence = frame.sequence();
        let (width, height) = (frame.info().width, frame.info().height);
        let fail = self.fail_every.is_some_and(|n| sequence % n == 0);
        let delay = self.delay;

        std::thread::spawn(move || {
            if !delay.is_zero() {
                std::thread::sleep(delay);
            }
            if fail {
                done(Err(RecognitionError::Failed(format!(
                    "no match in frame {sequence}"
                ))));
                return;
            }
            done(Ok(vec![Detection {
                label: format!("object-{sequence}"),
                confidence: 0.75,
                region: FrameRegion::from_pixels(
                    width / 4,
                    height / 4,
                    width / 2,
                    height / 2,
                    width.max(1),
                    height.max(1),
                ),
            }]));
        });
    }
}
