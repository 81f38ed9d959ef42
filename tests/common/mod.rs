// SPDX-License-Identifier: MPL-2.0

//! Shared fixtures for integration tests

#![allow(dead_code)]

use camera_plugins::backends::camera::{
    Frame, FrameData, FrameInfo, PixelFormat, SensorRotation,
};
use camera_plugins::backends::simulated::SimulatedCamera;
use camera_plugins::config::EngineConfig;
use camera_plugins::engine::Engine;
use camera_plugins::errors::{InitError, ProcessError};
use camera_plugins::logging::MemorySink;
use camera_plugins::monitor::FixedMemoryProbe;
use camera_plugins::plugins::{
    Module, Payload, ProcessingModule, ProcessingResult, SharedContext,
};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

pub const GIB: u64 = 1 << 30;

/// What a [`TestModule`] does with each frame
pub enum Behavior {
    NoAction,
    Succeed,
    Fail,
    Panic,
    Sleep(Duration),
    /// Wait for one permit per frame
    Gated(Arc<Semaphore>),
    /// Never complete
    Hang,
}

/// Processing module with scripted behavior and call counters
pub struct TestModule {
    name: String,
    priority: i32,
    critical: bool,
    fail_init: bool,
    timeout: Option<Duration>,
    behavior: Behavior,
    order: Option<Arc<Mutex<Vec<String>>>>,
    init_delay: Duration,
    journal: Option<Arc<Mutex<Vec<&'static str>>>>,
    pub init_calls: AtomicU64,
    pub ready_calls: AtomicU64,
    pub cleanup_calls: AtomicU64,
    pub process_calls: AtomicU64,
    active: Arc<AtomicUsize>,
    max_active: Arc<AtomicUsize>,
}

impl TestModule {
    pub fn new(name: &str, behavior: Behavior) -> Self {
        Self {
            name: name.to_string(),
            priority: 100,
            critical: true,
            fail_init: false,
            timeout: None,
            behavior,
            order: None,
            init_delay: Duration::ZERO,
            journal: None,
            init_calls: AtomicU64::new(0),
            ready_calls: AtomicU64::new(0),
            cleanup_calls: AtomicU64::new(0),
            process_calls: AtomicU64::new(0),
            active: Arc::new(AtomicUsize::new(0)),
            max_active: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn non_critical(mut self) -> Self {
        self.critical = false;
        self
    }

    pub fn failing_init(mut self) -> Self {
        self.fail_init = true;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn recording(mut self, order: &Arc<Mutex<Vec<String>>>) -> Self {
        self.order = Some(Arc::clone(order));
        self
    }

    /// Block in `initialize` for `delay`, journaling setup and teardown
    pub fn slow_init(mut self, delay: Duration, journal: &Arc<Mutex<Vec<&'static str>>>) -> Self {
        self.init_delay = delay;
        self.journal = Some(Arc::clone(journal));
        self
    }

    fn note(&self, event: &'static str) {
        if let Some(journal) = &self.journal {
            journal.lock().push(event);
        }
    }

    /// Calls currently inside `process`
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> u64 {
        self.process_calls.load(Ordering::SeqCst)
    }

    pub fn cleanups(&self) -> u64 {
        self.cleanup_calls.load(Ordering::SeqCst)
    }
}

/// Decrements the active gauge even when the call is cancelled
struct ActiveGuard(Arc<AtomicUsize>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Module for TestModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn is_critical(&self) -> bool {
        self.critical
    }

    fn initialize(&self, _context: &SharedContext) -> Result<(), InitError> {
        self.init_calls.fetch_add(1, Ordering::SeqCst);
        self.note("init_start");
        if !self.init_delay.is_zero() {
            std::thread::sleep(self.init_delay);
        }
        if self.fail_init {
            return Err(InitError::Failed("scripted init failure".to_string()));
        }
        self.note("init_end");
        Ok(())
    }

    fn on_camera_ready(&self, _camera: &camera_plugins::CameraCapability) {
        self.ready_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn cleanup(&self) {
        self.note("cleanup");
        self.cleanup_calls.fetch_add(1, Ordering::SeqCst);
    }
}

impl ProcessingModule for TestModule {
    fn process<'a>(&'a self, frame: &'a Frame) -> BoxFuture<'a, ProcessingResult> {
        Box::pin(async move {
            self.process_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(order) = &self.order {
                order.lock().push(self.name.clone());
            }
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);
            let _guard = ActiveGuard(Arc::clone(&self.active));

            match &self.behavior {
                Behavior::NoAction => ProcessingResult::NoAction,
                Behavior::Succeed => ProcessingResult::Success(Payload::Measurement {
                    name: self.name.clone(),
                    value: frame.sequence() as f64,
                }),
                Behavior::Fail => ProcessingResult::Error(ProcessError::Failed(format!(
                    "{} rejected frame {}",
                    self.name,
                    frame.sequence()
                ))),
                Behavior::Panic => panic!("{} exploded", self.name),
                Behavior::Sleep(delay) => {
                    tokio::time::sleep(*delay).await;
                    ProcessingResult::NoAction
                }
                Behavior::Gated(gate) => {
                    if let Ok(permit) = gate.acquire().await {
                        permit.forget();
                    }
                    ProcessingResult::NoAction
                }
                Behavior::Hang => futures::future::pending().await,
            }
        })
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

/// Engine over `camera` with a memory sink and a quiet memory probe
pub fn engine(camera: &SimulatedCamera, config: EngineConfig) -> (Engine, Arc<MemorySink>) {
    let log = Arc::new(MemorySink::new());
    let engine = Engine::builder(Arc::new(camera.clone()))
        .config(config)
        .log_sink(log.clone())
        .memory_probe(Arc::new(FixedMemoryProbe::new(0, GIB)))
        .build()
        .expect("engine builds");
    (engine, log)
}

/// Frame not tied to any provider, counting its release
pub fn frame(sequence: u64, released: &Arc<AtomicU64>) -> Frame {
    let format = PixelFormat::Gray8;
    let info = FrameInfo {
        sequence,
        timestamp: Duration::from_millis(sequence * 33),
        rotation: SensorRotation::None,
        width: 16,
        height: 16,
        format,
        captured_at: Instant::now(),
    };
    let released = Arc::clone(released);
    Frame::new(info, FrameData::from_vec(vec![128; format.frame_size(16, 16)])).with_release(
        move || {
            released.fetch_add(1, Ordering::SeqCst);
        },
    )
}

/// Poll `condition` until it holds or two seconds pass
pub async fn wait_until<F: Fn() -> bool>(condition: F) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    condition()
}
