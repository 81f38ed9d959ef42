// SPDX-License-Identifier: MPL-2.0

//! Integration tests for the resource monitor

mod common;

use camera_plugins::backends::camera::CameraConfig;
use camera_plugins::backends::simulated::SimulatedCamera;
use camera_plugins::config::EngineConfig;
use camera_plugins::constants::PressureLevel;
use camera_plugins::engine::Engine;
use camera_plugins::logging::MemorySink;
use camera_plugins::monitor::{Evictable, FixedMemoryProbe};
use camera_plugins::plugins::{ModuleState, Plugin};
use common::{Behavior, GIB, TestModule, frame};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

struct Thumbnails {
    bytes: AtomicU64,
}

impl Evictable for Thumbnails {
    fn name(&self) -> &str {
        "thumbnails"
    }

    fn evict(&self) -> u64 {
        self.bytes.swap(0, Ordering::SeqCst)
    }
}

fn quiet_config() -> EngineConfig {
    let mut config = EngineConfig::default().with_max_workers(4);
    // Keep the background sampler out of the way
    config.monitor.sample_interval_ms = 10_000;
    config
}

fn build(
    camera: &SimulatedCamera,
    config: EngineConfig,
    probe: &Arc<FixedMemoryProbe>,
) -> (Engine, Arc<MemorySink>) {
    let log = Arc::new(MemorySink::new());
    let engine = Engine::builder(Arc::new(camera.clone()))
        .config(config)
        .log_sink(log.clone())
        .memory_probe(probe.clone())
        .build()
        .unwrap();
    (engine, log)
}

#[tokio::test]
async fn test_memory_pressure_sheds_load_and_recovers() {
    let camera = SimulatedCamera::new(1);
    let probe = Arc::new(FixedMemoryProbe::new(GIB / 10, GIB));
    let (engine, log) = build(&camera, quiet_config(), &probe);
    engine
        .register_plugin(Plugin::processing(Arc::new(TestModule::new("core", Behavior::NoAction))))
        .unwrap();
    engine
        .register_plugin(Plugin::processing(Arc::new(
            TestModule::new("extra", Behavior::NoAction).non_critical(),
        )))
        .unwrap();
    let thumbnails = Arc::new(Thumbnails {
        bytes: AtomicU64::new(4096),
    });
    let cache: Arc<dyn Evictable> = thumbnails.clone();
    engine.caches().register(&cache);

    engine.initialize().await.unwrap();
    engine.bind_camera(CameraConfig::new(0)).await.unwrap();

    let sample = engine.check_resources();
    assert_eq!(sample.level, PressureLevel::Normal);
    assert!(!sample.shedding);

    probe.set_used(GIB / 10 * 9);
    let sample = engine.check_resources();
    assert_eq!(sample.level, PressureLevel::Critical);
    assert!(sample.shedding);
    assert_eq!(sample.evicted_bytes, 4096);
    assert_eq!(engine.dispatcher().capacity(), 1);
    assert_eq!(log.count("resource exhaustion"), 1);

    // Still critical: no second event
    engine.check_resources();
    assert_eq!(log.count("resource exhaustion"), 1);

    // Between the marks the mode holds
    probe.set_used(GIB / 100 * 80);
    let sample = engine.check_resources();
    assert_eq!(sample.level, PressureLevel::Elevated);
    assert!(sample.shedding);

    probe.set_used(GIB / 2);
    let sample = engine.check_resources();
    assert!(!sample.shedding);
    assert_eq!(engine.dispatcher().capacity(), 2);
    assert_eq!(log.count("load restored"), 1);

    engine.cleanup().await;
}

#[tokio::test]
async fn test_slow_module_is_flagged_once() {
    let camera = SimulatedCamera::new(1);
    let probe = Arc::new(FixedMemoryProbe::new(0, GIB));
    let mut config = quiet_config();
    config.dispatch.frame_budget_ms = 5;
    config.monitor.min_latency_samples = 3;
    let (engine, log) = build(&camera, config, &probe);
    engine
        .register_plugin(Plugin::processing(Arc::new(TestModule::new(
            "slow",
            Behavior::Sleep(Duration::from_millis(15)),
        ))))
        .unwrap();
    engine.initialize().await.unwrap();
    engine.bind_camera(CameraConfig::new(0)).await.unwrap();

    let released = Arc::new(AtomicU64::new(0));
    for sequence in 0..3 {
        engine.dispatcher().dispatch(frame(sequence, &released)).await.unwrap();
    }

    let sample = engine.check_resources();
    assert_eq!(sample.slow_modules, vec!["slow".to_string()]);
    assert!(sample.disabled_modules.is_empty());
    engine.check_resources();
    assert_eq!(log.count("module slow"), 1);
    assert_eq!(engine.plugin_state("slow"), Some(ModuleState::Ready));

    engine.cleanup().await;
}

#[tokio::test]
async fn test_slow_module_can_be_disabled() {
    let camera = SimulatedCamera::new(1);
    let probe = Arc::new(FixedMemoryProbe::new(0, GIB));
    let mut config = quiet_config();
    config.dispatch.frame_budget_ms = 5;
    config.monitor.min_latency_samples = 3;
    config.monitor.auto_disable_slow = true;
    let (engine, log) = build(&camera, config, &probe);
    let slow = Arc::new(TestModule::new("slow", Behavior::Sleep(Duration::from_millis(15))));
    let quick = Arc::new(TestModule::new("quick", Behavior::NoAction));
    engine.register_plugin(Plugin::processing(slow.clone())).unwrap();
    engine.register_plugin(Plugin::processing(quick)).unwrap();
    engine.initialize().await.unwrap();
    engine.bind_camera(CameraConfig::new(0)).await.unwrap();
    assert_eq!(engine.dispatcher().capacity(), 2);

    let released = Arc::new(AtomicU64::new(0));
    for sequence in 0..3 {
        engine.dispatcher().dispatch(frame(sequence, &released)).await.unwrap();
    }

    let sample = engine.check_resources();
    assert_eq!(sample.disabled_modules, vec!["slow".to_string()]);
    assert_eq!(engine.plugin_state("slow"), Some(ModuleState::Disabled));
    assert_eq!(engine.plugin_state("quick"), Some(ModuleState::Ready));
    assert_eq!(slow.cleanups(), 1);
    assert_eq!(log.count("module disabled"), 1);
    assert_eq!(engine.dispatcher().capacity(), 1);

    engine.cleanup().await;
}
