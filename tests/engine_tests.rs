// SPDX-License-Identifier: MPL-2.0

//! Integration tests for the engine façade

mod common;

use camera_plugins::backends::camera::{CameraConfig, ControlRequest};
use camera_plugins::backends::simulated::SimulatedCamera;
use camera_plugins::config::EngineConfig;
use camera_plugins::constants::settings_keys;
use camera_plugins::engine::BindState;
use camera_plugins::errors::{BindError, LookupError, ModuleError, RegisterError};
use camera_plugins::plugins::tasks::exposure::EXPOSURE_ANALYZER;
use camera_plugins::plugins::tasks::lens::LENS_CONTROL;
use camera_plugins::plugins::tasks::overlay::DETECTION_OVERLAY;
use camera_plugins::plugins::tasks::{DetectionOverlay, ExposureAnalyzer, LensControl};
use camera_plugins::plugins::{ModuleState, Plugin};
use common::{Behavior, TestModule, engine, frame, wait_until};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[tokio::test]
async fn test_modules_run_in_priority_order_and_failures_are_isolated() {
    let camera = SimulatedCamera::new(1);
    let (engine, _log) = engine(&camera, EngineConfig::default());
    let order = Arc::new(Mutex::new(Vec::new()));

    let a = Arc::new(TestModule::new("a", Behavior::Succeed).priority(10).recording(&order));
    let b = Arc::new(TestModule::new("b", Behavior::Fail).priority(5).recording(&order));
    let c = Arc::new(TestModule::new("c", Behavior::NoAction).priority(20).recording(&order));
    engine.register_plugin(Plugin::processing(a.clone())).unwrap();
    engine.register_plugin(Plugin::processing(b.clone())).unwrap();
    engine.register_plugin(Plugin::processing(c.clone())).unwrap();

    engine.initialize().await.unwrap();
    engine.bind_camera(CameraConfig::new(0)).await.unwrap();

    let released = Arc::new(AtomicU64::new(0));
    let report = engine.dispatcher().dispatch(frame(1, &released)).await.unwrap();

    assert_eq!(report.module_order(), vec!["b", "a", "c"]);
    assert_eq!(*order.lock(), vec!["b", "a", "c"]);
    assert_eq!(report.len(), 3);
    assert_eq!(report.errors(), 1);
    assert!(report.get("b").unwrap().result.is_error());
    assert_eq!(released.load(Ordering::SeqCst), 1);

    assert_eq!(engine.plugin_state("b"), Some(ModuleState::Error));
    assert_eq!(engine.plugin_state("a"), Some(ModuleState::Ready));

    engine.cleanup().await;
}

#[tokio::test]
async fn test_failed_bind_falls_back_once() {
    let camera = SimulatedCamera::new(3);
    camera.fail_bind(2);
    let (engine, log) = engine(&camera, EngineConfig::default());
    engine.initialize().await.unwrap();

    let capability = engine.bind_camera(CameraConfig::new(2)).await.unwrap();

    assert_eq!(capability.descriptor().index, 0);
    assert_eq!(camera.bind_attempts(), vec![2, 0]);
    assert_eq!(engine.bind_state(), BindState::Bound { camera_index: 0 });
    assert_eq!(log.count("camera fallback"), 1);

    engine.cleanup().await;
}

#[tokio::test]
async fn test_fallback_failure_is_terminal() {
    let camera = SimulatedCamera::new(3);
    camera.fail_bind(2);
    camera.fail_bind(0);
    let (engine, log) = engine(&camera, EngineConfig::default());
    engine.initialize().await.unwrap();

    let err = engine.bind_camera(CameraConfig::new(2)).await.unwrap_err();

    assert!(matches!(
        err,
        BindError::FallbackExhausted {
            requested: 2,
            fallback: 0,
            ..
        }
    ));
    assert!(err.is_terminal());
    assert_eq!(camera.bind_attempts(), vec![2, 0]);
    assert_eq!(engine.bind_state(), BindState::Failed { requested: 2 });
    assert_eq!(log.count("camera bind failed"), 1);
    assert!(!camera.is_streaming());

    engine.cleanup().await;
}

#[tokio::test]
async fn test_invalid_camera_index_uses_fallback() {
    let camera = SimulatedCamera::new(2);
    let (engine, _log) = engine(&camera, EngineConfig::default());
    engine.initialize().await.unwrap();

    let capability = engine.bind_camera(CameraConfig::new(7)).await.unwrap();

    assert_eq!(capability.descriptor().index, 0);
    // The provider never sees the invalid index
    assert_eq!(camera.bind_attempts(), vec![0]);

    engine.cleanup().await;
}

#[tokio::test]
async fn test_bind_before_initialize_is_rejected() {
    let camera = SimulatedCamera::new(1);
    let (engine, _log) = engine(&camera, EngineConfig::default());

    let err = engine.bind_camera(CameraConfig::new(0)).await.unwrap_err();

    assert!(matches!(err, BindError::NotInitialized));
    assert!(camera.bind_attempts().is_empty());
}

#[tokio::test]
async fn test_rebind_cleans_up_previous_session() {
    let camera = SimulatedCamera::new(2);
    let (engine, _log) = engine(&camera, EngineConfig::default());
    let module = Arc::new(TestModule::new("m", Behavior::NoAction));
    engine.register_plugin(Plugin::processing(module.clone())).unwrap();
    engine.initialize().await.unwrap();

    engine.bind_camera(CameraConfig::new(0)).await.unwrap();
    engine.bind_camera(CameraConfig::new(1)).await.unwrap();

    assert_eq!(module.init_calls.load(Ordering::SeqCst), 2);
    assert_eq!(module.cleanups(), 1);
    assert_eq!(camera.unbind_count(), 1);
    assert_eq!(engine.capability().unwrap().descriptor().index, 1);

    engine.cleanup().await;
    assert_eq!(module.cleanups(), 2);
}

#[tokio::test]
async fn test_late_registration_joins_bound_session() {
    let camera = SimulatedCamera::new(1);
    let (engine, _log) = engine(&camera, EngineConfig::default().with_max_workers(4));
    let early = Arc::new(TestModule::new("early", Behavior::NoAction));
    engine.register_plugin(Plugin::processing(early)).unwrap();
    engine.initialize().await.unwrap();
    engine.bind_camera(CameraConfig::new(0)).await.unwrap();
    assert_eq!(engine.dispatcher().capacity(), 1);

    let late = Arc::new(TestModule::new("late", Behavior::Succeed).priority(1));
    engine.register_plugin(Plugin::processing(late.clone())).unwrap();

    assert_eq!(engine.plugin_state("late"), Some(ModuleState::Ready));
    assert_eq!(late.init_calls.load(Ordering::SeqCst), 1);
    assert_eq!(late.ready_calls.load(Ordering::SeqCst), 1);
    assert_eq!(engine.dispatcher().capacity(), 2);

    let released = Arc::new(AtomicU64::new(0));
    let report = engine.dispatcher().dispatch(frame(1, &released)).await.unwrap();
    assert_eq!(report.module_order(), vec!["late", "early"]);

    engine.cleanup().await;
}

#[tokio::test]
async fn test_unbind_waits_for_late_initialization() {
    let camera = SimulatedCamera::new(1);
    let (engine, log) = engine(&camera, EngineConfig::default());
    let engine = Arc::new(engine);
    engine.initialize().await.unwrap();
    engine.bind_camera(CameraConfig::new(0)).await.unwrap();

    let journal = Arc::new(Mutex::new(Vec::new()));
    let late = Arc::new(
        TestModule::new("late", Behavior::NoAction)
            .slow_init(Duration::from_millis(300), &journal),
    );
    let registering = {
        let engine = Arc::clone(&engine);
        let plugin = Plugin::processing(late.clone());
        std::thread::spawn(move || engine.register_plugin(plugin))
    };
    assert!(wait_until(|| journal.lock().first() == Some(&"init_start")).await);

    engine.unbind_camera().await;
    registering.join().unwrap().unwrap();
    engine.cleanup().await;

    assert_eq!(*journal.lock(), vec!["init_start", "init_end", "cleanup"]);
    assert_eq!(late.cleanups(), 1);
    assert_eq!(engine.plugin_state("late"), Some(ModuleState::Uninitialized));
    assert_eq!(log.count("cleanup deferred"), 0);
}

#[tokio::test]
async fn test_duplicate_name_is_rejected_until_disabled() {
    let camera = SimulatedCamera::new(1);
    let (engine, _log) = engine(&camera, EngineConfig::default());
    let first = Arc::new(TestModule::new("dup", Behavior::NoAction));
    engine.register_plugin(Plugin::processing(first.clone())).unwrap();

    let err = engine
        .register_plugin(Plugin::processing(Arc::new(TestModule::new("dup", Behavior::NoAction))))
        .unwrap_err();
    assert_eq!(err, RegisterError::DuplicateName("dup".to_string()));

    engine.disable_plugin("dup").unwrap();
    assert_eq!(engine.plugin_state("dup"), Some(ModuleState::Disabled));
    engine
        .register_plugin(Plugin::processing(Arc::new(TestModule::new("dup", Behavior::NoAction))))
        .unwrap();
    assert_eq!(engine.plugin_state("dup"), Some(ModuleState::Uninitialized));
}

#[tokio::test]
async fn test_failed_initialization_is_cleaned_up_and_skipped() {
    let camera = SimulatedCamera::new(1);
    let (engine, log) = engine(&camera, EngineConfig::default());
    let broken = Arc::new(TestModule::new("broken", Behavior::Succeed).failing_init());
    let healthy = Arc::new(TestModule::new("healthy", Behavior::NoAction));
    engine.register_plugin(Plugin::processing(broken.clone())).unwrap();
    engine.register_plugin(Plugin::processing(healthy.clone())).unwrap();
    engine.initialize().await.unwrap();
    engine.bind_camera(CameraConfig::new(0)).await.unwrap();

    assert_eq!(engine.plugin_state("broken"), Some(ModuleState::Error));
    assert_eq!(broken.cleanups(), 1);
    assert_eq!(log.count("initialization failed"), 1);

    let released = Arc::new(AtomicU64::new(0));
    let report = engine.dispatcher().dispatch(frame(1, &released)).await.unwrap();
    assert_eq!(report.module_order(), vec!["healthy"]);
    assert_eq!(broken.calls(), 0);

    engine.cleanup().await;
    assert_eq!(broken.cleanups(), 1);
}

#[tokio::test]
async fn test_overlay_double_mount_is_contract_violation() {
    let camera = SimulatedCamera::new(1);
    let (engine, _log) = engine(&camera, EngineConfig::default());
    let overlay = Arc::new(DetectionOverlay::default());
    engine.register_plugin(Plugin::overlay(overlay.clone())).unwrap();
    engine.initialize().await.unwrap();
    engine.bind_camera(CameraConfig::new(0)).await.unwrap();

    // Binding mounts the view on the overlay's mount point
    assert!(overlay.is_mounted());
    assert_eq!(overlay.mount_count(), 1);

    let err = engine.mount_overlay(DETECTION_OVERLAY).unwrap_err();
    assert!(matches!(err, ModuleError::ContractViolation { .. }));
    assert_eq!(overlay.mount_count(), 1);

    engine.unmount_overlay(DETECTION_OVERLAY).unwrap();
    assert!(!overlay.is_mounted());
    engine.mount_overlay(DETECTION_OVERLAY).unwrap();
    assert_eq!(overlay.mount_count(), 2);
    assert!(matches!(
        engine.mount_overlay(DETECTION_OVERLAY),
        Err(ModuleError::ContractViolation { .. })
    ));

    engine.cleanup().await;
    assert!(!overlay.is_mounted());
}

#[tokio::test]
async fn test_mounting_processing_module_is_wrong_kind() {
    let camera = SimulatedCamera::new(1);
    let (engine, _log) = engine(&camera, EngineConfig::default());
    engine
        .register_plugin(Plugin::processing(Arc::new(ExposureAnalyzer::new())))
        .unwrap();
    engine.initialize().await.unwrap();
    engine.bind_camera(CameraConfig::new(0)).await.unwrap();

    let err = engine.mount_overlay(EXPOSURE_ANALYZER).unwrap_err();
    assert!(matches!(err, ModuleError::WrongKind { .. }));

    engine.cleanup().await;
}

#[tokio::test]
async fn test_cleanup_leaves_no_module_running() {
    let camera = SimulatedCamera::new(1);
    let (engine, _log) = engine(&camera, EngineConfig::default());
    let stuck = Arc::new(TestModule::new("stuck", Behavior::Hang));
    engine.register_plugin(Plugin::processing(stuck.clone())).unwrap();
    engine.initialize().await.unwrap();
    assert!(engine.monitor().is_running());
    engine.bind_camera(CameraConfig::new(0)).await.unwrap();

    assert!(camera.push_frame());
    assert!(wait_until(|| stuck.active() == 1).await);

    engine.cleanup().await;

    assert!(!engine.monitor().is_running());
    assert_eq!(stuck.active(), 0);
    assert_eq!(stuck.cleanups(), 1);
    assert_eq!(engine.dispatcher().in_flight(), 0);
    assert_eq!(camera.released(), camera.emitted());
    assert!(!camera.is_streaming());
    assert_eq!(engine.bind_state(), BindState::ShutDown);

    let err = engine
        .register_plugin(Plugin::processing(Arc::new(TestModule::new("new", Behavior::NoAction))))
        .unwrap_err();
    assert_eq!(err, RegisterError::EngineShutDown);
    assert!(matches!(
        engine.bind_camera(CameraConfig::new(0)).await,
        Err(BindError::ShutDown)
    ));
}

#[tokio::test]
async fn test_typed_lookup() {
    let camera = SimulatedCamera::new(1);
    let (engine, _log) = engine(&camera, EngineConfig::default());
    engine
        .register_plugin(Plugin::processing(Arc::new(ExposureAnalyzer::new())))
        .unwrap();

    assert!(engine.get_plugin::<ExposureAnalyzer>(EXPOSURE_ANALYZER).is_some());
    assert!(engine.get_plugin::<LensControl>(EXPOSURE_ANALYZER).is_none());
    assert!(matches!(
        engine.plugin::<LensControl>(EXPOSURE_ANALYZER),
        Err(LookupError::WrongType { .. })
    ));
    assert!(matches!(
        engine.plugin::<ExposureAnalyzer>("missing"),
        Err(LookupError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_analysis_disabled_keeps_processing_modules_unbound() {
    let camera = SimulatedCamera::new(1);
    let (engine, log) = engine(&camera, EngineConfig::default());
    let analyzer = Arc::new(TestModule::new("analyzer", Behavior::NoAction));
    engine.register_plugin(Plugin::processing(analyzer.clone())).unwrap();
    engine
        .register_plugin(Plugin::control(Arc::new(LensControl::new())))
        .unwrap();
    engine.initialize().await.unwrap();

    engine
        .bind_camera(CameraConfig::new(0).with_analysis(false))
        .await
        .unwrap();

    assert_eq!(engine.plugin_state("analyzer"), Some(ModuleState::Uninitialized));
    assert_eq!(analyzer.init_calls.load(Ordering::SeqCst), 0);
    assert_eq!(engine.plugin_state(LENS_CONTROL), Some(ModuleState::Ready));
    assert!(!camera.is_streaming());
    assert_eq!(log.count("module skipped"), 1);

    engine.cleanup().await;
    assert_eq!(analyzer.cleanups(), 0);
}

#[tokio::test]
async fn test_lens_control_writes_are_applied_in_order() {
    let camera = SimulatedCamera::new(1);
    let (engine, _log) = engine(&camera, EngineConfig::default());
    let lens = Arc::new(LensControl::new());
    engine.register_plugin(Plugin::control(lens.clone())).unwrap();
    engine.initialize().await.unwrap();
    engine.bind_camera(CameraConfig::new(0)).await.unwrap();
    assert!(lens.is_attached());

    let settings = engine.settings();
    settings.set(settings_keys::ZOOM, 2.0).unwrap();
    settings.set(settings_keys::TORCH, true).unwrap();
    // Beyond the lens range, clamped to its maximum
    settings.set(settings_keys::ZOOM, 20.0).unwrap();

    assert!(wait_until(|| camera.control_log().len() == 3).await);
    assert_eq!(
        camera.control_log(),
        vec![
            ControlRequest::Zoom(2.0),
            ControlRequest::Torch(true),
            ControlRequest::Zoom(8.0),
        ]
    );

    engine.cleanup().await;
    assert!(!lens.is_attached());

    // No camera: nothing reaches the hardware
    settings.set(settings_keys::ZOOM, 3.0).unwrap();
    assert_eq!(camera.control_log().len(), 3);
}

#[tokio::test]
async fn test_overlay_receives_scanner_results() {
    use camera_plugins::backends::recognition::CallbackBridge;
    use camera_plugins::backends::simulated::SimulatedRecognizer;
    use camera_plugins::plugins::tasks::ScannerModule;

    let camera = SimulatedCamera::new(1);
    let (engine, _log) = engine(&camera, EngineConfig::default());
    let overlay = Arc::new(DetectionOverlay::default());
    engine
        .register_plugin(Plugin::processing(Arc::new(ScannerModule::new(
            "scanner",
            CallbackBridge::new(SimulatedRecognizer::new(Duration::ZERO)),
        ))))
        .unwrap();
    engine.register_plugin(Plugin::overlay(overlay.clone())).unwrap();
    engine.initialize().await.unwrap();
    engine.bind_camera(CameraConfig::new(0)).await.unwrap();

    let released = Arc::new(AtomicU64::new(0));
    engine.dispatcher().dispatch(frame(4, &released)).await.unwrap();

    let current = overlay.current().expect("overlay got a result");
    assert_eq!(current.sequence, 4);
    assert_eq!(current.module, "scanner");

    engine.cleanup().await;
}
