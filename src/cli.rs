// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands
//!
//! This module provides command-line functionality for:
//! - Listing the simulated cameras
//! - Running the engine against a simulated camera
//! - Printing the engine configuration

use camera_plugins::backends::camera::{CameraConfig, CameraProvider};
use camera_plugins::backends::recognition::CallbackBridge;
use camera_plugins::backends::simulated::{SimulatedCamera, SimulatedRecognizer};
use camera_plugins::config::EngineConfig;
use camera_plugins::constants::settings_keys;
use camera_plugins::engine::Engine;
use camera_plugins::plugins::tasks::lens::LENS_CONTROL;
use camera_plugins::plugins::tasks::{DetectionOverlay, ExposureAnalyzer, LensControl, ScannerModule};
use camera_plugins::plugins::Plugin;
use camera_plugins::settings::{JsonFileBackend, SettingsStore};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

const SCANNER: &str = "scanner";

/// Options for the `simulate` command
pub struct SimulateOptions {
    pub camera: usize,
    pub cameras: usize,
    pub fps: u32,
    pub seconds: u64,
    pub workers: Option<usize>,
    pub config: Option<PathBuf>,
    pub settings: Option<PathBuf>,
    pub analysis: bool,
}

/// List all simulated cameras
pub fn list_cameras(count: usize) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = tokio::runtime::Runtime::new()?;
    let cameras = runtime.block_on(SimulatedCamera::new(count).enumerate())?;

    if cameras.is_empty() {
        println!("No cameras found.");
        return Ok(());
    }

    println!("Available cameras:");
    println!();
    for camera in &cameras {
        println!("  [{}] {} ({:?})", camera.index, camera.name, camera.facing);
        println!(
            "      Max zoom: {:.1}x, torch: {}",
            camera.max_zoom,
            if camera.has_torch { "yes" } else { "no" }
        );
    }

    Ok(())
}

/// Print the effective configuration as JSON
pub fn print_config(path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let path = path.or_else(EngineConfig::default_path);
    let config = EngineConfig::load(path.as_deref())?;
    if let Some(path) = &path {
        println!("# {}", path.display());
    }
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

/// Stream from a simulated camera through the built-in modules
pub fn simulate(options: SimulateOptions) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run_simulation(options))
}

async fn run_simulation(options: SimulateOptions) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = options.config.or_else(EngineConfig::default_path);
    let mut config = EngineConfig::load(config_path.as_deref())?;
    if let Some(workers) = options.workers {
        config = config.with_max_workers(workers);
    }

    let settings = match options.settings {
        Some(path) => SettingsStore::open(JsonFileBackend::new(path))?,
        None => SettingsStore::new(),
    };

    let camera = SimulatedCamera::with_fps(options.cameras, options.fps);
    let engine = Engine::builder(Arc::new(camera.clone()))
        .config(config)
        .settings(settings)
        .build()?;

    let overlay = Arc::new(DetectionOverlay::default());
    engine.register_plugin(Plugin::control(Arc::new(LensControl::new())))?;
    engine.register_plugin(Plugin::processing(Arc::new(ScannerModule::new(
        SCANNER,
        CallbackBridge::new(SimulatedRecognizer::new(Duration::from_millis(8)).failing_every(97)),
    ))))?;
    engine.register_plugin(Plugin::processing(Arc::new(ExposureAnalyzer::new())))?;
    engine.register_plugin(Plugin::overlay(Arc::clone(&overlay)))?;

    let cameras = engine.initialize().await?;
    println!("Engine {} with {} camera(s)", engine.version(), cameras.len());

    let bind_config = CameraConfig::new(options.camera).with_analysis(options.analysis);
    let capability = engine.bind_camera(bind_config).await?;
    println!(
        "Bound {} (session {})",
        capability.descriptor().name,
        capability.session_id()
    );

    engine.settings().set(settings_keys::ZOOM, 2.0)?;
    engine.settings().set(settings_keys::TORCH, true)?;

    let started = Instant::now();
    tokio::time::sleep(Duration::from_secs(options.seconds)).await;
    let resources = engine.check_resources();

    let modules: serde_json::Map<String, serde_json::Value> = engine
        .registry()
        .names()
        .into_iter()
        .map(|name| {
            let state = engine
                .plugin_state(&name)
                .map(|s| s.as_str())
                .unwrap_or("unknown");
            (name, serde_json::Value::from(state))
        })
        .collect();
    let luma = engine.settings().get(settings_keys::MEAN_LUMA);
    let lens_attached = engine
        .get_plugin::<LensControl>(LENS_CONTROL)
        .is_some_and(|lens| lens.is_attached());

    engine.cleanup().await;
    let elapsed = started.elapsed();
    let stats = engine.stats();

    let summary = serde_json::json!({
        "elapsed_secs": elapsed.as_secs_f64(),
        "frames_emitted": camera.emitted(),
        "frames_released": camera.released(),
        "dispatch": stats,
        "resources": resources,
        "modules": modules,
        "mean_luma": luma,
        "overlay": {
            "latest_sequence": overlay.current().map(|r| r.sequence),
            "discarded": overlay.discarded(),
        },
        "controls": camera.control_log().len(),
        "lens_attached": lens_attached,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(())
}
