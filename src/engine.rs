// SPDX-License-Identifier: MPL-2.0

//! Engine façade
//!
//! The engine owns the camera session, the module registry, the dispatcher
//! and the resource monitor. It is the only component that touches the raw
//! camera handle.
//!
//! # Binding
//!
//! `bind_camera` always tears down the previous session first:
//!
//! 1. Stop admitting frames and cancel in-flight work
//! 2. Wait for the workers to drain
//! 3. Unmount views and clean up every module
//! 4. Release the camera
//!
//! If the new camera cannot be bound, one attempt is made with the
//! configured fallback camera. A second failure is terminal.

use crate::backends::camera::{
    CameraCapability, CameraConfig, CameraDescriptor, CameraProvider, CameraSession, Frame,
    FrameCallback,
};
use crate::config::EngineConfig;
use crate::constants::{DRAIN_TIMEOUT, PREVIEW_MOUNT_POINT, app_info};
use crate::errors::{BindError, EngineError, LookupError, ModuleError, RegisterError};
use crate::logging::{EventLevel, LogEvent, LogSink, TracingSink};
use crate::monitor::{CacheRegistry, MemoryProbe, MonitorSample, ProcMemoryProbe, ResourceMonitor};
use crate::plugins::dispatcher::{DispatchStats, Dispatcher};
use crate::plugins::registry::BoundSession;
use crate::plugins::{ModuleState, Plugin, Registry, SharedContext, StaticViewHost, ViewHost, ViewId};
use crate::settings::SettingsStore;
use parking_lot::Mutex;
use std::any::Any;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Camera binding status, as shown to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindState {
    Unbound,
    Bound { camera_index: usize },
    /// Bind and fallback both failed; the caller must retry or give up
    Failed { requested: usize },
    ShutDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Created,
    Initialized,
    ShutDown,
}

struct ActiveBinding {
    camera_index: usize,
    token: CancellationToken,
    control_task: JoinHandle<()>,
}

/// Builder for [`Engine`]
pub struct EngineBuilder {
    provider: Arc<dyn CameraProvider>,
    config: EngineConfig,
    settings: Option<SettingsStore>,
    log: Option<Arc<dyn LogSink>>,
    views: Option<Arc<dyn ViewHost>>,
    probe: Option<Arc<dyn MemoryProbe>>,
    runtime: Option<Handle>,
}

impl EngineBuilder {
    pub fn new(provider: Arc<dyn CameraProvider>) -> Self {
        Self {
            provider,
            config: EngineConfig::default(),
            settings: None,
            log: None,
            views: None,
            probe: None,
            runtime: None,
        }
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn settings(mut self, settings: SettingsStore) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn log_sink(mut self, log: Arc<dyn LogSink>) -> Self {
        self.log = Some(log);
        self
    }

    pub fn views(mut self, views: Arc<dyn ViewHost>) -> Self {
        self.views = Some(views);
        self
    }

    pub fn memory_probe(mut self, probe: Arc<dyn MemoryProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Runtime for dispatch workers (defaults to the current one)
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn build(self) -> Result<Engine, EngineError> {
        self.config.validate()?;
        let runtime = match self.runtime {
            Some(handle) => handle,
            None => Handle::try_current().map_err(|_| EngineError::NoRuntime)?,
        };

        let log = self.log.unwrap_or_else(|| Arc::new(TracingSink));
        let views = self.views.unwrap_or_else(|| {
            Arc::new(StaticViewHost::new().with_mount_point(PREVIEW_MOUNT_POINT, 1280, 720))
        });
        let settings = self.settings.unwrap_or_default();
        let probe = self.probe.unwrap_or_else(|| Arc::new(ProcMemoryProbe));

        let context = SharedContext::new(settings, Arc::clone(&log), views);
        let registry = Arc::new(Registry::new(
            context.clone(),
            Dispatcher::failure_policy(&self.config.dispatch),
        ));
        let dispatcher = Dispatcher::new(
            Arc::clone(&registry),
            runtime.clone(),
            Arc::clone(&log),
            self.config.dispatch.clone(),
            self.config.monitor.shed_workers,
        );
        let monitor = ResourceMonitor::new(
            self.config.monitor.clone(),
            self.config.dispatch.frame_budget(),
            probe,
            Arc::new(CacheRegistry::new()),
            dispatcher.clone(),
            Arc::clone(&registry),
            Arc::clone(&log),
        );

        Ok(Engine {
            session: CameraSession::new(self.provider),
            registry,
            dispatcher,
            monitor,
            context,
            config: self.config,
            runtime,
            log,
            phase: Mutex::new(Phase::Created),
            bind_state: Mutex::new(BindState::Unbound),
            binding: tokio::sync::Mutex::new(None),
        })
    }
}

/// Plugin orchestration engine
pub struct Engine {
    session: CameraSession,
    registry: Arc<Registry>,
    dispatcher: Dispatcher,
    monitor: ResourceMonitor,
    context: SharedContext,
    config: EngineConfig,
    runtime: Handle,
    log: Arc<dyn LogSink>,
    phase: Mutex<Phase>,
    bind_state: Mutex<BindState>,
    // Serializes bind/unbind/cleanup
    binding: tokio::sync::Mutex<Option<ActiveBinding>>,
}

impl Engine {
    pub fn builder(provider: Arc<dyn CameraProvider>) -> EngineBuilder {
        EngineBuilder::new(provider)
    }

    // ===== Lifecycle =====

    /// Check the camera provider and start the resource monitor
    ///
    /// Returns the cameras the provider offers.
    pub async fn initialize(&self) -> Result<Vec<CameraDescriptor>, EngineError> {
        if self.phase() == Phase::ShutDown {
            return Err(EngineError::ShutDown);
        }
        let cameras = self.session.enumerate().await?;

        self.monitor.start();
        *self.phase.lock() = Phase::Initialized;
        self.emit(
            LogEvent::new(EventLevel::Info, "engine initialized")
                .with("version", app_info::version())
                .with("cameras", cameras.len() as u64)
                .with("max_workers", self.config.dispatch.max_workers as u64),
        );
        Ok(cameras)
    }

    /// Bind a camera, replacing any current session
    ///
    /// On failure one fallback bind to the configured default camera is
    /// attempted. The returned error keeps the provider's cause.
    pub async fn bind_camera(&self, config: CameraConfig) -> Result<CameraCapability, BindError> {
        let mut binding = self.binding.lock().await;
        match self.phase() {
            Phase::Created => return Err(BindError::NotInitialized),
            Phase::ShutDown => return Err(BindError::ShutDown),
            Phase::Initialized => {}
        }

        self.unbind_locked(&mut binding).await;

        let requested = config.camera_index();
        let primary = match self.try_bind(config, &mut binding).await {
            Ok(capability) => return Ok(capability),
            Err(e) => e,
        };

        let fallback = self.config.fallback_camera_index;
        if fallback == requested {
            return Err(self.bind_failed(requested, primary));
        }

        self.emit(
            LogEvent::new(EventLevel::Warn, "camera fallback")
                .with("requested", requested as u64)
                .with("fallback", fallback as u64)
                .with("error", primary.to_string()),
        );

        match self
            .try_bind(config.with_camera_index(fallback), &mut binding)
            .await
        {
            Ok(capability) => Ok(capability),
            Err(fallback_error) => Err(self.bind_failed(
                requested,
                BindError::FallbackExhausted {
                    requested,
                    fallback,
                    primary: Box::new(primary),
                    fallback_error: Box::new(fallback_error),
                },
            )),
        }
    }

    fn bind_failed(&self, requested: usize, error: BindError) -> BindError {
        *self.bind_state.lock() = BindState::Failed { requested };
        self.emit(
            LogEvent::new(EventLevel::Error, "camera bind failed")
                .with("requested", requested as u64)
                .with("error", error.to_string()),
        );
        error
    }

    async fn try_bind(
        &self,
        config: CameraConfig,
        binding: &mut Option<ActiveBinding>,
    ) -> Result<CameraCapability, BindError> {
        let index = config.camera_index();
        let provider_error = |source| BindError::Provider { index, source };

        let cameras = self.session.enumerate().await.map_err(provider_error)?;
        let descriptor = cameras
            .iter()
            .find(|c| c.index == index)
            .cloned()
            .ok_or(BindError::InvalidCameraIndex {
                index,
                available: cameras.len(),
            })?;

        let capability = self
            .session
            .open(&descriptor, config)
            .await
            .map_err(provider_error)?;

        let token = CancellationToken::new();
        let (controls, writer) = match self
            .session
            .control_channel(token.clone(), Arc::clone(&self.log))
        {
            Ok(channel) => channel,
            Err(source) => {
                let _ = self.session.close().await;
                return Err(provider_error(source));
            }
        };
        let control_task = self.runtime.spawn(writer);

        self.context.set_camera(Some(capability.clone()));
        self.registry.bind_all(BoundSession {
            config,
            capability: capability.clone(),
            controls,
            token: token.clone(),
        });
        self.dispatcher.fit_pool();
        self.dispatcher.open(token.clone());
        *binding = Some(ActiveBinding {
            camera_index: index,
            token,
            control_task,
        });

        // Without the analysis use case the provider delivers no frames
        if config.analysis_enabled() {
            let dispatcher = self.dispatcher.clone();
            let on_frame: FrameCallback = Arc::new(move |frame: Frame| {
                dispatcher.submit(frame);
            });
            if let Err(source) = self.session.start_stream(on_frame).await {
                self.unbind_locked(binding).await;
                return Err(provider_error(source));
            }
        }

        *self.bind_state.lock() = BindState::Bound {
            camera_index: index,
        };
        self.emit(
            LogEvent::new(EventLevel::Info, "camera bound")
                .with("camera", descriptor.name.clone())
                .with("index", index as u64)
                .with("session", capability.session_id().to_string())
                .with("workers", self.dispatcher.capacity() as u64),
        );
        Ok(capability)
    }

    async fn unbind_locked(&self, binding: &mut Option<ActiveBinding>) {
        let Some(active) = binding.take() else {
            return;
        };

        self.dispatcher.close();
        active.token.cancel();
        if tokio::time::timeout(DRAIN_TIMEOUT, self.dispatcher.drain())
            .await
            .is_err()
        {
            warn!(
                in_flight = self.dispatcher.in_flight(),
                "Workers did not drain before timeout"
            );
        }
        if let Err(e) = active.control_task.await {
            warn!(error = %e, "Control writer task failed");
        }

        self.registry.unbind_all();
        self.context.set_camera(None);
        if let Err(e) = self.session.close().await {
            warn!(error = %e, "Camera provider failed to unbind");
        }

        *self.bind_state.lock() = BindState::Unbound;
        self.emit(
            LogEvent::new(EventLevel::Info, "camera unbound")
                .with("index", active.camera_index as u64),
        );
    }

    /// Release the camera session, keeping modules registered
    pub async fn unbind_camera(&self) {
        let mut binding = self.binding.lock().await;
        self.unbind_locked(&mut binding).await;
    }

    /// Tear everything down
    ///
    /// Returns only after every worker has drained and every module has been
    /// cleaned up; no module runs after this.
    pub async fn cleanup(&self) {
        let mut binding = self.binding.lock().await;
        if self.phase() == Phase::ShutDown {
            return;
        }
        self.unbind_locked(&mut binding).await;
        self.monitor.stop();

        *self.phase.lock() = Phase::ShutDown;
        *self.bind_state.lock() = BindState::ShutDown;
        let stats = self.dispatcher.stats();
        info!(
            admitted = stats.admitted,
            dropped = stats.dropped,
            completed = stats.completed,
            "Engine shut down"
        );
        self.emit(LogEvent::new(EventLevel::Info, "engine shut down"));
    }

    // ===== Modules =====

    /// Register a module, before or after binding
    pub fn register_plugin(&self, plugin: Plugin) -> Result<(), RegisterError> {
        if self.phase() == Phase::ShutDown {
            return Err(RegisterError::EngineShutDown);
        }
        self.registry.register(plugin)?;
        self.dispatcher.fit_pool();
        Ok(())
    }

    /// Typed lookup, `None` if absent or of another type
    pub fn get_plugin<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        self.registry.lookup::<T>(name).ok()
    }

    /// Typed lookup with the reason for a miss
    pub fn plugin<T: Any + Send + Sync>(&self, name: &str) -> Result<Arc<T>, LookupError> {
        self.registry.lookup::<T>(name)
    }

    /// Disable a module until it is registered again
    pub fn disable_plugin(&self, name: &str) -> Result<(), LookupError> {
        self.registry.disable(name, "disabled by caller")?;
        self.dispatcher.fit_pool();
        Ok(())
    }

    pub fn plugin_state(&self, name: &str) -> Option<ModuleState> {
        self.registry.state(name)
    }

    pub fn mount_overlay(&self, name: &str) -> Result<ViewId, ModuleError> {
        self.registry.mount_overlay(name)
    }

    pub fn unmount_overlay(&self, name: &str) -> Result<(), ModuleError> {
        self.registry.unmount_overlay(name)
    }

    // ===== Accessors =====

    pub fn settings(&self) -> &SettingsStore {
        self.context.settings()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn stats(&self) -> DispatchStats {
        self.dispatcher.stats()
    }

    pub fn bind_state(&self) -> BindState {
        *self.bind_state.lock()
    }

    /// Capability of the bound camera
    pub fn capability(&self) -> Option<CameraCapability> {
        self.context.camera()
    }

    pub fn monitor(&self) -> &ResourceMonitor {
        &self.monitor
    }

    pub fn caches(&self) -> &Arc<CacheRegistry> {
        self.monitor.caches()
    }

    /// Run one resource sampling pass immediately
    pub fn check_resources(&self) -> MonitorSample {
        self.monitor.tick()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn version(&self) -> &'static str {
        app_info::version()
    }

    fn phase(&self) -> Phase {
        *self.phase.lock()
    }

    fn emit(&self, event: LogEvent) {
        self.log.emit(event);
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        // Without `cleanup` we cannot await; at least stop the workers
        self.dispatcher.close();
        if let Ok(binding) = self.binding.try_lock()
            && let Some(active) = &*binding
        {
            active.token.cancel();
            active.control_task.abort();
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("bind_state", &self.bind_state())
            .field("registry", &self.registry)
            .field("dispatcher", &self.dispatcher)
            .finish()
    }
}
