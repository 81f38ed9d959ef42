// SPDX-License-Identifier: MPL-2.0

//! Module registry
//!
//! Owns every registered module, keeps them ordered by priority (ties broken
//! by registration order), and applies lifecycle transitions. Lifecycle
//! callbacks, `cleanup` and log events run after the module's lifecycle lock
//! has been released.

use super::context::{SharedContext, ViewId};
use super::lifecycle::{CallOutcome, Effects, FailurePolicy, Lifecycle, ModuleState};
use super::types::TaggedResult;
use super::{ModuleKind, Plugin, ProcessingModule, Requirements};
use crate::backends::camera::{CameraCapability, CameraConfig, CameraControls};
use crate::constants::monitor::LATENCY_WINDOW;
use crate::errors::{InitError, LookupError, ModuleError, ProcessError, RegisterError};
use crate::logging::{EventLevel, LogEvent};
use crate::monitor::LatencyWindow;
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// One registered module and its bookkeeping
pub(crate) struct Entry {
    pub plugin: Plugin,
    pub name: String,
    pub priority: i32,
    pub critical: bool,
    seq: u64,
    requirements: Requirements,
    lifecycle: Mutex<Lifecycle>,
    latency: Mutex<LatencyWindow>,
    token: Mutex<CancellationToken>,
    view: Mutex<Option<ViewId>>,
    slow_flagged: AtomicBool,
}

impl Entry {
    pub fn state(&self) -> ModuleState {
        self.lifecycle.lock().state()
    }

    pub fn processing(&self) -> Option<Arc<dyn ProcessingModule>> {
        self.plugin.as_processing().cloned()
    }

    /// (p99, samples) of recent `process` calls
    pub fn latency(&self) -> (Option<Duration>, usize) {
        let window = self.latency.lock();
        (window.p99(), window.len())
    }

    /// Mark the module as slow; returns true the first time
    pub fn flag_slow(&self) -> bool {
        !self.slow_flagged.swap(true, Ordering::SeqCst)
    }

    pub fn clear_slow(&self) {
        self.slow_flagged.store(false, Ordering::SeqCst);
    }
}

/// Camera session the registry is bound to
#[derive(Clone)]
pub(crate) struct BoundSession {
    pub config: CameraConfig,
    pub capability: CameraCapability,
    pub controls: CameraControls,
    pub token: CancellationToken,
}

/// Ordered collection of registered modules
pub struct Registry {
    entries: RwLock<Vec<Arc<Entry>>>,
    next_seq: AtomicU64,
    context: SharedContext,
    policy: FailurePolicy,
    session: Mutex<Option<BoundSession>>,
    // Held while modules are bound to or released from a session, so a late
    // registration cannot interleave with unbind
    session_gate: Mutex<()>,
}

impl Registry {
    pub(crate) fn new(context: SharedContext, policy: FailurePolicy) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            next_seq: AtomicU64::new(0),
            context,
            policy,
            session: Mutex::new(None),
            session_gate: Mutex::new(()),
        }
    }

    pub fn context(&self) -> &SharedContext {
        &self.context
    }

    // ===== Registration =====

    /// Add a module
    ///
    /// A name may be reused only once the previous module with that name has
    /// been disabled. If a camera is bound the module is initialized right away.
    pub(crate) fn register(&self, plugin: Plugin) -> Result<(), RegisterError> {
        let name = plugin.name().to_string();
        let module = plugin.module();
        let entry = Arc::new(Entry {
            name: name.clone(),
            priority: module.priority(),
            critical: module.is_critical(),
            seq: self.next_seq.fetch_add(1, Ordering::SeqCst),
            requirements: plugin.requirements(),
            lifecycle: Mutex::new(Lifecycle::default()),
            latency: Mutex::new(LatencyWindow::new(LATENCY_WINDOW)),
            token: Mutex::new(CancellationToken::new()),
            view: Mutex::new(None),
            slow_flagged: AtomicBool::new(false),
            plugin,
        });

        {
            let mut entries = self.entries.write();
            if let Some(pos) = entries.iter().position(|e| e.name == name) {
                if entries[pos].state() != ModuleState::Disabled {
                    return Err(RegisterError::DuplicateName(name));
                }
                entries.remove(pos);
            }
            let at = entries
                .iter()
                .position(|e| (e.priority, e.seq) > (entry.priority, entry.seq))
                .unwrap_or(entries.len());
            entries.insert(at, Arc::clone(&entry));
        }

        info!(
            module = %name,
            kind = %entry.plugin.kind(),
            priority = entry.priority,
            version = entry.plugin.module().version(),
            "Module registered"
        );

        let _gate = self.session_gate.lock();
        let session = self.session.lock().clone();
        if let Some(session) = session {
            self.bind_entry(&entry, &session);
        }
        Ok(())
    }

    // ===== Session binding =====

    /// Initialize every eligible module for a new camera session
    pub(crate) fn bind_all(&self, session: BoundSession) {
        let _gate = self.session_gate.lock();
        *self.session.lock() = Some(session.clone());
        for entry in self.snapshot() {
            self.bind_entry(&entry, &session);
        }
    }

    fn bind_entry(&self, entry: &Arc<Entry>, session: &BoundSession) {
        if !entry.requirements.satisfied_by(&session.config) {
            if entry.state() != ModuleState::Disabled {
                self.emit(
                    LogEvent::new(EventLevel::Info, "module skipped")
                        .module(&entry.name)
                        .with("reason", "camera configuration does not enable a required use case"),
                );
            }
            return;
        }

        let Some(effects) = entry.lifecycle.lock().begin_init() else {
            return;
        };
        self.apply(entry, effects);
        *entry.token.lock() = session.token.child_token();
        entry.latency.lock().clear();
        entry.clear_slow();

        let result = self.initialize_entry(entry, session);
        let ok = result.is_ok();
        if let Err(e) = &result {
            self.emit(
                LogEvent::new(EventLevel::Error, "initialization failed")
                    .module(&entry.name)
                    .with("error", e.to_string()),
            );
        }
        let effects = entry.lifecycle.lock().finish_init(ok);
        self.apply(entry, effects);
    }

    fn initialize_entry(&self, entry: &Arc<Entry>, session: &BoundSession) -> Result<(), InitError> {
        let module = entry.plugin.module();

        // Overlays need their surface before they can do anything else
        let mount_point = match entry.plugin.as_overlay() {
            Some(overlay) => {
                let id = overlay.mount_point();
                let point = self.context.views().mount_point(id).ok_or_else(|| {
                    InitError::MissingMountPoint {
                        module: entry.name.clone(),
                        mount_point: id.to_string(),
                    }
                })?;
                Some(point)
            }
            None => None,
        };

        guarded(&entry.name, "initialize", || module.initialize(&self.context))
            .and_then(|r| r)?;
        guarded(&entry.name, "on_camera_ready", || {
            module.on_camera_ready(&session.capability)
        })?;

        if let Some(control) = entry.plugin.as_control() {
            let controls = session.controls.clone();
            guarded(&entry.name, "attach_controls", || control.attach_controls(controls))?;
        }

        if let (Some(overlay), Some(point)) = (entry.plugin.as_overlay(), mount_point) {
            let view = guarded(&entry.name, "mount_view", || overlay.mount_view(&point))?
                .map_err(|e| InitError::Failed(e.to_string()))?;
            *entry.view.lock() = Some(view);
        }
        Ok(())
    }

    /// End the session: unmount views, clean up, reset to Uninitialized
    ///
    /// Callers must have drained in-flight frames first.
    pub(crate) fn unbind_all(&self) {
        let _gate = self.session_gate.lock();
        if self.session.lock().take().is_none() {
            return;
        }
        for entry in self.snapshot() {
            let (effects, in_flight) = {
                let mut lifecycle = entry.lifecycle.lock();
                (lifecycle.reset(), lifecycle.active())
            };
            if effects.cleanup_deferred {
                self.emit(
                    LogEvent::new(EventLevel::Warn, "cleanup deferred")
                        .module(&entry.name)
                        .with("in_flight", in_flight as u64),
                );
            }
            self.apply(&entry, effects);
        }
    }

    pub(crate) fn is_bound(&self) -> bool {
        self.session.lock().is_some()
    }

    /// Configuration of the bound session
    pub(crate) fn bound_config(&self) -> Option<CameraConfig> {
        self.session.lock().as_ref().map(|s| s.config)
    }

    // ===== Enable / disable =====

    /// Disable a module, cancel its in-flight work and clean it up
    pub(crate) fn disable(&self, name: &str, reason: &str) -> Result<(), LookupError> {
        let entry = self.entry(name)?;
        self.disable_entry(&entry, reason);
        Ok(())
    }

    pub(crate) fn disable_entry(&self, entry: &Arc<Entry>, reason: &str) {
        let effects = entry.lifecycle.lock().disable();
        if effects.transitions.is_empty() {
            return;
        }
        entry.token.lock().cancel();
        self.emit(
            LogEvent::new(EventLevel::Warn, "module disabled")
                .module(&entry.name)
                .with("reason", reason),
        );
        self.apply(entry, effects);
    }

    // ===== Dispatch hooks =====

    /// Claim a module for one `process` call
    ///
    /// Returns the module's cancellation token, or `None` if the module
    /// should be skipped for this frame.
    pub(crate) fn begin_call(&self, entry: &Arc<Entry>) -> Option<CancellationToken> {
        let (effects, token) = {
            let mut lifecycle = entry.lifecycle.lock();
            let effects = lifecycle.begin_call()?;
            (effects, entry.token.lock().clone())
        };
        self.apply(entry, effects);
        Some(token)
    }

    /// Record the end of a `process` call
    ///
    /// Returns true if the call pushed the module over the failure threshold.
    pub(crate) fn end_call(
        &self,
        entry: &Arc<Entry>,
        outcome: CallOutcome,
        elapsed: Duration,
        error: Option<&ProcessError>,
    ) -> bool {
        if outcome != CallOutcome::Cancelled {
            entry.latency.lock().record(elapsed);
        }
        let effects = entry
            .lifecycle
            .lock()
            .end_call(outcome, Instant::now(), self.policy);

        if let Some(error) = error {
            self.emit(
                LogEvent::new(EventLevel::Error, "module failed")
                    .module(&entry.name)
                    .with("error", error.to_string())
                    .with("failures_in_window", effects.failures as u64)
                    .with("elapsed_ms", elapsed.as_millis() as u64),
            );
        }
        if effects.auto_disabled {
            entry.token.lock().cancel();
            self.emit(
                LogEvent::new(EventLevel::Warn, "module disabled")
                    .module(&entry.name)
                    .with("reason", "failure threshold reached")
                    .with("threshold", self.policy.threshold),
            );
        }
        let auto_disabled = effects.auto_disabled;
        self.apply(entry, effects);
        auto_disabled
    }

    /// Deliver a successful result to every mounted overlay
    pub(crate) fn publish_result(&self, result: &TaggedResult) {
        for entry in self.snapshot() {
            let Some(overlay) = entry.plugin.as_overlay() else {
                continue;
            };
            if entry.view.lock().is_none() || entry.state() != ModuleState::Ready {
                continue;
            }
            if guarded(&entry.name, "on_result", || overlay.on_result(result)).is_err() {
                self.emit(
                    LogEvent::new(EventLevel::Warn, "overlay failed")
                        .module(&entry.name)
                        .with("sequence", result.sequence),
                );
            }
        }
    }

    // ===== Overlay views =====

    /// Mount an overlay's view on its mount point
    pub(crate) fn mount_overlay(&self, name: &str) -> Result<ViewId, ModuleError> {
        let entry = self.entry(name).map_err(|e| ModuleError::Failed(e.to_string()))?;
        let overlay = entry.plugin.as_overlay().ok_or_else(|| ModuleError::WrongKind {
            module: name.to_string(),
            expected: ModuleKind::Overlay.as_str(),
        })?;
        if entry.state() != ModuleState::Ready {
            return Err(ModuleError::NotBound(name.to_string()));
        }

        let mut view = entry.view.lock();
        if let Some(existing) = *view {
            return Err(ModuleError::ContractViolation {
                module: name.to_string(),
                detail: format!("view {} is already mounted", existing.get()),
            });
        }
        let point = self
            .context
            .views()
            .mount_point(overlay.mount_point())
            .ok_or_else(|| {
                ModuleError::Failed(format!("mount point '{}' is gone", overlay.mount_point()))
            })?;
        let id = overlay.mount_view(&point)?;
        *view = Some(id);
        Ok(id)
    }

    /// Unmount an overlay's view
    pub(crate) fn unmount_overlay(&self, name: &str) -> Result<(), ModuleError> {
        let entry = self.entry(name).map_err(|e| ModuleError::Failed(e.to_string()))?;
        let overlay = entry.plugin.as_overlay().ok_or_else(|| ModuleError::WrongKind {
            module: name.to_string(),
            expected: ModuleKind::Overlay.as_str(),
        })?;
        let Some(id) = entry.view.lock().take() else {
            return Err(ModuleError::ContractViolation {
                module: name.to_string(),
                detail: "no view is mounted".to_string(),
            });
        };
        overlay.unmount_view(id)
    }

    // ===== Queries =====

    pub fn state(&self, name: &str) -> Option<ModuleState> {
        self.entry(name).ok().map(|e| e.state())
    }

    /// Registered module names in dispatch order
    pub fn names(&self) -> Vec<String> {
        self.entries.read().iter().map(|e| e.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Typed lookup
    pub fn lookup<T: Any + Send + Sync>(&self, name: &str) -> Result<Arc<T>, LookupError> {
        let entry = self.entry(name)?;
        entry
            .plugin
            .as_any()
            .downcast::<T>()
            .map_err(|_| LookupError::WrongType {
                name: name.to_string(),
                expected: std::any::type_name::<T>(),
            })
    }

    /// Processing modules eligible under `config`, for sizing the worker pool
    pub(crate) fn processing_count(&self, config: &CameraConfig) -> usize {
        self.entries
            .read()
            .iter()
            .filter(|e| e.plugin.kind() == ModuleKind::Processing)
            .filter(|e| e.state() != ModuleState::Disabled)
            .filter(|e| e.requirements.satisfied_by(config))
            .count()
    }

    /// Processing modules in dispatch order
    pub(crate) fn processing_pipeline(&self) -> Vec<Arc<Entry>> {
        self.entries
            .read()
            .iter()
            .filter(|e| e.plugin.kind() == ModuleKind::Processing)
            .cloned()
            .collect()
    }

    pub(crate) fn snapshot(&self) -> Vec<Arc<Entry>> {
        self.entries.read().clone()
    }

    fn entry(&self, name: &str) -> Result<Arc<Entry>, LookupError> {
        self.entries
            .read()
            .iter()
            .find(|e| e.name == name)
            .cloned()
            .ok_or_else(|| LookupError::NotFound(name.to_string()))
    }

    // ===== Side effects =====

    fn apply(&self, entry: &Arc<Entry>, effects: Effects) {
        for t in &effects.transitions {
            let level = match (t.from, t.to) {
                (ModuleState::Ready, ModuleState::Processing)
                | (ModuleState::Processing, ModuleState::Ready) => EventLevel::Trace,
                (_, ModuleState::Error) | (_, ModuleState::Disabled) => EventLevel::Warn,
                _ => EventLevel::Info,
            };
            self.emit(
                LogEvent::new(level, "state transition")
                    .module(&entry.name)
                    .with("from", t.from.as_str())
                    .with("to", t.to.as_str()),
            );
        }
        if effects.run_cleanup {
            self.cleanup_entry(entry);
        }
    }

    fn cleanup_entry(&self, entry: &Arc<Entry>) {
        if let Some(overlay) = entry.plugin.as_overlay()
            && let Some(id) = entry.view.lock().take()
            && let Err(e) = guarded(&entry.name, "unmount_view", || overlay.unmount_view(id))
                .and_then(|r| r.map_err(|e| InitError::Failed(e.to_string())))
        {
            warn!(module = %entry.name, error = %e, "Failed to unmount view during cleanup");
        }
        if let Some(control) = entry.plugin.as_control() {
            let _ = guarded(&entry.name, "detach_controls", || control.detach_controls());
        }

        let module = entry.plugin.module();
        if guarded(&entry.name, "cleanup", || module.cleanup()).is_err() {
            self.emit(
                LogEvent::new(EventLevel::Error, "cleanup failed")
                    .module(&entry.name)
                    .with("error", "cleanup panicked"),
            );
        } else {
            debug!(module = %entry.name, "Module cleaned up");
        }
    }

    fn emit(&self, event: LogEvent) {
        self.context.log().emit(event);
    }
}

/// Run a module callback, turning a panic into an `InitError`
fn guarded<T>(module: &str, what: &str, f: impl FnOnce() -> T) -> Result<T, InitError> {
    catch_unwind(AssertUnwindSafe(f)).map_err(|panic| {
        let message = panic_message(panic.as_ref());
        warn!(module, callback = what, panic = %message, "Module callback panicked");
        InitError::Failed(format!("{what} panicked: {message}"))
    })
}

/// Best-effort text of a panic payload
pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("modules", &self.names())
            .field("bound", &self.is_bound())
            .finish()
    }
}
