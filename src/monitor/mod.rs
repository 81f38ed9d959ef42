// SPDX-License-Identifier: GPL-3.0-only

//! Resource monitor
//!
//! Samples memory and throughput on a fixed interval from a stoppable
//! background loop. When memory crosses the high-water mark it evicts the
//! registered caches and switches the dispatcher into load-shedding mode;
//! dropping below the low-water mark switches it back. It also flags
//! processing modules whose P99 latency exceeds the frame budget.

pub mod cache;
pub mod latency;

pub use cache::{CacheRegistry, Evictable};
pub use latency::LatencyWindow;

use crate::backends::camera::frame_loop::{LoopAction, LoopController};
use crate::config::MonitorConfig;
use crate::constants::PressureLevel;
use crate::errors::ResourceExhaustion;
use crate::logging::{EventLevel, LogEvent, LogSink};
use crate::plugins::dispatcher::{DispatchStats, Dispatcher};
use crate::plugins::{ModuleState, Registry};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

/// Process memory usage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MemoryUsage {
    pub used_bytes: u64,
    pub limit_bytes: u64,
}

impl MemoryUsage {
    pub fn ratio(&self) -> f64 {
        if self.limit_bytes == 0 {
            0.0
        } else {
            self.used_bytes as f64 / self.limit_bytes as f64
        }
    }
}

/// Source of memory measurements
pub trait MemoryProbe: Send + Sync {
    /// `None` if memory cannot be measured on this platform
    fn sample(&self) -> Option<MemoryUsage>;
}

/// Reads resident set size and total memory from `/proc`
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcMemoryProbe;

impl ProcMemoryProbe {
    fn read_kib(path: &str, key: &str) -> Option<u64> {
        let text = std::fs::read_to_string(path).ok()?;
        text.lines()
            .find_map(|line| line.strip_prefix(key))
            .and_then(|rest| rest.split_whitespace().next())
            .and_then(|kib| kib.parse::<u64>().ok())
    }
}

impl MemoryProbe for ProcMemoryProbe {
    fn sample(&self) -> Option<MemoryUsage> {
        let used = Self::read_kib("/proc/self/status", "VmRSS:")?;
        let limit = Self::read_kib("/proc/meminfo", "MemTotal:")?;
        Some(MemoryUsage {
            used_bytes: used * 1024,
            limit_bytes: limit * 1024,
        })
    }
}

/// Probe reporting whatever it was last told
#[derive(Debug)]
pub struct FixedMemoryProbe {
    used: AtomicU64,
    limit: u64,
}

impl FixedMemoryProbe {
    pub fn new(used_bytes: u64, limit_bytes: u64) -> Self {
        Self {
            used: AtomicU64::new(used_bytes),
            limit: limit_bytes,
        }
    }

    pub fn set_used(&self, used_bytes: u64) {
        self.used.store(used_bytes, Ordering::SeqCst);
    }
}

impl MemoryProbe for FixedMemoryProbe {
    fn sample(&self) -> Option<MemoryUsage> {
        Some(MemoryUsage {
            used_bytes: self.used.load(Ordering::SeqCst),
            limit_bytes: self.limit,
        })
    }
}

/// What one sampling pass observed and did
#[derive(Debug, Clone, Serialize)]
pub struct MonitorSample {
    pub memory: Option<MemoryUsage>,
    pub level: PressureLevel,
    pub shedding: bool,
    /// Frames completed per second since the previous sample
    pub throughput_fps: Option<f64>,
    pub evicted_bytes: u64,
    /// Modules whose P99 exceeds the frame budget
    pub slow_modules: Vec<String>,
    pub disabled_modules: Vec<String>,
}

struct MonitorInner {
    config: MonitorConfig,
    frame_budget: Duration,
    probe: Arc<dyn MemoryProbe>,
    caches: Arc<CacheRegistry>,
    dispatcher: Dispatcher,
    registry: Arc<Registry>,
    log: Arc<dyn LogSink>,
    last: Mutex<Option<(Instant, DispatchStats)>>,
}

/// Periodic memory and latency sampler
pub struct ResourceMonitor {
    inner: Arc<MonitorInner>,
    controller: Mutex<Option<LoopController>>,
}

impl ResourceMonitor {
    pub(crate) fn new(
        config: MonitorConfig,
        frame_budget: Duration,
        probe: Arc<dyn MemoryProbe>,
        caches: Arc<CacheRegistry>,
        dispatcher: Dispatcher,
        registry: Arc<Registry>,
        log: Arc<dyn LogSink>,
    ) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                config,
                frame_budget,
                probe,
                caches,
                dispatcher,
                registry,
                log,
                last: Mutex::new(None),
            }),
            controller: Mutex::new(None),
        }
    }

    /// Start sampling in the background (no-op if already running)
    pub fn start(&self) {
        let mut controller = self.controller.lock();
        if controller.as_ref().is_some_and(|c| c.is_running()) {
            return;
        }
        let inner = Arc::clone(&self.inner);
        *controller = Some(LoopController::start(
            "resource-monitor",
            self.inner.config.sample_interval(),
            move || {
                inner.tick();
                LoopAction::Continue
            },
        ));
    }

    /// Stop sampling and wait for the loop to exit
    pub fn stop(&self) {
        let controller = self.controller.lock().take();
        if let Some(mut controller) = controller {
            controller.stop();
        }
    }

    pub fn is_running(&self) -> bool {
        self.controller
            .lock()
            .as_ref()
            .is_some_and(|c| c.is_running())
    }

    /// Run one sampling pass now
    pub fn tick(&self) -> MonitorSample {
        self.inner.tick()
    }

    pub fn caches(&self) -> &Arc<CacheRegistry> {
        &self.inner.caches
    }
}

impl Drop for ResourceMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

impl MonitorInner {
    fn tick(&self) -> MonitorSample {
        let throughput_fps = self.throughput();
        let memory = self.probe.sample();
        let mut evicted_bytes = 0;

        let level = match memory {
            Some(usage) => PressureLevel::classify(
                usage.ratio(),
                self.config.low_water_ratio,
                self.config.high_water_ratio,
            ),
            None => PressureLevel::Normal,
        };

        match (level, memory) {
            (PressureLevel::Critical, Some(usage)) => {
                evicted_bytes = self.caches.evict_all();
                if !self.dispatcher.is_shedding() {
                    let exhaustion = ResourceExhaustion {
                        used_bytes: usage.used_bytes,
                        limit_bytes: usage.limit_bytes,
                        high_water: self.config.high_water_ratio,
                    };
                    self.dispatcher.set_shedding(true);
                    self.log.emit(
                        LogEvent::new(EventLevel::Warn, "resource exhaustion")
                            .with("error", exhaustion.to_string())
                            .with("used_bytes", usage.used_bytes)
                            .with("limit_bytes", usage.limit_bytes)
                            .with("evicted_bytes", evicted_bytes)
                            .with("capacity", self.dispatcher.capacity() as u64),
                    );
                }
            }
            (PressureLevel::Normal, _) if self.dispatcher.is_shedding() => {
                self.dispatcher.set_shedding(false);
                self.log.emit(
                    LogEvent::new(EventLevel::Info, "load restored")
                        .with("capacity", self.dispatcher.capacity() as u64),
                );
            }
            _ => {}
        }

        let (slow_modules, disabled_modules) = self.check_latency();

        debug!(
            level = level.display_name(),
            ratio = memory.map(|m| m.ratio()),
            throughput_fps,
            shedding = self.dispatcher.is_shedding(),
            "Resource sample"
        );

        MonitorSample {
            memory,
            level,
            shedding: self.dispatcher.is_shedding(),
            throughput_fps,
            evicted_bytes,
            slow_modules,
            disabled_modules,
        }
    }

    fn throughput(&self) -> Option<f64> {
        let now = Instant::now();
        let stats = self.dispatcher.stats();
        let previous = self.last.lock().replace((now, stats));
        let (then, before) = previous?;
        let secs = now.duration_since(then).as_secs_f64();
        (secs > 0.0).then(|| stats.completed.saturating_sub(before.completed) as f64 / secs)
    }

    fn check_latency(&self) -> (Vec<String>, Vec<String>) {
        let mut slow = Vec::new();
        let mut disabled = Vec::new();

        for entry in self.registry.processing_pipeline() {
            if entry.state() == ModuleState::Disabled {
                continue;
            }
            let (p99, samples) = entry.latency();
            let Some(p99) = p99 else {
                continue;
            };
            if samples < self.config.min_latency_samples || p99 <= self.frame_budget {
                entry.clear_slow();
                continue;
            }

            slow.push(entry.name.clone());
            if entry.flag_slow() {
                self.log.emit(
                    LogEvent::new(EventLevel::Warn, "module slow")
                        .module(&entry.name)
                        .with("p99_ms", p99.as_millis() as u64)
                        .with("budget_ms", self.frame_budget.as_millis() as u64)
                        .with("samples", samples as u64),
                );
            }
            if self.config.auto_disable_slow {
                self.registry
                    .disable_entry(&entry, "p99 latency exceeds frame budget");
                disabled.push(entry.name.clone());
            }
        }
        if !disabled.is_empty() {
            self.dispatcher.fit_pool();
        }
        (slow, disabled)
    }
}
