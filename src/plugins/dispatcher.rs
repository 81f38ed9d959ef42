// SPDX-License-Identifier: MPL-2.0

//! Bounded frame dispatcher
//!
//! Each admitted frame is owned by one worker task that runs the processing
//! modules sequentially in priority order. At most `capacity` workers exist
//! at any time. There is no queue: a frame that arrives while every worker
//! is busy is closed immediately and reported as dropped.
//!
//! ```text
//!  provider callback ──► submit() ──┬── worker free ──► spawn worker ──► m1 → m2 → m3 ──► close
//!                                   └── pool full   ──► close + "frame dropped"
//! ```

use super::lifecycle::{CallOutcome, FailurePolicy};
use super::registry::{Registry, panic_message};
use super::types::{DispatchReport, ModuleReport, ProcessingResult, TaggedResult};
use crate::backends::camera::Frame;
use crate::config::DispatchConfig;
use crate::errors::ProcessError;
use crate::logging::{EventLevel, LogEvent, LogSink};
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Why a frame was not processed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Every worker was busy
    PoolFull,
    /// No camera session is accepting frames
    NotBound,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::PoolFull => "pool_full",
            DropReason::NotBound => "not_bound",
        }
    }
}

/// Result of handing a frame to the dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Admitted,
    Dropped(DropReason),
}

/// Point-in-time dispatch counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    pub admitted: u64,
    pub dropped: u64,
    pub completed: u64,
    pub in_flight: usize,
    pub peak_in_flight: usize,
    pub capacity: usize,
    pub shedding: bool,
}

/// Callback receiving the report of every frame admitted through `submit`
pub type ReportListener = Arc<dyn Fn(&DispatchReport) + Send + Sync>;

struct Admission {
    in_flight: AtomicUsize,
    capacity: AtomicUsize,
    peak: AtomicUsize,
    idle: Notify,
}

impl Admission {
    fn try_acquire(self: &Arc<Self>) -> Option<AdmissionPermit> {
        let mut current = self.in_flight.load(Ordering::Acquire);
        loop {
            if current >= self.capacity.load(Ordering::Acquire) {
                return None;
            }
            match self.in_flight.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    self.peak.fetch_max(current + 1, Ordering::AcqRel);
                    return Some(AdmissionPermit {
                        admission: Arc::clone(self),
                    });
                }
                Err(actual) => current = actual,
            }
        }
    }
}

/// A claimed worker slot, released on drop
struct AdmissionPermit {
    admission: Arc<Admission>,
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        if self.admission.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.admission.idle.notify_waiters();
        }
    }
}

struct DispatcherInner {
    registry: Arc<Registry>,
    runtime: Handle,
    admission: Arc<Admission>,
    log: Arc<dyn LogSink>,
    config: DispatchConfig,
    pool_size: AtomicUsize,
    shed_workers: usize,
    shedding: AtomicBool,
    accepting: AtomicBool,
    session: Mutex<CancellationToken>,
    listener: Mutex<Option<ReportListener>>,
    admitted: AtomicU64,
    dropped: AtomicU64,
    completed: AtomicU64,
}

/// Frame dispatcher with a fixed-size worker pool
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

impl Dispatcher {
    pub(crate) fn new(
        registry: Arc<Registry>,
        runtime: Handle,
        log: Arc<dyn LogSink>,
        config: DispatchConfig,
        shed_workers: usize,
    ) -> Self {
        let pool_size = config.max_workers.max(1);
        Self {
            inner: Arc::new(DispatcherInner {
                registry,
                runtime,
                admission: Arc::new(Admission {
                    in_flight: AtomicUsize::new(0),
                    capacity: AtomicUsize::new(pool_size),
                    peak: AtomicUsize::new(0),
                    idle: Notify::new(),
                }),
                log,
                config,
                pool_size: AtomicUsize::new(pool_size),
                shed_workers: shed_workers.max(1),
                shedding: AtomicBool::new(false),
                accepting: AtomicBool::new(false),
                session: Mutex::new(CancellationToken::new()),
                listener: Mutex::new(None),
                admitted: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
                completed: AtomicU64::new(0),
            }),
        }
    }

    pub(crate) fn failure_policy(config: &DispatchConfig) -> FailurePolicy {
        FailurePolicy {
            threshold: config.failure_threshold.max(1),
            window: config.failure_window(),
        }
    }

    /// Hand a frame to a free worker, or drop it
    ///
    /// Never blocks. Safe to call from any thread.
    pub fn submit(&self, frame: Frame) -> SubmitOutcome {
        let permit = match self.admit(&frame) {
            Ok(permit) => permit,
            Err(reason) => {
                self.drop_frame(frame, reason);
                return SubmitOutcome::Dropped(reason);
            }
        };

        let inner = Arc::clone(&self.inner);
        let token = self.inner.session.lock().clone();
        self.inner.runtime.spawn(async move {
            let _permit = permit;
            let report = inner.run_frame(frame, token).await;
            let listener = inner.listener.lock().clone();
            if let Some(listener) = listener {
                listener(&report);
            }
        });
        SubmitOutcome::Admitted
    }

    /// Process a frame on the calling task and return its report
    ///
    /// Uses the same admission control as [`submit`](Self::submit).
    pub async fn dispatch(&self, frame: Frame) -> Result<DispatchReport, DropReason> {
        let permit = match self.admit(&frame) {
            Ok(permit) => permit,
            Err(reason) => {
                self.drop_frame(frame, reason);
                return Err(reason);
            }
        };
        let token = self.inner.session.lock().clone();
        let report = self.inner.run_frame(frame, token).await;
        drop(permit);
        Ok(report)
    }

    fn admit(&self, frame: &Frame) -> Result<AdmissionPermit, DropReason> {
        if !self.inner.accepting.load(Ordering::Acquire) {
            return Err(DropReason::NotBound);
        }
        let permit = self
            .inner
            .admission
            .try_acquire()
            .ok_or(DropReason::PoolFull)?;
        self.inner.admitted.fetch_add(1, Ordering::Relaxed);
        trace!(sequence = frame.sequence(), "Frame admitted");
        Ok(permit)
    }

    fn drop_frame(&self, frame: Frame, reason: DropReason) {
        let sequence = frame.sequence();
        frame.close();
        self.inner.dropped.fetch_add(1, Ordering::Relaxed);
        self.inner.log.emit(
            LogEvent::new(EventLevel::Debug, "frame dropped")
                .with("sequence", sequence)
                .with("reason", reason.as_str())
                .with("in_flight", self.in_flight() as u64),
        );
    }

    /// Wait until no frame is being processed
    pub async fn drain(&self) {
        let admission = &self.inner.admission;
        loop {
            let notified = admission.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if admission.in_flight.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Start accepting frames for a session
    pub(crate) fn open(&self, token: CancellationToken) {
        *self.inner.session.lock() = token;
        self.inner.accepting.store(true, Ordering::Release);
    }

    /// Stop accepting frames; in-flight work continues until cancelled
    pub(crate) fn close(&self) {
        self.inner.accepting.store(false, Ordering::Release);
    }

    pub fn is_accepting(&self) -> bool {
        self.inner.accepting.load(Ordering::Acquire)
    }

    /// Set the normal worker pool size
    pub fn set_pool_size(&self, size: usize) {
        self.inner.set_pool_size(size);
    }

    /// Size the pool to the processing modules still eligible in the bound
    /// session: at least one worker, at most `max_workers`
    ///
    /// No-op while unbound.
    pub(crate) fn fit_pool(&self) {
        self.inner.fit_pool();
    }

    /// Enter or leave load-shedding mode
    ///
    /// While shedding, admission is capped at the shed worker count and
    /// non-critical modules are skipped.
    pub fn set_shedding(&self, shedding: bool) {
        if self.inner.shedding.swap(shedding, Ordering::AcqRel) != shedding {
            self.inner.update_capacity();
            debug!(shedding, capacity = self.capacity(), "Load shedding changed");
        }
    }

    pub fn is_shedding(&self) -> bool {
        self.inner.shedding.load(Ordering::Acquire)
    }

    pub fn capacity(&self) -> usize {
        self.inner.admission.capacity.load(Ordering::Acquire)
    }

    pub fn in_flight(&self) -> usize {
        self.inner.admission.in_flight.load(Ordering::Acquire)
    }

    /// Receive the report of every frame admitted via `submit`
    pub fn set_report_listener<F>(&self, listener: F)
    where
        F: Fn(&DispatchReport) + Send + Sync + 'static,
    {
        *self.inner.listener.lock() = Some(Arc::new(listener));
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            admitted: self.inner.admitted.load(Ordering::Relaxed),
            dropped: self.inner.dropped.load(Ordering::Relaxed),
            completed: self.inner.completed.load(Ordering::Relaxed),
            in_flight: self.in_flight(),
            peak_in_flight: self.inner.admission.peak.load(Ordering::Acquire),
            capacity: self.capacity(),
            shedding: self.is_shedding(),
        }
    }
}

impl DispatcherInner {
    fn set_pool_size(&self, size: usize) {
        self.pool_size.store(size.max(1), Ordering::Release);
        let capacity = self.update_capacity();
        debug!(pool_size = size.max(1), capacity, "Worker pool resized");
    }

    fn fit_pool(&self) {
        let Some(config) = self.registry.bound_config() else {
            return;
        };
        let modules = self.registry.processing_count(&config);
        self.set_pool_size(modules.clamp(1, self.config.max_workers.max(1)));
    }

    fn update_capacity(&self) -> usize {
        let pool = self.pool_size.load(Ordering::Acquire);
        let capacity = if self.shedding.load(Ordering::Acquire) {
            pool.min(self.shed_workers)
        } else {
            pool
        };
        self.admission.capacity.store(capacity, Ordering::Release);
        capacity
    }

    async fn run_frame(&self, frame: Frame, session: CancellationToken) -> DispatchReport {
        let sequence = frame.sequence();
        let shedding = self.shedding.load(Ordering::Acquire);
        let mut reports = Vec::new();

        for entry in self.registry.processing_pipeline() {
            if session.is_cancelled() {
                break;
            }
            if shedding && !entry.critical {
                trace!(module = %entry.name, sequence, "Skipping non-critical module");
                continue;
            }
            let Some(module) = entry.processing() else {
                continue;
            };
            let Some(token) = self.registry.begin_call(&entry) else {
                continue;
            };

            let budget = module
                .timeout()
                .unwrap_or_else(|| self.config.process_timeout());
            let started = Instant::now();
            let result = tokio::select! {
                biased;
                _ = token.cancelled() => None,
                res = tokio::time::timeout(budget, AssertUnwindSafe(module.process(&frame)).catch_unwind()) => {
                    Some(match res {
                        Ok(Ok(result)) => result,
                        Ok(Err(panic)) => ProcessingResult::Error(ProcessError::Panicked(
                            panic_message(panic.as_ref()),
                        )),
                        Err(_) => ProcessingResult::Error(ProcessError::Timeout { budget }),
                    })
                }
            };
            let elapsed = started.elapsed();

            let Some(result) = result else {
                debug!(module = %entry.name, sequence, "Processing cancelled");
                self.registry
                    .end_call(&entry, CallOutcome::Cancelled, elapsed, None);
                continue;
            };

            match &result {
                ProcessingResult::Error(e) => {
                    if self
                        .registry
                        .end_call(&entry, CallOutcome::Failure, elapsed, Some(e))
                    {
                        self.fit_pool();
                    }
                }
                ProcessingResult::Success(payload) => {
                    self.registry
                        .end_call(&entry, CallOutcome::Success, elapsed, None);
                    self.registry.publish_result(&TaggedResult {
                        sequence,
                        module: entry.name.clone(),
                        payload: payload.clone(),
                    });
                }
                ProcessingResult::NoAction => {
                    self.registry
                        .end_call(&entry, CallOutcome::Success, elapsed, None);
                }
            }
            trace!(
                module = %entry.name,
                sequence,
                result = result.label(),
                elapsed_ms = elapsed.as_millis() as u64,
                "Module processed frame"
            );

            reports.push(ModuleReport {
                module: entry.name.clone(),
                priority: entry.priority,
                result,
                elapsed,
            });
        }

        frame.close();
        self.completed.fetch_add(1, Ordering::Relaxed);
        DispatchReport { sequence, reports }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("stats", &self.stats())
            .finish()
    }
}
