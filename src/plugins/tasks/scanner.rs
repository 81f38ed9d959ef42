// SPDX-License-Identifier: GPL-3.0-only

//! Recognition-backed scanner module
//!
//! Submits each frame to a [`RecognitionService`] and waits for the detector
//! to finish before returning, so the result is produced inside the worker
//! that owns the frame. Detections below the confidence threshold (setting
//! `scanner.min_confidence`) are discarded.

use crate::backends::camera::Frame;
use crate::backends::recognition::RecognitionService;
use crate::constants::settings_keys;
use crate::errors::{InitError, ProcessError};
use crate::plugins::context::SharedContext;
use crate::plugins::types::{Payload, ProcessingResult};
use crate::plugins::{Module, ProcessingModule};
use crate::settings::Subscription;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use tracing::{debug, trace};

const DEFAULT_MIN_CONFIDENCE: f32 = 0.5;

/// Scanner module
pub struct ScannerModule<S> {
    name: String,
    priority: i32,
    service: S,
    // f32 bits, shared with the settings subscription
    min_confidence: Arc<AtomicU32>,
    subscription: Mutex<Option<Subscription>>,
    scanned: AtomicU64,
}

impl<S: RecognitionService + 'static> ScannerModule<S> {
    pub fn new(name: impl Into<String>, service: S) -> Self {
        Self {
            name: name.into(),
            priority: 50,
            service,
            min_confidence: Arc::new(AtomicU32::new(DEFAULT_MIN_CONFIDENCE.to_bits())),
            subscription: Mutex::new(None),
            scanned: AtomicU64::new(0),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn min_confidence(&self) -> f32 {
        f32::from_bits(self.min_confidence.load(Ordering::Relaxed))
    }

    /// Frames analyzed so far
    pub fn scanned(&self) -> u64 {
        self.scanned.load(Ordering::Relaxed)
    }

    pub fn service(&self) -> &S {
        &self.service
    }
}

impl<S: RecognitionService + 'static> Module for ScannerModule<S> {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn initialize(&self, context: &SharedContext) -> Result<(), InitError> {
        let threshold = Arc::clone(&self.min_confidence);
        let name = self.name.clone();
        let subscription =
            context
                .settings()
                .subscribe(settings_keys::SCANNER_MIN_CONFIDENCE, move |setting| {
                    match setting.value.as_f64() {
                        Some(value) => {
                            let value = (value as f32).clamp(0.0, 1.0);
                            threshold.store(value.to_bits(), Ordering::Relaxed);
                            debug!(module = %name, min_confidence = value, "Scanner threshold updated");
                        }
                        None => debug!(module = %name, value = %setting.value, "Ignoring non-numeric threshold"),
                    }
                });
        *self.subscription.lock() = Some(subscription);
        Ok(())
    }

    fn cleanup(&self) {
        self.subscription.lock().take();
    }
}

impl<S: RecognitionService + 'static> ProcessingModule for ScannerModule<S> {
    fn process<'a>(&'a self, frame: &'a Frame) -> BoxFuture<'a, ProcessingResult> {
        Box::pin(async move {
            let result = match self.service.submit(frame).await {
                Ok(result) => result,
                Err(e) => return ProcessingResult::Error(ProcessError::from(e)),
            };
            self.scanned.fetch_add(1, Ordering::Relaxed);

            let min = self.min_confidence();
            let items: Vec<_> = result
                .detections
                .into_iter()
                .filter(|d| d.confidence >= min)
                .collect();

            trace!(
                module = %self.name,
                recognizer = self.service.name(),
                sequence = frame.sequence(),
                count = items.len(),
                "Scan complete"
            );

            if items.is_empty() {
                ProcessingResult::NoAction
            } else {
                ProcessingResult::Success(Payload::Detections { items })
            }
        })
    }
}
