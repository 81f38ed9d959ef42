// SPDX-License-Identifier: GPL-3.0-only

//! Recognition service abstraction
//!
//! Recognizers (barcode, face, text) are external collaborators that accept a
//! frame and report detections. Some platform recognizers only offer a
//! completion-callback API; [`CallbackBridge`] turns those into awaitable
//! futures so processing modules never block on a detector.

use crate::backends::camera::Frame;
use crate::plugins::types::Detection;
use futures::future::BoxFuture;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::trace;

/// Errors reported by a recognition service
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecognitionError {
    /// Recognizer is not installed or not ready
    #[error("recognizer unavailable: {0}")]
    Unavailable(String),
    /// Recognizer ran and failed
    #[error("{0}")]
    Failed(String),
    /// Recognizer dropped the request without completing it
    #[error("recognizer abandoned the request")]
    Abandoned,
}

/// Output of one recognition pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectionResult {
    pub detections: Vec<Detection>,
    /// Time from submission to completion
    pub latency: Duration,
}

/// Asynchronous recognition service
pub trait RecognitionService: Send + Sync {
    /// Recognizer name, used in logs
    fn name(&self) -> &str;

    /// Analyze a frame
    fn submit<'a>(
        &'a self,
        frame: &'a Frame,
    ) -> BoxFuture<'a, Result<DetectionResult, RecognitionError>>;
}

/// Completion callback handed to a [`CallbackRecognizer`]
pub type DetectionCallback = Box<dyn FnOnce(Result<Vec<Detection>, RecognitionError>) + Send>;

/// Recognizer with a completion-callback API
///
/// `detect` must return promptly and invoke `done` exactly once, from any
/// thread. Dropping `done` without calling it is reported as
/// [`RecognitionError::Abandoned`].
pub trait CallbackRecognizer: Send + Sync {
    fn name(&self) -> &str;

    fn detect(&self, frame: &Frame, done: DetectionCallback);
}

/// Adapts a [`CallbackRecognizer`] into an awaitable [`RecognitionService`]
pub struct CallbackBridge<R> {
    recognizer: R,
}

impl<R: CallbackRecognizer> CallbackBridge<R> {
    pub fn new(recognizer: R) -> Self {
        Self { recognizer }
    }

    pub fn inner(&self) -> &R {
        &self.recognizer
    }
}

impl<R: CallbackRecognizer> RecognitionService for CallbackBridge<R> {
    fn name(&self) -> &str {
        self.recognizer.name()
    }

    fn submit<'a>(
        &'a self,
        frame: &'a Frame,
    ) -> BoxFuture<'a, Result<DetectionResult, RecognitionError>> {
        Box::pin(async move {
            let start = Instant::now();
            let (tx, rx) = oneshot::channel();
            self.recognizer.detect(
                frame,
                Box::new(move |result| {
                    // Receiver gone means the caller timed out or was cancelled
                    let _ = tx.send(result);
                }),
            );

            let detections = rx.await.map_err(|_| RecognitionError::Abandoned)??;
            let latency = start.elapsed();
            trace!(
                recognizer = self.recognizer.name(),
                sequence = frame.sequence(),
                count = detections.len(),
                latency_ms = latency.as_millis() as u64,
                "Recognition complete"
            );
            Ok(DetectionResult {
                detections,
                latency,
            })
        })
    }
}
