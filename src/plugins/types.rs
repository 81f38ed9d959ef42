// SPDX-License-Identifier: MPL-2.0

//! Core types for frame processing results
//!
//! These types carry module output from the dispatcher to overlays, the log
//! sink and the dispatch report returned to callers.

use crate::errors::ProcessError;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// A rectangular region within a frame
///
/// Coordinates are normalized (0.0 to 1.0) relative to the frame dimensions.
/// This allows easy transformation to screen coordinates regardless of
/// the actual frame size or display scaling.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameRegion {
    /// Left edge (0.0 = left of frame, 1.0 = right of frame)
    pub x: f32,
    /// Top edge (0.0 = top of frame, 1.0 = bottom of frame)
    pub y: f32,
    /// Width as fraction of frame width
    pub width: f32,
    /// Height as fraction of frame height
    pub height: f32,
}

impl FrameRegion {
    /// Create a frame region from pixel coordinates
    pub fn from_pixels(
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        frame_width: u32,
        frame_height: u32,
    ) -> Self {
        Self {
            x: x as f32 / frame_width as f32,
            y: y as f32 / frame_height as f32,
            width: width as f32 / frame_width as f32,
            height: height as f32 / frame_height as f32,
        }
    }

    /// Center point of the region (normalized)
    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

/// Something a recognizer found in a frame
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    /// Decoded content or class label
    pub label: String,
    /// Confidence in [0.0, 1.0]
    pub confidence: f32,
    pub region: FrameRegion,
}

/// Output of a successful processing call
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    Detections { items: Vec<Detection> },
    Measurement { name: String, value: f64 },
    Json { value: serde_json::Value },
}

/// Result of one module processing one frame
#[derive(Debug, Clone)]
pub enum ProcessingResult {
    Success(Payload),
    /// The module looked at the frame and had nothing to report
    NoAction,
    Error(ProcessError),
}

impl ProcessingResult {
    pub fn is_error(&self) -> bool {
        matches!(self, ProcessingResult::Error(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            ProcessingResult::Success(_) => "success",
            ProcessingResult::NoAction => "no_action",
            ProcessingResult::Error(_) => "error",
        }
    }
}

impl From<Result<Payload, ProcessError>> for ProcessingResult {
    fn from(result: Result<Payload, ProcessError>) -> Self {
        match result {
            Ok(payload) => ProcessingResult::Success(payload),
            Err(e) => ProcessingResult::Error(e),
        }
    }
}

/// One module's entry in a dispatch report
#[derive(Debug, Clone)]
pub struct ModuleReport {
    pub module: String,
    pub priority: i32,
    pub result: ProcessingResult,
    pub elapsed: Duration,
}

/// Everything that happened to one admitted frame
#[derive(Debug, Clone, Default)]
pub struct DispatchReport {
    pub sequence: u64,
    /// In execution order
    pub reports: Vec<ModuleReport>,
}

impl DispatchReport {
    pub fn len(&self) -> usize {
        self.reports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }

    pub fn errors(&self) -> usize {
        self.reports.iter().filter(|r| r.result.is_error()).count()
    }

    pub fn module_order(&self) -> Vec<&str> {
        self.reports.iter().map(|r| r.module.as_str()).collect()
    }

    pub fn get(&self, module: &str) -> Option<&ModuleReport> {
        self.reports.iter().find(|r| r.module == module)
    }
}

/// Successful result delivered to overlays, tagged with its frame
#[derive(Debug, Clone, PartialEq)]
pub struct TaggedResult {
    pub sequence: u64,
    pub module: String,
    pub payload: Payload,
}

/// Stale-result filter for result consumers
///
/// Frames complete out of order across workers. The gate remembers the
/// newest accepted sequence and rejects anything older.
#[derive(Debug, Default)]
pub struct SequenceGate {
    // Newest accepted sequence + 1 (0 = nothing accepted yet)
    latest: AtomicU64,
}

impl SequenceGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `sequence` if it is not older than the newest accepted one
    pub fn accept(&self, sequence: u64) -> bool {
        let tagged = sequence.saturating_add(1);
        let mut current = self.latest.load(Ordering::Acquire);
        loop {
            if tagged < current {
                return false;
            }
            match self.latest.compare_exchange_weak(
                current,
                tagged,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Newest accepted sequence
    pub fn latest(&self) -> Option<u64> {
        self.latest.load(Ordering::Acquire).checked_sub(1)
    }

    pub fn reset(&self) {
        self.latest.store(0, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_region_from_pixels() {
        let region = FrameRegion::from_pixels(160, 120, 320, 240, 640, 480);
        assert_eq!(region.x, 0.25);
        assert_eq!(region.y, 0.25);
        assert_eq!(region.center(), (0.5, 0.5));
    }

    #[test]
    fn test_sequence_gate_discards_stale() {
        let gate = SequenceGate::new();
        assert_eq!(gate.latest(), None);
        assert!(gate.accept(0));
        assert!(gate.accept(5));
        assert!(!gate.accept(3));
        assert!(gate.accept(5));
        assert!(gate.accept(6));
        assert_eq!(gate.latest(), Some(6));
    }

    #[test]
    fn test_payload_serializes_tagged() {
        let payload = Payload::Measurement {
            name: "mean_luma".into(),
            value: 0.5,
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["type"], "measurement");
        assert_eq!(json["value"], 0.5);
    }
}
