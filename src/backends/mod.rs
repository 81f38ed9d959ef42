// SPDX-License-Identifier: MPL-2.0

//! Backend abstraction layer for external collaborators
//!
//! The engine depends on two services it does not implement itself:
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │                   Engine                    │
//! └────────────────────┬────────────────────────┘
//!                      │
//! ┌────────────────────┴────────────────────────┐
//! │              Backend Layer                  │
//! │  ┌──────────────────┐  ┌─────────────────┐  │
//! │  │ Camera provider  │  │   Recognition   │  │
//! │  │ (bind, stream,   │  │ (barcode, face, │  │
//! │  │  torch, zoom)    │  │  text, ...)     │  │
//! │  └──────────────────┘  └─────────────────┘  │
//! │  ┌──────────────────────────────────────┐   │
//! │  │ Simulated camera + recognizer        │   │
//! │  └──────────────────────────────────────┘   │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`camera`]: Camera provider trait, frame types and session ownership
//! - [`recognition`]: Recognition service trait and callback bridge
//! - [`simulated`]: In-process provider used by the CLI and tests

pub mod camera;
pub mod recognition;
pub mod simulated;
