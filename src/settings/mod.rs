// SPDX-License-Identifier: MPL-2.0

//! Reactive settings store
//!
//! Modules talk to each other and to the host only through this store:
//! a scanner reads its confidence threshold from it, an analyzer publishes
//! measurements to it, a control module reacts to zoom changes written by
//! the UI.
//!
//! The store is an in-memory cache over a [`SettingsBackend`]; values
//! survive camera rebinds and, with a file backend, process restarts.

pub mod persistence;
pub mod store;

pub use persistence::{JsonFileBackend, MemoryBackend, SettingsBackend, SettingsMap};
pub use store::{Setting, SettingsStore, Subscription};

use std::path::PathBuf;
use thiserror::Error;

/// Settings errors
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("settings file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("settings could not be serialized: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("setting '{key}' has an unexpected type: {source}")]
    Type {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}
