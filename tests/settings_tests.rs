// SPDX-License-Identifier: MPL-2.0

//! Integration tests for the settings store

use camera_plugins::settings::{JsonFileBackend, SettingsStore};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[test]
fn test_values_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.json");

    {
        let store = SettingsStore::open(JsonFileBackend::new(&path)).unwrap();
        store.set("camera.zoom", 2.5).unwrap();
        store.set("camera.torch", true).unwrap();
    }

    let store = SettingsStore::open(JsonFileBackend::new(&path)).unwrap();
    assert_eq!(store.get_as::<f64>("camera.zoom").unwrap(), Some(2.5));
    assert_eq!(store.get_as::<bool>("camera.torch").unwrap(), Some(true));

    let on_disk: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(on_disk["camera.zoom"], 2.5);
}

#[test]
fn test_identical_value_notifies_once() {
    let store = SettingsStore::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let _sub = store.subscribe("scanner.min_confidence", move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    assert!(store.set("scanner.min_confidence", 0.8).unwrap());
    assert!(!store.set("scanner.min_confidence", 0.8).unwrap());

    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_wrong_type_is_reported() {
    let store = SettingsStore::new();
    store.set("camera.zoom", "wide").unwrap();
    assert!(store.get_as::<f64>("camera.zoom").is_err());
}

#[test]
fn test_slow_subscriber_never_sees_stale_values() {
    let store = SettingsStore::new();
    let versions = Arc::new(Mutex::new(Vec::new()));
    let seen = versions.clone();
    let _sub = store.subscribe("analysis.mean_luma", move |setting| {
        std::thread::sleep(Duration::from_millis(5));
        seen.lock().push(setting.version);
    });

    let writers: Vec<_> = (0..4)
        .map(|t| {
            let store = store.clone();
            std::thread::spawn(move || {
                for i in 0..10 {
                    store.set("analysis.mean_luma", t * 100 + i).unwrap();
                }
            })
        })
        .collect();
    for writer in writers {
        writer.join().unwrap();
    }
    store.set("analysis.mean_luma", -1).unwrap();

    let versions = versions.lock();
    let latest = store.setting("analysis.mean_luma").unwrap().version;
    assert!(versions.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(versions.last().copied(), Some(latest));
    assert!(versions.len() <= 41);
}
