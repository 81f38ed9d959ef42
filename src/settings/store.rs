// SPDX-License-Identifier: MPL-2.0

//! Observable key/value store
//!
//! Delivery model:
//! - A new subscriber is called once with the current value, if there is one
//! - Every accepted `set` bumps a global version and notifies the key's
//!   subscribers with the latest value; rapid changes may coalesce, but the
//!   newest value is always delivered
//! - Setting a key to the value it already holds is a no-op
//! - Callbacks for one subscriber never overlap; different subscribers are
//!   independent, and no store-wide lock is held while a callback runs

use super::persistence::{SettingsBackend, SettingsMap};
use super::SettingsError;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

/// A versioned value
#[derive(Debug, Clone, PartialEq)]
pub struct Setting {
    pub key: String,
    pub value: Value,
    /// Store-wide, strictly increasing across all keys
    pub version: u64,
}

type Callback = Box<dyn Fn(&Setting) + Send + Sync>;

struct Subscriber {
    id: u64,
    key: String,
    callback: Callback,
    active: AtomicBool,
    // A newer value may exist that this subscriber has not seen
    pending: AtomicBool,
    // Held while the callback runs; holds the last delivered version
    delivered: Mutex<u64>,
}

struct StoreInner {
    values: RwLock<HashMap<String, Setting>>,
    subscribers: RwLock<HashMap<String, Vec<Arc<Subscriber>>>>,
    next_version: AtomicU64,
    next_subscriber: AtomicU64,
    backend: Option<Box<dyn SettingsBackend>>,
    // Serializes writes to the backend; holds the last persisted version
    persisted: Mutex<u64>,
}

/// Reactive settings store
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SettingsStore {
    inner: Arc<StoreInner>,
}

impl Default for SettingsStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SettingsStore {
    /// Store without persistence
    pub fn new() -> Self {
        Self::build(None, SettingsMap::new())
    }

    /// Store backed by `backend`, pre-loaded with its persisted values
    pub fn open(backend: impl SettingsBackend + 'static) -> Result<Self, SettingsError> {
        let values = backend.load()?;
        debug!(count = values.len(), "Loaded persisted settings");
        Ok(Self::build(Some(Box::new(backend)), values))
    }

    fn build(backend: Option<Box<dyn SettingsBackend>>, initial: SettingsMap) -> Self {
        let mut version = 0;
        let values = initial
            .into_iter()
            .map(|(key, value)| {
                version += 1;
                let setting = Setting {
                    key: key.clone(),
                    value,
                    version,
                };
                (key, setting)
            })
            .collect();

        Self {
            inner: Arc::new(StoreInner {
                values: RwLock::new(values),
                subscribers: RwLock::new(HashMap::new()),
                next_version: AtomicU64::new(version + 1),
                next_subscriber: AtomicU64::new(1),
                backend,
                persisted: Mutex::new(version),
            }),
        }
    }

    /// Current value of `key`
    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.values.read().get(key).map(|s| s.value.clone())
    }

    /// Current value of `key` with its version
    pub fn setting(&self, key: &str) -> Option<Setting> {
        self.inner.values.read().get(key).cloned()
    }

    /// Current value of `key` deserialized as `T`
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, SettingsError> {
        match self.get(key) {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|source| SettingsError::Type {
                    key: key.to_string(),
                    source,
                }),
            None => Ok(None),
        }
    }

    /// Store `value` under `key` and notify subscribers
    ///
    /// Returns `Ok(false)` if the key already held an identical value. A
    /// persistence failure is returned after the in-memory value has been
    /// updated and subscribers notified.
    pub fn set(&self, key: &str, value: impl Into<Value>) -> Result<bool, SettingsError> {
        let value = value.into();
        {
            let mut values = self.inner.values.write();
            if values.get(key).is_some_and(|s| s.value == value) {
                return Ok(false);
            }
            let version = self.inner.next_version.fetch_add(1, Ordering::SeqCst);
            values.insert(
                key.to_string(),
                Setting {
                    key: key.to_string(),
                    value,
                    version,
                },
            );
        }

        self.notify(key);
        self.persist()?;
        Ok(true)
    }

    /// Serialize `value` and store it under `key`
    pub fn set_as<T: Serialize>(&self, key: &str, value: &T) -> Result<bool, SettingsError> {
        self.set(key, serde_json::to_value(value)?)
    }

    /// Watch `key`
    ///
    /// `callback` runs immediately with the current value, if any, and then
    /// after every change. Notifications stop when the returned handle is
    /// cancelled or dropped.
    pub fn subscribe<F>(&self, key: &str, callback: F) -> Subscription
    where
        F: Fn(&Setting) + Send + Sync + 'static,
    {
        let subscriber = Arc::new(Subscriber {
            id: self.inner.next_subscriber.fetch_add(1, Ordering::SeqCst),
            key: key.to_string(),
            callback: Box::new(callback),
            active: AtomicBool::new(true),
            pending: AtomicBool::new(false),
            delivered: Mutex::new(0),
        });

        self.inner
            .subscribers
            .write()
            .entry(key.to_string())
            .or_default()
            .push(Arc::clone(&subscriber));

        self.inner.deliver(&subscriber);

        Subscription {
            store: Arc::downgrade(&self.inner),
            subscriber,
        }
    }

    pub fn subscriber_count(&self, key: &str) -> usize {
        self.inner
            .subscribers
            .read()
            .get(key)
            .map_or(0, |subs| subs.len())
    }

    /// All current values
    pub fn snapshot(&self) -> SettingsMap {
        self.inner
            .values
            .read()
            .iter()
            .map(|(k, s)| (k.clone(), s.value.clone()))
            .collect()
    }

    fn notify(&self, key: &str) {
        let subscribers = match self.inner.subscribers.read().get(key) {
            Some(subs) => subs.clone(),
            None => return,
        };
        for subscriber in &subscribers {
            self.inner.deliver(subscriber);
        }
    }

    fn persist(&self) -> Result<(), SettingsError> {
        let Some(backend) = self.inner.backend.as_ref() else {
            return Ok(());
        };

        let mut persisted = self.inner.persisted.lock();
        let (snapshot, newest) = {
            let values = self.inner.values.read();
            let newest = values.values().map(|s| s.version).max().unwrap_or(0);
            if newest <= *persisted {
                // A concurrent writer already stored this state
                return Ok(());
            }
            let snapshot: SettingsMap = values
                .iter()
                .map(|(k, s)| (k.clone(), s.value.clone()))
                .collect();
            (snapshot, newest)
        };

        match backend.store(&snapshot) {
            Ok(()) => {
                *persisted = newest;
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Failed to persist settings");
                Err(e)
            }
        }
    }
}

impl StoreInner {
    fn deliver(&self, subscriber: &Subscriber) {
        subscriber.pending.store(true, Ordering::SeqCst);
        loop {
            // Whoever holds the lock will pick up the pending flag
            let Some(mut delivered) = subscriber.delivered.try_lock() else {
                return;
            };
            while subscriber.pending.swap(false, Ordering::SeqCst) {
                if !subscriber.active.load(Ordering::SeqCst) {
                    return;
                }
                let current = self.values.read().get(&subscriber.key).cloned();
                if let Some(setting) = current
                    && setting.version > *delivered
                {
                    (subscriber.callback)(&setting);
                    *delivered = setting.version;
                }
            }
            drop(delivered);
            if !subscriber.pending.load(Ordering::SeqCst) {
                return;
            }
        }
    }

    fn remove(&self, subscriber: &Subscriber) {
        let mut subscribers = self.subscribers.write();
        if let Some(subs) = subscribers.get_mut(&subscriber.key) {
            subs.retain(|s| s.id != subscriber.id);
            if subs.is_empty() {
                subscribers.remove(&subscriber.key);
            }
        }
    }
}

/// Cancellation handle for a subscription
///
/// Dropping the handle cancels the subscription.
pub struct Subscription {
    store: Weak<StoreInner>,
    subscriber: Arc<Subscriber>,
}

impl Subscription {
    pub fn key(&self) -> &str {
        &self.subscriber.key
    }

    pub fn is_active(&self) -> bool {
        self.subscriber.active.load(Ordering::SeqCst)
    }

    /// Stop notifications
    ///
    /// A callback already running finishes; no new one starts.
    pub fn cancel(&self) {
        if self.subscriber.active.swap(false, Ordering::SeqCst)
            && let Some(store) = self.store.upgrade()
        {
            store.remove(&self.subscriber);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("key", &self.subscriber.key)
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_subscribe_delivers_current_value() {
        let store = SettingsStore::new();
        store.set("camera.zoom", 2.0).unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _sub = store.subscribe("camera.zoom", move |s| sink.lock().push(s.value.clone()));

        assert_eq!(*seen.lock(), vec![Value::from(2.0)]);
    }

    #[test]
    fn test_identical_value_is_suppressed() {
        let store = SettingsStore::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let _sub = store.subscribe("camera.torch", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(store.set("camera.torch", true).unwrap());
        assert!(!store.set("camera.torch", true).unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reentrant_set_delivers_latest() {
        let store = SettingsStore::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let writer = store.clone();
        let _sub = store.subscribe("counter", move |s| {
            sink.lock().push(s.value.clone());
            if s.value == Value::from(1) {
                let _ = writer.set("counter", 2);
            }
        });

        store.set("counter", 1).unwrap();
        assert_eq!(*seen.lock(), vec![Value::from(1), Value::from(2)]);
    }

    #[test]
    fn test_dropped_subscription_stops_notifications() {
        let store = SettingsStore::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let sub = store.subscribe("k", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(store.subscriber_count("k"), 1);

        drop(sub);
        store.set("k", 1).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(store.subscriber_count("k"), 0);
    }

    #[test]
    fn test_get_as_type_mismatch() {
        let store = SettingsStore::new();
        store.set("camera.zoom", "wide").unwrap();
        assert!(matches!(
            store.get_as::<f32>("camera.zoom"),
            Err(SettingsError::Type { .. })
        ));
        assert_eq!(store.get_as::<f32>("missing").unwrap(), None);
    }
}
