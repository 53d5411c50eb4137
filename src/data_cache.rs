use crate::codec::Value;
use crate::register::RegisterDescriptor;

use chrono::{DateTime, Utc};
use log::debug;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

/// Latest decoded value of one signal.
#[derive(Clone, Debug, PartialEq)]
pub struct SignalValue {
    pub value: Value,
    pub updated_at: DateTime<Utc>,
    pub descriptor: &'static RegisterDescriptor,
}

/// What consumers get back from a lookup.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SignalReading {
    pub name: &'static str,
    pub value: Value,
    pub unit: &'static str,
    pub updated_at: DateTime<Utc>,
    pub is_stale: bool,
}

struct Signals {
    values: HashMap<&'static str, SignalValue>,
    created_at: DateTime<Utc>,
}

/// Per-device store of decoded signals.
///
/// Cloning gives another handle onto the same store. Lookups only take a read
/// lock and never wait on the network.
#[derive(Clone)]
pub struct DataCache {
    signals: Arc<RwLock<Signals>>,
    stale_after: Duration,
    unavailable_after: Duration,
}

impl DataCache {
    pub fn new(stale_after: Duration, unavailable_after: Duration) -> Self {
        Self {
            signals: Arc::new(RwLock::new(Signals {
                values: HashMap::new(),
                created_at: Utc::now(),
            })),
            stale_after,
            unavailable_after,
        }
    }

    pub fn from_config(device: &crate::config::Device) -> Self {
        Self::new(device.staleness_threshold(), device.unavailable_after())
    }

    pub fn get(&self, name: &str) -> Option<SignalReading> {
        self.get_at(name, Utc::now())
    }

    /// Looks up `name` as of `now`. Values past the unavailability threshold
    /// are not returned.
    pub fn get_at(&self, name: &str, now: DateTime<Utc>) -> Option<SignalReading> {
        let signals = self.signals.read().unwrap_or_else(PoisonError::into_inner);
        let signal = signals.values.get(name)?;

        let age = age(signal.updated_at, now);
        if age > self.unavailable_after {
            return None;
        }

        Some(SignalReading {
            name: signal.descriptor.name,
            value: signal.value.clone(),
            unit: signal.descriptor.unit,
            updated_at: signal.updated_at,
            is_stale: age > self.stale_after,
        })
    }

    /// Numeric value of a signal that is present and not stale.
    pub fn fresh_f64(&self, name: &str) -> Option<f64> {
        self.get(name).filter(|r| !r.is_stale).and_then(|r| r.value.as_f64())
    }

    /// Numeric value of a signal that is still servable, stale or not.
    pub fn last_known_f64(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(|r| r.value.as_f64())
    }

    /// Stores a freshly decoded value. Returns false, leaving the cache as it
    /// was, when `at` is older than what is already held.
    pub fn put(&self, descriptor: &'static RegisterDescriptor, value: Value, at: DateTime<Utc>) -> bool {
        let mut signals = self.signals.write().unwrap_or_else(PoisonError::into_inner);

        if let Some(existing) = signals.values.get(descriptor.name) {
            if existing.updated_at > at {
                debug!(
                    "ignoring out of order update for {} ({} < {})",
                    descriptor.name, at, existing.updated_at
                );
                return false;
            }
        }

        signals.values.insert(
            descriptor.name,
            SignalValue {
                value,
                updated_at: at,
                descriptor,
            },
        );

        true
    }

    /// Most recent update of any signal, or cache creation if nothing arrived yet.
    pub fn last_update(&self) -> DateTime<Utc> {
        let signals = self.signals.read().unwrap_or_else(PoisonError::into_inner);
        signals
            .values
            .values()
            .map(|s| s.updated_at)
            .max()
            .unwrap_or(signals.created_at)
    }

    /// True when nothing has been updated for longer than `window`.
    pub fn all_stale_at(&self, window: Duration, now: DateTime<Utc>) -> bool {
        age(self.last_update(), now) > window
    }

    /// Every servable signal, ordered by name.
    pub fn snapshot(&self) -> Vec<SignalReading> {
        let now = Utc::now();
        let names: Vec<&'static str> = {
            let signals = self.signals.read().unwrap_or_else(PoisonError::into_inner);
            signals.values.keys().copied().collect()
        };

        let mut readings: Vec<SignalReading> = names.into_iter().filter_map(|n| self.get_at(n, now)).collect();
        readings.sort_by(|a, b| a.name.cmp(b.name));
        readings
    }

    pub fn len(&self) -> usize {
        self.signals.read().unwrap_or_else(PoisonError::into_inner).values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn age(at: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - at).to_std().unwrap_or_default()
}
