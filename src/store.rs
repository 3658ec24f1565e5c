use std::sync::RwLock;

use thiserror::Error;
use toml::{Table, Value};

use crate::fix::VehicleData;

pub const FALLBACK_FILTER_TIME: u32 = 300;
pub const FALLBACK_FILTER_HEADING: f64 = 90.0;
pub const FALLBACK_FILTER_DISTANCE: f64 = 2.0;
pub const FALLBACK_MAX_PACKET: u32 = 4;
pub const FALLBACK_TRANSMISSION_TIMEOUT: u32 = 10;
pub const FALLBACK_NETWORK_ANOMALY_TIMEOUT: u32 = 30;
pub const FALLBACK_GPS_ANOMALY_TIMEOUT: u32 = 20;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("the configuration store refused to write '{key}': {reason}")]
    Rejected { key: String, reason: String },
}

/// # Explanation
/// The ConfigurationStore trait is the interface to the durable key/value store that holds the remote
/// configuration (filter thresholds, packet sizes, anomaly timeouts, vehicle data) and a few values
/// the service persists itself (e.g. the last fix identifier).
///
/// Values are looked up on every use, so a change of the remote configuration is picked up without
/// any caching layer in between.
pub trait ConfigurationStore: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;

    fn set(&self, key: &str, value: Value) -> Result<(), StoreError>;
}

/// # Explanation
/// An in-memory ConfigurationStore. The binary seeds it from the `[remote]` table of the
/// configuration file, the tests use it directly.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: RwLock<Table>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    pub fn from_table(table: Table) -> Self {
        MemoryStore {
            values: RwLock::new(table),
        }
    }

    pub fn with(self, key: &str, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&self, key: &str, value: impl Into<Value>) {
        let mut values = self.values.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        values.insert(key.to_string(), value.into());
    }

    pub fn remove(&self, key: &str) {
        let mut values = self.values.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        values.remove(key);
    }
}

impl ConfigurationStore for MemoryStore {
    fn get(&self, key: &str) -> Option<Value> {
        let values = self.values.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        values.get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.insert(key, value);
        Ok(())
    }
}

/// # Explanation
/// Typed accessors on top of a ConfigurationStore. Every accessor that has a fallback logs a warning
/// when the value is missing (or has the wrong type) and returns the fallback instead.
#[derive(Clone, Copy)]
pub struct RemoteSettings<'a> {
    store: &'a dyn ConfigurationStore,
}

impl<'a> RemoteSettings<'a> {
    pub fn new(store: &'a dyn ConfigurationStore) -> Self {
        RemoteSettings { store }
    }

    pub fn get_u32(&self, key: &str) -> Option<u32> {
        match self.store.get(key) {
            Some(Value::Integer(value)) => u32::try_from(value).ok(),
            _ => None,
        }
    }

    pub fn get_i32(&self, key: &str) -> Option<i32> {
        match self.store.get(key) {
            Some(Value::Integer(value)) => i32::try_from(value).ok(),
            _ => None,
        }
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        match self.store.get(key) {
            Some(Value::Float(value)) => Some(value),
            Some(Value::Integer(value)) => Some(value as f64),
            _ => None,
        }
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        match self.store.get(key) {
            Some(Value::String(value)) => Some(value),
            _ => None,
        }
    }

    fn u32_or(&self, key: &str, fallback: u32) -> u32 {
        self.get_u32(key).unwrap_or_else(|| {
            log::warn!("cannot retrieve {} configuration value, using fall back value {}", key, fallback);
            fallback
        })
    }

    fn f64_or(&self, key: &str, fallback: f64) -> f64 {
        self.get_f64(key).unwrap_or_else(|| {
            log::warn!("cannot retrieve {} configuration value, using fall back value {}", key, fallback);
            fallback
        })
    }

    /// Minimum time between two admitted fixes (seconds).
    pub fn filter_time(&self) -> u32 {
        self.u32_or("filter_time", FALLBACK_FILTER_TIME)
    }

    /// Minimum heading change between two admitted fixes (degrees).
    pub fn filter_heading(&self) -> f64 {
        self.f64_or("filter_heading", FALLBACK_FILTER_HEADING)
    }

    /// Minimum travelled distance between two admitted fixes (km).
    pub fn filter_distance(&self) -> f64 {
        self.f64_or("filter_distance", FALLBACK_FILTER_DISTANCE)
    }

    pub fn max_packet(&self) -> u32 {
        self.u32_or("max_packet", FALLBACK_MAX_PACKET).max(1)
    }

    /// Seconds after which a partial packet is flushed.
    pub fn transmission_timeout(&self) -> u32 {
        self.u32_or("transmission_timeout", FALLBACK_TRANSMISSION_TIMEOUT)
    }

    /// Minutes without connectivity before the network anomaly is raised.
    pub fn network_anomaly_timeout(&self) -> u32 {
        self.u32_or("network_anomaly_timeout", FALLBACK_NETWORK_ANOMALY_TIMEOUT)
    }

    /// Minutes without a position update before the GNSS anomaly is raised.
    pub fn gps_anomaly_timeout(&self) -> u32 {
        self.u32_or("gps_anomaly_timeout", FALLBACK_GPS_ANOMALY_TIMEOUT)
    }

    pub fn vehicle_data(&self) -> VehicleData {
        VehicleData {
            axles: self.get_u32("current_axles").unwrap_or(0),
            train_weight: self.get_u32("current_train_weight").unwrap_or(0),
            actual_weight: self.get_u32("current_actual_weight").unwrap_or(0),
            trailer_type: self.get_i32("current_trailer_type").unwrap_or(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use toml::Value;

    use crate::store::{ConfigurationStore, MemoryStore, RemoteSettings};

    #[test]
    fn test_fallbacks() {
        let store = MemoryStore::new();
        let settings = RemoteSettings::new(&store);

        assert_eq!(settings.filter_time(), 300);
        assert_eq!(settings.filter_heading(), 90.0);
        assert_eq!(settings.filter_distance(), 2.0);
        assert_eq!(settings.max_packet(), 4);
        assert_eq!(settings.transmission_timeout(), 10);
        assert_eq!(settings.network_anomaly_timeout(), 30);
        assert_eq!(settings.gps_anomaly_timeout(), 20);
    }

    #[test]
    fn test_typed_values() {
        let store = MemoryStore::new()
            .with("filter_time", 60)
            .with("filter_heading", 45)
            .with("filter_distance", 0.5)
            .with("max_packet", -3)
            .with("current_trailer_type", -1)
            .with("current_axles", "five");
        let settings = RemoteSettings::new(&store);

        assert_eq!(settings.filter_time(), 60);
        assert_eq!(settings.filter_heading(), 45.0);
        assert_eq!(settings.filter_distance(), 0.5);
        // negative and mistyped values fall back
        assert_eq!(settings.max_packet(), 4);
        let vehicle = settings.vehicle_data();
        assert_eq!(vehicle.trailer_type, -1);
        assert_eq!(vehicle.axles, 0);
    }

    #[test]
    fn test_set_is_visible() {
        let store = MemoryStore::new();
        store.set("data_id", Value::Integer(42)).unwrap();
        assert_eq!(RemoteSettings::new(&store).get_u32("data_id"), Some(42));

        store.remove("data_id");
        assert_eq!(store.get("data_id"), None);
    }
}
