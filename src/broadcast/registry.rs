//! Device registry for connected display clients

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A registered display device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub connection_id: String,
    pub device_id: String,
    pub device_type: Option<String>,
    pub name: Option<String>,
    /// Whether the client wants raw audio chunks instead of cached files
    pub streaming_mode: bool,
    pub connected_at: chrono::DateTime<chrono::Utc>,
}

/// Registration message from a connecting display
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRegistration {
    pub device_id: String,
    #[serde(default)]
    pub device_type: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub streaming_mode: bool,
}

/// Registry of devices keyed by connection
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: HashMap<String, DeviceRecord>,
}

impl DeviceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or re-register) the device behind a connection
    pub fn register(&mut self, connection_id: &str, registration: DeviceRegistration) -> DeviceRecord {
        let record = DeviceRecord {
            connection_id: connection_id.to_string(),
            device_id: registration.device_id,
            device_type: registration.device_type,
            name: registration.name,
            streaming_mode: registration.streaming_mode,
            connected_at: chrono::Utc::now(),
        };
        self.devices.insert(connection_id.to_string(), record.clone());
        record
    }

    /// Forget the device behind a connection
    pub fn unregister(&mut self, connection_id: &str) -> Option<DeviceRecord> {
        self.devices.remove(connection_id)
    }

    /// Get the device behind a connection
    #[must_use]
    pub fn get(&self, connection_id: &str) -> Option<&DeviceRecord> {
        self.devices.get(connection_id)
    }

    /// Find the most recently connected record for a device ID
    #[must_use]
    pub fn find_by_device(&self, device_id: &str) -> Option<&DeviceRecord> {
        self.devices
            .values()
            .filter(|d| d.device_id == device_id)
            .max_by_key(|d| d.connected_at)
    }

    /// Toggle chunk streaming; returns false if the connection is unregistered
    pub fn set_streaming_mode(&mut self, connection_id: &str, enabled: bool) -> bool {
        self.devices
            .get_mut(connection_id)
            .map(|d| d.streaming_mode = enabled)
            .is_some()
    }

    /// List all registered devices
    #[must_use]
    pub fn list(&self) -> Vec<&DeviceRecord> {
        self.devices.values().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_registration() -> DeviceRegistration {
        DeviceRegistration {
            device_id: "living-room".to_string(),
            device_type: Some("tablet".to_string()),
            name: Some("Living room display".to_string()),
            streaming_mode: false,
        }
    }

    #[test]
    fn register_and_get() {
        let mut registry = DeviceRegistry::new();
        registry.register("conn-1", sample_registration());

        let device = registry.get("conn-1").unwrap();
        assert_eq!(device.device_id, "living-room");
        assert!(!device.streaming_mode);
    }

    #[test]
    fn unregister_removes_device() {
        let mut registry = DeviceRegistry::new();
        registry.register("conn-1", sample_registration());
        assert_eq!(registry.len(), 1);

        assert!(registry.unregister("conn-1").is_some());
        assert!(registry.is_empty());
    }

    #[test]
    fn find_by_device_id() {
        let mut registry = DeviceRegistry::new();
        registry.register("conn-1", sample_registration());

        assert!(registry.find_by_device("living-room").is_some());
        assert!(registry.find_by_device("kitchen").is_none());
    }

    #[test]
    fn streaming_mode_toggle() {
        let mut registry = DeviceRegistry::new();
        registry.register("conn-1", sample_registration());

        assert!(registry.set_streaming_mode("conn-1", true));
        assert!(registry.get("conn-1").unwrap().streaming_mode);
        assert!(!registry.set_streaming_mode("unknown", true));
    }

    #[test]
    fn registration_defaults() {
        let reg: DeviceRegistration = serde_json::from_str(r#"{"device_id":"d"}"#).unwrap();
        assert!(!reg.streaming_mode);
        assert!(reg.name.is_none());
    }
}
