//! Device Registry - GUID to device handle mapping.
//!
//! The registry is shared by every session. Lookups take the read side of the
//! lock and may run in parallel; inserts and removals take the write side.
//! Locks are only held for the in-memory map operation.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::device::SharedDeviceHandle;

/// Registry of locally provisioned devices, keyed by GUID.
#[derive(Clone, Default)]
pub struct DeviceRegistry {
    devices: Arc<RwLock<HashMap<String, SharedDeviceHandle>>>,
}

impl DeviceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a device under its own GUID.
    ///
    /// Returns the handle previously registered for that GUID, if any.
    pub async fn add(&self, device: SharedDeviceHandle) -> Option<SharedDeviceHandle> {
        let guid = device.guid().to_string();
        let previous = self.devices.write().await.insert(guid.clone(), device);
        if previous.is_some() {
            tracing::debug!(%guid, "Replaced registered device");
        } else {
            tracing::debug!(%guid, "Registered device");
        }
        previous
    }

    /// Look up the device provisioned for `guid`.
    pub async fn get(&self, guid: &str) -> Option<SharedDeviceHandle> {
        self.devices.read().await.get(guid).cloned()
    }

    pub async fn remove(&self, guid: &str) -> Option<SharedDeviceHandle> {
        self.devices.write().await.remove(guid)
    }

    pub async fn contains(&self, guid: &str) -> bool {
        self.devices.read().await.contains_key(guid)
    }

    pub async fn len(&self) -> usize {
        self.devices.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.devices.read().await.is_empty()
    }

    /// GUIDs of all registered devices, sorted.
    pub async fn guids(&self) -> Vec<String> {
        let mut guids: Vec<String> = self.devices.read().await.keys().cloned().collect();
        guids.sort();
        guids
    }
}
