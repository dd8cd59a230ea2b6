//! Device Service - provisioning and status tracking
//!
//! This service plays the part of the surrounding home-automation system:
//! - turns discovery results into provisioned `SuplaDevice`s (when enabled)
//! - keeps a per-device status cache fed by online/offline events

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use jsupla_core::{EventBus, JSuplaEvent};

use crate::device::SuplaDevice;
use crate::registry::DeviceRegistry;

/// Cached connection state of a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStatusEntry {
    pub online: bool,
    /// Reason given with the latest offline transition
    pub reason: Option<String>,
    /// Unix timestamp of the latest transition
    pub last_change: i64,
}

/// Provisioning and status service.
pub struct DeviceService {
    registry: DeviceRegistry,
    event_bus: EventBus,
    auto_provision: bool,
    device_status: Arc<RwLock<HashMap<String, DeviceStatusEntry>>>,
    task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl DeviceService {
    pub fn new(registry: DeviceRegistry, event_bus: EventBus, auto_provision: bool) -> Self {
        Self {
            registry,
            event_bus,
            auto_provision,
            device_status: Arc::new(RwLock::new(HashMap::new())),
            task: parking_lot::Mutex::new(None),
        }
    }

    /// Start listening for discovery and device events.
    ///
    /// Subscribes before returning, so events published after `start` are
    /// never missed.
    pub fn start(&self) {
        let mut task = self.task.lock();
        if task.is_some() {
            tracing::debug!("DeviceService already started");
            return;
        }

        let mut rx = self
            .event_bus
            .subscribe_filtered(|e: &JSuplaEvent| e.is_discovery_event() || e.is_device_event());
        let registry = self.registry.clone();
        let event_bus = self.event_bus.clone();
        let device_status = self.device_status.clone();
        let auto_provision = self.auto_provision;

        *task = Some(tokio::spawn(async move {
            while let Some((event, _)) = rx.recv().await {
                match event {
                    JSuplaEvent::DeviceDiscovered { guid, label, .. } => {
                        if !auto_provision {
                            tracing::debug!(%guid, "Auto provisioning disabled, leaving device in inbox");
                            continue;
                        }
                        if registry.contains(&guid).await {
                            tracing::trace!(%guid, "Device already provisioned");
                            continue;
                        }
                        provision_device(&registry, &event_bus, &guid, &label).await;
                    }
                    JSuplaEvent::DeviceOnline { guid, timestamp } => {
                        device_status.write().await.insert(
                            guid,
                            DeviceStatusEntry {
                                online: true,
                                reason: None,
                                last_change: timestamp,
                            },
                        );
                    }
                    JSuplaEvent::DeviceOffline {
                        guid,
                        reason,
                        timestamp,
                    } => {
                        device_status.write().await.insert(
                            guid,
                            DeviceStatusEntry {
                                online: false,
                                reason,
                                last_change: timestamp,
                            },
                        );
                    }
                    _ => {}
                }
            }
            tracing::debug!("DeviceService event loop finished");
        }));
        tracing::info!(auto_provision = self.auto_provision, "DeviceService started");
    }

    /// Stop the event loop.
    pub fn stop(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }

    /// Provision a device by hand.
    pub async fn provision(&self, guid: &str, label: &str) -> Arc<SuplaDevice> {
        provision_device(&self.registry, &self.event_bus, guid, label).await
    }

    pub async fn device_status(&self, guid: &str) -> Option<DeviceStatusEntry> {
        self.device_status.read().await.get(guid).cloned()
    }

    /// Status of all devices seen so far, sorted by GUID.
    pub async fn list_status(&self) -> Vec<(String, DeviceStatusEntry)> {
        let mut entries: Vec<(String, DeviceStatusEntry)> = self
            .device_status
            .read()
            .await
            .iter()
            .map(|(guid, entry)| (guid.clone(), entry.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}

impl Drop for DeviceService {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn provision_device(
    registry: &DeviceRegistry,
    event_bus: &EventBus,
    guid: &str,
    label: &str,
) -> Arc<SuplaDevice> {
    let device = Arc::new(SuplaDevice::new(guid, label, event_bus.clone()));
    device.initialize();
    registry.add(device.clone()).await;
    tracing::info!(%guid, %label, "Provisioned device");
    device
}
