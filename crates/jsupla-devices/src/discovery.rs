//! Device discovery.
//!
//! Sessions report every device that authorizes. Discovery is advisory: the
//! result lands in an inbox and on the event bus, and something else decides
//! whether a device gets provisioned. Reporting the same GUID again is fine.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use jsupla_core::{EventBus, JSuplaEvent};

/// Property holding the device GUID on a discovery result.
pub const PROPERTY_GUID: &str = "guid";

/// Receiver of "device seen" reports.
///
/// Implementations must not block: sessions call this from their message
/// handling path.
pub trait DiscoverySink: Send + Sync {
    fn publish(&self, guid: &str, name: &str);
}

/// A device offered for provisioning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryResult {
    pub guid: String,
    pub label: String,
    pub bridge_id: String,
    pub properties: HashMap<String, String>,
    /// Unix timestamp of the latest report
    pub discovered_at: i64,
}

/// Discovery inbox backed by the event bus.
pub struct DiscoveryService {
    bridge_id: String,
    event_bus: EventBus,
    inbox: RwLock<HashMap<String, DiscoveryResult>>,
    published: AtomicU64,
}

impl DiscoveryService {
    pub fn new(bridge_id: impl Into<String>, event_bus: EventBus) -> Self {
        Self {
            bridge_id: bridge_id.into(),
            event_bus,
            inbox: RwLock::new(HashMap::new()),
            published: AtomicU64::new(0),
        }
    }

    pub fn bridge_id(&self) -> &str {
        &self.bridge_id
    }

    /// Latest result per GUID, sorted by GUID.
    pub fn results(&self) -> Vec<DiscoveryResult> {
        let mut results: Vec<DiscoveryResult> = self.inbox.read().values().cloned().collect();
        results.sort_by(|a, b| a.guid.cmp(&b.guid));
        results
    }

    pub fn get(&self, guid: &str) -> Option<DiscoveryResult> {
        self.inbox.read().get(guid).cloned()
    }

    /// Drop a result from the inbox, e.g. once the device was provisioned.
    pub fn remove(&self, guid: &str) -> Option<DiscoveryResult> {
        self.inbox.write().remove(guid)
    }

    /// Number of reports received, duplicates included.
    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    fn build_result(&self, guid: &str, name: &str) -> DiscoveryResult {
        let mut properties = HashMap::new();
        properties.insert(PROPERTY_GUID.to_string(), guid.to_string());
        DiscoveryResult {
            guid: guid.to_string(),
            label: format!("{} ({})", name, guid),
            bridge_id: self.bridge_id.clone(),
            properties,
            discovered_at: chrono::Utc::now().timestamp(),
        }
    }
}

impl DiscoverySink for DiscoveryService {
    fn publish(&self, guid: &str, name: &str) {
        let result = self.build_result(guid, name);
        self.inbox.write().insert(guid.to_string(), result.clone());
        self.published.fetch_add(1, Ordering::Relaxed);

        tracing::debug!(%guid, label = %result.label, "Discovered device");
        self.event_bus.publish_with_source(
            JSuplaEvent::DeviceDiscovered {
                guid: result.guid,
                label: result.label,
                bridge_id: result.bridge_id,
                properties: result.properties,
                timestamp: result.discovered_at,
            },
            "discovery",
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_label_and_properties() {
        let discovery = DiscoveryService::new("server-bridge", EventBus::new());
        discovery.publish("0123", "Relay Home");

        let result = discovery.get("0123").unwrap();
        assert_eq!(result.label, "Relay Home (0123)");
        assert_eq!(result.bridge_id, "server-bridge");
        assert_eq!(result.properties.get(PROPERTY_GUID).map(String::as_str), Some("0123"));
    }

    #[test]
    fn test_remove_from_inbox() {
        let discovery = DiscoveryService::new("bridge", EventBus::new());
        discovery.publish("a", "A");
        discovery.publish("b", "B");
        assert!(discovery.remove("a").is_some());
        let guids: Vec<String> = discovery.results().into_iter().map(|r| r.guid).collect();
        assert_eq!(guids, vec!["b".to_string()]);
    }
}
