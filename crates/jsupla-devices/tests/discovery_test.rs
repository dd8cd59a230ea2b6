use jsupla_core::{EventBus, JSuplaEvent};
use jsupla_devices::{DeviceRegistry, DiscoveryService, DiscoverySink, PROPERTY_GUID};

#[tokio::test]
async fn test_repeated_reports_are_accepted() {
    let bus = EventBus::new();
    let mut rx = bus.discovery_events();
    let registry = DeviceRegistry::new();
    let discovery = DiscoveryService::new("server-bridge", bus.clone());

    discovery.publish("guid-1", "Kitchen");
    discovery.publish("guid-1", "Kitchen");

    for _ in 0..2 {
        match rx.recv().await.unwrap().0 {
            JSuplaEvent::DeviceDiscovered {
                guid,
                label,
                bridge_id,
                properties,
                ..
            } => {
                assert_eq!(guid, "guid-1");
                assert_eq!(label, "Kitchen (guid-1)");
                assert_eq!(bridge_id, "server-bridge");
                assert_eq!(properties.get(PROPERTY_GUID).map(String::as_str), Some("guid-1"));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    assert_eq!(discovery.published_count(), 2);
    assert_eq!(discovery.results().len(), 1);
    // Discovery only reports; it never provisions on its own.
    assert!(registry.is_empty().await);
}

#[tokio::test]
async fn test_sink_as_trait_object() {
    let bus = EventBus::new();
    let discovery = std::sync::Arc::new(DiscoveryService::new("bridge", bus));
    let sink: std::sync::Arc<dyn DiscoverySink> = discovery.clone();

    sink.publish("a", "Gate");
    sink.publish("b", "Lamp");

    let labels: Vec<String> = discovery.results().into_iter().map(|r| r.label).collect();
    assert_eq!(labels, vec!["Gate (a)".to_string(), "Lamp (b)".to_string()]);
}
