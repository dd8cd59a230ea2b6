//! Events published by the server, devices and discovery.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::protocol::ChannelValue;

/// Events flowing through the jSupla event bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum JSuplaEvent {
    /// A device authorized on the server and was offered for provisioning.
    DeviceDiscovered {
        guid: String,
        label: String,
        bridge_id: String,
        properties: HashMap<String, String>,
        timestamp: i64,
    },
    DeviceOnline {
        guid: String,
        timestamp: i64,
    },
    DeviceOffline {
        guid: String,
        reason: Option<String>,
        timestamp: i64,
    },
    ChannelValueChanged {
        guid: String,
        channel_number: u32,
        value: ChannelValue,
        timestamp: i64,
    },
    SessionOpened {
        session_id: u64,
        peer: String,
        timestamp: i64,
    },
    SessionClosed {
        session_id: u64,
        guid: Option<String>,
        timestamp: i64,
    },
}

impl JSuplaEvent {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::DeviceDiscovered { .. } => "DeviceDiscovered",
            Self::DeviceOnline { .. } => "DeviceOnline",
            Self::DeviceOffline { .. } => "DeviceOffline",
            Self::ChannelValueChanged { .. } => "ChannelValueChanged",
            Self::SessionOpened { .. } => "SessionOpened",
            Self::SessionClosed { .. } => "SessionClosed",
        }
    }

    pub fn is_device_event(&self) -> bool {
        matches!(
            self,
            Self::DeviceOnline { .. } | Self::DeviceOffline { .. } | Self::ChannelValueChanged { .. }
        )
    }

    pub fn is_discovery_event(&self) -> bool {
        matches!(self, Self::DeviceDiscovered { .. })
    }

    pub fn is_session_event(&self) -> bool {
        matches!(self, Self::SessionOpened { .. } | Self::SessionClosed { .. })
    }

    /// GUID of the device the event refers to, if any.
    pub fn guid(&self) -> Option<&str> {
        match self {
            Self::DeviceDiscovered { guid, .. }
            | Self::DeviceOnline { guid, .. }
            | Self::DeviceOffline { guid, .. }
            | Self::ChannelValueChanged { guid, .. } => Some(guid),
            Self::SessionClosed { guid, .. } => guid.as_deref(),
            Self::SessionOpened { .. } => None,
        }
    }
}

/// Metadata attached to every published event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMetadata {
    pub event_id: String,
    pub timestamp: i64,
    pub source: String,
}

impl EventMetadata {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            source: source.into(),
        }
    }
}
