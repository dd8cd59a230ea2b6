//! Locally provisioned Supla devices.
//!
//! A device ("thing") exists independently of any connection. A session that
//! authorizes with the device's GUID binds to it by pushing the channel list
//! and a transport; from then on value changes flow in and commands flow out.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use jsupla_core::{
    ChannelValue, DeviceChannel, EventBus, JSuplaEvent, ServerMessage, SharedTransport,
    TransportError,
};

/// Sender id used for server-originated channel commands.
pub const COMMAND_SENDER_ID: i32 = 1;
/// Duration requested for server-originated channel commands.
pub const COMMAND_DURATION_MS: u32 = 100;

/// Operations a session performs on the device it binds to.
pub trait DeviceHandle: Send + Sync {
    /// GUID this device was provisioned for.
    fn guid(&self) -> &str;

    /// Replace the channel list with the one announced at registration.
    fn set_channels(&self, channels: Vec<DeviceChannel>);

    /// Hand over the connection used for commands to the device.
    fn set_transport(&self, transport: SharedTransport);

    fn update_channel_value(&self, channel_number: u32, value: ChannelValue);

    /// Mark the device offline on behalf of the session owning `transport`.
    ///
    /// Ignored when the device has since been bound to another connection.
    fn set_offline(&self, transport: &SharedTransport, detail: StatusDetail, reason: &str);
}

/// Shared device handle.
pub type SharedDeviceHandle = Arc<dyn DeviceHandle>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThingStatus {
    Online,
    Offline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusDetail {
    None,
    CommunicationError,
    BridgeUninitialized,
}

/// Status of a device as shown to users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub status: ThingStatus,
    pub detail: StatusDetail,
    pub description: Option<String>,
}

impl DeviceStatus {
    pub fn online() -> Self {
        Self {
            status: ThingStatus::Online,
            detail: StatusDetail::None,
            description: None,
        }
    }

    pub fn offline(detail: StatusDetail, description: impl Into<String>) -> Self {
        Self {
            status: ThingStatus::Offline,
            detail,
            description: Some(description.into()),
        }
    }

    pub fn is_online(&self) -> bool {
        self.status == ThingStatus::Online
    }
}

/// Errors raised by device commands.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("Device {0} has no channel {1}")]
    UnknownChannel(String, u32),

    #[error("Device not connected: {0}")]
    NotConnected(String),

    #[error("Communication error: {0}")]
    Communication(#[from] TransportError),
}

struct DeviceState {
    status: DeviceStatus,
    channels: BTreeMap<u32, DeviceChannel>,
    transport: Option<SharedTransport>,
}

/// Device provisioned for one Supla GUID.
pub struct SuplaDevice {
    guid: String,
    label: String,
    event_bus: EventBus,
    state: Mutex<DeviceState>,
}

impl SuplaDevice {
    pub fn new(guid: impl Into<String>, label: impl Into<String>, event_bus: EventBus) -> Self {
        Self {
            guid: guid.into(),
            label: label.into(),
            event_bus,
            state: Mutex::new(DeviceState {
                status: DeviceStatus::offline(StatusDetail::None, "Not initialized"),
                channels: BTreeMap::new(),
                transport: None,
            }),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Bring the device into its initial status.
    ///
    /// It stays offline until a session binds a transport to it.
    pub fn initialize(&self) {
        let bound = self.state.lock().transport.is_some();
        if bound {
            self.go_online();
        } else {
            self.state.lock().status =
                DeviceStatus::offline(StatusDetail::None, "Channel in server is not yet opened");
        }
    }

    pub fn status(&self) -> DeviceStatus {
        self.state.lock().status.clone()
    }

    pub fn is_bound(&self) -> bool {
        self.state.lock().transport.is_some()
    }

    /// Channels ordered by channel number.
    pub fn channels(&self) -> Vec<DeviceChannel> {
        self.state.lock().channels.values().cloned().collect()
    }

    pub fn channel_value(&self, channel_number: u32) -> Option<ChannelValue> {
        self.state
            .lock()
            .channels
            .get(&channel_number)
            .map(|c| c.value.clone())
    }

    /// Ask the device to change the value of one of its channels.
    pub fn send_command(&self, channel_number: u32, value: ChannelValue) -> Result<(), DeviceError> {
        let transport = {
            let state = self.state.lock();
            if !state.channels.contains_key(&channel_number) {
                return Err(DeviceError::UnknownChannel(self.guid.clone(), channel_number));
            }
            state
                .transport
                .clone()
                .ok_or_else(|| DeviceError::NotConnected(self.guid.clone()))?
        };

        transport.send(ServerMessage::ChannelNewValue {
            sender_id: COMMAND_SENDER_ID,
            channel_number,
            duration_ms: COMMAND_DURATION_MS,
            value,
        })?;
        tracing::debug!(guid = %self.guid, channel_number, "Sent channel command");
        Ok(())
    }

    fn go_online(&self) {
        self.state.lock().status = DeviceStatus::online();
        self.event_bus.publish_with_source(
            JSuplaEvent::DeviceOnline {
                guid: self.guid.clone(),
                timestamp: chrono::Utc::now().timestamp(),
            },
            "device",
        );
    }
}

impl DeviceHandle for SuplaDevice {
    fn guid(&self) -> &str {
        &self.guid
    }

    fn set_channels(&self, channels: Vec<DeviceChannel>) {
        tracing::debug!(guid = %self.guid, count = channels.len(), "Registering channels");
        let mut state = self.state.lock();
        state.channels = channels.into_iter().map(|c| (c.number, c)).collect();
    }

    fn set_transport(&self, transport: SharedTransport) {
        self.state.lock().transport = Some(transport);
        self.go_online();
    }

    fn update_channel_value(&self, channel_number: u32, value: ChannelValue) {
        {
            let mut state = self.state.lock();
            match state.channels.get_mut(&channel_number) {
                Some(channel) => channel.value = value.clone(),
                None => {
                    tracing::debug!(
                        guid = %self.guid,
                        channel_number,
                        "Value for a channel that was not announced"
                    );
                    state.channels.insert(
                        channel_number,
                        DeviceChannel {
                            number: channel_number,
                            channel_type: String::new(),
                            value: value.clone(),
                        },
                    );
                }
            }
        }
        self.event_bus.publish_with_source(
            JSuplaEvent::ChannelValueChanged {
                guid: self.guid.clone(),
                channel_number,
                value,
                timestamp: chrono::Utc::now().timestamp(),
            },
            "device",
        );
    }

    fn set_offline(&self, transport: &SharedTransport, detail: StatusDetail, reason: &str) {
        {
            let mut state = self.state.lock();
            let owned = state
                .transport
                .as_ref()
                .is_some_and(|bound| Arc::ptr_eq(bound, transport));
            if !owned {
                tracing::debug!(
                    guid = %self.guid,
                    reason,
                    "Replaced connection closed, device stays bound"
                );
                return;
            }
            state.transport = None;
            state.status = DeviceStatus::offline(detail, reason);
        }
        tracing::info!(guid = %self.guid, ?detail, reason, "Device offline");
        self.event_bus.publish_with_source(
            JSuplaEvent::DeviceOffline {
                guid: self.guid.clone(),
                reason: Some(reason.to_string()),
                timestamp: chrono::Utc::now().timestamp(),
            },
            "device",
        );
    }
}
