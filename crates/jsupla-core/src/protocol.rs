//! Supla device/server message model.
//!
//! Only the subset of the device protocol needed to drive registration,
//! liveness and value updates is modelled here. Messages are framed as one
//! JSON document per line; the `type` field selects the variant.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Longest frame accepted from a device, newline excluded.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// Result code sent back on successful registration (`SUPLA_RESULTCODE_TRUE`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum ResultCode {
    False,
    True,
}

impl ResultCode {
    pub fn value(self) -> i32 {
        match self {
            Self::False => 2,
            Self::True => 3,
        }
    }
}

impl From<ResultCode> for i32 {
    fn from(code: ResultCode) -> Self {
        code.value()
    }
}

impl TryFrom<i32> for ResultCode {
    type Error = String;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            2 => Ok(Self::False),
            3 => Ok(Self::True),
            other => Err(format!("unknown result code {}", other)),
        }
    }
}

/// Seconds + microseconds pair, as used by ping round-trips.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeValue {
    pub seconds: i64,
    pub micros: i64,
}

impl TimeValue {
    pub fn new(seconds: i64, micros: i64) -> Self {
        Self { seconds, micros }
    }
}

impl From<Duration> for TimeValue {
    fn from(d: Duration) -> Self {
        Self {
            seconds: d.as_secs() as i64,
            micros: i64::from(d.subsec_micros()),
        }
    }
}

/// Value carried by a single device channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ChannelValue {
    OnOff(bool),
    Percent(u8),
    Decimal(f64),
    Rgb {
        brightness: u8,
        color_brightness: u8,
        red: u8,
        green: u8,
        blue: u8,
    },
    /// Raw bytes for channel types this server does not interpret.
    Unknown(Vec<u8>),
}

/// A channel as announced by the device during registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceChannel {
    pub number: u32,
    #[serde(default)]
    pub channel_type: String,
    pub value: ChannelValue,
}

/// Messages sent from a device to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeviceMessage {
    /// Registration authorized by location id + password.
    RegisterDeviceLocation {
        guid: String,
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        server_name: Option<String>,
        location_id: i32,
        location_password: String,
        #[serde(default)]
        channels: Vec<DeviceChannel>,
    },
    /// Registration authorized by account email + auth key.
    RegisterDeviceEmail {
        guid: String,
        name: String,
        email: String,
        auth_key: String,
        #[serde(default)]
        channels: Vec<DeviceChannel>,
    },
    SetActivityTimeout {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        activity_timeout: Option<u32>,
    },
    Ping {
        time_value: TimeValue,
    },
    DeviceValueChanged {
        channel_number: u32,
        value: ChannelValue,
    },
    /// Device acknowledgement of a `ChannelNewValue` command.
    ChannelNewValueResult {
        channel_number: u32,
        sender_id: i32,
        success: bool,
    },
    /// Any message kind this server does not know.
    #[serde(other)]
    Unsupported,
}

impl DeviceMessage {
    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RegisterDeviceLocation { .. } => "register_device_location",
            Self::RegisterDeviceEmail { .. } => "register_device_email",
            Self::SetActivityTimeout { .. } => "set_activity_timeout",
            Self::Ping { .. } => "ping",
            Self::DeviceValueChanged { .. } => "device_value_changed",
            Self::ChannelNewValueResult { .. } => "channel_new_value_result",
            Self::Unsupported => "unsupported",
        }
    }
}

/// Messages sent from the server to a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    RegisterDeviceResult {
        result_code: ResultCode,
        activity_timeout_sec: u32,
        activity_timeout_sec_min: u32,
        activity_timeout_sec_max: u32,
    },
    SetActivityTimeoutResult {
        activity_timeout_sec: u32,
        activity_timeout_sec_min: u32,
        activity_timeout_sec_max: u32,
    },
    PingResult {
        time_value: TimeValue,
    },
    /// Command asking the device to change a channel value.
    ChannelNewValue {
        sender_id: i32,
        channel_number: u32,
        duration_ms: u32,
        value: ChannelValue,
    },
}

impl ServerMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RegisterDeviceResult { .. } => "register_device_result",
            Self::SetActivityTimeoutResult { .. } => "set_activity_timeout_result",
            Self::PingResult { .. } => "ping_result",
            Self::ChannelNewValue { .. } => "channel_new_value",
        }
    }
}

/// Activity timeout negotiated with devices: nominal value and its bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivityTimeout {
    pub secs: u32,
    pub min_secs: u32,
    pub max_secs: u32,
}

impl ActivityTimeout {
    /// Bounds are the nominal timeout plus/minus two seconds.
    pub fn around(secs: u32) -> Self {
        Self {
            secs,
            min_secs: secs.saturating_sub(2),
            max_secs: secs.saturating_add(2),
        }
    }

    pub fn register_result(&self) -> ServerMessage {
        ServerMessage::RegisterDeviceResult {
            result_code: ResultCode::True,
            activity_timeout_sec: self.secs,
            activity_timeout_sec_min: self.min_secs,
            activity_timeout_sec_max: self.max_secs,
        }
    }

    pub fn set_activity_timeout_result(&self) -> ServerMessage {
        ServerMessage::SetActivityTimeoutResult {
            activity_timeout_sec: self.secs,
            activity_timeout_sec_min: self.min_secs,
            activity_timeout_sec_max: self.max_secs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_location_registration() {
        let line = r#"{"type":"register_device_location","guid":"abc","name":"Relay","server_name":"Home","location_id":7,"location_password":"secret","channels":[{"number":0,"channel_type":"relay","value":{"kind":"on_off","value":true}}]}"#;
        let msg: DeviceMessage = serde_json::from_str(line).unwrap();
        match msg {
            DeviceMessage::RegisterDeviceLocation {
                guid,
                server_name,
                location_id,
                channels,
                ..
            } => {
                assert_eq!(guid, "abc");
                assert_eq!(server_name.as_deref(), Some("Home"));
                assert_eq!(location_id, 7);
                assert_eq!(channels.len(), 1);
                assert_eq!(channels[0].value, ChannelValue::OnOff(true));
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn test_unknown_type_is_unsupported() {
        let msg: DeviceMessage = serde_json::from_str(r#"{"type":"get_version"}"#).unwrap();
        assert_eq!(msg, DeviceMessage::Unsupported);
        assert_eq!(msg.kind(), "unsupported");
    }

    #[test]
    fn test_result_code_on_wire() {
        let json = serde_json::to_value(ActivityTimeout::around(10).register_result()).unwrap();
        assert_eq!(json["result_code"], 3);
        assert_eq!(json["activity_timeout_sec_min"], 8);
        assert_eq!(json["activity_timeout_sec_max"], 12);
    }

    #[test]
    fn test_activity_timeout_bounds_saturate() {
        let timeout = ActivityTimeout::around(u32::MAX);
        assert_eq!(timeout.max_secs, u32::MAX);
        assert_eq!(timeout.min_secs, u32::MAX - 2);

        let timeout = ActivityTimeout::around(1);
        assert_eq!((timeout.min_secs, timeout.max_secs), (0, 3));
    }

    #[test]
    fn test_time_value_from_duration() {
        let tv = TimeValue::from(Duration::from_millis(2_500));
        assert_eq!(tv, TimeValue::new(2, 500_000));
    }
}
