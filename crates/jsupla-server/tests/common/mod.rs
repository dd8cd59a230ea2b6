#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use jsupla_core::{
    ActivityTimeout, AuthConfig, ChannelValue, DeviceChannel, DeviceMessage, ServerMessage,
    SharedTransport, Transport, TransportError,
};
use jsupla_devices::{DeviceHandle, DeviceRegistry, DiscoverySink, StatusDetail};
use jsupla_server::{CredentialVerifier, Scheduler, Session, SessionContext};

pub const GUID: &str = "0123456789ABCDEF";
pub const ACCESS_ID: i32 = 7;
pub const PASSWORD: &str = "secret";
pub const TIMEOUT_SECS: u32 = 10;

#[derive(Default)]
pub struct RecordingTransport {
    pub sent: Mutex<Vec<ServerMessage>>,
    pub closes: AtomicUsize,
    closed: AtomicBool,
}

impl RecordingTransport {
    pub fn sent(&self) -> Vec<ServerMessage> {
        self.sent.lock().clone()
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl Transport for RecordingTransport {
    fn send(&self, message: ServerMessage) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.sent.lock().push(message);
        Ok(())
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct RecordingHandle {
    pub guid: String,
    pub channels: Mutex<Vec<Vec<DeviceChannel>>>,
    pub transports: AtomicUsize,
    pub values: Mutex<Vec<(u32, ChannelValue)>>,
    pub offline: Mutex<Vec<(StatusDetail, String)>>,
}

impl RecordingHandle {
    pub fn new(guid: &str) -> Arc<Self> {
        Arc::new(Self {
            guid: guid.to_string(),
            ..Default::default()
        })
    }

    pub fn set_channels_calls(&self) -> usize {
        self.channels.lock().len()
    }

    pub fn set_transport_calls(&self) -> usize {
        self.transports.load(Ordering::SeqCst)
    }

    pub fn offline(&self) -> Vec<(StatusDetail, String)> {
        self.offline.lock().clone()
    }
}

impl DeviceHandle for RecordingHandle {
    fn guid(&self) -> &str {
        &self.guid
    }

    fn set_channels(&self, channels: Vec<DeviceChannel>) {
        self.channels.lock().push(channels);
    }

    fn set_transport(&self, _transport: SharedTransport) {
        self.transports.fetch_add(1, Ordering::SeqCst);
    }

    fn update_channel_value(&self, channel_number: u32, value: ChannelValue) {
        self.values.lock().push((channel_number, value));
    }

    fn set_offline(&self, _transport: &SharedTransport, detail: StatusDetail, reason: &str) {
        self.offline.lock().push((detail, reason.to_string()));
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub published: Mutex<Vec<(String, String)>>,
}

impl RecordingSink {
    pub fn published(&self) -> Vec<(String, String)> {
        self.published.lock().clone()
    }
}

impl DiscoverySink for RecordingSink {
    fn publish(&self, guid: &str, name: &str) {
        self.published.lock().push((guid.to_string(), name.to_string()));
    }
}

pub struct Fixture {
    pub session: Arc<Session>,
    pub transport: Arc<RecordingTransport>,
    pub registry: DeviceRegistry,
    pub sink: Arc<RecordingSink>,
}

pub fn location_auth() -> AuthConfig {
    AuthConfig::Location {
        access_id: ACCESS_ID,
        access_id_password: PASSWORD.to_string(),
    }
}

pub fn fixture(auth: AuthConfig) -> Fixture {
    let registry = DeviceRegistry::new();
    let sink = Arc::new(RecordingSink::default());
    let (session, transport) = session_with(1, &auth, &registry, sink.clone());
    Fixture {
        session,
        transport,
        registry,
        sink,
    }
}

/// Session sharing `registry` with other sessions, as a reconnecting device would.
pub fn session_with(
    id: u64,
    auth: &AuthConfig,
    registry: &DeviceRegistry,
    sink: Arc<RecordingSink>,
) -> (Arc<Session>, Arc<RecordingTransport>) {
    let transport = Arc::new(RecordingTransport::default());
    let ctx = SessionContext {
        verifier: Arc::new(CredentialVerifier::from_config(auth)),
        registry: registry.clone(),
        discovery: sink,
        scheduler: Scheduler::current(),
        activity_timeout: ActivityTimeout::around(TIMEOUT_SECS),
        device_timeout: Duration::from_secs(u64::from(TIMEOUT_SECS)),
    };
    let session = Session::new(id, "127.0.0.1:40000", transport.clone(), ctx);
    (session, transport)
}

pub fn relay_channel() -> DeviceChannel {
    DeviceChannel {
        number: 0,
        channel_type: "relay".to_string(),
        value: ChannelValue::OnOff(false),
    }
}

pub fn register_location(server_name: Option<&str>, password: &str) -> DeviceMessage {
    DeviceMessage::RegisterDeviceLocation {
        guid: GUID.to_string(),
        name: "Relay".to_string(),
        server_name: server_name.map(str::to_string),
        location_id: ACCESS_ID,
        location_password: password.to_string(),
        channels: vec![relay_channel()],
    }
}
