//! Per-connection session state machine.
//!
//! A session starts unauthorized and only listens for registrations. A
//! successful registration authorizes it for the rest of its life: the device
//! is reported to discovery, confirmed on the wire and bound to its local
//! device handle. After that, inbound messages are dispatched by kind.
//!
//! Inbound messages, timer callbacks and teardown all serialize on the
//! session's state lock. Outbound writes only enqueue, so holding the lock
//! while writing never waits on the socket.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::Instrument;

use jsupla_core::{
    ActivityTimeout, DeviceChannel, DeviceMessage, ServerMessage, SharedTransport, TimeValue,
};
use jsupla_devices::{DeviceRegistry, DiscoverySink, SharedDeviceHandle, StatusDetail};

use crate::credentials::{AuthFailure, CredentialVerifier};
use crate::liveness::{LivenessMonitor, LivenessTarget};
use crate::scheduler::{ScheduledTask, Scheduler};

/// Offline reason after the device closed the connection.
pub const REASON_WENT_OFFLINE: &str = "Device went offline";
/// Offline reason after the stale check closed the connection.
pub const REASON_NO_PING_RESPONSE: &str = "Device does not respond to pings";

/// Collaborators shared by all sessions of a server.
#[derive(Clone)]
pub struct SessionContext {
    pub verifier: Arc<CredentialVerifier>,
    pub registry: DeviceRegistry,
    pub discovery: Arc<dyn DiscoverySink>,
    pub scheduler: Scheduler,
    /// Timeout triple sent to devices.
    pub activity_timeout: ActivityTimeout,
    /// Idle time after which a connection is dead. Also the bind retry interval.
    pub device_timeout: Duration,
}

struct SessionState {
    authorized: bool,
    guid: Option<String>,
    last_activity: Instant,
    handle: Option<SharedDeviceHandle>,
    liveness: Option<LivenessMonitor>,
    bind_retry: Option<ScheduledTask>,
    bind_attempts: u32,
    closed: bool,
}

/// Protocol state of one device connection.
pub struct Session {
    id: u64,
    ctx: SessionContext,
    transport: SharedTransport,
    created_at: Instant,
    span: tracing::Span,
    state: Mutex<SessionState>,
}

impl Session {
    pub fn new(id: u64, peer: &str, transport: SharedTransport, ctx: SessionContext) -> Arc<Self> {
        let now = Instant::now();
        let span = tracing::info_span!(
            "session",
            session_id = id,
            peer = %peer,
            guid = tracing::field::Empty
        );
        Arc::new(Self {
            id,
            ctx,
            transport,
            created_at: now,
            span,
            state: Mutex::new(SessionState {
                authorized: false,
                guid: None,
                last_activity: now,
                handle: None,
                liveness: None,
                bind_retry: None,
                bind_attempts: 0,
                closed: false,
            }),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn span(&self) -> &tracing::Span {
        &self.span
    }

    pub async fn is_authorized(&self) -> bool {
        self.state.lock().await.authorized
    }

    /// GUID of the authorized device.
    pub async fn guid(&self) -> Option<String> {
        self.state.lock().await.guid.clone()
    }

    pub async fn is_bound(&self) -> bool {
        self.state.lock().await.handle.is_some()
    }

    /// Registry lookups done so far, the first one included.
    pub async fn bind_attempts(&self) -> u32 {
        self.state.lock().await.bind_attempts
    }

    pub async fn is_closed(&self) -> bool {
        self.state.lock().await.closed
    }

    /// Handle one inbound message. Messages of a session must be passed in
    /// arrival order, one at a time.
    pub async fn accept(self: &Arc<Self>, message: DeviceMessage) {
        self.dispatch(message).instrument(self.span.clone()).await
    }

    /// The device closed the connection.
    pub async fn on_complete(&self) {
        let handle = async {
            let mut state = self.state.lock().await;
            tracing::debug!(authorized = state.authorized, "Connection completed");
            self.shutdown(&mut state)
        }
        .instrument(self.span.clone())
        .await;
        if let Some(handle) = handle {
            handle.set_offline(&self.transport, StatusDetail::None, REASON_WENT_OFFLINE);
        }
    }

    /// The connection failed with `error`.
    pub async fn on_error(&self, error: &str) {
        let handle = async {
            let mut state = self.state.lock().await;
            tracing::error!(%error, authorized = state.authorized, "Error occurred in connection");
            self.shutdown(&mut state)
        }
        .instrument(self.span.clone())
        .await;
        if let Some(handle) = handle {
            handle.set_offline(
                &self.transport,
                StatusDetail::CommunicationError,
                &format!("Error occurred in channel pipe. {}", error),
            );
        }
    }

    async fn dispatch(self: &Arc<Self>, message: DeviceMessage) {
        let mut state = self.state.lock().await;
        if state.closed {
            tracing::trace!(kind = message.kind(), "Session closed, dropping message");
            return;
        }
        state.last_activity = Instant::now();
        tracing::trace!(kind = message.kind(), "Inbound message");

        if !state.authorized {
            match message {
                DeviceMessage::RegisterDeviceLocation {
                    guid,
                    name,
                    server_name,
                    location_id,
                    location_password,
                    channels,
                } => {
                    let name = display_name(&name, server_name.as_deref());
                    let verdict = self
                        .ctx
                        .verifier
                        .check_location(location_id, location_password.as_bytes());
                    self.authorize(&mut state, guid, name, channels, verdict).await;
                }
                DeviceMessage::RegisterDeviceEmail {
                    guid,
                    name,
                    email,
                    auth_key,
                    channels,
                } => {
                    let verdict = self.ctx.verifier.check_email(&email, &auth_key);
                    self.authorize(&mut state, guid, name, channels, verdict).await;
                }
                other => {
                    tracing::debug!(
                        kind = other.kind(),
                        "Device is not authorized and did not send a registration"
                    );
                }
            }
            return;
        }

        match message {
            DeviceMessage::SetActivityTimeout { activity_timeout } => {
                tracing::debug!(requested = ?activity_timeout, "Activity timeout setup");
                self.send(self.ctx.activity_timeout.set_activity_timeout_result());
                if let Some(previous) = state.liveness.take() {
                    previous.cancel();
                }
                state.liveness = Some(LivenessMonitor::arm(
                    &self.ctx.scheduler,
                    self.ctx.device_timeout,
                    Arc::downgrade(self),
                ));
            }
            DeviceMessage::Ping { time_value } => {
                self.send(ServerMessage::PingResult { time_value });
            }
            DeviceMessage::DeviceValueChanged {
                channel_number,
                value,
            } => match &state.handle {
                Some(handle) => handle.update_channel_value(channel_number, value),
                None => tracing::warn!(channel_number, "Value changed before the device was bound"),
            },
            DeviceMessage::ChannelNewValueResult {
                channel_number,
                sender_id,
                success,
            } => {
                tracing::debug!(channel_number, sender_id, success, "Channel command acknowledged");
            }
            other => {
                tracing::debug!(kind = other.kind(), "Not handling message");
            }
        }
    }

    async fn authorize(
        self: &Arc<Self>,
        state: &mut SessionState,
        guid: String,
        name: String,
        channels: Vec<DeviceChannel>,
        verdict: Result<(), AuthFailure>,
    ) {
        if let Err(failure) = verdict {
            tracing::debug!(%guid, %failure, "Authorization failed");
            return;
        }

        state.authorized = true;
        state.guid = Some(guid.clone());
        self.span.record("guid", guid.as_str());
        tracing::info!(%guid, %name, "Device authorized");

        self.ctx.discovery.publish(&guid, &name);
        self.send(self.ctx.activity_timeout.register_result());
        self.bind(state, channels).await;
    }

    /// Look the device up in the registry and bind to it, or retry later.
    async fn bind(self: &Arc<Self>, state: &mut SessionState, channels: Vec<DeviceChannel>) {
        let Some(guid) = state.guid.clone() else {
            return;
        };
        state.bind_attempts += 1;
        state.bind_retry = None;

        match self.ctx.registry.get(&guid).await {
            Some(handle) => {
                handle.set_channels(channels);
                handle.set_transport(self.transport.clone());
                state.handle = Some(handle);
                tracing::info!(attempts = state.bind_attempts, "Bound to device");
            }
            None => {
                tracing::debug!(
                    attempt = state.bind_attempts,
                    "Device not provisioned yet, binding will happen later"
                );
                let retry = retry_bind(Arc::downgrade(self), channels);
                state.bind_retry = Some(self.ctx.scheduler.schedule_once(self.ctx.device_timeout, retry));
            }
        }
    }

    /// Close the transport and stop all scheduled work. Returns the bound
    /// handle on the first call only.
    fn shutdown(&self, state: &mut SessionState) -> Option<SharedDeviceHandle> {
        if state.closed {
            return None;
        }
        state.closed = true;
        if let Some(liveness) = state.liveness.take() {
            liveness.cancel();
        }
        if let Some(retry) = state.bind_retry.take() {
            retry.cancel();
        }
        self.transport.close();
        state.handle.clone()
    }

    fn send(&self, message: ServerMessage) {
        let kind = message.kind();
        match self.transport.send(message) {
            Ok(()) => tracing::trace!(kind, "Queued message"),
            Err(e) => tracing::warn!(kind, error = %e, "Failed to send message"),
        }
    }
}

fn retry_bind(session: std::sync::Weak<Session>, channels: Vec<DeviceChannel>) -> BoxFuture<'static, ()> {
    Box::pin(async move {
        let Some(session) = session.upgrade() else {
            return;
        };
        let span = session.span.clone();
        async {
            let mut state = session.state.lock().await;
            if state.closed || state.handle.is_some() {
                return;
            }
            session.bind(&mut state, channels).await;
        }
        .instrument(span)
        .await
    })
}

#[async_trait]
impl LivenessTarget for Session {
    async fn send_ping(&self) {
        let state = self.state.lock().await;
        if state.closed {
            return;
        }
        let time_value = TimeValue::from(self.created_at.elapsed());
        let _enter = self.span.enter();
        self.send(ServerMessage::PingResult { time_value });
    }

    async fn check_alive(&self) -> bool {
        let handle = {
            let mut state = self.state.lock().await;
            if state.closed {
                return false;
            }
            let idle = state.last_activity.elapsed();
            if idle <= self.ctx.device_timeout {
                return true;
            }
            let _enter = self.span.enter();
            tracing::warn!(idle_secs = idle.as_secs(), "Device is dead, closing connection");
            self.shutdown(&mut state)
        };
        if let Some(handle) = handle {
            handle.set_offline(&self.transport, StatusDetail::None, REASON_NO_PING_RESPONSE);
        }
        false
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").field("id", &self.id).finish_non_exhaustive()
    }
}

/// Name a registering device is discovered under.
pub fn display_name(name: &str, server_name: Option<&str>) -> String {
    match server_name {
        Some(server) if !server.is_empty() => format!("{} {}", name, server),
        _ => name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name() {
        assert_eq!(display_name("Foo", None), "Foo");
        assert_eq!(display_name("Foo", Some("")), "Foo");
        assert_eq!(display_name("Foo", Some("Bar")), "Foo Bar");
    }
}
