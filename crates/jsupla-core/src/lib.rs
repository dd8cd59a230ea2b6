//! Core types for the jSupla server.
//!
//! This crate defines the pieces shared by the server and the device side:
//! - `protocol`: device/server message model
//! - `config`: server configuration and defaults
//! - `transport`: the outbound write seam of a device connection
//! - `event` / `eventbus`: events and the broadcast bus carrying them

pub mod config;
pub mod error;
pub mod event;
pub mod eventbus;
pub mod protocol;
pub mod transport;

pub use config::{AuthConfig, ServerConfig};
pub use error::{ConfigError, Error, Result, TransportError};
pub use event::{EventMetadata, JSuplaEvent};
pub use eventbus::{DEFAULT_CHANNEL_CAPACITY, EventBus, EventBusReceiver, FilteredReceiver};
pub use protocol::{
    ActivityTimeout, ChannelValue, DeviceChannel, DeviceMessage, MAX_FRAME_LEN, ResultCode,
    ServerMessage, TimeValue,
};
pub use transport::{ChannelTransport, Outbound, SharedTransport, Transport};
