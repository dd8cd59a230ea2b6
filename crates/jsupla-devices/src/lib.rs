//! Supla device management.
//!
//! ## Architecture
//!
//! - **DeviceRegistry**: GUID to device handle mapping shared by all sessions
//! - **DiscoveryService**: inbox of devices that authorized on the server
//! - **SuplaDevice**: the local device a session binds to
//! - **DeviceService**: provisions discovered devices and tracks their status

pub mod device;
pub mod discovery;
pub mod registry;
pub mod service;

pub use device::{
    COMMAND_DURATION_MS, COMMAND_SENDER_ID, DeviceError, DeviceHandle, DeviceStatus,
    SharedDeviceHandle, StatusDetail, SuplaDevice, ThingStatus,
};
pub use discovery::{DiscoveryResult, DiscoveryService, DiscoverySink, PROPERTY_GUID};
pub use registry::DeviceRegistry;
pub use service::{DeviceService, DeviceStatusEntry};
