//! jSupla device server.
//!
//! ## Architecture
//!
//! - **CredentialVerifier**: checks registrations against the server secret
//! - **Scheduler**: shared timer service for session callbacks
//! - **LivenessMonitor**: keepalive pings and dead-connection detection
//! - **Session**: per-connection protocol state machine
//! - **Server**: TCP listener wiring connections to sessions

pub mod credentials;
pub mod error;
pub mod liveness;
pub mod scheduler;
pub mod server;
pub mod session;

pub use credentials::{AuthFailure, CredentialVerifier, Credentials};
pub use error::{Result, ServerError};
pub use liveness::{LivenessMonitor, LivenessTarget};
pub use scheduler::{ScheduledTask, Scheduler};
pub use server::{Server, SessionCount};
pub use session::{
    REASON_NO_PING_RESPONSE, REASON_WENT_OFFLINE, Session, SessionContext, display_name,
};
