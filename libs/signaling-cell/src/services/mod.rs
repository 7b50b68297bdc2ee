// libs/signaling-cell/src/services/mod.rs
pub mod auth;
pub mod registry;
pub mod relay;

pub use auth::{CredentialVerifier, JwtCredentialVerifier};
pub use registry::{RoomRegistry, MAX_PARTICIPANTS};
pub use relay::{
    Connection, ConnectionContext, ConnectionFlow, Outbound, RelaySettings, SignalingRelay,
};
