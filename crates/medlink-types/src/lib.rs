//! Shared session/room types and error hierarchy for Medlink.

pub mod error;
pub mod room;
pub mod session;

pub use error::{
    AuthError, ConfigError, CredentialDecodeError, GatewayError, ProvisionError, StoreError,
};
pub use room::{Provisioned, RoomHandle, RoomOrigin};
pub use session::{Rating, ScheduleEntry, SessionRecord, Subject};
