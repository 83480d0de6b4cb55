//! Consultation room handles.

use serde::{Deserialize, Serialize};

/// The canonical video room of one encounter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomHandle {
    pub encounter_id: u64,
    pub room_id: String,
    pub access_token: String,
}

/// How the provisioner obtained the room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomOrigin {
    /// The gateway already had a room bound to the encounter.
    Existing,
    /// A new room was created by this call.
    Created,
}

/// Result of a successful provisioning call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provisioned {
    pub handle: RoomHandle,
    pub origin: RoomOrigin,
    /// Whether the system of record confirmed the mapping.
    /// `None` when no persistence was attempted (existing room).
    pub persisted: Option<bool>,
}
