//! Seam between the provisioner and the remote systems it coordinates.

use crate::client::GatewayClient;
use medlink_types::GatewayError;
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Body of a room creation request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomRequest {
    pub clinician_id: String,
    #[serde(rename = "token")]
    pub service_token: String,
    pub encounter_id: u64,
}

/// A freshly created room and its room-scoped access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedRoom {
    pub room_id: String,
    pub token: String,
}

/// The `(patient, room, encounter)` mapping recorded in the system of record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomMapping {
    pub patient_id: String,
    pub room_id: String,
    pub encounter_id: u64,
}

/// The remote operations room provisioning is built from.
///
/// Dyn-compatible so the provisioner works with `Arc<dyn RoomGateway>`.
pub trait RoomGateway: Send + Sync {
    /// Acquire a short-lived service token.
    fn service_token(&self) -> BoxFuture<'_, Result<String, GatewayError>>;

    /// The room bound to `encounter_id`, or `None` when there is none.
    fn find_room<'a>(
        &'a self,
        encounter_id: u64,
        service_token: &'a str,
    ) -> BoxFuture<'a, Result<Option<String>, GatewayError>>;

    fn create_room<'a>(
        &'a self,
        request: &'a CreateRoomRequest,
    ) -> BoxFuture<'a, Result<CreatedRoom, GatewayError>>;

    /// Record the mapping. `Ok(false)` means the write was not acknowledged.
    fn persist_room<'a>(
        &'a self,
        mapping: &'a RoomMapping,
    ) -> BoxFuture<'a, Result<bool, GatewayError>>;
}

impl RoomGateway for GatewayClient {
    fn service_token(&self) -> BoxFuture<'_, Result<String, GatewayError>> {
        Box::pin(GatewayClient::service_token(self))
    }

    fn find_room<'a>(
        &'a self,
        encounter_id: u64,
        service_token: &'a str,
    ) -> BoxFuture<'a, Result<Option<String>, GatewayError>> {
        Box::pin(GatewayClient::find_room(self, encounter_id, service_token))
    }

    fn create_room<'a>(
        &'a self,
        request: &'a CreateRoomRequest,
    ) -> BoxFuture<'a, Result<CreatedRoom, GatewayError>> {
        Box::pin(GatewayClient::create_room(self, request))
    }

    fn persist_room<'a>(
        &'a self,
        mapping: &'a RoomMapping,
    ) -> BoxFuture<'a, Result<bool, GatewayError>> {
        Box::pin(GatewayClient::persist_room(self, mapping))
    }
}
