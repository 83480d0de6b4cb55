//! Telemedicine gateway client and consultation room provisioning for Medlink.

mod client;
mod gateway;
mod headers;
mod provisioner;
mod retry;

pub use client::GatewayClient;
pub use gateway::{BoxFuture, CreateRoomRequest, CreatedRoom, RoomGateway, RoomMapping};
pub use headers::{DEVICE_ID_HEADER, auth_headers};
pub use provisioner::{ProvisionRequest, RoomProvisioner};
pub use retry::RetryConfig;
