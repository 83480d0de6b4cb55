//! Dual-tier credential persistence, session restoration and access guarding for Medlink.
//!
//! The volatile primary store holds the live session; the durable secondary
//! store holds a TTL-bearing backup envelope that survives primary clears.

pub mod clock;
pub mod credentials;
pub mod device;
pub mod guard;
pub mod restore;
pub mod routes;
pub mod store;
pub mod token;

pub use clock::{Clock, ManualClock, SystemClock};
pub use credentials::{CredentialStore, DEFAULT_TTL_DAYS, WriteOrigin};
pub use device::device_id;
pub use guard::{AccessGuard, GuardDecision};
pub use restore::{RestoreOutcome, SessionRestorer};
pub use routes::{Redirect, Routes};
pub use store::{FileStore, KeyValueStore, MemoryStore};
pub use token::decode_claim;
