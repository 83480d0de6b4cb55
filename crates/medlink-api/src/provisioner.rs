//! Idempotent provisioning of one video room per clinical encounter.
//!
//! Protocol, strictly sequential:
//! 1. acquire a service token (failure: `ServiceUnavailable`)
//! 2. look up the room bound to the encounter; a hit is returned as-is
//! 3. create a room (failure: `ProvisioningFailed`)
//! 4. record the mapping in the system of record (advisory, never fails the call)

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use medlink_types::{GatewayError, ProvisionError, Provisioned, RoomHandle, RoomOrigin};

use crate::gateway::{CreateRoomRequest, RoomGateway, RoomMapping};

/// What to provision a room for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionRequest {
    /// Clinical attendance number.
    pub encounter_id: u64,
    pub patient_id: String,
    pub clinician_id: String,
}

/// Produces the canonical room handle of an encounter.
///
/// Calls for the same encounter are serialized in-process, so a second
/// caller always observes the room the first one created. Races across
/// processes still depend on the gateway rejecting a duplicate creation
/// with 409, which is answered by looking the room up again.
pub struct RoomProvisioner {
    gateway: Arc<dyn RoomGateway>,
    in_flight: Mutex<HashMap<u64, Arc<tokio::sync::Mutex<()>>>>,
}

impl RoomProvisioner {
    pub fn new(gateway: Arc<dyn RoomGateway>) -> Self {
        Self {
            gateway,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub async fn provision(
        &self,
        request: &ProvisionRequest,
    ) -> Result<Provisioned, ProvisionError> {
        if request.encounter_id == 0 {
            return Err(ProvisionError::InvalidRequest(
                "encounter id must be positive".into(),
            ));
        }
        if request.clinician_id.trim().is_empty() {
            return Err(ProvisionError::InvalidRequest(
                "clinician id is required".into(),
            ));
        }

        // released on drop, so an abandoned call leaves nothing behind
        let entry = self.enter(request.encounter_id);
        let _serial = entry.lock.lock().await;
        self.run_protocol(request).await
    }

    async fn run_protocol(
        &self,
        request: &ProvisionRequest,
    ) -> Result<Provisioned, ProvisionError> {
        let encounter_id = request.encounter_id;

        let service_token = self.gateway.service_token().await.map_err(|e| {
            tracing::warn!("Service token unavailable for encounter {encounter_id}: {e}");
            ProvisionError::ServiceUnavailable(e)
        })?;

        if let Some(existing) = self.lookup(encounter_id, &service_token).await? {
            tracing::debug!("Encounter {encounter_id} already has room {existing}");
            return Ok(existing_room(encounter_id, existing, service_token));
        }

        let create = CreateRoomRequest {
            clinician_id: request.clinician_id.clone(),
            service_token: service_token.clone(),
            encounter_id,
        };
        let created = match self.gateway.create_room(&create).await {
            Ok(created) => created,
            Err(GatewayError::Conflict { message }) => {
                tracing::debug!(
                    "Room for encounter {encounter_id} created concurrently ({message}); looking it up"
                );
                return match self.lookup(encounter_id, &service_token).await? {
                    Some(existing) => Ok(existing_room(encounter_id, existing, service_token)),
                    None => Err(ProvisionError::ProvisioningFailed(GatewayError::Conflict {
                        message,
                    })),
                };
            }
            Err(e) => {
                tracing::warn!("Room creation failed for encounter {encounter_id}: {e}");
                return Err(ProvisionError::ProvisioningFailed(e));
            }
        };
        tracing::debug!("Created room {} for encounter {encounter_id}", created.room_id);

        let mapping = RoomMapping {
            patient_id: request.patient_id.clone(),
            room_id: created.room_id.clone(),
            encounter_id,
        };
        let persisted = match self.gateway.persist_room(&mapping).await {
            Ok(true) => true,
            Ok(false) => {
                tracing::warn!(
                    "Persistence advisory failure: room {} for encounter {encounter_id} not acknowledged",
                    mapping.room_id
                );
                false
            }
            Err(e) => {
                tracing::warn!(
                    "Persistence advisory failure: room {} for encounter {encounter_id}: {e}",
                    mapping.room_id
                );
                false
            }
        };

        Ok(Provisioned {
            handle: RoomHandle {
                encounter_id,
                room_id: created.room_id,
                access_token: created.token,
            },
            origin: RoomOrigin::Created,
            persisted: Some(persisted),
        })
    }

    /// Existence check. Only "no room" is a negative answer; any other
    /// failure means the gateway cannot be trusted to tell us.
    async fn lookup(
        &self,
        encounter_id: u64,
        service_token: &str,
    ) -> Result<Option<String>, ProvisionError> {
        self.gateway
            .find_room(encounter_id, service_token)
            .await
            .map_err(|e| {
                tracing::warn!("Room lookup failed for encounter {encounter_id}: {e}");
                ProvisionError::ServiceUnavailable(e)
            })
    }

    fn enter(&self, encounter_id: u64) -> InFlight<'_> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        InFlight {
            provisioner: self,
            encounter_id,
            lock: Arc::clone(in_flight.entry(encounter_id).or_default()),
        }
    }
}

/// One caller's claim on an encounter lock.
struct InFlight<'a> {
    provisioner: &'a RoomProvisioner,
    encounter_id: u64,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut in_flight = self
            .provisioner
            .in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        // the map and this claim are the only holders: nobody else is waiting
        if Arc::strong_count(&self.lock) == 2 {
            in_flight.remove(&self.encounter_id);
        }
    }
}

fn existing_room(encounter_id: u64, room_id: String, service_token: String) -> Provisioned {
    Provisioned {
        handle: RoomHandle {
            encounter_id,
            room_id,
            access_token: service_token,
        },
        origin: RoomOrigin::Existing,
        persisted: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{BoxFuture, CreatedRoom};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Failure injected into one step of the fake gateway.
    #[derive(Clone, Copy, PartialEq)]
    enum Fail {
        None,
        Token,
        Lookup,
        Create,
        CreateConflict,
        PersistNack,
        PersistError,
        /// The token endpoint never answers.
        Hang,
    }

    /// In-memory gateway counting every call.
    struct FakeGateway {
        fail: Fail,
        rooms: Mutex<HashMap<u64, String>>,
        tokens: AtomicUsize,
        lookups: AtomicUsize,
        creates: AtomicUsize,
        persists: Mutex<Vec<RoomMapping>>,
    }

    impl FakeGateway {
        fn new(fail: Fail) -> Arc<Self> {
            Arc::new(Self {
                fail,
                rooms: Mutex::new(HashMap::new()),
                tokens: AtomicUsize::new(0),
                lookups: AtomicUsize::new(0),
                creates: AtomicUsize::new(0),
                persists: Mutex::new(Vec::new()),
            })
        }

        fn with_room(self: Arc<Self>, encounter_id: u64, room_id: &str) -> Arc<Self> {
            self.rooms
                .lock()
                .unwrap()
                .insert(encounter_id, room_id.to_string());
            self
        }

        fn creates(&self) -> usize {
            self.creates.load(Ordering::SeqCst)
        }

        fn persist_calls(&self) -> usize {
            self.persists.lock().unwrap().len()
        }
    }

    impl RoomGateway for FakeGateway {
        fn service_token(&self) -> BoxFuture<'_, Result<String, GatewayError>> {
            Box::pin(async move {
                let n = self.tokens.fetch_add(1, Ordering::SeqCst);
                if self.fail == Fail::Hang {
                    std::future::pending::<()>().await;
                }
                if self.fail == Fail::Token {
                    return Err(GatewayError::Network("connection refused".into()));
                }
                Ok(format!("svc-{n}"))
            })
        }

        fn find_room<'a>(
            &'a self,
            encounter_id: u64,
            _service_token: &'a str,
        ) -> BoxFuture<'a, Result<Option<String>, GatewayError>> {
            Box::pin(async move {
                self.lookups.fetch_add(1, Ordering::SeqCst);
                // give a concurrent caller the chance to interleave
                tokio::task::yield_now().await;
                if self.fail == Fail::Lookup {
                    return Err(GatewayError::Server {
                        status: 500,
                        message: "db down".into(),
                    });
                }
                Ok(self.rooms.lock().unwrap().get(&encounter_id).cloned())
            })
        }

        fn create_room<'a>(
            &'a self,
            request: &'a CreateRoomRequest,
        ) -> BoxFuture<'a, Result<CreatedRoom, GatewayError>> {
            Box::pin(async move {
                let n = self.creates.fetch_add(1, Ordering::SeqCst);
                match self.fail {
                    Fail::Create => {
                        return Err(GatewayError::Network("connection reset".into()));
                    }
                    Fail::CreateConflict => {
                        // someone else won the race
                        self.rooms
                            .lock()
                            .unwrap()
                            .insert(request.encounter_id, "room-other".into());
                        return Err(GatewayError::Conflict {
                            message: "room exists".into(),
                        });
                    }
                    _ => {}
                }
                let room_id = format!("room-{}-{n}", request.encounter_id);
                self.rooms
                    .lock()
                    .unwrap()
                    .insert(request.encounter_id, room_id.clone());
                Ok(CreatedRoom {
                    room_id,
                    token: format!("room-token-{n}"),
                })
            })
        }

        fn persist_room<'a>(
            &'a self,
            mapping: &'a RoomMapping,
        ) -> BoxFuture<'a, Result<bool, GatewayError>> {
            Box::pin(async move {
                self.persists.lock().unwrap().push(mapping.clone());
                match self.fail {
                    Fail::PersistNack => Ok(false),
                    Fail::PersistError => Err(GatewayError::Server {
                        status: 500,
                        message: "insert failed".into(),
                    }),
                    _ => Ok(true),
                }
            })
        }
    }

    fn request(encounter_id: u64) -> ProvisionRequest {
        ProvisionRequest {
            encounter_id,
            patient_id: "P-1001".into(),
            clinician_id: "C-7".into(),
        }
    }

    #[tokio::test]
    async fn creates_and_persists_first_time() {
        let gateway = FakeGateway::new(Fail::None);
        let provisioner = RoomProvisioner::new(gateway.clone());

        let provisioned = provisioner.provision(&request(42)).await.unwrap();
        assert_eq!(provisioned.origin, RoomOrigin::Created);
        assert_eq!(provisioned.handle.room_id, "room-42-0");
        assert_eq!(provisioned.handle.access_token, "room-token-0");
        assert_eq!(provisioned.persisted, Some(true));
        assert_eq!(
            gateway.persists.lock().unwrap()[0],
            RoomMapping {
                patient_id: "P-1001".into(),
                room_id: "room-42-0".into(),
                encounter_id: 42,
            }
        );
    }

    #[tokio::test]
    async fn existing_room_is_returned_without_creation() {
        let gateway = FakeGateway::new(Fail::None).with_room(42, "room-A");
        let provisioner = RoomProvisioner::new(gateway.clone());

        let first = provisioner.provision(&request(42)).await.unwrap();
        let second = provisioner.provision(&request(42)).await.unwrap();

        assert_eq!(first.handle.room_id, "room-A");
        assert_eq!(second.handle.room_id, "room-A");
        assert_eq!(first.origin, RoomOrigin::Existing);
        assert_eq!(first.persisted, None);
        assert_eq!(first.handle.access_token, "svc-0");
        assert_eq!(gateway.creates(), 0);
        assert_eq!(gateway.persist_calls(), 0);
    }

    #[tokio::test]
    async fn repeated_calls_reuse_the_created_room() {
        let gateway = FakeGateway::new(Fail::None);
        let provisioner = RoomProvisioner::new(gateway.clone());

        let first = provisioner.provision(&request(7)).await.unwrap();
        let second = provisioner.provision(&request(7)).await.unwrap();

        assert_eq!(first.handle.room_id, second.handle.room_id);
        assert_eq!(second.origin, RoomOrigin::Existing);
        assert_eq!(gateway.creates(), 1);
    }

    #[tokio::test]
    async fn concurrent_calls_create_one_room() {
        let gateway = FakeGateway::new(Fail::None);
        let provisioner = RoomProvisioner::new(gateway.clone());

        let (first, second) = (request(9), request(9));
        let (a, b) = tokio::join!(provisioner.provision(&first), provisioner.provision(&second));

        assert_eq!(a.unwrap().handle.room_id, b.unwrap().handle.room_id);
        assert_eq!(gateway.creates(), 1);
        assert!(provisioner.in_flight.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn abandoned_calls_release_their_locks() {
        let gateway = FakeGateway::new(Fail::Hang);
        let provisioner = RoomProvisioner::new(gateway.clone());

        for encounter_id in 1..=50 {
            let req = request(encounter_id);
            let call = provisioner.provision(&req);
            let outcome = tokio::time::timeout(Duration::from_millis(1), call).await;
            assert!(outcome.is_err());
        }
        assert!(provisioner.in_flight.lock().unwrap().is_empty());

        // a caller abandoned while queued behind another one
        let held = request(77);
        let waiting = request(77);
        let first = provisioner.provision(&held);
        let second = provisioner.provision(&waiting);
        let both = async { tokio::join!(first, second) };
        assert!(tokio::time::timeout(Duration::from_millis(5), both).await.is_err());
        assert!(provisioner.in_flight.lock().unwrap().is_empty());
        assert_eq!(gateway.tokens.load(Ordering::SeqCst), 51);
    }

    #[tokio::test]
    async fn different_encounters_get_different_rooms() {
        let gateway = FakeGateway::new(Fail::None);
        let provisioner = RoomProvisioner::new(gateway.clone());

        let a = provisioner.provision(&request(1)).await.unwrap();
        let b = provisioner.provision(&request(2)).await.unwrap();
        assert_ne!(a.handle.room_id, b.handle.room_id);
        assert_eq!(gateway.creates(), 2);
    }

    #[tokio::test]
    async fn token_failure_is_service_unavailable() {
        let gateway = FakeGateway::new(Fail::Token);
        let provisioner = RoomProvisioner::new(gateway.clone());

        let err = provisioner.provision(&request(42)).await.unwrap_err();
        assert!(matches!(err, ProvisionError::ServiceUnavailable(_)));
        assert_eq!(gateway.lookups.load(Ordering::SeqCst), 0);
        assert_eq!(gateway.creates(), 0);
    }

    #[tokio::test]
    async fn lookup_failure_does_not_create() {
        let gateway = FakeGateway::new(Fail::Lookup);
        let provisioner = RoomProvisioner::new(gateway.clone());

        let err = provisioner.provision(&request(42)).await.unwrap_err();
        assert!(matches!(err, ProvisionError::ServiceUnavailable(_)));
        assert_eq!(gateway.creates(), 0);
    }

    #[tokio::test]
    async fn creation_failure_skips_persistence() {
        let gateway = FakeGateway::new(Fail::Create);
        let provisioner = RoomProvisioner::new(gateway.clone());

        let err = provisioner.provision(&request(42)).await.unwrap_err();
        assert!(matches!(
            err,
            ProvisionError::ProvisioningFailed(GatewayError::Network(_))
        ));
        assert_eq!(gateway.persist_calls(), 0);
    }

    #[tokio::test]
    async fn creation_conflict_adopts_existing_room() {
        let gateway = FakeGateway::new(Fail::CreateConflict);
        let provisioner = RoomProvisioner::new(gateway.clone());

        let provisioned = provisioner.provision(&request(42)).await.unwrap();
        assert_eq!(provisioned.handle.room_id, "room-other");
        assert_eq!(provisioned.origin, RoomOrigin::Existing);
        assert_eq!(gateway.lookups.load(Ordering::SeqCst), 2);
        assert_eq!(gateway.persist_calls(), 0);
    }

    #[tokio::test]
    async fn unacknowledged_persistence_still_returns_room() {
        let gateway = FakeGateway::new(Fail::PersistNack);
        let provisioner = RoomProvisioner::new(gateway.clone());

        let provisioned = provisioner.provision(&request(42)).await.unwrap();
        assert_eq!(provisioned.handle.room_id, "room-42-0");
        assert_eq!(provisioned.handle.access_token, "room-token-0");
        assert_eq!(provisioned.persisted, Some(false));
    }

    #[tokio::test]
    async fn persistence_error_still_returns_room() {
        let gateway = FakeGateway::new(Fail::PersistError);
        let provisioner = RoomProvisioner::new(gateway.clone());

        let provisioned = provisioner.provision(&request(42)).await.unwrap();
        assert_eq!(provisioned.origin, RoomOrigin::Created);
        assert_eq!(provisioned.persisted, Some(false));
    }

    #[tokio::test]
    async fn invalid_requests_make_no_calls() {
        let gateway = FakeGateway::new(Fail::None);
        let provisioner = RoomProvisioner::new(gateway.clone());

        let zero = provisioner.provision(&request(0)).await.unwrap_err();
        assert!(matches!(zero, ProvisionError::InvalidRequest(_)));

        let mut no_clinician = request(5);
        no_clinician.clinician_id = " ".into();
        let err = provisioner.provision(&no_clinician).await.unwrap_err();
        assert!(matches!(err, ProvisionError::InvalidRequest(_)));

        assert_eq!(gateway.tokens.load(Ordering::SeqCst), 0);
    }
}
