//! Credential store spanning the volatile primary store and the durable
//! secondary store.
//!
//! Storage and decode failures never leave this module: they are logged and
//! the session is reported as absent.

use crate::clock::{Clock, SystemClock};
use crate::store::KeyValueStore;
use chrono::{DateTime, Duration, Utc};
use medlink_types::{
    AuthError, CredentialDecodeError, Rating, ScheduleEntry, SessionRecord, StoreError, Subject,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const USER_KEY: &str = "user";
pub const TITULAR_KEY: &str = "titular";
pub const PATIENT_KEY: &str = "patientData";
pub const SCHEDULE_KEY: &str = "listToSchedule";
pub const RATING_KEY: &str = "rating";

const PRIMARY_KEYS: [&str; 5] = [USER_KEY, TITULAR_KEY, PATIENT_KEY, SCHEDULE_KEY, RATING_KEY];

/// Secondary-store key of the backup envelope.
pub const ENVELOPE_KEY: &str = "session_backup";

/// Validity window of a freshly written or renewed envelope.
pub const DEFAULT_TTL_DAYS: i64 = 30;

/// Where a session being written comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOrigin {
    /// A successful login: the durable envelope is (re)created too.
    Login,
    /// Copying an existing backup into the primary store.
    Restore,
}

/// Durable encoding of a session plus its expiry.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    /// Serialized `SessionRecord`, kept opaque so renewals copy it verbatim.
    payload: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    expires_at: DateTime<Utc>,
}

/// Reads, writes and renews the session across both stores.
#[derive(Clone)]
pub struct CredentialStore {
    primary: Arc<dyn KeyValueStore>,
    secondary: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl CredentialStore {
    pub fn new(primary: Arc<dyn KeyValueStore>, secondary: Arc<dyn KeyValueStore>) -> Self {
        Self {
            primary,
            secondary,
            clock: Arc::new(SystemClock),
            ttl: Duration::days(DEFAULT_TTL_DAYS),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// The session from the primary store, else from a valid backup envelope.
    pub fn read(&self) -> Option<SessionRecord> {
        self.read_primary().or_else(|| self.read_secondary())
    }

    /// The session held in the primary store. Any missing or corrupt
    /// required slot makes the whole record absent.
    pub fn read_primary(&self) -> Option<SessionRecord> {
        match self.try_read_primary() {
            Ok(record) => record.filter(SessionRecord::is_complete),
            Err(e) => {
                tracing::warn!("Ignoring unreadable primary session: {e}");
                None
            }
        }
    }

    /// The session decoded from a non-expired backup envelope.
    pub fn read_secondary(&self) -> Option<SessionRecord> {
        let envelope = self.valid_envelope()?;
        match decode_payload(&envelope.payload) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!("{e}; discarding backup");
                self.discard_envelope();
                None
            }
        }
    }

    pub fn has_primary(&self) -> bool {
        self.read_primary().is_some()
    }

    /// True iff a non-expired backup envelope exists, whatever the primary store holds.
    pub fn has_valid(&self) -> bool {
        self.valid_envelope().is_some()
    }

    /// Expiry of the current backup envelope, if one is valid.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.valid_envelope().map(|e| e.expires_at)
    }

    /// Write `record` into the primary store; on login also write a fresh
    /// backup envelope. Returns `false` if any part failed to persist.
    pub fn write(&self, record: &SessionRecord, origin: WriteOrigin) -> bool {
        let mut ok = match self.write_primary(record) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Failed to write primary session: {e}");
                false
            }
        };

        if origin == WriteOrigin::Login {
            let envelope = serde_json::to_string(record)
                .map_err(StoreError::from)
                .and_then(|payload| {
                    self.put_envelope(&Envelope {
                        payload,
                        expires_at: self.clock.now() + self.ttl,
                    })
                });
            if let Err(e) = envelope {
                tracing::warn!("Failed to write session backup: {e}");
                ok = false;
            }
        }
        ok
    }

    /// Push the backup expiry forward, leaving the payload and the primary
    /// store untouched. No-op (returns `false`) without a valid envelope.
    pub fn renew(&self) -> bool {
        let Some(envelope) = self.valid_envelope() else {
            return false;
        };
        // expiry never moves backwards
        let expires_at = (self.clock.now() + self.ttl)
            .max(envelope.expires_at + Duration::milliseconds(1));
        let renewed = Envelope {
            payload: envelope.payload,
            expires_at,
        };
        match self.put_envelope(&renewed) {
            Ok(()) => {
                tracing::debug!("Session backup renewed until {expires_at}");
                true
            }
            Err(e) => {
                tracing::warn!("Failed to renew session backup: {e}");
                false
            }
        }
    }

    /// Remove the session from both stores.
    pub fn clear(&self) {
        self.clear_primary();
        self.discard_envelope();
    }

    /// The stored bearer credential, for callers that require one.
    pub fn token(&self) -> Result<String, AuthError> {
        self.read()
            .map(|record| record.token)
            .ok_or(AuthError::TokenMissing)
    }

    fn try_read_primary(&self) -> Result<Option<SessionRecord>, StoreError> {
        let Some(token) = self.primary.get(USER_KEY)? else {
            return Ok(None);
        };
        let Some(subject) = self.slot::<Subject>(TITULAR_KEY)? else {
            return Ok(None);
        };
        let Some(patient) = self.slot::<Subject>(PATIENT_KEY)? else {
            return Ok(None);
        };
        let Some(schedule) = self.slot::<Vec<ScheduleEntry>>(SCHEDULE_KEY)? else {
            return Ok(None);
        };
        let rating = self.slot::<Rating>(RATING_KEY)?;

        Ok(Some(SessionRecord {
            token,
            subject,
            patient,
            schedule,
            rating,
        }))
    }

    fn slot<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.primary.get(key)? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// A partially written record must never sit next to another session's
    /// slots, so a failed write empties the primary store.
    fn write_primary(&self, record: &SessionRecord) -> Result<(), StoreError> {
        let written = self.fill_primary(record);
        if written.is_err() {
            self.clear_primary();
        }
        written
    }

    fn fill_primary(&self, record: &SessionRecord) -> Result<(), StoreError> {
        self.primary.set(USER_KEY, &record.token)?;
        self.primary
            .set(TITULAR_KEY, &serde_json::to_string(&record.subject)?)?;
        self.primary
            .set(PATIENT_KEY, &serde_json::to_string(&record.patient)?)?;
        self.primary
            .set(SCHEDULE_KEY, &serde_json::to_string(&record.schedule)?)?;
        match &record.rating {
            Some(rating) => self
                .primary
                .set(RATING_KEY, &serde_json::to_string(rating)?)?,
            None => self.primary.remove(RATING_KEY)?,
        }
        Ok(())
    }

    fn clear_primary(&self) {
        for key in PRIMARY_KEYS {
            if let Err(e) = self.primary.remove(key) {
                tracing::warn!("Failed to clear primary slot '{key}': {e}");
            }
        }
    }

    /// The backup envelope if present, well-formed and not expired.
    /// Expired or malformed envelopes are deleted on sight.
    fn valid_envelope(&self) -> Option<Envelope> {
        let raw = match self.secondary.get(ENVELOPE_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!("Failed to read session backup: {e}");
                return None;
            }
        };

        let envelope: Envelope = match serde_json::from_str(&raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!("{}; discarding backup", CredentialDecodeError(e.to_string()));
                self.discard_envelope();
                return None;
            }
        };

        if envelope.expires_at <= self.clock.now() {
            tracing::debug!("Session backup expired at {}", envelope.expires_at);
            self.discard_envelope();
            return None;
        }
        Some(envelope)
    }

    fn put_envelope(&self, envelope: &Envelope) -> Result<(), StoreError> {
        let raw = serde_json::to_string(envelope)?;
        self.secondary.set(ENVELOPE_KEY, &raw)
    }

    fn discard_envelope(&self) {
        if let Err(e) = self.secondary.remove(ENVELOPE_KEY) {
            tracing::warn!("Failed to remove session backup: {e}");
        }
    }
}

fn decode_payload(payload: &str) -> Result<SessionRecord, CredentialDecodeError> {
    let record: SessionRecord =
        serde_json::from_str(payload).map_err(|e| CredentialDecodeError(e.to_string()))?;
    if !record.is_complete() {
        return Err(CredentialDecodeError("incomplete session record".into()));
    }
    Ok(record)
}
