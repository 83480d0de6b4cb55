//! Authenticated identity state for one portal user.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A patient identity descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub name: String,
    pub code: String,
}

/// A pending appointment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleEntry {
    pub encounter_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clinician_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub specialty: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<DateTime<Utc>>,
}

/// Last-known satisfaction-survey state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rating {
    pub pending: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encounter_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<u8>,
}

/// The session of one authenticated user.
///
/// Field names on the wire match the primary-store slot keys, so the
/// serialized record is the union of those slots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Opaque bearer credential.
    #[serde(rename = "user")]
    pub token: String,
    /// The account holder.
    #[serde(rename = "titular")]
    pub subject: Subject,
    /// The currently selected patient: the account holder or a dependent.
    #[serde(rename = "patientData")]
    pub patient: Subject,
    #[serde(rename = "listToSchedule", default)]
    pub schedule: Vec<ScheduleEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<Rating>,
}

impl SessionRecord {
    /// Create a record for `subject` acting as their own patient.
    pub fn new(token: impl Into<String>, subject: Subject) -> Self {
        Self {
            token: token.into(),
            patient: subject.clone(),
            subject,
            schedule: Vec::new(),
            rating: None,
        }
    }

    /// A record is only trusted when its required parts are present.
    pub fn is_complete(&self) -> bool {
        !self.token.trim().is_empty() && !self.subject.code.trim().is_empty()
    }
}
