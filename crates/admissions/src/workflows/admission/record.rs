use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::engine::TransitionCapability;
use super::stage::Stage;

/// Opaque identifier assigned at intake.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ApplicationId(pub String);

impl ApplicationId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl fmt::Display for ApplicationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Human-facing reference quoted to families, e.g. `ADM-2026-00042`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ApplicationNumber(pub String);

impl ApplicationNumber {
    /// Numeric tail of a number issued under `stem` (e.g. `ADM-2026-`).
    pub fn sequence_after(&self, stem: &str) -> Option<u64> {
        self.0.strip_prefix(stem)?.parse().ok()
    }
}

impl fmt::Display for ApplicationNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Descriptive fields captured on the application form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicantDetails {
    pub student_name: String,
    pub year_group: String,
    #[serde(default)]
    pub date_of_birth: Option<NaiveDate>,
    #[serde(default)]
    pub guardian_name: Option<String>,
    #[serde(default)]
    pub guardian_email: Option<String>,
    #[serde(default)]
    pub previous_school: Option<String>,
}

/// One completed transition. Never edited after it is appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChangeEntry {
    pub timestamp: DateTime<Utc>,
    pub from_stage: Stage,
    pub to_stage: Stage,
    pub notes: Option<String>,
    pub actor: String,
}

impl StatusChangeEntry {
    pub fn is_stage_change(&self) -> bool {
        self.from_stage != self.to_stage
    }
}

/// Ordered, append-only history of transitions applied to one application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuditTrail {
    entries: Vec<StatusChangeEntry>,
}

impl AuditTrail {
    pub fn entries(&self) -> &[StatusChangeEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&StatusChangeEntry> {
        self.entries.last()
    }

    pub fn iter(&self) -> impl Iterator<Item = &StatusChangeEntry> {
        self.entries.iter()
    }

    pub(crate) fn append(&mut self, entry: StatusChangeEntry, _: &TransitionCapability) {
        self.entries.push(entry);
    }
}

/// Admission application whose stage is governed by the workflow graph.
///
/// `current_stage` and the audit trail only change together, through the transition engine.
/// Deserialized records are checked for a consistent trail before they exist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "StoredApplicationRecord")]
pub struct ApplicationRecord {
    id: ApplicationId,
    application_number: ApplicationNumber,
    details: ApplicantDetails,
    current_stage: Stage,
    audit_trail: AuditTrail,
    created_at: DateTime<Utc>,
    last_activity_at: DateTime<Utc>,
    version: u64,
}

/// Wire shape of a persisted record, accepted only once its trail checks out.
#[derive(Deserialize)]
struct StoredApplicationRecord {
    id: ApplicationId,
    application_number: ApplicationNumber,
    details: ApplicantDetails,
    current_stage: Stage,
    #[serde(default)]
    audit_trail: AuditTrail,
    created_at: DateTime<Utc>,
    last_activity_at: DateTime<Utc>,
    version: u64,
}

impl TryFrom<StoredApplicationRecord> for ApplicationRecord {
    type Error = RecordIntegrityError;

    fn try_from(stored: StoredApplicationRecord) -> Result<Self, Self::Error> {
        let mut expected_from = Stage::INITIAL;
        let mut previous_timestamp: Option<DateTime<Utc>> = None;
        for (index, entry) in stored.audit_trail.iter().enumerate() {
            if entry.from_stage != expected_from {
                return Err(RecordIntegrityError::BrokenChain {
                    index,
                    expected: expected_from,
                    found: entry.from_stage,
                });
            }
            if previous_timestamp.is_some_and(|previous| entry.timestamp < previous) {
                return Err(RecordIntegrityError::TimestampRegression { index });
            }
            expected_from = entry.to_stage;
            previous_timestamp = Some(entry.timestamp);
        }

        if stored.current_stage != expected_from {
            return Err(RecordIntegrityError::StageMismatch {
                current: stored.current_stage,
                derived: expected_from,
            });
        }

        // Every transition bumps the version; detail edits bump it further.
        let entries = stored.audit_trail.len();
        if stored.version < entries as u64 {
            return Err(RecordIntegrityError::VersionBehindTrail {
                version: stored.version,
                entries,
            });
        }

        Ok(Self {
            id: stored.id,
            application_number: stored.application_number,
            details: stored.details,
            current_stage: stored.current_stage,
            audit_trail: stored.audit_trail,
            created_at: stored.created_at,
            last_activity_at: stored.last_activity_at,
            version: stored.version,
        })
    }
}

/// Reasons a persisted record is refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordIntegrityError {
    #[error("audit entry {index} starts from '{found}' but the trail was at '{expected}'")]
    BrokenChain {
        index: usize,
        expected: Stage,
        found: Stage,
    },
    #[error("audit entry {index} is older than the entry before it")]
    TimestampRegression { index: usize },
    #[error("current stage '{current}' disagrees with the audit trail ('{derived}')")]
    StageMismatch { current: Stage, derived: Stage },
    #[error("version {version} is behind an audit trail of {entries} entries")]
    VersionBehindTrail { version: u64, entries: usize },
}

impl ApplicationRecord {
    pub fn new(
        id: ApplicationId,
        application_number: ApplicationNumber,
        details: ApplicantDetails,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            application_number,
            details,
            current_stage: Stage::INITIAL,
            audit_trail: AuditTrail::default(),
            created_at,
            last_activity_at: created_at,
            version: 0,
        }
    }

    pub fn id(&self) -> &ApplicationId {
        &self.id
    }

    pub fn application_number(&self) -> &ApplicationNumber {
        &self.application_number
    }

    pub fn details(&self) -> &ApplicantDetails {
        &self.details
    }

    pub fn current_stage(&self) -> Stage {
        self.current_stage
    }

    pub fn audit_trail(&self) -> &AuditTrail {
        &self.audit_trail
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_activity_at(&self) -> DateTime<Utc> {
        self.last_activity_at
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Stage implied by the audit trail; always equal to `current_stage`.
    pub fn derived_stage(&self) -> Stage {
        self.audit_trail
            .last()
            .map(|entry| entry.to_stage)
            .unwrap_or(Stage::INITIAL)
    }

    pub(crate) fn replace_details(&mut self, details: ApplicantDetails) {
        self.details = details;
    }

    /// Bumps the version ahead of a save and returns the version the store must still hold.
    pub(crate) fn next_version(&mut self) -> u64 {
        let expected = self.version;
        self.version += 1;
        expected
    }

    pub(crate) fn apply_transition(
        &mut self,
        entry: StatusChangeEntry,
        capability: &TransitionCapability,
    ) {
        self.current_stage = entry.to_stage;
        self.last_activity_at = entry.timestamp;
        self.audit_trail.append(entry, capability);
    }

    pub fn status_view(&self) -> ApplicationStatusView {
        ApplicationStatusView {
            application_id: self.id.clone(),
            application_number: self.application_number.clone(),
            student_name: self.details.student_name.clone(),
            year_group: self.details.year_group.clone(),
            stage: self.current_stage.key(),
            stage_label: self.current_stage.label(),
            version: self.version,
            last_activity_at: self.last_activity_at,
            audit_entries: self.audit_trail.len(),
        }
    }
}

/// Sanitized summary of an application for listings and API responses.
#[derive(Debug, Clone, Serialize)]
pub struct ApplicationStatusView {
    pub application_id: ApplicationId,
    pub application_number: ApplicationNumber,
    pub student_name: String,
    pub year_group: String,
    pub stage: &'static str,
    pub stage_label: &'static str,
    pub version: u64,
    pub last_activity_at: DateTime<Utc>,
    pub audit_entries: usize,
}
