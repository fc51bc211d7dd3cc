use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Named position of an application in the admissions lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Submitted,
    UnderReview,
    AssessmentScheduled,
    AssessmentComplete,
    Approved,
    FeePayment,
    Confirmed,
    Enrolled,
    Rejected,
    OnHold,
    DocumentsPending,
}

impl Stage {
    /// Stage every new application starts in.
    pub const INITIAL: Stage = Stage::Submitted;

    pub const fn ordered() -> [Self; 11] {
        [
            Self::Submitted,
            Self::UnderReview,
            Self::AssessmentScheduled,
            Self::AssessmentComplete,
            Self::Approved,
            Self::FeePayment,
            Self::Confirmed,
            Self::Enrolled,
            Self::Rejected,
            Self::OnHold,
            Self::DocumentsPending,
        ]
    }

    pub const fn key(self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::UnderReview => "under_review",
            Self::AssessmentScheduled => "assessment_scheduled",
            Self::AssessmentComplete => "assessment_complete",
            Self::Approved => "approved",
            Self::FeePayment => "fee_payment",
            Self::Confirmed => "confirmed",
            Self::Enrolled => "enrolled",
            Self::Rejected => "rejected",
            Self::OnHold => "on_hold",
            Self::DocumentsPending => "documents_pending",
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Submitted => "Submitted",
            Self::UnderReview => "Under Review",
            Self::AssessmentScheduled => "Assessment Scheduled",
            Self::AssessmentComplete => "Assessment Complete",
            Self::Approved => "Approved",
            Self::FeePayment => "Fee Payment",
            Self::Confirmed => "Confirmed",
            Self::Enrolled => "Enrolled",
            Self::Rejected => "Rejected",
            Self::OnHold => "On Hold",
            Self::DocumentsPending => "Documents Pending",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognised stage key '{0}'")]
pub struct ParseStageError(pub String);

impl FromStr for Stage {
    type Err = ParseStageError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let key = value.trim().to_ascii_lowercase();
        Self::ordered()
            .into_iter()
            .find(|stage| stage.key() == key)
            .ok_or_else(|| ParseStageError(value.to_string()))
    }
}

/// Static metadata for one stage: where it may go next and which actions it unlocks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageDefinition {
    pub key: Stage,
    pub label: &'static str,
    pub description: &'static str,
    pub allowed_transitions: Vec<Stage>,
    pub requires_payment: bool,
    pub can_schedule: bool,
    pub can_generate_letter: bool,
    pub can_edit: bool,
}

impl StageDefinition {
    pub fn allows(&self, to: Stage) -> bool {
        self.allowed_transitions.contains(&to)
    }

    pub fn is_terminal(&self) -> bool {
        self.allowed_transitions.is_empty()
    }
}
