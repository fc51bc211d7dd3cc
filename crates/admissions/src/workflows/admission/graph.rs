use std::collections::BTreeMap;

use super::stage::{Stage, StageDefinition};

/// Immutable stage graph loaded once at start-up and shared read-only afterwards.
#[derive(Debug)]
pub struct StageGraph {
    definitions: BTreeMap<Stage, StageDefinition>,
}

impl StageGraph {
    pub fn standard() -> Self {
        Self::try_standard().expect("standard admissions graph is well formed")
    }

    /// Fallible form of [`StageGraph::standard`] used when the service boots.
    pub fn try_standard() -> Result<Self, StageGraphError> {
        Self::from_definitions(standard_stage_definitions())
    }

    /// Build a graph from explicit definitions, validating it before use.
    pub fn from_definitions(
        definitions: Vec<StageDefinition>,
    ) -> Result<Self, StageGraphError> {
        let mut by_stage = BTreeMap::new();
        for definition in definitions {
            let key = definition.key;
            if by_stage.insert(key, definition).is_some() {
                return Err(StageGraphError::DuplicateStage(key));
            }
        }

        // Every edge target resolves once each stage is known to be defined.
        if let Some(missing) = Stage::ordered()
            .into_iter()
            .find(|stage| !by_stage.contains_key(stage))
        {
            return Err(StageGraphError::MissingStage(missing));
        }

        for (stage, definition) in &by_stage {
            // Payment and letter actions log a same-stage audit entry through the engine.
            if (definition.requires_payment || definition.can_generate_letter)
                && !definition.allows(*stage)
            {
                return Err(StageGraphError::MissingSelfTransition(*stage));
            }
        }

        Ok(Self {
            definitions: by_stage,
        })
    }

    pub fn definition_of(&self, stage: Stage) -> Result<&StageDefinition, StageGraphError> {
        self.definitions
            .get(&stage)
            .ok_or(StageGraphError::UnknownStage(stage))
    }

    pub fn can_transition(&self, from: Stage, to: Stage) -> bool {
        self.definitions
            .get(&from)
            .map(|definition| definition.allows(to))
            .unwrap_or(false)
    }

    pub fn available_transitions(&self, stage: Stage) -> &[Stage] {
        self.definitions
            .get(&stage)
            .map(|definition| definition.allowed_transitions.as_slice())
            .unwrap_or(&[])
    }

    pub fn is_terminal(&self, stage: Stage) -> bool {
        self.available_transitions(stage).is_empty()
    }

    pub fn stages(&self) -> impl Iterator<Item = &StageDefinition> {
        self.definitions.values()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StageGraphError {
    #[error("stage '{0}' is not defined in the workflow graph")]
    UnknownStage(Stage),
    #[error("stage '{0}' has no definition")]
    MissingStage(Stage),
    #[error("stage '{0}' is defined more than once")]
    DuplicateStage(Stage),
    #[error("stage '{0}' enables payment or letter actions but cannot transition to itself")]
    MissingSelfTransition(Stage),
}

fn standard_stage_definitions() -> Vec<StageDefinition> {
    vec![
        StageDefinition {
            key: Stage::Submitted,
            label: Stage::Submitted.label(),
            description: "Application received and awaiting triage by the admissions team.",
            allowed_transitions: vec![
                Stage::UnderReview,
                Stage::DocumentsPending,
                Stage::Rejected,
            ],
            requires_payment: false,
            can_schedule: false,
            can_generate_letter: false,
            can_edit: true,
        },
        StageDefinition {
            key: Stage::UnderReview,
            label: Stage::UnderReview.label(),
            description: "Admissions officer reviewing the file; registration fee is collected here.",
            allowed_transitions: vec![
                Stage::UnderReview,
                Stage::AssessmentScheduled,
                Stage::DocumentsPending,
                Stage::OnHold,
                Stage::Rejected,
            ],
            requires_payment: true,
            can_schedule: true,
            can_generate_letter: false,
            can_edit: true,
        },
        StageDefinition {
            key: Stage::AssessmentScheduled,
            label: Stage::AssessmentScheduled.label(),
            description: "Entrance assessment or interview booked with the applicant.",
            allowed_transitions: vec![
                Stage::AssessmentScheduled,
                Stage::AssessmentComplete,
                Stage::UnderReview,
                Stage::OnHold,
                Stage::Rejected,
            ],
            requires_payment: false,
            can_schedule: true,
            can_generate_letter: false,
            can_edit: true,
        },
        StageDefinition {
            key: Stage::AssessmentComplete,
            label: Stage::AssessmentComplete.label(),
            description: "Assessment taken; awaiting the admissions decision.",
            allowed_transitions: vec![Stage::Approved, Stage::OnHold, Stage::Rejected],
            requires_payment: false,
            can_schedule: false,
            can_generate_letter: false,
            can_edit: true,
        },
        StageDefinition {
            key: Stage::Approved,
            label: Stage::Approved.label(),
            description: "Place offered; offer letter can be issued to the family.",
            allowed_transitions: vec![Stage::Approved, Stage::FeePayment, Stage::Rejected],
            requires_payment: false,
            can_schedule: false,
            can_generate_letter: true,
            can_edit: true,
        },
        StageDefinition {
            key: Stage::FeePayment,
            label: Stage::FeePayment.label(),
            description: "Offer accepted; deposit and first-term fees are being collected.",
            allowed_transitions: vec![Stage::FeePayment, Stage::Confirmed, Stage::OnHold],
            requires_payment: true,
            can_schedule: false,
            can_generate_letter: true,
            can_edit: true,
        },
        StageDefinition {
            key: Stage::Confirmed,
            label: Stage::Confirmed.label(),
            description: "Fees received and place secured; record is frozen ahead of enrolment.",
            allowed_transitions: vec![Stage::Enrolled],
            requires_payment: false,
            can_schedule: false,
            can_generate_letter: false,
            can_edit: false,
        },
        StageDefinition {
            key: Stage::Enrolled,
            label: Stage::Enrolled.label(),
            description: "Student enrolled; the application is closed.",
            allowed_transitions: Vec::new(),
            requires_payment: false,
            can_schedule: false,
            can_generate_letter: false,
            can_edit: false,
        },
        StageDefinition {
            key: Stage::Rejected,
            label: Stage::Rejected.label(),
            description: "Application declined.",
            allowed_transitions: Vec::new(),
            requires_payment: false,
            can_schedule: false,
            can_generate_letter: false,
            can_edit: false,
        },
        StageDefinition {
            key: Stage::OnHold,
            label: Stage::OnHold.label(),
            description: "Application parked at the family's or the school's request.",
            allowed_transitions: Vec::new(),
            requires_payment: false,
            can_schedule: false,
            can_generate_letter: false,
            can_edit: true,
        },
        StageDefinition {
            key: Stage::DocumentsPending,
            label: Stage::DocumentsPending.label(),
            description: "Waiting on supporting documents from the family.",
            allowed_transitions: Vec::new(),
            requires_payment: false,
            can_schedule: false,
            can_generate_letter: false,
            can_edit: true,
        },
    ]
}
