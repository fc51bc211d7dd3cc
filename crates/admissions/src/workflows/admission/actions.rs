use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::engine::{TransitionEngine, TransitionError};
use super::record::{ApplicationId, ApplicationNumber, ApplicationRecord};
use super::repository::ApplicationRepository;
use super::stage::Stage;

/// Outbound hook to the payment gateway.
pub trait PaymentInitiator: Send + Sync {
    fn initiate(&self, instruction: &PaymentInstruction)
        -> Result<ExternalReference, CollaboratorError>;
    /// Cancel an initiated payment whose audit entry could not be recorded.
    fn void(&self, reference: &ExternalReference) -> Result<(), CollaboratorError>;
}

/// Outbound hook to the document-generation service.
pub trait DocumentGenerator: Send + Sync {
    fn generate(&self, request: &OfferLetterRequest)
        -> Result<ExternalReference, CollaboratorError>;
    /// Withdraw a generated letter whose audit entry could not be recorded.
    fn discard(&self, reference: &ExternalReference) -> Result<(), CollaboratorError>;
}

/// Opaque handle returned by an external collaborator (transaction id, document key).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExternalReference(pub String);

impl fmt::Display for ExternalReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CollaboratorError {
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),
    #[error("request declined: {0}")]
    Declined(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentInstruction {
    pub application_id: ApplicationId,
    pub amount: u64,
    pub method: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferLetterRequest {
    pub student_name: String,
    pub application_number: ApplicationNumber,
    pub year_group: String,
}

/// Auxiliary actions a stage can unlock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageAction {
    InitiatePayment,
    ScheduleAssessment,
    GenerateOfferLetter,
}

impl StageAction {
    pub const fn label(self) -> &'static str {
        match self {
            Self::InitiatePayment => "payment initiation",
            Self::ScheduleAssessment => "assessment scheduling",
            Self::GenerateOfferLetter => "offer letter generation",
        }
    }
}

impl fmt::Display for StageAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// What a caller may do with an application in a given stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AvailableActions {
    pub stage: Stage,
    pub payment_required: bool,
    pub scheduling_available: bool,
    pub letter_generation_available: bool,
    pub editable: bool,
    pub transitions: Vec<Stage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PaymentRequest {
    /// Amount in minor currency units.
    pub amount: u64,
    pub method: String,
}

impl PaymentRequest {
    fn validate(&self) -> Result<(), ActionError> {
        if self.amount == 0 {
            return Err(validation(StageAction::InitiatePayment, "amount must be positive"));
        }
        if self.method.trim().is_empty() {
            return Err(validation(StageAction::InitiatePayment, "method is required"));
        }
        Ok(())
    }
}

/// Raw scheduling request; `type` and `date` are checked rather than required by the decoder
/// so that a missing field surfaces as a validation error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AssessmentRequest {
    #[serde(rename = "type", default)]
    pub assessment_type: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduledAssessment {
    pub assessment_type: String,
    pub date: NaiveDate,
    pub notes: Option<String>,
}

impl AssessmentRequest {
    fn validate(self) -> Result<ScheduledAssessment, ActionError> {
        let action = StageAction::ScheduleAssessment;
        let assessment_type = self
            .assessment_type
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .ok_or_else(|| validation(action, "assessment type is required"))?;
        let raw_date = self
            .date
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| validation(action, "assessment date is required"))?;
        let date = NaiveDate::parse_from_str(raw_date.trim(), "%Y-%m-%d").map_err(|err| {
            validation(
                action,
                format!("failed to parse '{raw_date}' as YYYY-MM-DD ({err})"),
            )
        })?;
        let notes = self.notes.filter(|value| !value.trim().is_empty());

        Ok(ScheduledAssessment {
            assessment_type,
            date,
            notes,
        })
    }
}

impl ScheduledAssessment {
    fn audit_note(&self) -> String {
        match &self.notes {
            Some(notes) => format!(
                "assessment scheduled: {} on {} ({})",
                self.assessment_type, self.date, notes
            ),
            None => format!(
                "assessment scheduled: {} on {}",
                self.assessment_type, self.date
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentInitiated {
    pub application_id: ApplicationId,
    pub amount: u64,
    pub method: String,
    pub reference: ExternalReference,
    pub initiated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OfferLetter {
    pub application_id: ApplicationId,
    pub reference: ExternalReference,
    pub generated_at: DateTime<Utc>,
}

/// Updated record plus whatever the action produced.
#[derive(Debug, Clone)]
pub struct ActionOutcome<T> {
    pub record: ApplicationRecord,
    pub artifact: T,
}

/// Exposes stage-conditional actions and records their outcomes through the engine.
///
/// Holds no state of its own: availability is read off the stage definition every time.
pub struct StageActionDispatcher<R, P, D> {
    engine: Arc<TransitionEngine<R>>,
    payments: Arc<P>,
    documents: Arc<D>,
}

impl<R, P, D> StageActionDispatcher<R, P, D>
where
    R: ApplicationRepository + 'static,
    P: PaymentInitiator + 'static,
    D: DocumentGenerator + 'static,
{
    pub fn new(engine: Arc<TransitionEngine<R>>, payments: Arc<P>, documents: Arc<D>) -> Self {
        Self {
            engine,
            payments,
            documents,
        }
    }

    pub fn available_actions(&self, stage: Stage) -> Result<AvailableActions, ActionError> {
        let definition = self
            .engine
            .graph()
            .definition_of(stage)
            .map_err(TransitionError::from)?;

        Ok(AvailableActions {
            stage,
            payment_required: definition.requires_payment,
            scheduling_available: definition.can_schedule,
            letter_generation_available: definition.can_generate_letter,
            editable: definition.can_edit,
            transitions: definition.allowed_transitions.clone(),
        })
    }

    /// Start a payment and log it as a same-stage audit entry. Never advances the stage.
    pub fn initiate_payment(
        &self,
        application_id: &ApplicationId,
        request: PaymentRequest,
        actor: &str,
    ) -> Result<ActionOutcome<PaymentInitiated>, ActionError> {
        let action = StageAction::InitiatePayment;
        request.validate()?;

        let record = self.engine.load(application_id)?;
        let stage = record.current_stage();
        if !self.engine.definition_for(&record)?.requires_payment {
            return Err(ActionError::Unavailable { action, stage });
        }
        self.engine.check_transition(stage, stage)?;

        let instruction = PaymentInstruction {
            application_id: application_id.clone(),
            amount: request.amount,
            method: request.method.trim().to_string(),
        };
        let reference = self.payments.initiate(&instruction).map_err(|cause| {
            warn!(%application_id, error = %cause, "payment gateway rejected initiation");
            ActionError::ActionFailed { action, cause }
        })?;

        let notes = format!(
            "payment initiated: {} via {} (ref {})",
            instruction.amount, instruction.method, reference
        );
        let record = match self.engine.transition_loaded(record, stage, Some(notes), actor) {
            Ok(record) => record,
            Err(err) => {
                if let Err(void_err) = self.payments.void(&reference) {
                    warn!(%application_id, %reference, error = %void_err, "failed to void payment");
                } else {
                    warn!(%application_id, %reference, "payment voided after audit failure");
                }
                return Err(err.into());
            }
        };

        info!(%application_id, %reference, actor, "payment initiated");
        let initiated_at = record.last_activity_at();
        Ok(ActionOutcome {
            record,
            artifact: PaymentInitiated {
                application_id: instruction.application_id,
                amount: instruction.amount,
                method: instruction.method,
                reference,
                initiated_at,
            },
        })
    }

    /// Book an assessment, moving the application to `assessment_scheduled`.
    pub fn schedule_assessment(
        &self,
        application_id: &ApplicationId,
        request: AssessmentRequest,
        actor: &str,
    ) -> Result<ActionOutcome<ScheduledAssessment>, ActionError> {
        let action = StageAction::ScheduleAssessment;
        let scheduled = request.validate()?;

        let record = self.engine.load(application_id)?;
        let stage = record.current_stage();
        if !self.engine.definition_for(&record)?.can_schedule {
            return Err(ActionError::Unavailable { action, stage });
        }

        let record = self.engine.transition_loaded(
            record,
            Stage::AssessmentScheduled,
            Some(scheduled.audit_note()),
            actor,
        )?;

        info!(%application_id, date = %scheduled.date, actor, "assessment scheduled");
        Ok(ActionOutcome {
            record,
            artifact: scheduled,
        })
    }

    /// Produce an offer letter and log it as a same-stage audit entry.
    pub fn generate_offer_letter(
        &self,
        application_id: &ApplicationId,
        actor: &str,
    ) -> Result<ActionOutcome<OfferLetter>, ActionError> {
        let action = StageAction::GenerateOfferLetter;

        let record = self.engine.load(application_id)?;
        let stage = record.current_stage();
        if !self.engine.definition_for(&record)?.can_generate_letter {
            return Err(ActionError::Unavailable { action, stage });
        }
        self.engine.check_transition(stage, stage)?;

        let request = OfferLetterRequest {
            student_name: record.details().student_name.clone(),
            application_number: record.application_number().clone(),
            year_group: record.details().year_group.clone(),
        };
        let reference = self.documents.generate(&request).map_err(|cause| {
            warn!(%application_id, error = %cause, "document generator failed");
            ActionError::ActionFailed { action, cause }
        })?;

        let notes = format!("offer letter generated (ref {reference})");
        let record = match self.engine.transition_loaded(record, stage, Some(notes), actor) {
            Ok(record) => record,
            Err(err) => {
                if let Err(discard_err) = self.documents.discard(&reference) {
                    warn!(%application_id, %reference, error = %discard_err, "failed to discard letter");
                } else {
                    warn!(%application_id, %reference, "letter discarded after audit failure");
                }
                return Err(err.into());
            }
        };

        info!(%application_id, %reference, actor, "offer letter generated");
        let generated_at = record.last_activity_at();
        Ok(ActionOutcome {
            record,
            artifact: OfferLetter {
                application_id: application_id.clone(),
                reference,
                generated_at,
            },
        })
    }
}

/// Failure modes of a stage action.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ActionError {
    #[error("{action} is not available while an application is '{stage}'")]
    Unavailable { action: StageAction, stage: Stage },
    #[error("invalid {action} request: {reason}")]
    Validation { action: StageAction, reason: String },
    #[error("{action} failed: {cause}")]
    ActionFailed {
        action: StageAction,
        cause: CollaboratorError,
    },
    #[error(transparent)]
    Transition(#[from] TransitionError),
}

impl ActionError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, ActionError::Transition(err) if err.is_conflict())
    }
}

fn validation(action: StageAction, reason: impl Into<String>) -> ActionError {
    ActionError::Validation {
        action,
        reason: reason.into(),
    }
}
