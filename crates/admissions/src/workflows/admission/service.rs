use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{Datelike, Utc};
use tracing::{info, warn};

use super::actions::{
    ActionError, ActionOutcome, AssessmentRequest, AvailableActions, DocumentGenerator,
    OfferLetter, PaymentInitiated, PaymentInitiator, PaymentRequest, ScheduledAssessment,
    StageActionDispatcher,
};
use super::engine::{TransitionEngine, TransitionError};
use super::graph::StageGraph;
use super::record::{ApplicantDetails, ApplicationId, ApplicationNumber, ApplicationRecord};
use super::repository::{ApplicationRepository, RepositoryError};
use super::stage::Stage;
use crate::config::WorkflowConfig;

/// Attempts at intake before a number collision is reported to the caller.
const NUMBER_ALLOCATION_ATTEMPTS: u32 = 3;

/// Hands out `{prefix}-{year}-{sequence}` application numbers.
///
/// The counter is process-local; `submit` resyncs it from the repository when a number
/// turns out to be taken already.
struct ApplicationNumberAllocator {
    prefix: String,
    sequence: AtomicU64,
}

impl ApplicationNumberAllocator {
    fn new(prefix: String) -> Self {
        Self {
            prefix,
            sequence: AtomicU64::new(1),
        }
    }

    fn stem(&self, year: i32) -> String {
        format!("{}-{year}-", self.prefix)
    }

    fn next(&self, year: i32) -> ApplicationNumber {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        ApplicationNumber(format!("{}{sequence:05}", self.stem(year)))
    }

    fn advance_past(&self, sequence: u64) {
        self.sequence.fetch_max(sequence + 1, Ordering::Relaxed);
    }
}

/// Service composing intake, the transition engine and the stage action dispatcher.
pub struct AdmissionService<R, P, D> {
    repository: Arc<R>,
    engine: Arc<TransitionEngine<R>>,
    dispatcher: StageActionDispatcher<R, P, D>,
    numbers: ApplicationNumberAllocator,
    conflict_retries: u32,
}

impl<R, P, D> AdmissionService<R, P, D>
where
    R: ApplicationRepository + 'static,
    P: PaymentInitiator + 'static,
    D: DocumentGenerator + 'static,
{
    pub fn new(
        graph: Arc<StageGraph>,
        repository: Arc<R>,
        payments: Arc<P>,
        documents: Arc<D>,
        config: &WorkflowConfig,
    ) -> Self {
        let engine = Arc::new(TransitionEngine::new(graph, repository.clone()));
        let dispatcher = StageActionDispatcher::new(engine.clone(), payments, documents);

        Self {
            repository,
            engine,
            dispatcher,
            numbers: ApplicationNumberAllocator::new(config.number_prefix.clone()),
            conflict_retries: config.conflict_retries,
        }
    }

    pub fn graph(&self) -> &StageGraph {
        self.engine.graph()
    }

    pub fn engine(&self) -> &TransitionEngine<R> {
        &self.engine
    }

    /// Register a new application in the initial stage.
    pub fn submit(
        &self,
        details: ApplicantDetails,
    ) -> Result<ApplicationRecord, AdmissionServiceError> {
        validate_details(&details)?;

        let now = Utc::now();
        let mut attempt = 1;
        loop {
            let record = ApplicationRecord::new(
                ApplicationId::generate(),
                self.numbers.next(now.year()),
                details.clone(),
                now,
            );

            match self.repository.insert(record) {
                Ok(stored) => {
                    info!(
                        application_id = %stored.id(),
                        application_number = %stored.application_number(),
                        "application submitted"
                    );
                    return Ok(stored);
                }
                Err(RepositoryError::Conflict) if attempt < NUMBER_ALLOCATION_ATTEMPTS => {
                    let stem = self.numbers.stem(now.year());
                    if let Some(highest) = self.repository.highest_sequence(&stem)? {
                        self.numbers.advance_past(highest);
                    }
                    warn!(attempt, %stem, "application number already issued; resyncing allocator");
                    attempt += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    pub fn get(
        &self,
        application_id: &ApplicationId,
    ) -> Result<ApplicationRecord, AdmissionServiceError> {
        Ok(self.engine.load(application_id)?)
    }

    pub fn find_by_number(
        &self,
        number: &ApplicationNumber,
    ) -> Result<ApplicationRecord, AdmissionServiceError> {
        self.repository
            .find_by_application_number(number)?
            .ok_or_else(|| AdmissionServiceError::NumberNotFound(number.clone()))
    }

    pub fn list_in_stage(
        &self,
        stage: Stage,
    ) -> Result<Vec<ApplicationRecord>, AdmissionServiceError> {
        Ok(self.repository.list_in_stage(stage)?)
    }

    /// Replace the descriptive fields while the current stage still permits edits.
    ///
    /// Edits bump the version but are not transitions, so no audit entry is written.
    pub fn update_details(
        &self,
        application_id: &ApplicationId,
        details: ApplicantDetails,
        actor: &str,
    ) -> Result<ApplicationRecord, AdmissionServiceError> {
        validate_details(&details)?;

        self.with_conflict_retry(|| {
            let mut record = self.engine.load(application_id)?;
            let stage = record.current_stage();
            if !self.engine.definition_for(&record)?.can_edit {
                return Err(AdmissionServiceError::RecordLocked { stage });
            }

            record.replace_details(details.clone());
            let expected_version = record.next_version();
            self.repository
                .save(&record, expected_version)
                .map_err(|err| match err {
                    RepositoryError::VersionMismatch { .. } => AdmissionServiceError::Transition(
                        TransitionError::ConcurrentModification(application_id.clone()),
                    ),
                    RepositoryError::NotFound => AdmissionServiceError::Transition(
                        TransitionError::NotFound(application_id.clone()),
                    ),
                    other => AdmissionServiceError::Repository(other),
                })?;

            info!(%application_id, actor, "application details updated");
            Ok(record)
        })
    }

    pub fn transition(
        &self,
        application_id: &ApplicationId,
        to: Stage,
        notes: Option<String>,
        actor: &str,
    ) -> Result<ApplicationRecord, AdmissionServiceError> {
        self.with_conflict_retry(|| {
            Ok(self
                .engine
                .request_transition(application_id, to, notes.clone(), actor)?)
        })
    }

    pub fn available_actions(
        &self,
        application_id: &ApplicationId,
    ) -> Result<AvailableActions, AdmissionServiceError> {
        let record = self.engine.load(application_id)?;
        Ok(self.dispatcher.available_actions(record.current_stage())?)
    }

    pub fn initiate_payment(
        &self,
        application_id: &ApplicationId,
        request: PaymentRequest,
        actor: &str,
    ) -> Result<ActionOutcome<PaymentInitiated>, AdmissionServiceError> {
        self.with_conflict_retry(|| {
            Ok(self
                .dispatcher
                .initiate_payment(application_id, request.clone(), actor)?)
        })
    }

    pub fn schedule_assessment(
        &self,
        application_id: &ApplicationId,
        request: AssessmentRequest,
        actor: &str,
    ) -> Result<ActionOutcome<ScheduledAssessment>, AdmissionServiceError> {
        self.with_conflict_retry(|| {
            Ok(self
                .dispatcher
                .schedule_assessment(application_id, request.clone(), actor)?)
        })
    }

    pub fn generate_offer_letter(
        &self,
        application_id: &ApplicationId,
        actor: &str,
    ) -> Result<ActionOutcome<OfferLetter>, AdmissionServiceError> {
        self.with_conflict_retry(|| {
            Ok(self
                .dispatcher
                .generate_offer_letter(application_id, actor)?)
        })
    }

    /// Re-run a whole read-validate-mutate-persist cycle after an optimistic-lock conflict.
    fn with_conflict_retry<T>(
        &self,
        mut operation: impl FnMut() -> Result<T, AdmissionServiceError>,
    ) -> Result<T, AdmissionServiceError> {
        let mut attempt = 0;
        loop {
            match operation() {
                Err(err) if err.is_conflict() && attempt < self.conflict_retries => {
                    attempt += 1;
                    warn!(attempt, error = %err, "retrying after concurrent modification");
                }
                result => return result,
            }
        }
    }
}

fn validate_details(details: &ApplicantDetails) -> Result<(), AdmissionServiceError> {
    if details.student_name.trim().is_empty() {
        return Err(AdmissionServiceError::InvalidDetails(
            "student_name is required".to_string(),
        ));
    }
    if details.year_group.trim().is_empty() {
        return Err(AdmissionServiceError::InvalidDetails(
            "year_group is required".to_string(),
        ));
    }
    Ok(())
}

/// Error raised by the admission service.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdmissionServiceError {
    #[error("invalid application details: {0}")]
    InvalidDetails(String),
    #[error("application details cannot be edited while '{stage}'")]
    RecordLocked { stage: Stage },
    #[error("application number {0} not found")]
    NumberNotFound(ApplicationNumber),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error(transparent)]
    Action(ActionError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl AdmissionServiceError {
    pub fn is_conflict(&self) -> bool {
        match self {
            AdmissionServiceError::Transition(err) => err.is_conflict(),
            AdmissionServiceError::Action(err) => err.is_conflict(),
            _ => false,
        }
    }
}

impl From<ActionError> for AdmissionServiceError {
    fn from(value: ActionError) -> Self {
        match value {
            ActionError::Transition(err) => Self::Transition(err),
            other => Self::Action(other),
        }
    }
}
