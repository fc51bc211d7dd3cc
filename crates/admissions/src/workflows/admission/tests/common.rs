use std::collections::HashMap;
use std::sync::{Arc, Barrier, Mutex};

use axum::response::Response;
use serde_json::Value;

use crate::config::WorkflowConfig;
use crate::workflows::admission::actions::{
    CollaboratorError, DocumentGenerator, ExternalReference, OfferLetterRequest,
    PaymentInitiator, PaymentInstruction,
};
use crate::workflows::admission::engine::TransitionEngine;
use crate::workflows::admission::graph::StageGraph;
use crate::workflows::admission::record::{
    ApplicantDetails, ApplicationId, ApplicationNumber, ApplicationRecord,
};
use crate::workflows::admission::repository::{ApplicationRepository, RepositoryError};
use crate::workflows::admission::service::AdmissionService;
use crate::workflows::admission::stage::{Stage, StageDefinition};

pub(super) const ACTOR: &str = "registrar@school.test";

pub(super) fn details() -> ApplicantDetails {
    ApplicantDetails {
        student_name: "Amara Okafor".to_string(),
        year_group: "Year 7".to_string(),
        date_of_birth: chrono::NaiveDate::from_ymd_opt(2014, 3, 18),
        guardian_name: Some("Ngozi Okafor".to_string()),
        guardian_email: Some("ngozi.okafor@example.com".to_string()),
        previous_school: Some("St Brigid's Primary".to_string()),
    }
}

pub(super) fn workflow_config() -> WorkflowConfig {
    WorkflowConfig {
        conflict_retries: 2,
        number_prefix: "ADM".to_string(),
    }
}

/// Route from `submitted` to `stage` through the standard graph.
pub(super) fn path_to(stage: Stage) -> Vec<Stage> {
    let main_line = [
        Stage::UnderReview,
        Stage::AssessmentScheduled,
        Stage::AssessmentComplete,
        Stage::Approved,
        Stage::FeePayment,
        Stage::Confirmed,
        Stage::Enrolled,
    ];
    match stage {
        Stage::Submitted => Vec::new(),
        Stage::Rejected => vec![Stage::Rejected],
        Stage::DocumentsPending => vec![Stage::DocumentsPending],
        Stage::OnHold => vec![Stage::UnderReview, Stage::OnHold],
        other => {
            let end = main_line
                .iter()
                .position(|candidate| *candidate == other)
                .expect("stage on the main line");
            main_line[..=end].to_vec()
        }
    }
}

/// Definitions of the standard graph, for tests that tweak a copy.
pub(super) fn standard_definitions() -> Vec<StageDefinition> {
    StageGraph::standard().stages().cloned().collect()
}

pub(super) fn new_record(suffix: &str) -> ApplicationRecord {
    ApplicationRecord::new(
        ApplicationId(format!("app-{suffix}")),
        ApplicationNumber(format!("ADM-2026-{suffix}")),
        details(),
        chrono::Utc::now(),
    )
}

pub(super) fn engine_with(
    repository: Arc<MemoryRepository>,
) -> TransitionEngine<MemoryRepository> {
    TransitionEngine::new(Arc::new(StageGraph::standard()), repository)
}

/// Insert a fresh record and walk it to `stage` through the engine.
pub(super) fn seed_in_stage(
    repository: &Arc<MemoryRepository>,
    suffix: &str,
    stage: Stage,
) -> ApplicationRecord {
    let record = repository
        .insert(new_record(suffix))
        .expect("insert succeeds");
    let engine = engine_with(repository.clone());
    let mut current = record;
    for step in path_to(stage) {
        current = engine
            .request_transition(current.id(), step, None, "seed")
            .expect("seed path is legal");
    }
    current
}

pub(super) type TestService = AdmissionService<MemoryRepository, MemoryPayments, MemoryDocuments>;

pub(super) fn build_service() -> (
    TestService,
    Arc<MemoryRepository>,
    Arc<MemoryPayments>,
    Arc<MemoryDocuments>,
) {
    let repository = Arc::new(MemoryRepository::default());
    let payments = Arc::new(MemoryPayments::default());
    let documents = Arc::new(MemoryDocuments::default());
    let service = AdmissionService::new(
        Arc::new(StageGraph::standard()),
        repository.clone(),
        payments.clone(),
        documents.clone(),
        &workflow_config(),
    );
    (service, repository, payments, documents)
}

#[derive(Default, Clone)]
pub(super) struct MemoryRepository {
    pub(super) records: Arc<Mutex<HashMap<ApplicationId, ApplicationRecord>>>,
}

impl MemoryRepository {
    pub(super) fn stored(&self, id: &ApplicationId) -> ApplicationRecord {
        self.records
            .lock()
            .expect("repository mutex poisoned")
            .get(id)
            .cloned()
            .expect("record present")
    }
}

impl ApplicationRepository for MemoryRepository {
    fn insert(&self, record: ApplicationRecord) -> Result<ApplicationRecord, RepositoryError> {
        let mut guard = self.records.lock().expect("repository mutex poisoned");
        let duplicate_number = guard
            .values()
            .any(|stored| stored.application_number() == record.application_number());
        if guard.contains_key(record.id()) || duplicate_number {
            return Err(RepositoryError::Conflict);
        }
        guard.insert(record.id().clone(), record.clone());
        Ok(record)
    }

    fn load(&self, id: &ApplicationId) -> Result<Option<ApplicationRecord>, RepositoryError> {
        let guard = self.records.lock().expect("repository mutex poisoned");
        Ok(guard.get(id).cloned())
    }

    fn save(
        &self,
        record: &ApplicationRecord,
        expected_version: u64,
    ) -> Result<(), RepositoryError> {
        let mut guard = self.records.lock().expect("repository mutex poisoned");
        let stored = guard.get_mut(record.id()).ok_or(RepositoryError::NotFound)?;
        if stored.version() != expected_version {
            return Err(RepositoryError::VersionMismatch {
                expected: expected_version,
                actual: stored.version(),
            });
        }
        *stored = record.clone();
        Ok(())
    }

    fn find_by_application_number(
        &self,
        number: &ApplicationNumber,
    ) -> Result<Option<ApplicationRecord>, RepositoryError> {
        let guard = self.records.lock().expect("repository mutex poisoned");
        Ok(guard
            .values()
            .find(|record| record.application_number() == number)
            .cloned())
    }

    fn list_in_stage(&self, stage: Stage) -> Result<Vec<ApplicationRecord>, RepositoryError> {
        let guard = self.records.lock().expect("repository mutex poisoned");
        let mut records: Vec<ApplicationRecord> = guard
            .values()
            .filter(|record| record.current_stage() == stage)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.application_number().cmp(b.application_number()));
        Ok(records)
    }

    fn highest_sequence(&self, stem: &str) -> Result<Option<u64>, RepositoryError> {
        let guard = self.records.lock().expect("repository mutex poisoned");
        Ok(guard
            .values()
            .filter_map(|record| record.application_number().sequence_after(stem))
            .max())
    }
}

/// Holds every `load` at a barrier so concurrent callers read the same version.
pub(super) struct BarrierRepository {
    pub(super) inner: MemoryRepository,
    pub(super) barrier: Barrier,
}

impl ApplicationRepository for BarrierRepository {
    fn insert(&self, record: ApplicationRecord) -> Result<ApplicationRecord, RepositoryError> {
        self.inner.insert(record)
    }

    fn load(&self, id: &ApplicationId) -> Result<Option<ApplicationRecord>, RepositoryError> {
        let loaded = self.inner.load(id);
        self.barrier.wait();
        loaded
    }

    fn save(
        &self,
        record: &ApplicationRecord,
        expected_version: u64,
    ) -> Result<(), RepositoryError> {
        self.inner.save(record, expected_version)
    }

    fn find_by_application_number(
        &self,
        number: &ApplicationNumber,
    ) -> Result<Option<ApplicationRecord>, RepositoryError> {
        self.inner.find_by_application_number(number)
    }

    fn list_in_stage(&self, stage: Stage) -> Result<Vec<ApplicationRecord>, RepositoryError> {
        self.inner.list_in_stage(stage)
    }

    fn highest_sequence(&self, stem: &str) -> Result<Option<u64>, RepositoryError> {
        self.inner.highest_sequence(stem)
    }
}

/// Lets a fixed number of saves fail with a version conflict before delegating.
pub(super) struct ContendedRepository {
    pub(super) inner: MemoryRepository,
    pub(super) conflicts_remaining: Mutex<u32>,
}

impl ContendedRepository {
    pub(super) fn new(inner: MemoryRepository, conflicts: u32) -> Self {
        Self {
            inner,
            conflicts_remaining: Mutex::new(conflicts),
        }
    }
}

impl ApplicationRepository for ContendedRepository {
    fn insert(&self, record: ApplicationRecord) -> Result<ApplicationRecord, RepositoryError> {
        self.inner.insert(record)
    }

    fn load(&self, id: &ApplicationId) -> Result<Option<ApplicationRecord>, RepositoryError> {
        self.inner.load(id)
    }

    fn save(
        &self,
        record: &ApplicationRecord,
        expected_version: u64,
    ) -> Result<(), RepositoryError> {
        let mut remaining = self
            .conflicts_remaining
            .lock()
            .expect("conflict mutex poisoned");
        if *remaining > 0 {
            *remaining -= 1;
            return Err(RepositoryError::VersionMismatch {
                expected: expected_version,
                actual: expected_version + 1,
            });
        }
        drop(remaining);
        self.inner.save(record, expected_version)
    }

    fn find_by_application_number(
        &self,
        number: &ApplicationNumber,
    ) -> Result<Option<ApplicationRecord>, RepositoryError> {
        self.inner.find_by_application_number(number)
    }

    fn list_in_stage(&self, stage: Stage) -> Result<Vec<ApplicationRecord>, RepositoryError> {
        self.inner.list_in_stage(stage)
    }

    fn highest_sequence(&self, stem: &str) -> Result<Option<u64>, RepositoryError> {
        self.inner.highest_sequence(stem)
    }
}

pub(super) struct UnavailableRepository;

impl ApplicationRepository for UnavailableRepository {
    fn insert(&self, _record: ApplicationRecord) -> Result<ApplicationRecord, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn load(&self, _id: &ApplicationId) -> Result<Option<ApplicationRecord>, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn save(
        &self,
        _record: &ApplicationRecord,
        _expected_version: u64,
    ) -> Result<(), RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn find_by_application_number(
        &self,
        _number: &ApplicationNumber,
    ) -> Result<Option<ApplicationRecord>, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn list_in_stage(&self, _stage: Stage) -> Result<Vec<ApplicationRecord>, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn highest_sequence(&self, _stem: &str) -> Result<Option<u64>, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }
}

#[derive(Default)]
pub(super) struct MemoryPayments {
    pub(super) failure: Option<CollaboratorError>,
    initiated: Mutex<Vec<PaymentInstruction>>,
    voided: Mutex<Vec<ExternalReference>>,
}

impl MemoryPayments {
    pub(super) fn failing(error: CollaboratorError) -> Self {
        Self {
            failure: Some(error),
            ..Self::default()
        }
    }

    pub(super) fn initiated(&self) -> Vec<PaymentInstruction> {
        self.initiated.lock().expect("payment mutex poisoned").clone()
    }

    pub(super) fn voided(&self) -> Vec<ExternalReference> {
        self.voided.lock().expect("payment mutex poisoned").clone()
    }
}

impl PaymentInitiator for MemoryPayments {
    fn initiate(
        &self,
        instruction: &PaymentInstruction,
    ) -> Result<ExternalReference, CollaboratorError> {
        if let Some(error) = &self.failure {
            return Err(error.clone());
        }
        let mut guard = self.initiated.lock().expect("payment mutex poisoned");
        guard.push(instruction.clone());
        Ok(ExternalReference(format!("PAY-{}", guard.len())))
    }

    fn void(&self, reference: &ExternalReference) -> Result<(), CollaboratorError> {
        self.voided
            .lock()
            .expect("payment mutex poisoned")
            .push(reference.clone());
        Ok(())
    }
}

#[derive(Default)]
pub(super) struct MemoryDocuments {
    pub(super) failure: Option<CollaboratorError>,
    generated: Mutex<Vec<OfferLetterRequest>>,
    discarded: Mutex<Vec<ExternalReference>>,
}

impl MemoryDocuments {
    pub(super) fn failing(error: CollaboratorError) -> Self {
        Self {
            failure: Some(error),
            ..Self::default()
        }
    }

    pub(super) fn generated(&self) -> Vec<OfferLetterRequest> {
        self.generated.lock().expect("document mutex poisoned").clone()
    }

    pub(super) fn discarded(&self) -> Vec<ExternalReference> {
        self.discarded
            .lock()
            .expect("document mutex poisoned")
            .clone()
    }
}

impl DocumentGenerator for MemoryDocuments {
    fn generate(
        &self,
        request: &OfferLetterRequest,
    ) -> Result<ExternalReference, CollaboratorError> {
        if let Some(error) = &self.failure {
            return Err(error.clone());
        }
        let mut guard = self.generated.lock().expect("document mutex poisoned");
        guard.push(request.clone());
        Ok(ExternalReference(format!(
            "letters/{}.pdf",
            request.application_number
        )))
    }

    fn discard(&self, reference: &ExternalReference) -> Result<(), CollaboratorError> {
        self.discarded
            .lock()
            .expect("document mutex poisoned")
            .push(reference.clone());
        Ok(())
    }
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
