use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use admissions::config::WorkflowConfig;
use admissions::workflows::admission::{
    ActionError, AdmissionService, AdmissionServiceError, ApplicantDetails, ApplicationId,
    ApplicationNumber, ApplicationRecord, ApplicationRepository, AssessmentRequest,
    CollaboratorError, DocumentGenerator, ExternalReference, OfferLetterRequest,
    PaymentInitiator, PaymentInstruction, PaymentRequest, RepositoryError, Stage, StageGraph,
    TransitionError,
};

#[derive(Default)]
struct Store {
    records: Mutex<HashMap<ApplicationId, ApplicationRecord>>,
}

impl ApplicationRepository for Store {
    fn insert(&self, record: ApplicationRecord) -> Result<ApplicationRecord, RepositoryError> {
        let mut guard = self.records.lock().expect("store mutex poisoned");
        if guard.contains_key(record.id()) {
            return Err(RepositoryError::Conflict);
        }
        guard.insert(record.id().clone(), record.clone());
        Ok(record)
    }

    fn load(&self, id: &ApplicationId) -> Result<Option<ApplicationRecord>, RepositoryError> {
        Ok(self
            .records
            .lock()
            .expect("store mutex poisoned")
            .get(id)
            .cloned())
    }

    fn save(
        &self,
        record: &ApplicationRecord,
        expected_version: u64,
    ) -> Result<(), RepositoryError> {
        let mut guard = self.records.lock().expect("store mutex poisoned");
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
        Ok(self
            .records
            .lock()
            .expect("store mutex poisoned")
            .values()
            .find(|record| record.application_number() == number)
            .cloned())
    }

    fn list_in_stage(&self, stage: Stage) -> Result<Vec<ApplicationRecord>, RepositoryError> {
        Ok(self
            .records
            .lock()
            .expect("store mutex poisoned")
            .values()
            .filter(|record| record.current_stage() == stage)
            .cloned()
            .collect())
    }

    fn highest_sequence(&self, stem: &str) -> Result<Option<u64>, RepositoryError> {
        Ok(self
            .records
            .lock()
            .expect("store mutex poisoned")
            .values()
            .filter_map(|record| record.application_number().sequence_after(stem))
            .max())
    }
}

#[derive(Default)]
struct Gateway {
    payments: Mutex<Vec<PaymentInstruction>>,
    letters: Mutex<Vec<OfferLetterRequest>>,
}

impl PaymentInitiator for Gateway {
    fn initiate(
        &self,
        instruction: &PaymentInstruction,
    ) -> Result<ExternalReference, CollaboratorError> {
        let mut guard = self.payments.lock().expect("gateway mutex poisoned");
        guard.push(instruction.clone());
        Ok(ExternalReference(format!("TXN-{}", guard.len())))
    }

    fn void(&self, _reference: &ExternalReference) -> Result<(), CollaboratorError> {
        Ok(())
    }
}

impl DocumentGenerator for Gateway {
    fn generate(
        &self,
        request: &OfferLetterRequest,
    ) -> Result<ExternalReference, CollaboratorError> {
        self.letters
            .lock()
            .expect("gateway mutex poisoned")
            .push(request.clone());
        Ok(ExternalReference(format!("{}.pdf", request.application_number)))
    }

    fn discard(&self, _reference: &ExternalReference) -> Result<(), CollaboratorError> {
        Ok(())
    }
}

fn service() -> (AdmissionService<Store, Gateway, Gateway>, Arc<Gateway>) {
    let gateway = Arc::new(Gateway::default());
    let service = AdmissionService::new(
        Arc::new(StageGraph::standard()),
        Arc::new(Store::default()),
        gateway.clone(),
        gateway.clone(),
        &WorkflowConfig {
            conflict_retries: 1,
            number_prefix: "STM".to_string(),
        },
    );
    (service, gateway)
}

fn applicant() -> ApplicantDetails {
    ApplicantDetails {
        student_name: "Priya Natarajan".to_string(),
        year_group: "Year 9".to_string(),
        date_of_birth: None,
        guardian_name: Some("Arun Natarajan".to_string()),
        guardian_email: None,
        previous_school: None,
    }
}

const REGISTRAR: &str = "registrar@stmarks.test";

#[test]
fn application_walks_from_submission_to_enrolment() {
    let (service, gateway) = service();
    let submitted = service.submit(applicant()).expect("submitted");
    let id = submitted.id().clone();
    assert!(submitted.application_number().0.starts_with("STM-"));
    assert_eq!(submitted.current_stage(), Stage::Submitted);

    service
        .transition(&id, Stage::UnderReview, None, REGISTRAR)
        .expect("review started");
    let scheduled = service
        .schedule_assessment(
            &id,
            AssessmentRequest {
                assessment_type: Some("Maths paper".to_string()),
                date: Some("2026-11-20".to_string()),
                notes: None,
            },
            REGISTRAR,
        )
        .expect("assessment scheduled");
    assert_eq!(scheduled.record.current_stage(), Stage::AssessmentScheduled);

    service
        .transition(&id, Stage::AssessmentComplete, None, REGISTRAR)
        .expect("assessment complete");
    service
        .transition(&id, Stage::Approved, Some("panel approved".to_string()), REGISTRAR)
        .expect("approved");

    let letter = service
        .generate_offer_letter(&id, REGISTRAR)
        .expect("letter generated");
    assert_eq!(letter.record.current_stage(), Stage::Approved);
    assert_eq!(
        letter.artifact.reference,
        ExternalReference(format!("{}.pdf", submitted.application_number()))
    );

    service
        .transition(&id, Stage::FeePayment, None, REGISTRAR)
        .expect("fee requested");
    let payment = service
        .initiate_payment(
            &id,
            PaymentRequest {
                amount: 120_000,
                method: "card".to_string(),
            },
            REGISTRAR,
        )
        .expect("payment initiated");
    assert_eq!(payment.artifact.reference, ExternalReference("TXN-1".to_string()));

    service
        .transition(&id, Stage::Confirmed, None, REGISTRAR)
        .expect("confirmed");
    let enrolled = service
        .transition(&id, Stage::Enrolled, None, REGISTRAR)
        .expect("enrolled");

    let stages: Vec<(Stage, Stage)> = enrolled
        .audit_trail()
        .iter()
        .map(|entry| (entry.from_stage, entry.to_stage))
        .collect();
    assert_eq!(
        stages,
        vec![
            (Stage::Submitted, Stage::UnderReview),
            (Stage::UnderReview, Stage::AssessmentScheduled),
            (Stage::AssessmentScheduled, Stage::AssessmentComplete),
            (Stage::AssessmentComplete, Stage::Approved),
            (Stage::Approved, Stage::Approved),
            (Stage::Approved, Stage::FeePayment),
            (Stage::FeePayment, Stage::FeePayment),
            (Stage::FeePayment, Stage::Confirmed),
            (Stage::Confirmed, Stage::Enrolled),
        ]
    );
    assert!(enrolled
        .audit_trail()
        .iter()
        .all(|entry| entry.actor == REGISTRAR));
    assert_eq!(enrolled.derived_stage(), Stage::Enrolled);
    assert_eq!(gateway.payments.lock().expect("gateway").len(), 1);
    assert_eq!(gateway.letters.lock().expect("gateway").len(), 1);

    let err = service
        .transition(&id, Stage::UnderReview, None, REGISTRAR)
        .expect_err("enrolled is terminal");
    assert_eq!(
        err,
        AdmissionServiceError::Transition(TransitionError::IllegalTransition {
            from: Stage::Enrolled,
            to: Stage::UnderReview,
        })
    );
}

#[test]
fn skipping_ahead_is_rejected_without_touching_the_trail() {
    let (service, _) = service();
    let submitted = service.submit(applicant()).expect("submitted");

    let err = service
        .transition(submitted.id(), Stage::Approved, None, REGISTRAR)
        .expect_err("cannot skip review");
    assert!(matches!(
        err,
        AdmissionServiceError::Transition(TransitionError::IllegalTransition { .. })
    ));

    let stored = service.get(submitted.id()).expect("still stored");
    assert!(stored.audit_trail().is_empty());
    assert_eq!(stored.version(), submitted.version());
}

#[test]
fn payment_before_fee_stage_is_unavailable() {
    let (service, gateway) = service();
    let submitted = service.submit(applicant()).expect("submitted");

    let err = service
        .initiate_payment(
            submitted.id(),
            PaymentRequest {
                amount: 500,
                method: "card".to_string(),
            },
            REGISTRAR,
        )
        .expect_err("submitted has no payment");
    assert!(matches!(
        err,
        AdmissionServiceError::Action(ActionError::Unavailable { .. })
    ));
    assert!(gateway.payments.lock().expect("gateway").is_empty());
}
