use admissions::workflows::admission::{
    ApplicationId, ApplicationNumber, ApplicationRecord, ApplicationRepository,
    CollaboratorError, DocumentGenerator, ExternalReference, OfferLetterRequest,
    PaymentInitiator, PaymentInstruction, RepositoryError, Stage,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Process-local application store with compare-and-swap saves.
#[derive(Default, Clone)]
pub(crate) struct InMemoryApplicationRepository {
    records: Arc<Mutex<HashMap<ApplicationId, ApplicationRecord>>>,
}

impl InMemoryApplicationRepository {
    fn records(
        &self,
    ) -> Result<MutexGuard<'_, HashMap<ApplicationId, ApplicationRecord>>, RepositoryError> {
        self.records
            .lock()
            .map_err(|_| RepositoryError::Unavailable("repository mutex poisoned".to_string()))
    }
}

impl ApplicationRepository for InMemoryApplicationRepository {
    fn insert(&self, record: ApplicationRecord) -> Result<ApplicationRecord, RepositoryError> {
        let mut guard = self.records()?;
        let number_taken = guard
            .values()
            .any(|stored| stored.application_number() == record.application_number());
        if guard.contains_key(record.id()) || number_taken {
            return Err(RepositoryError::Conflict);
        }
        guard.insert(record.id().clone(), record.clone());
        Ok(record)
    }

    fn load(&self, id: &ApplicationId) -> Result<Option<ApplicationRecord>, RepositoryError> {
        Ok(self.records()?.get(id).cloned())
    }

    fn save(
        &self,
        record: &ApplicationRecord,
        expected_version: u64,
    ) -> Result<(), RepositoryError> {
        let mut guard = self.records()?;
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
            .records()?
            .values()
            .find(|record| record.application_number() == number)
            .cloned())
    }

    fn list_in_stage(&self, stage: Stage) -> Result<Vec<ApplicationRecord>, RepositoryError> {
        let mut records: Vec<ApplicationRecord> = self
            .records()?
            .values()
            .filter(|record| record.current_stage() == stage)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.application_number().cmp(b.application_number()));
        Ok(records)
    }

    fn highest_sequence(&self, stem: &str) -> Result<Option<u64>, RepositoryError> {
        Ok(self
            .records()?
            .values()
            .filter_map(|record| record.application_number().sequence_after(stem))
            .max())
    }
}

/// Stand-in payment gateway that hands out sequential references.
#[derive(Default, Clone)]
pub(crate) struct InMemoryPaymentInitiator {
    sequence: Arc<AtomicU64>,
    initiated: Arc<Mutex<Vec<(ExternalReference, PaymentInstruction)>>>,
}

impl InMemoryPaymentInitiator {
    pub(crate) fn initiated(&self) -> Vec<(ExternalReference, PaymentInstruction)> {
        self.initiated
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

impl PaymentInitiator for InMemoryPaymentInitiator {
    fn initiate(
        &self,
        instruction: &PaymentInstruction,
    ) -> Result<ExternalReference, CollaboratorError> {
        let next = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let reference = ExternalReference(format!("PAY-{next:06}"));
        self.initiated
            .lock()
            .map_err(|_| CollaboratorError::Unavailable("payment ledger poisoned".to_string()))?
            .push((reference.clone(), instruction.clone()));
        Ok(reference)
    }

    fn void(&self, reference: &ExternalReference) -> Result<(), CollaboratorError> {
        self.initiated
            .lock()
            .map_err(|_| CollaboratorError::Unavailable("payment ledger poisoned".to_string()))?
            .retain(|(existing, _)| existing != reference);
        Ok(())
    }
}

/// Keeps generated offer letters in memory, keyed by their document path.
///
/// Every generation gets its own path so discarding one never removes an earlier letter.
#[derive(Default, Clone)]
pub(crate) struct InMemoryDocumentGenerator {
    sequence: Arc<AtomicU64>,
    letters: Arc<Mutex<HashMap<ExternalReference, OfferLetterRequest>>>,
}

impl InMemoryDocumentGenerator {
    pub(crate) fn letters(&self) -> Vec<ExternalReference> {
        let mut references: Vec<ExternalReference> = self
            .letters
            .lock()
            .map(|guard| guard.keys().cloned().collect())
            .unwrap_or_default();
        references.sort_by(|a, b| a.0.cmp(&b.0));
        references
    }
}

impl DocumentGenerator for InMemoryDocumentGenerator {
    fn generate(
        &self,
        request: &OfferLetterRequest,
    ) -> Result<ExternalReference, CollaboratorError> {
        let next = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let reference = ExternalReference(format!(
            "offer-letters/{}-{next:04}.pdf",
            request.application_number
        ));
        self.letters
            .lock()
            .map_err(|_| CollaboratorError::Unavailable("letter store poisoned".to_string()))?
            .insert(reference.clone(), request.clone());
        Ok(reference)
    }

    fn discard(&self, reference: &ExternalReference) -> Result<(), CollaboratorError> {
        self.letters
            .lock()
            .map_err(|_| CollaboratorError::Unavailable("letter store poisoned".to_string()))?
            .remove(reference);
        Ok(())
    }
}
