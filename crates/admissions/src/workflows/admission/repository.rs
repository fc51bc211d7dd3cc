use super::record::{ApplicationId, ApplicationNumber, ApplicationRecord};
use super::stage::Stage;

/// Storage abstraction for admission applications.
///
/// `save` is a compare-and-swap on the record version: it succeeds only while the stored
/// record still carries `expected_version`, and stores the record with its bumped version.
pub trait ApplicationRepository: Send + Sync {
    fn insert(&self, record: ApplicationRecord) -> Result<ApplicationRecord, RepositoryError>;
    fn load(&self, id: &ApplicationId) -> Result<Option<ApplicationRecord>, RepositoryError>;
    fn save(&self, record: &ApplicationRecord, expected_version: u64)
        -> Result<(), RepositoryError>;
    fn find_by_application_number(
        &self,
        number: &ApplicationNumber,
    ) -> Result<Option<ApplicationRecord>, RepositoryError>;
    fn list_in_stage(&self, stage: Stage) -> Result<Vec<ApplicationRecord>, RepositoryError>;
    /// Highest sequence among stored numbers issued under `stem` (e.g. `ADM-2026-`).
    fn highest_sequence(&self, stem: &str) -> Result<Option<u64>, RepositoryError>;
}

/// Error enumeration for repository failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("record version {expected} is stale (stored version {actual})")]
    VersionMismatch { expected: u64, actual: u64 },
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}
