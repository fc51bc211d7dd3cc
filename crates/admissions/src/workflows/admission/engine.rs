use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use super::graph::{StageGraph, StageGraphError};
use super::record::{ApplicationId, ApplicationRecord, StatusChangeEntry};
use super::repository::{ApplicationRepository, RepositoryError};
use super::stage::{Stage, StageDefinition};

/// Proof that a stage mutation originates in this module.
///
/// The field is private, so no other module can construct one; `ApplicationRecord` and
/// `AuditTrail` demand it for every write to the stage or the trail.
pub struct TransitionCapability(());

/// Single gate through which every stage change passes.
pub struct TransitionEngine<R> {
    graph: Arc<StageGraph>,
    repository: Arc<R>,
}

impl<R> TransitionEngine<R>
where
    R: ApplicationRepository + 'static,
{
    pub fn new(graph: Arc<StageGraph>, repository: Arc<R>) -> Self {
        Self { graph, repository }
    }

    pub fn graph(&self) -> &StageGraph {
        &self.graph
    }

    pub fn load(&self, application_id: &ApplicationId) -> Result<ApplicationRecord, TransitionError> {
        debug!(%application_id, "loading application");
        self.repository
            .load(application_id)?
            .ok_or_else(|| TransitionError::NotFound(application_id.clone()))
    }

    /// Resolve the definition of the stage `record` currently sits in.
    pub fn definition_for(
        &self,
        record: &ApplicationRecord,
    ) -> Result<&StageDefinition, TransitionError> {
        Ok(self.graph.definition_of(record.current_stage())?)
    }

    /// Fail with `IllegalTransition` unless `to` is an allowed edge out of `from`.
    pub fn check_transition(&self, from: Stage, to: Stage) -> Result<(), TransitionError> {
        let definition = self.graph.definition_of(from)?;
        if definition.allows(to) {
            Ok(())
        } else {
            Err(TransitionError::IllegalTransition { from, to })
        }
    }

    /// Load, validate, apply and persist a transition in one optimistic cycle.
    pub fn request_transition(
        &self,
        application_id: &ApplicationId,
        to: Stage,
        notes: Option<String>,
        actor: &str,
    ) -> Result<ApplicationRecord, TransitionError> {
        let record = self.load(application_id)?;
        self.transition_loaded(record, to, notes, actor)
    }

    /// Apply a transition to a record the caller already loaded.
    ///
    /// The save is conditional on the version the record was loaded at, so a caller that
    /// validated other preconditions against `record` gets `ConcurrentModification` if it
    /// went stale in the meantime.
    pub(crate) fn transition_loaded(
        &self,
        mut record: ApplicationRecord,
        to: Stage,
        notes: Option<String>,
        actor: &str,
    ) -> Result<ApplicationRecord, TransitionError> {
        let from = record.current_stage();
        if let Err(err) = self.check_transition(from, to) {
            warn!(application_id = %record.id(), %from, %to, actor, "transition rejected");
            return Err(err);
        }

        let mut timestamp = Utc::now();
        if let Some(previous) = record.audit_trail().last() {
            timestamp = timestamp.max(previous.timestamp);
        }

        let entry = StatusChangeEntry {
            timestamp,
            from_stage: from,
            to_stage: to,
            notes,
            actor: actor.to_string(),
        };
        record.apply_transition(entry, &TransitionCapability(()));

        let expected_version = record.next_version();
        self.repository
            .save(&record, expected_version)
            .map_err(|err| match err {
                RepositoryError::VersionMismatch { .. } => {
                    warn!(application_id = %record.id(), expected_version, "concurrent modification");
                    TransitionError::ConcurrentModification(record.id().clone())
                }
                RepositoryError::NotFound => TransitionError::NotFound(record.id().clone()),
                other => TransitionError::Repository(other),
            })?;

        info!(
            application_id = %record.id(),
            %from,
            %to,
            actor,
            version = record.version(),
            "transition applied"
        );
        Ok(record)
    }
}

/// Failure modes of a transition request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("application {0} not found")]
    NotFound(ApplicationId),
    #[error(transparent)]
    Graph(#[from] StageGraphError),
    #[error("cannot move an application from '{from}' to '{to}'")]
    IllegalTransition { from: Stage, to: Stage },
    #[error("application {0} was modified concurrently; reload and retry")]
    ConcurrentModification(ApplicationId),
    #[error(transparent)]
    Repository(RepositoryError),
}

impl TransitionError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, TransitionError::ConcurrentModification(_))
    }
}

impl From<RepositoryError> for TransitionError {
    fn from(value: RepositoryError) -> Self {
        Self::Repository(value)
    }
}
