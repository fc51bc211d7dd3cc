//! Admission application workflow: a fixed stage graph, a transition engine that is the
//! only writer of an application's stage and audit trail, and the stage-conditional
//! actions (payment, assessment scheduling, offer letters) layered on top of it.

pub mod actions;
pub mod engine;
pub mod graph;
pub mod record;
pub mod repository;
pub mod router;
pub mod service;
pub mod stage;

#[cfg(test)]
mod tests;

pub use actions::{
    ActionError, ActionOutcome, AssessmentRequest, AvailableActions, CollaboratorError,
    DocumentGenerator, ExternalReference, OfferLetter, OfferLetterRequest, PaymentInitiated,
    PaymentInitiator, PaymentInstruction, PaymentRequest, ScheduledAssessment, StageAction,
    StageActionDispatcher,
};
pub use engine::{TransitionEngine, TransitionError};
pub use graph::{StageGraph, StageGraphError};
pub use record::{
    ApplicantDetails, ApplicationId, ApplicationNumber, ApplicationRecord, ApplicationStatusView,
    AuditTrail, RecordIntegrityError, StatusChangeEntry,
};
pub use repository::{ApplicationRepository, RepositoryError};
pub use router::{admission_router, ACTOR_HEADER};
pub use service::{AdmissionService, AdmissionServiceError};
pub use stage::{ParseStageError, Stage, StageDefinition};
