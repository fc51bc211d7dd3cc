use crate::infra::{
    InMemoryApplicationRepository, InMemoryDocumentGenerator, InMemoryPaymentInitiator,
};
use admissions::config::WorkflowConfig;
use admissions::error::AppError;
use admissions::workflows::admission::{
    AdmissionService, ApplicantDetails, ApplicationRecord, AssessmentRequest, PaymentRequest,
    Stage, StageGraph,
};
use chrono::{Duration, Local, NaiveDate};
use clap::Args;
use std::sync::Arc;

const DEMO_ACTOR: &str = "demo-registrar";

type DemoService =
    AdmissionService<InMemoryApplicationRepository, InMemoryPaymentInitiator, InMemoryDocumentGenerator>;

#[derive(Args, Debug)]
pub(crate) struct DemoArgs {
    /// Student name used for the sample application
    #[arg(long, default_value = "Sam Rivera")]
    pub(crate) student_name: String,
    /// Year group the student is applying for
    #[arg(long, default_value = "Year 7")]
    pub(crate) year_group: String,
    /// Assessment date (YYYY-MM-DD). Defaults to two weeks from today.
    #[arg(long, value_parser = parse_date)]
    pub(crate) assessment_date: Option<NaiveDate>,
    /// Fee amount in minor currency units
    #[arg(long, default_value_t = 45_000)]
    pub(crate) fee: u64,
    /// Stop the walk once the application reaches this stage
    #[arg(long)]
    pub(crate) stop_at: Option<Stage>,
}

pub(crate) fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|err| format!("failed to parse '{raw}' as YYYY-MM-DD ({err})"))
}

pub(crate) fn print_stage_graph() -> Result<(), AppError> {
    let graph = StageGraph::try_standard()?;

    println!("Admission stage graph");
    for definition in graph.stages() {
        let transitions: Vec<&str> = definition
            .allowed_transitions
            .iter()
            .map(|stage| stage.key())
            .collect();
        let mut capabilities = Vec::new();
        if definition.requires_payment {
            capabilities.push("payment");
        }
        if definition.can_schedule {
            capabilities.push("scheduling");
        }
        if definition.can_generate_letter {
            capabilities.push("offer letter");
        }
        if definition.can_edit {
            capabilities.push("editable");
        }

        println!("- {} ({})", definition.label, definition.key);
        println!("    {}", definition.description);
        if transitions.is_empty() {
            println!("    next: terminal");
        } else {
            println!("    next: {}", transitions.join(", "));
        }
        if !capabilities.is_empty() {
            println!("    capabilities: {}", capabilities.join(", "));
        }
    }
    Ok(())
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs {
        student_name,
        year_group,
        assessment_date,
        fee,
        stop_at,
    } = args;

    let payments = Arc::new(InMemoryPaymentInitiator::default());
    let documents = Arc::new(InMemoryDocumentGenerator::default());
    let service: DemoService = AdmissionService::new(
        Arc::new(StageGraph::try_standard()?),
        Arc::new(InMemoryApplicationRepository::default()),
        payments.clone(),
        documents.clone(),
        &WorkflowConfig::default(),
    );

    let assessment_date =
        assessment_date.unwrap_or_else(|| Local::now().date_naive() + Duration::days(14));

    println!("Admissions workflow demo");
    let record = service.submit(ApplicantDetails {
        student_name,
        year_group,
        date_of_birth: None,
        guardian_name: None,
        guardian_email: None,
        previous_school: None,
    })?;
    println!(
        "Submitted {} for {} ({})",
        record.application_number(),
        record.details().student_name,
        record.details().year_group
    );

    let record = walk_application(&service, record, assessment_date, fee, stop_at)?;

    println!(
        "\nFinal stage: {} after {} audit entries",
        record.current_stage().label(),
        record.audit_trail().len()
    );
    println!("\nAudit trail");
    for entry in record.audit_trail().iter() {
        println!(
            "  {} {} -> {} by {}{}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            entry.from_stage,
            entry.to_stage,
            entry.actor,
            entry
                .notes
                .as_ref()
                .map(|notes| format!(" [{notes}]"))
                .unwrap_or_default()
        );
    }

    let initiated = payments.initiated();
    if initiated.is_empty() {
        println!("\nPayments: none initiated");
    } else {
        println!("\nPayments");
        for (reference, instruction) in initiated {
            println!(
                "  {reference}: {} via {}",
                instruction.amount, instruction.method
            );
        }
    }

    let letters = documents.letters();
    if letters.is_empty() {
        println!("Offer letters: none generated");
    } else {
        println!("Offer letters");
        for reference in letters {
            println!("  {reference}");
        }
    }

    Ok(())
}

fn walk_application(
    service: &DemoService,
    record: ApplicationRecord,
    assessment_date: NaiveDate,
    fee: u64,
    stop_at: Option<Stage>,
) -> Result<ApplicationRecord, AppError> {
    let id = record.id().clone();
    let reached = |record: &ApplicationRecord| stop_at == Some(record.current_stage());
    if reached(&record) {
        return Ok(record);
    }

    let record = service.transition(
        &id,
        Stage::UnderReview,
        Some("documents verified".to_string()),
        DEMO_ACTOR,
    )?;
    if reached(&record) {
        return Ok(record);
    }

    let record = service
        .schedule_assessment(
            &id,
            AssessmentRequest {
                assessment_type: Some("Entrance interview".to_string()),
                date: Some(assessment_date.format("%Y-%m-%d").to_string()),
                notes: None,
            },
            DEMO_ACTOR,
        )?
        .record;
    if reached(&record) {
        return Ok(record);
    }

    for stage in [Stage::AssessmentComplete, Stage::Approved] {
        let record = service.transition(&id, stage, None, DEMO_ACTOR)?;
        if reached(&record) {
            return Ok(record);
        }
    }

    service.generate_offer_letter(&id, DEMO_ACTOR)?;
    let record = service.transition(&id, Stage::FeePayment, None, DEMO_ACTOR)?;
    if reached(&record) {
        return Ok(record);
    }

    service.initiate_payment(
        &id,
        PaymentRequest {
            amount: fee,
            method: "bank_transfer".to_string(),
        },
        DEMO_ACTOR,
    )?;

    let record = service.transition(
        &id,
        Stage::Confirmed,
        Some("fee received".to_string()),
        DEMO_ACTOR,
    )?;
    if reached(&record) {
        return Ok(record);
    }

    Ok(service.transition(&id, Stage::Enrolled, None, DEMO_ACTOR)?)
}
