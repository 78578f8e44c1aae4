//! `carico plan` subcommands.
//!
//! - `carico plan show <student>`                      -- stored plan and CFU total
//! - `carico plan type <student> <type>`               -- choose or switch the plan type
//! - `carico plan check --type T [--student S] <ids>`  -- dry-run validation
//! - `carico plan propose <student> --type T <ids>`    -- validate and store
//! - `carico plan erase <student>`                     -- drop courses and type

use std::sync::Arc;

use anyhow::{Result, bail};
use sqlx::PgPool;

use carico_core::catalog::CourseId;
use carico_core::service::{PlanService, PlanSummary};
use carico_core::store::PgPlanStore;
use carico_core::validator::{PlanRules, Verdict};
use carico_core::{PlanError, PlanType, StudentId};

use crate::PlanCommands;

pub async fn run_plan_command(command: PlanCommands, pool: &PgPool, rules: PlanRules) -> Result<()> {
    let service = PlanService::new(Arc::new(PgPlanStore::new(pool.clone())), rules);
    match command {
        PlanCommands::Show { student, json } => cmd_show(&service, student, json).await,
        PlanCommands::Type { student, plan_type } => cmd_type(&service, student, plan_type).await,
        PlanCommands::Check {
            plan_type,
            student,
            courses,
        } => cmd_check(&service, student, plan_type, &courses).await,
        PlanCommands::Propose {
            student,
            plan_type,
            courses,
        } => cmd_propose(&service, student, plan_type, &courses).await,
        PlanCommands::Erase { student } => cmd_erase(&service, student).await,
    }
}

/// Turn a rejection into a one-line user error; pass everything else on.
fn explain(err: PlanError) -> anyhow::Error {
    match err.rejection() {
        Some(rejection) => anyhow::anyhow!("study plan rejected: {rejection}"),
        None => err.into(),
    }
}

/// [`explain`] for a proposal of `proposed` courses, naming where the
/// rejection stopped it.
fn explain_proposal(err: PlanError, proposed: usize) -> anyhow::Error {
    match (err.rejection(), err.examined()) {
        (Some(rejection), Some(examined)) if examined > 0 => anyhow::anyhow!(
            "study plan rejected: {rejection} (stopped after {examined} of {proposed} courses)"
        ),
        _ => explain(err),
    }
}

// -----------------------------------------------------------------------
// carico plan show
// -----------------------------------------------------------------------

async fn cmd_show(service: &PlanService, student: StudentId, json: bool) -> Result<()> {
    let summary = service.summary(student).await.map_err(explain)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    print_summary(&summary);
    Ok(())
}

fn print_summary(summary: &PlanSummary) {
    let Some(plan_type) = summary.plan_type else {
        println!("Student {} has no study plan.", summary.student_id);
        return;
    };

    println!("Study plan of student {}", summary.student_id);
    println!("  Type: {plan_type}");
    match summary.bounds {
        Some(bounds) => println!("  CFU:  {} (allowed {bounds})", summary.cfu_total),
        None => println!("  CFU:  {}", summary.cfu_total),
    }

    if summary.courses.is_empty() {
        println!("  No courses.");
        return;
    }

    println!();
    let name_w = summary
        .courses
        .iter()
        .map(|c| c.name.len())
        .max()
        .unwrap_or(4)
        .max(4);
    println!("  {:<7}  {:<name_w$}  {:>3}", "ID", "NAME", "CFU");
    for course in &summary.courses {
        println!("  {:<7}  {:<name_w$}  {:>3}", course.id, course.name, course.cfu);
    }
}

// -----------------------------------------------------------------------
// carico plan type
// -----------------------------------------------------------------------

async fn cmd_type(service: &PlanService, student: StudentId, plan_type: PlanType) -> Result<()> {
    let chosen = service
        .choose_plan_type(student, plan_type)
        .await
        .map_err(explain)?;
    println!("Student {student} now holds a {chosen} plan.");
    Ok(())
}

// -----------------------------------------------------------------------
// carico plan check
// -----------------------------------------------------------------------

fn describe(verdict: &Verdict, proposed: usize) -> String {
    match verdict {
        Ok(accepted) => format!("legal plan: {} CFU", accepted.cfu_total),
        Err(rejected) => format!(
            "illegal plan: {} (stopped after {} of {proposed} courses)",
            rejected.reason, rejected.examined
        ),
    }
}

async fn cmd_check(
    service: &PlanService,
    student: Option<StudentId>,
    plan_type: PlanType,
    courses: &[CourseId],
) -> Result<()> {
    let verdict = service
        .check_plan(student, plan_type, courses)
        .await
        .map_err(explain)?;

    let line = describe(&verdict, courses.len());
    if verdict.is_err() {
        bail!(line);
    }
    println!("{line}");
    Ok(())
}

// -----------------------------------------------------------------------
// carico plan propose
// -----------------------------------------------------------------------

async fn cmd_propose(
    service: &PlanService,
    student: StudentId,
    plan_type: PlanType,
    courses: &[CourseId],
) -> Result<()> {
    let accepted = service
        .propose_plan(student, plan_type, courses)
        .await
        .map_err(|e| explain_proposal(e, courses.len()))?;

    println!(
        "Study plan stored for student {student}: {} courses, {} CFU ({plan_type}).",
        courses.len(),
        accepted.cfu_total
    );
    Ok(())
}

// -----------------------------------------------------------------------
// carico plan erase
// -----------------------------------------------------------------------

async fn cmd_erase(service: &PlanService, student: StudentId) -> Result<()> {
    service.erase_plan_entirely(student).await.map_err(explain)?;
    println!("Study plan of student {student} erased.");
    Ok(())
}
