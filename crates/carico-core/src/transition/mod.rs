//! Plan replacement inside one store transaction.
//!
//! [`replace_plan`] erases the stored plan and inserts the proposed courses
//! one at a time, in input order, stopping at the first failure. Every step
//! runs on the same [`PlanWriter`], so a failure anywhere leaves the previous
//! plan untouched: the writer is dropped without committing.

use std::fmt;

use thiserror::Error;
use tracing::debug;

use crate::StudentId;
use crate::catalog::CourseId;
use crate::store::{PlanStore, PlanWriter, StoreError};

/// The step of a transition that failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionStep {
    Begin,
    LockStudent,
    LockCourses,
    Erase,
    /// Insertion of the `index`-th proposed course (zero based).
    Insert {
        index: usize,
        course: CourseId,
    },
    ClearType,
    Commit,
}

impl fmt::Display for TransitionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Begin => f.write_str("begin"),
            Self::LockStudent => f.write_str("lock student"),
            Self::LockCourses => f.write_str("lock courses"),
            Self::Erase => f.write_str("erase plan"),
            Self::Insert { index, course } => {
                write!(f, "insert course {course} (position {})", index + 1)
            }
            Self::ClearType => f.write_str("clear plan type"),
            Self::Commit => f.write_str("commit"),
        }
    }
}

/// A transition failure: which step and why.
#[derive(Debug, Error)]
#[error("plan transition failed at {step}")]
pub struct TransitionError {
    pub step: TransitionStep,
    #[source]
    pub source: StoreError,
}

fn at(step: TransitionStep) -> impl FnOnce(StoreError) -> TransitionError {
    move |source| TransitionError { step, source }
}

async fn open_for(
    store: &dyn PlanStore,
    student: StudentId,
) -> Result<Box<dyn PlanWriter>, TransitionError> {
    let mut writer = store.begin().await.map_err(at(TransitionStep::Begin))?;
    writer
        .lock_student(student)
        .await
        .map_err(at(TransitionStep::LockStudent))?;
    Ok(writer)
}

/// Atomically replace the student's stored courses with `proposed`.
///
/// Validation is the caller's job; the store still re-checks capacity per
/// insert. Course locks are all taken up front in id order, so concurrent
/// replacements with overlapping courses queue instead of deadlocking.
pub async fn replace_plan(
    store: &dyn PlanStore,
    student: StudentId,
    proposed: &[CourseId],
) -> Result<(), TransitionError> {
    let mut writer = open_for(store, student).await?;

    writer
        .lock_courses(proposed)
        .await
        .map_err(at(TransitionStep::LockCourses))?;
    writer
        .erase_plan(student)
        .await
        .map_err(at(TransitionStep::Erase))?;

    for (index, course) in proposed.iter().enumerate() {
        writer
            .insert_course(student, course)
            .await
            .map_err(at(TransitionStep::Insert {
                index,
                course: course.clone(),
            }))?;
    }

    writer.commit().await.map_err(at(TransitionStep::Commit))?;

    debug!(
        student_id = student,
        courses = proposed.len(),
        "stored plan replaced"
    );
    Ok(())
}

/// Atomically remove every course and clear the plan type.
pub async fn clear_plan(store: &dyn PlanStore, student: StudentId) -> Result<(), TransitionError> {
    let mut writer = open_for(store, student).await?;

    writer
        .erase_plan(student)
        .await
        .map_err(at(TransitionStep::Erase))?;
    writer
        .set_plan_type(student, None)
        .await
        .map_err(at(TransitionStep::ClearType))?;
    writer.commit().await.map_err(at(TransitionStep::Commit))?;

    debug!(student_id = student, "stored plan cleared");
    Ok(())
}
