//! Repository interfaces consumed by the engine.
//!
//! ```text
//! CatalogView   get_course / list_courses / get_plan
//!     ^
//!     |
//! PlanStore     lock_student_mutation / get_plan_type / set_plan_type / begin
//!                     |                                                  |
//!                     v                                                  v
//! MutationLock  release     PlanWriter  lock_student / lock_courses / erase_plan
//!                                       / insert_course / set_plan_type / commit
//! ```
//!
//! A [`PlanWriter`] is one scoped transaction: nothing it stages is visible
//! until `commit`, and dropping it without committing discards everything.
//!
//! A [`MutationLock`] spans a whole plan mutation, including the writes made
//! outside any writer. Every process sharing the store must take it before
//! changing a student's plan type or courses.

pub mod postgres;

use async_trait::async_trait;
use thiserror::Error;

use crate::catalog::{CatalogView, CourseId};
use crate::{PlanType, StudentId};

pub use postgres::PgPlanStore;

/// Failures reported by a store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("student {0} not found")]
    StudentNotFound(StudentId),

    #[error("course {0} not found")]
    UnknownCourse(CourseId),

    /// Raised when a capacity-checked insert finds no free seat.
    #[error("course {0} has no free seats")]
    CourseFull(CourseId),

    #[error("transaction already finished")]
    TransactionFinished,

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Exclusive right to mutate one student's plan.
#[async_trait]
pub trait MutationLock: Send {
    /// Give the lock back. Dropping it releases it too, though possibly
    /// later.
    async fn release(self: Box<Self>) -> Result<(), StoreError>;
}

/// Read/write access to students' plans.
#[async_trait]
pub trait PlanStore: CatalogView {
    /// Wait until no other mutation of `student`'s plan is running, in this
    /// process or any other sharing the store.
    async fn lock_student_mutation(
        &self,
        student: StudentId,
    ) -> Result<Box<dyn MutationLock>, StoreError>;

    /// The student's current plan type (`None` when they hold no plan).
    async fn get_plan_type(&self, student: StudentId) -> Result<Option<PlanType>, StoreError>;

    /// Overwrite the student's plan type outside any transaction. Returns
    /// the value written.
    async fn set_plan_type(
        &self,
        student: StudentId,
        plan_type: Option<PlanType>,
    ) -> Result<Option<PlanType>, StoreError>;

    /// Open a write transaction.
    async fn begin(&self) -> Result<Box<dyn PlanWriter>, StoreError>;
}

/// One write transaction against the plan store.
#[async_trait]
pub trait PlanWriter: Send {
    /// Serialize against other writers for the same student. Returns the
    /// plan type as seen inside the transaction.
    async fn lock_student(&mut self, student: StudentId) -> Result<Option<PlanType>, StoreError>;

    /// Lock the capacity of every listed course, in id order, before any
    /// insert. Unknown ids are skipped; `insert_course` reports them.
    async fn lock_courses(&mut self, courses: &[CourseId]) -> Result<(), StoreError>;

    /// Remove every course from the student's plan.
    async fn erase_plan(&mut self, student: StudentId) -> Result<(), StoreError>;

    /// Add one course, re-checking its capacity against committed seats.
    async fn insert_course(&mut self, student: StudentId, course: &CourseId)
    -> Result<(), StoreError>;

    async fn set_plan_type(
        &mut self,
        student: StudentId,
        plan_type: Option<PlanType>,
    ) -> Result<(), StoreError>;

    /// Make every staged change visible. Any later call fails with
    /// [`StoreError::TransactionFinished`].
    async fn commit(&mut self) -> Result<(), StoreError>;
}

// Compile-time assertion: both traits are usable as trait objects.
const _: () = {
    fn _assert_object_safe(_: &dyn PlanStore, _: &dyn PlanWriter, _: &dyn MutationLock) {}
};
