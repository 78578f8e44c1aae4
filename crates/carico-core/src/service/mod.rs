//! Plan service layer.
//!
//! Entry points the transport layer calls. Every mutation for a student runs
//! under two locks: [`StudentLocks`] queues callers of this service without
//! holding store resources, then the store's mutation lock excludes every
//! other process for the whole mutation, compensation included.
//!
//! `propose_plan` runs the full saga: tentative plan type, validation
//! against a fresh catalog snapshot and the stored plan, atomic replacement,
//! compensation on failure.

pub mod locks;

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::catalog::{Course, CourseId};
use crate::error::PlanError;
use crate::saga::PlanMutation;
use crate::store::{MutationLock, PlanStore};
use crate::transition;
use crate::validator::{Accepted, CfuBounds, PlanRules, PlanValidator, Rejection, Verdict};
use crate::{PlanType, StudentId};

pub use locks::{StudentGuard, StudentLocks};

/// A student's stored plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StudyPlan {
    pub plan_type: Option<PlanType>,
    pub courses: BTreeSet<CourseId>,
}

impl StudyPlan {
    /// A plan without a type holds no courses.
    pub fn is_consistent(&self) -> bool {
        self.plan_type.is_some() || self.courses.is_empty()
    }
}

/// A stored plan resolved against the catalog.
#[derive(Debug, Clone, Serialize)]
pub struct PlanSummary {
    pub student_id: StudentId,
    pub plan_type: Option<PlanType>,
    pub courses: Vec<Course>,
    pub cfu_total: u32,
    pub bounds: Option<CfuBounds>,
}

/// Facade over a [`PlanStore`].
pub struct PlanService {
    store: Arc<dyn PlanStore>,
    rules: PlanRules,
    locks: StudentLocks,
}

impl PlanService {
    pub fn new(store: Arc<dyn PlanStore>, rules: PlanRules) -> Self {
        Self {
            store,
            rules,
            locks: StudentLocks::new(),
        }
    }

    pub fn rules(&self) -> &PlanRules {
        &self.rules
    }

    pub fn store(&self) -> &dyn PlanStore {
        self.store.as_ref()
    }

    async fn lock_student(
        &self,
        student: StudentId,
    ) -> Result<(StudentGuard, Box<dyn MutationLock>), PlanError> {
        let guard = self.locks.acquire(student).await;
        let lock = self
            .store
            .lock_student_mutation(student)
            .await
            .map_err(|e| PlanError::from_store("lock student plan", e))?;
        Ok((guard, lock))
    }

    /// The outcome of the mutation is already decided; a failed release only
    /// delays the next mutation until the store drops the lock.
    async fn unlock_student(&self, student: StudentId, lock: Box<dyn MutationLock>) {
        if let Err(e) = lock.release().await {
            warn!(student_id = student, error = %e, "failed to release plan mutation lock");
        }
    }

    /// Validate `course_ids` as a plan of type `plan_type` and, if legal,
    /// make it the student's stored plan.
    ///
    /// On any failure after the plan type was tentatively changed, the
    /// previous type is restored before the error is returned.
    pub async fn propose_plan(
        &self,
        student: StudentId,
        plan_type: PlanType,
        course_ids: &[CourseId],
    ) -> Result<Accepted, PlanError> {
        let (_guard, lock) = self.lock_student(student).await?;
        let result = self.propose_locked(student, plan_type, course_ids).await;
        self.unlock_student(student, lock).await;
        result
    }

    async fn propose_locked(
        &self,
        student: StudentId,
        plan_type: PlanType,
        course_ids: &[CourseId],
    ) -> Result<Accepted, PlanError> {
        let mut mutation = PlanMutation::new(self.store.as_ref(), student);

        match self
            .run_proposal(&mut mutation, student, plan_type, course_ids)
            .await
        {
            Ok(accepted) => {
                mutation.mark_committed()?;
                info!(
                    student_id = student,
                    plan_type = %plan_type,
                    courses = course_ids.len(),
                    cfu_total = accepted.cfu_total,
                    "study plan committed"
                );
                Ok(accepted)
            }
            Err(err) => {
                let report = mutation.abort().await;
                warn!(
                    student_id = student,
                    plan_type = %plan_type,
                    state = %report.final_state,
                    compensation_failures = report.failures.len(),
                    error = %err,
                    "study plan proposal failed"
                );
                Err(err)
            }
        }
    }

    async fn run_proposal(
        &self,
        mutation: &mut PlanMutation<'_>,
        student: StudentId,
        plan_type: PlanType,
        course_ids: &[CourseId],
    ) -> Result<Accepted, PlanError> {
        if course_ids.is_empty() {
            return Err(Rejection::EmptyPlan.into());
        }

        let previous = self
            .store
            .get_plan_type(student)
            .await
            .map_err(|e| PlanError::from_store("read plan type", e))?;
        mutation.apply_type(previous, plan_type).await?;

        let catalog = self
            .store
            .snapshot()
            .await
            .map_err(|e| PlanError::from_store("read catalog", e))?;
        let current = self
            .store
            .get_plan(student)
            .await
            .map_err(|e| PlanError::from_store("read stored plan", e))?;

        let accepted =
            PlanValidator::new(&catalog, &self.rules).validate(course_ids, plan_type, &current)?;
        mutation.mark_validated()?;

        transition::replace_plan(self.store.as_ref(), student, course_ids).await?;
        Ok(accepted)
    }

    /// Clear the student's plan type and every stored course.
    pub async fn erase_plan_entirely(&self, student: StudentId) -> Result<(), PlanError> {
        let (_guard, lock) = self.lock_student(student).await?;
        let result = transition::clear_plan(self.store.as_ref(), student).await;
        self.unlock_student(student, lock).await;

        result?;
        info!(student_id = student, "study plan erased");
        Ok(())
    }

    /// Create the student's plan with the given type, or switch its type.
    ///
    /// Switching is refused when the stored courses do not fit the new
    /// type's CFU bounds.
    pub async fn choose_plan_type(
        &self,
        student: StudentId,
        plan_type: PlanType,
    ) -> Result<PlanType, PlanError> {
        let (_guard, lock) = self.lock_student(student).await?;
        let result = self.choose_type_locked(student, plan_type).await;
        self.unlock_student(student, lock).await;
        result
    }

    async fn choose_type_locked(
        &self,
        student: StudentId,
        plan_type: PlanType,
    ) -> Result<PlanType, PlanError> {
        let previous = self
            .store
            .get_plan_type(student)
            .await
            .map_err(|e| PlanError::from_store("read plan type", e))?;
        if previous == Some(plan_type) {
            return Ok(plan_type);
        }

        let current = self
            .store
            .get_plan(student)
            .await
            .map_err(|e| PlanError::from_store("read stored plan", e))?;
        if !current.is_empty() {
            let catalog = self
                .store
                .snapshot()
                .await
                .map_err(|e| PlanError::from_store("read catalog", e))?;
            let total = PlanValidator::new(&catalog, &self.rules).cfu_of(&current);
            let bounds = self.rules.bounds(plan_type);
            if !bounds.contains(total) {
                return Err(Rejection::CfuOutOfRange {
                    total,
                    min: bounds.min,
                    max: bounds.max,
                }
                .into());
            }
        }

        self.store
            .set_plan_type(student, Some(plan_type))
            .await
            .map_err(|e| PlanError::from_store("set plan type", e))?;

        info!(
            student_id = student,
            plan_type = %plan_type,
            previous = ?previous,
            "plan type chosen"
        );
        Ok(plan_type)
    }

    /// Validate a proposal without writing anything.
    ///
    /// With a student, their stored plan is used for capacity self-exclusion.
    /// The verdict is the answer; the outer error covers store failures and
    /// an empty proposal.
    pub async fn check_plan(
        &self,
        student: Option<StudentId>,
        plan_type: PlanType,
        course_ids: &[CourseId],
    ) -> Result<Verdict, PlanError> {
        if course_ids.is_empty() {
            return Err(Rejection::EmptyPlan.into());
        }

        let current = match student {
            Some(id) => {
                // Surfaces StudentNotFound for unknown ids.
                self.store
                    .get_plan_type(id)
                    .await
                    .map_err(|e| PlanError::from_store("read plan type", e))?;
                self.store
                    .get_plan(id)
                    .await
                    .map_err(|e| PlanError::from_store("read stored plan", e))?
            }
            None => BTreeSet::new(),
        };
        let catalog = self
            .store
            .snapshot()
            .await
            .map_err(|e| PlanError::from_store("read catalog", e))?;

        Ok(PlanValidator::new(&catalog, &self.rules).validate(course_ids, plan_type, &current))
    }

    /// The student's stored plan.
    pub async fn study_plan(&self, student: StudentId) -> Result<StudyPlan, PlanError> {
        let plan_type = self
            .store
            .get_plan_type(student)
            .await
            .map_err(|e| PlanError::from_store("read plan type", e))?;
        let courses = self
            .store
            .get_plan(student)
            .await
            .map_err(|e| PlanError::from_store("read stored plan", e))?;
        Ok(StudyPlan { plan_type, courses })
    }

    /// The student's stored plan with course details and CFU total.
    pub async fn summary(&self, student: StudentId) -> Result<PlanSummary, PlanError> {
        let plan = self.study_plan(student).await?;
        let catalog = self
            .store
            .list_courses()
            .await
            .map_err(|e| PlanError::from_store("read catalog", e))?;

        let courses: Vec<Course> = catalog
            .into_iter()
            .filter(|course| plan.courses.contains(&course.id))
            .collect();
        let cfu_total = courses.iter().map(|c| c.cfu).sum();

        Ok(PlanSummary {
            student_id: student,
            plan_type: plan.plan_type,
            courses,
            cfu_total,
            bounds: plan.plan_type.map(|t| self.rules.bounds(t)),
        })
    }

    /// Every catalog course with its live enrollment.
    pub async fn list_courses(&self) -> Result<Vec<Course>, PlanError> {
        self.store
            .list_courses()
            .await
            .map_err(|e| PlanError::from_store("list courses", e))
    }

    /// One catalog course.
    pub async fn course(&self, id: &CourseId) -> Result<Course, PlanError> {
        self.store
            .get_course(id)
            .await
            .map_err(|e| PlanError::from_store("read course", e))?
            .ok_or_else(|| Rejection::NotFound(id.clone()).into())
    }
}
