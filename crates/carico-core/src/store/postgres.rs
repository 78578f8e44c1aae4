//! PostgreSQL implementation of the store traits on top of
//! [`carico_db::queries`].

use std::collections::BTreeSet;

use anyhow::Context;
use async_trait::async_trait;
use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use tracing::debug;

use carico_db::models::CourseRow;
use carico_db::queries::study_plan::InsertOutcome;
use carico_db::queries::{courses as course_db, students as student_db, study_plan as plan_db};

use super::{MutationLock, PlanStore, PlanWriter, StoreError};
use crate::catalog::{CatalogView, Course, CourseId};
use crate::{PlanType, StudentId};

/// Store backed by a connection pool.
#[derive(Debug, Clone)]
pub struct PgPlanStore {
    pool: PgPool,
}

impl PgPlanStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn course_from_row(row: CourseRow) -> anyhow::Result<Course> {
    let id = CourseId::parse(&row.id).with_context(|| format!("bad course id {:?}", row.id))?;
    let prerequisite = row
        .preparatory
        .as_deref()
        .map(CourseId::parse)
        .transpose()
        .with_context(|| format!("bad prerequisite on course {id}"))?;
    let incompatibilities = row
        .incompatibilities
        .iter()
        .map(|other| CourseId::parse(other))
        .collect::<Result<BTreeSet<_>, _>>()
        .with_context(|| format!("bad incompatibility on course {id}"))?;

    Ok(Course {
        cfu: u32::try_from(row.cfu).with_context(|| format!("negative CFU on course {id}"))?,
        capacity: row
            .max_students
            .map(u32::try_from)
            .transpose()
            .with_context(|| format!("negative capacity on course {id}"))?,
        signed_up: u32::try_from(row.signed_up)
            .with_context(|| format!("enrollment count out of range on course {id}"))?,
        name: row.name,
        id,
        prerequisite,
        incompatibilities,
    })
}

fn parse_plan(rows: Vec<String>) -> Result<BTreeSet<CourseId>, StoreError> {
    rows.iter()
        .map(|id| CourseId::parse(id).with_context(|| format!("bad course id {id:?} in plan")))
        .collect::<anyhow::Result<_>>()
        .map_err(StoreError::from)
}

#[async_trait]
impl CatalogView for PgPlanStore {
    async fn get_course(&self, id: &CourseId) -> Result<Option<Course>, StoreError> {
        let row = course_db::get_course(&self.pool, id.as_str()).await?;
        Ok(row.map(course_from_row).transpose()?)
    }

    async fn list_courses(&self) -> Result<Vec<Course>, StoreError> {
        let rows = course_db::list_courses(&self.pool).await?;
        let courses = rows
            .into_iter()
            .map(course_from_row)
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(courses)
    }

    async fn get_plan(&self, student: StudentId) -> Result<BTreeSet<CourseId>, StoreError> {
        parse_plan(plan_db::get_plan(&self.pool, student).await?)
    }
}

#[async_trait]
impl PlanStore for PgPlanStore {
    async fn lock_student_mutation(
        &self,
        student: StudentId,
    ) -> Result<Box<dyn MutationLock>, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("failed to begin lock transaction")?;
        student_db::lock_plan_mutation(&mut tx, student).await?;
        debug!(student_id = student, "plan mutation lock taken");
        Ok(Box::new(PgMutationLock { tx, student }))
    }

    async fn get_plan_type(&self, student: StudentId) -> Result<Option<PlanType>, StoreError> {
        let row = student_db::get_student(&self.pool, student)
            .await?
            .ok_or(StoreError::StudentNotFound(student))?;
        Ok(row.plan_type)
    }

    async fn set_plan_type(
        &self,
        student: StudentId,
        plan_type: Option<PlanType>,
    ) -> Result<Option<PlanType>, StoreError> {
        let rows = student_db::set_plan_type(&self.pool, student, plan_type).await?;
        if rows == 0 {
            return Err(StoreError::StudentNotFound(student));
        }
        Ok(plan_type)
    }

    async fn begin(&self) -> Result<Box<dyn PlanWriter>, StoreError> {
        let tx = self
            .pool
            .begin()
            .await
            .context("failed to begin transaction")?;
        Ok(Box::new(PgPlanWriter { tx: Some(tx) }))
    }
}

/// Advisory lock held by an otherwise idle transaction. Ending the
/// transaction, or dropping it, releases the lock.
pub struct PgMutationLock {
    tx: Transaction<'static, Postgres>,
    student: StudentId,
}

#[async_trait]
impl MutationLock for PgMutationLock {
    async fn release(self: Box<Self>) -> Result<(), StoreError> {
        let PgMutationLock { tx, student } = *self;
        tx.rollback()
            .await
            .with_context(|| format!("failed to release plan mutation lock of student {student}"))?;
        Ok(())
    }
}

/// A write transaction. Dropping it before `commit` rolls back.
pub struct PgPlanWriter {
    tx: Option<Transaction<'static, Postgres>>,
}

impl PgPlanWriter {
    fn conn(&mut self) -> Result<&mut PgConnection, StoreError> {
        self.tx
            .as_deref_mut()
            .ok_or(StoreError::TransactionFinished)
    }
}

#[async_trait]
impl PlanWriter for PgPlanWriter {
    async fn lock_student(&mut self, student: StudentId) -> Result<Option<PlanType>, StoreError> {
        student_db::lock_student(self.conn()?, student)
            .await?
            .ok_or(StoreError::StudentNotFound(student))
    }

    async fn lock_courses(&mut self, courses: &[CourseId]) -> Result<(), StoreError> {
        let ids: Vec<String> = courses.iter().map(|c| c.as_str().to_owned()).collect();
        let locked = course_db::lock_courses(self.conn()?, &ids).await?;
        debug!(requested = ids.len(), locked = locked.len(), "course rows locked");
        Ok(())
    }

    async fn erase_plan(&mut self, student: StudentId) -> Result<(), StoreError> {
        let removed = plan_db::erase_plan(self.conn()?, student).await?;
        debug!(student_id = student, removed, "erased stored plan rows");
        Ok(())
    }

    async fn insert_course(
        &mut self,
        student: StudentId,
        course: &CourseId,
    ) -> Result<(), StoreError> {
        match plan_db::insert_course_checked(self.conn()?, student, course.as_str()).await? {
            InsertOutcome::Inserted => Ok(()),
            InsertOutcome::CourseFull { capacity, enrolled } => {
                debug!(
                    student_id = student,
                    course_id = %course,
                    capacity,
                    enrolled,
                    "course filled up before commit"
                );
                Err(StoreError::CourseFull(course.clone()))
            }
            InsertOutcome::UnknownCourse => Err(StoreError::UnknownCourse(course.clone())),
        }
    }

    async fn set_plan_type(
        &mut self,
        student: StudentId,
        plan_type: Option<PlanType>,
    ) -> Result<(), StoreError> {
        let rows = student_db::set_plan_type(self.conn()?, student, plan_type).await?;
        if rows == 0 {
            return Err(StoreError::StudentNotFound(student));
        }
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        let tx = self.tx.take().ok_or(StoreError::TransactionFinished)?;
        tx.commit().await.context("failed to commit transaction")?;
        Ok(())
    }
}
