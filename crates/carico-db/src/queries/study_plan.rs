//! Database query functions for the `study_plan` association table.

use anyhow::{Context, Result};
use sqlx::postgres::PgExecutor;
use sqlx::PgConnection;

use crate::models::StudentId;
use crate::queries::courses;

/// Outcome of a capacity-checked insertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// The course has no free seat left for this student.
    CourseFull { capacity: i32, enrolled: i64 },
    /// The course does not exist (anymore).
    UnknownCourse,
}

/// Return the course IDs in a student's stored plan, ordered by ID.
pub async fn get_plan<'e, E>(executor: E, student_id: StudentId) -> Result<Vec<String>>
where
    E: PgExecutor<'e>,
{
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT course_id FROM study_plan WHERE student_id = $1 ORDER BY course_id",
    )
    .bind(student_id)
    .fetch_all(executor)
    .await
    .context("failed to fetch study plan")?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// Remove every course from a student's stored plan. Returns the number of
/// rows deleted.
pub async fn erase_plan<'e, E>(executor: E, student_id: StudentId) -> Result<u64>
where
    E: PgExecutor<'e>,
{
    let result = sqlx::query("DELETE FROM study_plan WHERE student_id = $1")
        .bind(student_id)
        .execute(executor)
        .await
        .context("failed to erase study plan")?;

    Ok(result.rows_affected())
}

/// Insert one course into a student's plan without any capacity check.
pub async fn insert_course<'e, E>(executor: E, student_id: StudentId, course_id: &str) -> Result<()>
where
    E: PgExecutor<'e>,
{
    sqlx::query("INSERT INTO study_plan (student_id, course_id) VALUES ($1, $2)")
        .bind(student_id)
        .bind(course_id)
        .execute(executor)
        .await
        .with_context(|| format!("failed to insert course {course_id} into study plan"))?;

    Ok(())
}

/// Insert one course into a student's plan, re-checking capacity under a
/// row lock on the course.
///
/// Concurrent transactions inserting the same course serialize on the lock,
/// so the count read here includes every committed seat. The student's own
/// row is excluded from the count.
pub async fn insert_course_checked(
    conn: &mut PgConnection,
    student_id: StudentId,
    course_id: &str,
) -> Result<InsertOutcome> {
    let Some(capacity) = courses::lock_course_capacity(&mut *conn, course_id).await? else {
        return Ok(InsertOutcome::UnknownCourse);
    };

    if let Some(capacity) = capacity {
        let (enrolled,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM study_plan WHERE course_id = $1 AND student_id <> $2",
        )
        .bind(course_id)
        .bind(student_id)
        .fetch_one(&mut *conn)
        .await
        .with_context(|| format!("failed to count enrollment for course {course_id}"))?;

        if enrolled + 1 > i64::from(capacity) {
            return Ok(InsertOutcome::CourseFull { capacity, enrolled });
        }
    }

    insert_course(&mut *conn, student_id, course_id).await?;
    Ok(InsertOutcome::Inserted)
}
