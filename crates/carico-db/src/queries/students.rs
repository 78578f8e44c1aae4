//! Database query functions for the `students` table.

use anyhow::{Context, Result};
use sqlx::postgres::PgExecutor;
use sqlx::{PgConnection, PgPool};

use crate::models::{PlanType, Student, StudentId};

/// Insert a new student without a study plan.
pub async fn insert_student(
    pool: &PgPool,
    email: &str,
    name: &str,
    surname: &str,
) -> Result<Student> {
    let student = sqlx::query_as::<_, Student>(
        "INSERT INTO students (email, name, surname) \
         VALUES ($1, $2, $3) \
         RETURNING *",
    )
    .bind(email)
    .bind(name)
    .bind(surname)
    .fetch_one(pool)
    .await
    .with_context(|| format!("failed to insert student {email}"))?;

    Ok(student)
}

/// Fetch a student by ID.
pub async fn get_student<'e, E>(executor: E, id: StudentId) -> Result<Option<Student>>
where
    E: PgExecutor<'e>,
{
    let student = sqlx::query_as::<_, Student>("SELECT * FROM students WHERE id = $1")
        .bind(id)
        .fetch_optional(executor)
        .await
        .context("failed to fetch student")?;

    Ok(student)
}

/// List all students, ordered by ID.
pub async fn list_students(pool: &PgPool) -> Result<Vec<Student>> {
    let students = sqlx::query_as::<_, Student>("SELECT * FROM students ORDER BY id")
        .fetch_all(pool)
        .await
        .context("failed to list students")?;

    Ok(students)
}

/// Set (or clear, with `None`) the plan type of a student.
///
/// Returns the number of rows affected; 0 means the student does not exist.
pub async fn set_plan_type<'e, E>(
    executor: E,
    id: StudentId,
    plan_type: Option<PlanType>,
) -> Result<u64>
where
    E: PgExecutor<'e>,
{
    let result = sqlx::query("UPDATE students SET plan_type = $1 WHERE id = $2")
        .bind(plan_type)
        .bind(id)
        .execute(executor)
        .await
        .context("failed to update plan type")?;

    Ok(result.rows_affected())
}

/// Take the transaction-scoped advisory lock that serializes plan
/// mutations of one student across connections. Blocks until granted; the
/// lock is released when the transaction ends.
///
/// Does not touch the row, so it also works for ids that do not exist.
pub async fn lock_plan_mutation(conn: &mut PgConnection, id: StudentId) -> Result<()> {
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(id)
        .execute(conn)
        .await
        .with_context(|| format!("failed to take plan mutation lock for student {id}"))?;

    Ok(())
}

/// Lock a student row for the rest of the transaction and return its
/// current plan type. Returns `None` when the student does not exist.
pub async fn lock_student(
    conn: &mut PgConnection,
    id: StudentId,
) -> Result<Option<Option<PlanType>>> {
    let row: Option<(Option<PlanType>,)> =
        sqlx::query_as("SELECT plan_type FROM students WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(conn)
            .await
            .with_context(|| format!("failed to lock student {id}"))?;

    Ok(row.map(|(plan_type,)| plan_type))
}
