//! Database query functions for the `courses` and
//! `course_incompatibilities` tables.

use anyhow::{Context, Result};
use sqlx::postgres::PgExecutor;
use sqlx::{PgConnection, PgPool};

use crate::models::{CourseRow, NewCourse};

/// Shared projection: every course with its enrollment count and the
/// incompatibility relation read in both directions.
const COURSE_SELECT: &str = "\
    SELECT c.id, c.name, c.cfu, c.max_students, \
           COALESCE(p.signed_up, 0) AS signed_up, \
           c.preparatory, \
           ARRAY( \
               SELECT ci.incompatible_with FROM course_incompatibilities ci \
                WHERE ci.course_id = c.id \
               UNION \
               SELECT ci.course_id FROM course_incompatibilities ci \
                WHERE ci.incompatible_with = c.id \
               ORDER BY 1 \
           ) AS incompatibilities \
    FROM courses c \
    LEFT OUTER JOIN ( \
        SELECT course_id, COUNT(*) AS signed_up FROM study_plan GROUP BY course_id \
    ) p ON p.course_id = c.id";

/// List every course in the catalog, ordered by name.
pub async fn list_courses(pool: &PgPool) -> Result<Vec<CourseRow>> {
    let query = format!("{COURSE_SELECT} ORDER BY c.name, c.id");
    let courses = sqlx::query_as::<_, CourseRow>(&query)
        .fetch_all(pool)
        .await
        .context("failed to list courses")?;

    Ok(courses)
}

/// Fetch a single course by its identifier.
pub async fn get_course<'e, E>(executor: E, id: &str) -> Result<Option<CourseRow>>
where
    E: PgExecutor<'e>,
{
    let query = format!("{COURSE_SELECT} WHERE c.id = $1");
    let course = sqlx::query_as::<_, CourseRow>(&query)
        .bind(id)
        .fetch_optional(executor)
        .await
        .with_context(|| format!("failed to fetch course {id}"))?;

    Ok(course)
}

/// Insert a catalog course. The prerequisite foreign key is deferred, so
/// courses may be inserted in any order inside one transaction.
pub async fn insert_course(conn: &mut PgConnection, course: &NewCourse<'_>) -> Result<()> {
    sqlx::query(
        "INSERT INTO courses (id, name, cfu, max_students, preparatory) \
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(course.id)
    .bind(course.name)
    .bind(course.cfu)
    .bind(course.max_students)
    .bind(course.preparatory)
    .execute(conn)
    .await
    .with_context(|| format!("failed to insert course {}", course.id))?;

    Ok(())
}

/// Record that two courses cannot appear in the same plan.
///
/// Uses `ON CONFLICT DO NOTHING` so this is idempotent.
pub async fn insert_incompatibility(
    conn: &mut PgConnection,
    course_id: &str,
    incompatible_with: &str,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO course_incompatibilities (course_id, incompatible_with) \
         VALUES ($1, $2) ON CONFLICT DO NOTHING",
    )
    .bind(course_id)
    .bind(incompatible_with)
    .execute(conn)
    .await
    .with_context(|| {
        format!("failed to record incompatibility {course_id} <-> {incompatible_with}")
    })?;

    Ok(())
}

/// Lock a course row for the rest of the transaction and return its
/// capacity.
///
/// Returns `None` when the course does not exist, `Some(None)` when it has
/// no capacity limit.
pub async fn lock_course_capacity(
    conn: &mut PgConnection,
    course_id: &str,
) -> Result<Option<Option<i32>>> {
    let row: Option<(Option<i32>,)> =
        sqlx::query_as("SELECT max_students FROM courses WHERE id = $1 FOR UPDATE")
            .bind(course_id)
            .fetch_optional(conn)
            .await
            .with_context(|| format!("failed to lock course {course_id}"))?;

    Ok(row.map(|(capacity,)| capacity))
}

/// Lock every listed course row in id order and return the ids that exist.
///
/// Transactions that lock overlapping sets of courses this way cannot
/// deadlock on each other.
pub async fn lock_courses(conn: &mut PgConnection, course_ids: &[String]) -> Result<Vec<String>> {
    let rows: Vec<(String,)> =
        sqlx::query_as("SELECT id FROM courses WHERE id = ANY($1) ORDER BY id FOR UPDATE")
            .bind(course_ids)
            .fetch_all(conn)
            .await
            .context("failed to lock courses")?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
}
