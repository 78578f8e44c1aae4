//! Load a parsed catalog into the database.

use anyhow::{Context, Result};
use sqlx::PgPool;
use tracing::info;

use carico_db::models::NewCourse;
use carico_db::queries::courses as course_queries;

use super::Course;

/// Insert every course and incompatibility inside a single transaction.
///
/// If any course already exists the whole import is rolled back. Returns the
/// number of courses inserted.
pub async fn import_catalog(pool: &PgPool, courses: &[Course]) -> Result<usize> {
    let mut tx = pool.begin().await.context("failed to begin transaction")?;

    for course in courses {
        let cfu = i32::try_from(course.cfu)
            .with_context(|| format!("course {} has too many CFU", course.id))?;
        let max_students = course
            .capacity
            .map(i32::try_from)
            .transpose()
            .with_context(|| format!("course {} has too large a capacity", course.id))?;

        course_queries::insert_course(
            &mut tx,
            &NewCourse {
                id: course.id.as_str(),
                name: &course.name,
                cfu,
                max_students,
                preparatory: course.prerequisite.as_ref().map(|p| p.as_str()),
            },
        )
        .await?;
    }

    // The relation is symmetric; store each pair once.
    for course in courses {
        for other in course.incompatibilities.iter().filter(|o| course.id < **o) {
            course_queries::insert_incompatibility(&mut tx, course.id.as_str(), other.as_str())
                .await?;
        }
    }

    tx.commit().await.context("failed to commit catalog import")?;

    info!(courses = courses.len(), "catalog imported");
    Ok(courses.len())
}
