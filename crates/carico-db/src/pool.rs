//! Pool creation, database bootstrap, and the catalog overview printed by
//! `carico db-init`.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, FromRow, PgPool};
use tracing::info;

use crate::config::DbConfig;

/// Schema migrations, embedded from `crates/carico-db/migrations/`.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!();

/// A plan mutation holds one connection for its lock and one for its
/// writer, and reads through a third.
const MAX_CONNECTIONS: u32 = 5;

pub async fn create_pool(config: &DbConfig) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .acquire_timeout(Duration::from_secs(10))
        .connect(&config.database_url)
        .await
        .with_context(|| format!("failed to connect to {}", config.database_url))
}

pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    MIGRATOR
        .run(pool)
        .await
        .context("failed to migrate the carico schema")?;
    info!(migrations = MIGRATOR.iter().count(), "carico schema up to date");
    Ok(())
}

/// Create the configured database through the `postgres` maintenance
/// database unless it already exists.
pub async fn ensure_database_exists(config: &DbConfig) -> Result<()> {
    let db_name = config
        .database_name()
        .context("database URL names no database")?;
    // CREATE DATABASE takes no bind parameters.
    if !db_name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        bail!("refusing to create database {db_name:?}: only [A-Za-z0-9_] allowed");
    }

    let maintenance_url = config.maintenance_url();
    let maint = PgPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(10))
        .connect(&maintenance_url)
        .await
        .with_context(|| format!("failed to connect to {maintenance_url}"))?;

    let exists: bool =
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)")
            .bind(db_name)
            .fetch_one(&maint)
            .await
            .context("failed to look up database")?;

    if !exists {
        maint
            .execute(format!("CREATE DATABASE {db_name}").as_str())
            .await
            .with_context(|| format!("failed to create database {db_name}"))?;
        info!(db = db_name, "database created");
    }

    maint.close().await;
    Ok(())
}

/// What a carico database currently holds.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct CatalogOverview {
    pub courses: i64,
    /// Courses with a seat limit.
    pub capped_courses: i64,
    /// Capped courses with no seat left.
    pub full_courses: i64,
    /// Incompatible course pairs.
    pub incompatibilities: i64,
    pub students: i64,
    /// Students holding a plan type.
    pub students_with_plan: i64,
    /// Rows of the student/course association.
    pub enrollments: i64,
}

pub async fn catalog_overview(pool: &PgPool) -> Result<CatalogOverview> {
    sqlx::query_as::<_, CatalogOverview>(
        "SELECT \
             (SELECT COUNT(*) FROM courses) AS courses, \
             (SELECT COUNT(*) FROM courses WHERE max_students IS NOT NULL) AS capped_courses, \
             (SELECT COUNT(*) FROM courses c \
               WHERE c.max_students IS NOT NULL \
                 AND (SELECT COUNT(*) FROM study_plan sp WHERE sp.course_id = c.id) \
                     >= c.max_students) AS full_courses, \
             (SELECT COUNT(*) FROM course_incompatibilities) AS incompatibilities, \
             (SELECT COUNT(*) FROM students) AS students, \
             (SELECT COUNT(*) FROM students WHERE plan_type IS NOT NULL) AS students_with_plan, \
             (SELECT COUNT(*) FROM study_plan) AS enrollments",
    )
    .fetch_one(pool)
    .await
    .context("failed to read catalog overview")
}
