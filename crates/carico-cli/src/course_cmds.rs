//! `carico course` subcommands.
//!
//! - `carico course list [--json]` -- every course with its enrollment
//! - `carico course show <id>`     -- one course in detail

use anyhow::{Result, bail};
use sqlx::PgPool;

use carico_core::catalog::{CatalogView, Course, CourseId};
use carico_core::store::PgPlanStore;

use crate::CourseCommands;

pub async fn run_course_command(command: CourseCommands, pool: &PgPool) -> Result<()> {
    let store = PgPlanStore::new(pool.clone());
    match command {
        CourseCommands::List { json } => cmd_list(&store, json).await,
        CourseCommands::Show { id } => cmd_show(&store, &id).await,
    }
}

fn seats(course: &Course) -> String {
    match course.capacity {
        Some(capacity) => format!("{}/{}", course.signed_up, capacity),
        None => format!("{}/-", course.signed_up),
    }
}

async fn cmd_list(store: &PgPlanStore, json: bool) -> Result<()> {
    let courses = store.list_courses().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&courses)?);
        return Ok(());
    }

    if courses.is_empty() {
        println!("No courses found. Use `carico catalog import <file>` to load a catalog.");
        return Ok(());
    }

    let name_w = courses.iter().map(|c| c.name.len()).max().unwrap_or(4).max(4);
    println!(
        "{:<7}  {:<name_w$}  {:>3}  {:>9}  FULL",
        "ID", "NAME", "CFU", "SEATS"
    );
    for course in &courses {
        println!(
            "{:<7}  {:<name_w$}  {:>3}  {:>9}  {}",
            course.id,
            course.name,
            course.cfu,
            seats(course),
            if course.is_full() { "yes" } else { "" },
        );
    }

    Ok(())
}

async fn cmd_show(store: &PgPlanStore, id: &CourseId) -> Result<()> {
    let Some(course) = store.get_course(id).await? else {
        bail!("course {id} not found");
    };

    println!("Course: {} ({})", course.name, course.id);
    println!("  CFU:          {}", course.cfu);
    println!("  Seats taken:  {}", seats(&course));
    match &course.prerequisite {
        Some(p) => println!("  Prerequisite: {p}"),
        None => println!("  Prerequisite: none"),
    }
    if course.incompatibilities.is_empty() {
        println!("  Incompatible: none");
    } else {
        let list: Vec<&str> = course.incompatibilities.iter().map(|c| c.as_str()).collect();
        println!("  Incompatible: {}", list.join(", "));
    }

    Ok(())
}
