//! `carico student` subcommands.
//!
//! - `carico student add --email E --name N --surname S` -- register a student
//! - `carico student list [--json]`                      -- every student and plan type

use anyhow::{Result, bail};
use sqlx::PgPool;

use carico_db::queries::students;

use crate::StudentCommands;

pub async fn run_student_command(command: StudentCommands, pool: &PgPool) -> Result<()> {
    match command {
        StudentCommands::Add {
            email,
            name,
            surname,
        } => cmd_add(pool, &email, &name, &surname).await,
        StudentCommands::List { json } => cmd_list(pool, json).await,
    }
}

async fn cmd_add(pool: &PgPool, email: &str, name: &str, surname: &str) -> Result<()> {
    if !email.contains('@') {
        bail!("invalid email address: {email:?}");
    }

    let student = students::insert_student(pool, email, name, surname).await?;

    println!("Student added.");
    println!();
    println!("  ID:    {}", student.id);
    println!("  Name:  {} {}", student.name, student.surname);
    println!("  Email: {}", student.email);

    Ok(())
}

async fn cmd_list(pool: &PgPool, json: bool) -> Result<()> {
    let all = students::list_students(pool).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&all)?);
        return Ok(());
    }

    if all.is_empty() {
        println!("No students found. Use `carico student add` to register one.");
        return Ok(());
    }

    let name_w = all
        .iter()
        .map(|s| s.name.len() + s.surname.len() + 1)
        .max()
        .unwrap_or(4)
        .max(4);
    println!("{:>6}  {:<name_w$}  {:<9}  EMAIL", "ID", "NAME", "PLAN");
    for student in &all {
        let full_name = format!("{} {}", student.name, student.surname);
        let plan = student
            .plan_type
            .map_or_else(|| "-".to_string(), |t| t.to_string());
        println!(
            "{:>6}  {:<name_w$}  {:<9}  {}",
            student.id, full_name, plan, student.email
        );
    }

    Ok(())
}
