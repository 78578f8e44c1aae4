//! `carico catalog import <file>`: load a catalog TOML file.

use anyhow::{Context, Result};
use sqlx::PgPool;

use carico_core::catalog::{import_catalog, parse_catalog_toml};

use crate::CatalogCommands;

pub async fn run_catalog_command(command: CatalogCommands, pool: &PgPool) -> Result<()> {
    match command {
        CatalogCommands::Import { file } => cmd_import(pool, &file).await,
    }
}

async fn cmd_import(pool: &PgPool, file_path: &str) -> Result<()> {
    let content = std::fs::read_to_string(file_path)
        .with_context(|| format!("failed to read catalog file: {file_path}"))?;

    let courses = parse_catalog_toml(&content)
        .with_context(|| format!("failed to parse catalog file: {file_path}"))?;

    let imported = import_catalog(pool, &courses).await?;

    let pairs: usize = courses.iter().map(|c| c.incompatibilities.len()).sum::<usize>() / 2;
    let capped = courses.iter().filter(|c| c.capacity.is_some()).count();

    println!("Catalog imported.");
    println!();
    println!("  Courses:            {imported}");
    println!("  With capacity:      {capped}");
    println!("  Incompatible pairs: {pairs}");

    Ok(())
}
