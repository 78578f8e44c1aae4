mod catalog_cmd;
mod config;
mod course_cmds;
mod plan_cmds;
mod student_cmd;

use clap::{Parser, Subcommand};

use carico_core::PlanType;
use carico_core::StudentId;
use carico_core::catalog::CourseId;
use carico_db::config::DbConfig;
use carico_db::pool;

use config::CaricoConfig;

#[derive(Parser)]
#[command(name = "carico", about = "Study-plan legality checks and atomic plan changes")]
struct Cli {
    /// Database URL (overrides CARICO_DATABASE_URL env var)
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a carico config file (no database required)
    Init {
        /// PostgreSQL connection URL
        #[arg(long, default_value = DbConfig::DEFAULT_URL)]
        db_url: String,
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Create and migrate the carico database
    DbInit,
    /// Course catalog management
    Catalog {
        #[command(subcommand)]
        command: CatalogCommands,
    },
    /// Browse the course catalog
    Course {
        #[command(subcommand)]
        command: CourseCommands,
    },
    /// Student management
    Student {
        #[command(subcommand)]
        command: StudentCommands,
    },
    /// Study plan operations
    Plan {
        #[command(subcommand)]
        command: PlanCommands,
    },
}

#[derive(Subcommand)]
pub enum CatalogCommands {
    /// Load courses from a TOML file in a single transaction
    Import {
        /// Path to the catalog TOML file
        file: String,
    },
}

#[derive(Subcommand)]
pub enum CourseCommands {
    /// List every course with its enrollment
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Show one course
    Show {
        /// Course ID (7 characters)
        id: CourseId,
    },
}

#[derive(Subcommand)]
pub enum StudentCommands {
    /// Register a student without a study plan
    Add {
        #[arg(long)]
        email: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        surname: String,
    },
    /// List registered students with their plan type
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum PlanCommands {
    /// Show a student's stored plan
    Show {
        student: StudentId,
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Choose or switch the plan type
    Type {
        student: StudentId,
        /// full-time or part-time
        plan_type: PlanType,
    },
    /// Validate a proposal without storing it
    Check {
        /// full-time or part-time
        #[arg(long = "type")]
        plan_type: PlanType,
        /// Student whose stored plan keeps their seats
        #[arg(long)]
        student: Option<StudentId>,
        /// Course IDs in the proposal
        #[arg(required = true)]
        courses: Vec<CourseId>,
    },
    /// Validate a proposal and make it the stored plan
    Propose {
        student: StudentId,
        /// full-time or part-time
        #[arg(long = "type")]
        plan_type: PlanType,
        /// Course IDs in the proposal
        #[arg(required = true)]
        courses: Vec<CourseId>,
    },
    /// Remove every course and the plan type
    Erase { student: StudentId },
}

/// Execute the `carico init` command: write config file.
fn cmd_init(db_url: &str, force: bool) -> anyhow::Result<()> {
    let path = config::config_path();

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let cfg = config::ConfigFile {
        database: config::DatabaseSection {
            url: db_url.to_string(),
        },
        rules: None,
    };
    config::save_config(&cfg)?;

    println!("Config written to {}", path.display());
    println!("  database.url = {db_url}");
    println!();
    println!("Next: run `carico db-init` to create and migrate the database.");

    Ok(())
}

/// Execute the `carico db-init` command: create database and run migrations.
async fn cmd_db_init(cli_db_url: Option<&str>) -> anyhow::Result<()> {
    let resolved = CaricoConfig::resolve(cli_db_url)?;

    println!("Initializing carico database...");

    pool::ensure_database_exists(&resolved.db_config).await?;
    let db_pool = pool::create_pool(&resolved.db_config).await?;
    pool::run_migrations(&db_pool).await?;

    let overview = pool::catalog_overview(&db_pool).await?;
    println!("Database ready.");
    println!(
        "  Courses:     {} ({} capped, {} full)",
        overview.courses, overview.capped_courses, overview.full_courses
    );
    println!("  Incompatible pairs: {}", overview.incompatibilities);
    println!(
        "  Students:    {} ({} with a study plan)",
        overview.students, overview.students_with_plan
    );
    println!("  Enrollments: {}", overview.enrollments);

    db_pool.close().await;

    println!("carico db-init complete.");
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("{e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Init { db_url, force } => {
            cmd_init(&db_url, force)?;
        }
        Commands::DbInit => {
            cmd_db_init(cli.database_url.as_deref()).await?;
        }
        Commands::Catalog { command } => {
            let resolved = CaricoConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = catalog_cmd::run_catalog_command(command, &db_pool).await;
            db_pool.close().await;
            result?;
        }
        Commands::Course { command } => {
            let resolved = CaricoConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = course_cmds::run_course_command(command, &db_pool).await;
            db_pool.close().await;
            result?;
        }
        Commands::Student { command } => {
            let resolved = CaricoConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = student_cmd::run_student_command(command, &db_pool).await;
            db_pool.close().await;
            result?;
        }
        Commands::Plan { command } => {
            let resolved = CaricoConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = plan_cmds::run_plan_command(command, &db_pool, resolved.rules).await;
            db_pool.close().await;
            result?;
        }
    }

    Ok(())
}
