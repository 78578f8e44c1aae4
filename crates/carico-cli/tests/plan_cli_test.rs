//! End-to-end tests for the `carico` binary.
//!
//! Each test creates an isolated temporary database, points the binary at
//! it with `--database-url`, and isolates the config file location with
//! `XDG_CONFIG_HOME`.

use std::path::Path;
use std::process::Output;

use tokio::process::Command;

use carico_test_utils::{create_test_db, drop_test_db, pg_url};

const CATALOG: &str = r#"
[[courses]]
id = "CS10001"
name = "Algorithms"
cfu = 7
max_students = 1

[[courses]]
id = "CS20002"
name = "Operating Systems"
cfu = 6
preparatory = "CS10001"

[[courses]]
id = "MA10001"
name = "Calculus"
cfu = 10

[[courses]]
id = "MA10002"
name = "Linear Algebra"
cfu = 10
incompatible_with = ["MA10003"]

[[courses]]
id = "MA10003"
name = "Geometry"
cfu = 10
"#;

struct Cli {
    url: String,
    config_home: tempfile::TempDir,
}

impl Cli {
    async fn new(db_name: &str) -> Self {
        Self {
            url: format!("{}/{db_name}", pg_url().await),
            config_home: tempfile::TempDir::new().unwrap(),
        }
    }

    async fn run(&self, args: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_carico"))
            .args(args)
            .arg("--database-url")
            .arg(&self.url)
            .env("XDG_CONFIG_HOME", self.config_home.path())
            .env("RUST_LOG", "warn")
            .output()
            .await
            .expect("failed to run carico")
    }

    async fn ok(&self, args: &[&str]) -> String {
        let out = self.run(args).await;
        assert!(
            out.status.success(),
            "carico {args:?} failed: {}",
            String::from_utf8_lossy(&out.stderr)
        );
        String::from_utf8(out.stdout).unwrap()
    }

    async fn fails(&self, args: &[&str]) -> String {
        let out = self.run(args).await;
        assert!(!out.status.success(), "carico {args:?} should fail");
        String::from_utf8(out.stderr).unwrap()
    }
}

fn write_catalog(dir: &Path) -> String {
    let path = dir.join("catalog.toml");
    std::fs::write(&path, CATALOG).unwrap();
    path.to_string_lossy().into_owned()
}

#[tokio::test]
async fn import_list_and_show_courses() {
    let (pool, db_name) = create_test_db().await;
    let cli = Cli::new(&db_name).await;
    let file = write_catalog(cli.config_home.path());

    let out = cli.ok(&["catalog", "import", &file]).await;
    assert!(out.contains("Courses:            5"), "{out}");

    let out = cli.ok(&["course", "list", "--json"]).await;
    let listed: serde_json::Value = serde_json::from_str(&out).unwrap();
    let names: Vec<&str> = listed
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["name"].as_str().unwrap())
        .collect();
    assert_eq!(
        names,
        ["Algorithms", "Calculus", "Geometry", "Linear Algebra", "Operating Systems"]
    );

    let out = cli.ok(&["course", "show", "ma10003"]).await;
    assert!(out.contains("Incompatible: MA10002"), "{out}");

    // A second import of the same courses is refused as a whole.
    cli.fails(&["catalog", "import", &file]).await;

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn propose_show_and_erase_a_plan() {
    let (pool, db_name) = create_test_db().await;
    let cli = Cli::new(&db_name).await;
    let file = write_catalog(cli.config_home.path());
    cli.ok(&["catalog", "import", &file]).await;

    let out = cli
        .ok(&[
            "student", "add", "--email", "ada@example.org", "--name", "Ada", "--surname",
            "Lovelace",
        ])
        .await;
    assert!(out.contains("ID:"), "{out}");
    let id: String = out
        .lines()
        .find_map(|l| l.trim().strip_prefix("ID:"))
        .unwrap()
        .trim()
        .to_string();

    let err = cli
        .fails(&["plan", "propose", &id, "--type", "part-time", "CS20002"])
        .await;
    assert!(err.contains("requires the course CS10001"), "{err}");
    assert!(err.contains("stopped after 1 of 1 courses"), "{err}");

    cli.ok(&[
        "plan", "propose", &id, "--type", "part-time", "CS10001", "MA10001", "MA10002",
    ])
    .await;

    let out = cli.ok(&["plan", "show", &id, "--json"]).await;
    let summary: serde_json::Value = serde_json::from_str(&out).unwrap();
    assert_eq!(summary["plan_type"], "part-time");
    assert_eq!(summary["cfu_total"], 27);

    let out = cli.ok(&["student", "list", "--json"]).await;
    let listed: serde_json::Value = serde_json::from_str(&out).unwrap();
    assert_eq!(listed[0]["email"], "ada@example.org");
    assert_eq!(listed[0]["plan_type"], "part-time");
    let out = cli.ok(&["student", "list"]).await;
    assert!(out.contains("Ada Lovelace"), "{out}");

    let err = cli.fails(&["plan", "type", &id, "full-time"]).await;
    assert!(err.contains("illegal number of CFU: 27"), "{err}");

    cli.ok(&["plan", "erase", &id]).await;
    let out = cli.ok(&["plan", "show", &id]).await;
    assert!(out.contains("has no study plan"), "{out}");

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn check_reports_verdict_without_storing() {
    let (pool, db_name) = create_test_db().await;
    let cli = Cli::new(&db_name).await;
    let file = write_catalog(cli.config_home.path());
    cli.ok(&["catalog", "import", &file]).await;

    let out = cli
        .ok(&["plan", "check", "--type", "part-time", "MA10001", "MA10002"])
        .await;
    assert!(out.contains("legal plan: 20 CFU"), "{out}");

    let err = cli
        .fails(&[
            "plan", "check", "--type", "part-time", "MA10001", "MA10002", "MA10003",
        ])
        .await;
    assert!(err.contains("incompatible"), "{err}");
    assert!(err.contains("stopped after 2 of 3 courses"), "{err}");

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn init_refuses_to_overwrite_without_force() {
    let (pool, db_name) = create_test_db().await;
    let cli = Cli::new(&db_name).await;

    cli.ok(&["init", "--db-url", "postgresql://h:5432/carico"]).await;
    let config = cli.config_home.path().join("carico").join("config.toml");
    assert!(config.exists());

    let err = cli.fails(&["init"]).await;
    assert!(err.contains("already exists"), "{err}");
    cli.ok(&["init", "--force"]).await;

    pool.close().await;
    drop_test_db(&db_name).await;
}
