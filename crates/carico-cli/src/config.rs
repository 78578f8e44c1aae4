//! Configuration file management for carico.
//!
//! Provides a TOML-based config file at `~/.config/carico/config.toml` and a
//! resolution chain: CLI flag > env var > config file > default.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use carico_core::validator::PlanRules;
use carico_db::config::DbConfig;

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigFile {
    pub database: DatabaseSection,
    /// CFU bounds per plan type. Defaults apply when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rules: Option<PlanRules>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DatabaseSection {
    pub url: String,
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the carico config directory: `$XDG_CONFIG_HOME/carico` or
/// `~/.config/carico`, on every platform.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("carico");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("carico")
}

pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

/// Load and parse the config file; `None` when there is no file. A file
/// that exists but cannot be read or parsed is an error, never a fallback
/// to defaults.
pub fn load_config_if_present() -> Result<Option<ConfigFile>> {
    let path = config_path();
    let contents = match std::fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(e)
                .with_context(|| format!("failed to read config file at {}", path.display()));
        }
    };
    parse_config(&contents)
        .with_context(|| format!("invalid config file at {}", path.display()))
        .map(Some)
}

fn parse_config(contents: &str) -> Result<ConfigFile> {
    toml::from_str(contents).context("failed to parse config file")
}

/// Serialize and write the config file, creating parent dirs as needed.
/// Sets file permissions to 0600 on Unix.
pub fn save_config(config: &ConfigFile) -> Result<()> {
    let path = config_path();
    let dir = config_dir();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create config directory {}", dir.display()))?;

    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(&path, &contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(&path, perms)
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }

    Ok(())
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Fully resolved configuration, ready for use.
#[derive(Debug)]
pub struct CaricoConfig {
    pub db_config: DbConfig,
    pub rules: PlanRules,
}

impl CaricoConfig {
    /// Resolve configuration.
    ///
    /// - DB URL: `cli_db_url` > `CARICO_DATABASE_URL` env > `config_file.database.url` > `DbConfig::DEFAULT_URL`
    /// - Rules: `config_file.rules` > `PlanRules::default()`
    pub fn resolve(cli_db_url: Option<&str>) -> Result<Self> {
        let file_config = load_config_if_present()?;

        let db_url = if let Some(url) = cli_db_url {
            url.to_string()
        } else if let Ok(url) = std::env::var(DbConfig::ENV_VAR) {
            url
        } else if let Some(ref cfg) = file_config {
            cfg.database.url.clone()
        } else {
            DbConfig::DEFAULT_URL.to_string()
        };

        let rules = file_config
            .as_ref()
            .and_then(|cfg| cfg.rules)
            .unwrap_or_default();
        check_rules(&rules)?;

        Ok(Self {
            db_config: DbConfig::new(db_url),
            rules,
        })
    }
}

fn check_rules(rules: &PlanRules) -> Result<()> {
    for (name, bounds) in [("full_time", rules.full_time), ("part_time", rules.part_time)] {
        if !bounds.is_well_formed() {
            bail!(
                "invalid CFU bounds for {name} in config file: min {} is greater than max {}",
                bounds.min,
                bounds.max
            );
        }
    }
    Ok(())
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------
