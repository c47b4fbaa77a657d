// databasebackup/src/config/mod.rs
use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::utils::redact::mask;

pub const DEFAULT_CONFIG_PATH: &str = "config.json";
pub const CONFIG_PATH_ENV: &str = "BACKUP_CONFIG_PATH";
pub const DB_PASSWORD_ENV: &str = "BACKUP_DB_PASSWORD";

const DEFAULT_MYSQL_PORT: u16 = 3306;
const DEFAULT_UPLOAD_TIMEOUT_SECS: u64 = 300;

// Structs for deserializing config.json
#[derive(Debug, Clone, Deserialize)]
pub struct JsonDatabaseConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub name: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    #[serde(default)]
    pub options: Vec<String>,
    pub mysqldump_path: Option<PathBuf>,
    pub dump_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonUploadTarget {
    pub host: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub remote_directory: Option<String>,
    pub protocol: Option<Protocol>,
    pub region: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonDeliveryOptions {
    pub max_parallel_uploads: Option<usize>,
    pub timeout_secs: Option<u64>,
    pub require_all_targets: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawJsonConfig {
    pub database: Option<JsonDatabaseConfig>,
    pub staging_dir: Option<PathBuf>,
    pub targets: Option<Vec<JsonUploadTarget>>,
    pub delivery: Option<JsonDeliveryOptions>,
    pub verify_archive: Option<bool>,
}

// Application's internal configuration structs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Ftp,
    S3,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Ftp => f.write_str("ftp"),
            Protocol::S3 => f.write_str("s3"),
        }
    }
}

#[derive(Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub user: String,
    pub password: String,
    /// Extra mysqldump flags, e.g. `--single-transaction`.
    pub options: Vec<String>,
    pub mysqldump_path: Option<PathBuf>,
    pub dump_dir: PathBuf,
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("name", &self.name)
            .field("user", &self.user)
            .field("password", &mask(&self.password))
            .field("options", &self.options)
            .field("mysqldump_path", &self.mysqldump_path)
            .field("dump_dir", &self.dump_dir)
            .finish()
    }
}

/// One remote destination for the staged archive.
///
/// For S3 targets `host` is the endpoint URL, `username`/`password` are the
/// access key pair and `remote_directory` is `bucket[/prefix]`.
#[derive(Clone, PartialEq, Eq)]
pub struct UploadTarget {
    pub host: String,
    pub username: String,
    pub password: String,
    pub remote_directory: String,
    pub protocol: Protocol,
    pub region: Option<String>,
}

impl UploadTarget {
    /// Credential-free name used in logs, errors and outcome lists.
    pub fn label(&self) -> String {
        let host = self
            .host
            .split_once("://")
            .map_or(self.host.as_str(), |(_, rest)| rest)
            .trim_end_matches('/');
        let dir = self.remote_directory.trim_matches('/');
        if dir.is_empty() {
            format!("{}://{}", self.protocol, host)
        } else {
            format!("{}://{}/{}", self.protocol, host, dir)
        }
    }
}

impl fmt::Debug for UploadTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadTarget")
            .field("host", &self.host)
            .field("username", &self.username)
            .field("password", &mask(&self.password))
            .field("remote_directory", &self.remote_directory)
            .field("protocol", &self.protocol)
            .field("region", &self.region)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryConfig {
    pub max_parallel_uploads: usize,
    pub timeout: Duration,
    pub require_all_targets: bool,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_parallel_uploads: 1,
            timeout: Duration::from_secs(DEFAULT_UPLOAD_TIMEOUT_SECS),
            require_all_targets: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub staging_dir: PathBuf,
    pub targets: Vec<UploadTarget>,
    pub delivery: DeliveryConfig,
    pub verify_archive: bool,
}

/// Supplies a fully populated configuration before a run starts.
///
/// Encrypted or remote configuration stores plug in here; the pipeline only
/// ever sees the resulting `AppConfig`.
pub trait ConfigSource {
    fn load_config(&self) -> Result<AppConfig>;
}

/// Reads `config.json`, letting `BACKUP_DB_PASSWORD` override the database password.
#[derive(Debug, Clone)]
pub struct JsonFileConfigSource {
    pub path: PathBuf,
}

impl JsonFileConfigSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ConfigSource for JsonFileConfigSource {
    fn load_config(&self) -> Result<AppConfig> {
        let password_override = std::env::var(DB_PASSWORD_ENV).ok().filter(|p| !p.is_empty());
        AppConfig::load_from_json(&self.path, password_override)
    }
}

impl AppConfig {
    pub fn load_from_json(config_path: &Path, password_override: Option<String>) -> Result<Self> {
        let config_content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file at {}", config_path.display()))?;
        Self::parse_json(&config_content, password_override).with_context(|| {
            format!(
                "Failed to load configuration from {}",
                config_path.display()
            )
        })
    }

    pub fn parse_json(content: &str, password_override: Option<String>) -> Result<Self> {
        let raw: RawJsonConfig =
            serde_json::from_str(content).context("Failed to parse JSON configuration")?;
        Self::from_raw(raw, password_override)
    }

    fn from_raw(raw: RawJsonConfig, password_override: Option<String>) -> Result<Self> {
        let database = load_database_config(
            raw.database
                .context("database section must be set in config.json")?,
            password_override,
        )?;

        let staging_dir = raw
            .staging_dir
            .context("staging_dir must be set in config.json")?;
        if staging_dir.to_string_lossy().trim().is_empty() {
            anyhow::bail!("staging_dir cannot be empty in config.json.");
        }

        let targets = raw
            .targets
            .unwrap_or_default()
            .into_iter()
            .enumerate()
            .map(|(index, target)| load_upload_target(index, target))
            .collect::<Result<Vec<_>>>()?;
        if targets.is_empty() {
            tracing::warn!("No upload targets configured; archives will only be staged locally.");
        }

        Ok(AppConfig {
            database,
            staging_dir,
            targets,
            delivery: load_delivery_config(raw.delivery)?,
            verify_archive: raw.verify_archive.unwrap_or(true),
        })
    }
}

fn load_database_config(
    raw: JsonDatabaseConfig,
    password_override: Option<String>,
) -> Result<DatabaseConfig> {
    let name = raw
        .name
        .context("database.name must be set in config.json")?;
    validate_database_name(&name)?;

    Ok(DatabaseConfig {
        host: raw.host.unwrap_or_else(|| "127.0.0.1".to_string()),
        port: raw.port.unwrap_or(DEFAULT_MYSQL_PORT),
        name,
        user: raw
            .user
            .context("database.user must be set in config.json")?,
        password: password_override.or(raw.password).unwrap_or_default(),
        options: raw.options,
        mysqldump_path: raw.mysqldump_path,
        dump_dir: raw.dump_dir.unwrap_or_else(|| PathBuf::from(".")),
    })
}

fn load_upload_target(index: usize, raw: JsonUploadTarget) -> Result<UploadTarget> {
    let host = raw
        .host
        .filter(|h| !h.trim().is_empty())
        .with_context(|| format!("targets[{}].host must be set in config.json", index))?;
    let protocol = raw.protocol.unwrap_or_default();
    let remote_directory = raw.remote_directory.unwrap_or_default();
    if protocol == Protocol::S3 && remote_directory.trim_matches('/').is_empty() {
        anyhow::bail!(
            "targets[{}].remote_directory must name a bucket for s3 targets",
            index
        );
    }

    Ok(UploadTarget {
        host,
        username: raw.username.unwrap_or_default(),
        password: raw.password.unwrap_or_default(),
        remote_directory,
        protocol,
        region: raw.region.filter(|r| !r.is_empty()),
    })
}

fn load_delivery_config(raw: Option<JsonDeliveryOptions>) -> Result<DeliveryConfig> {
    let defaults = DeliveryConfig::default();
    let Some(raw) = raw else {
        return Ok(defaults);
    };

    let max_parallel_uploads = raw
        .max_parallel_uploads
        .unwrap_or(defaults.max_parallel_uploads);
    if max_parallel_uploads == 0 {
        anyhow::bail!("delivery.max_parallel_uploads must be at least 1");
    }

    Ok(DeliveryConfig {
        max_parallel_uploads,
        timeout: raw
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(defaults.timeout),
        require_all_targets: raw
            .require_all_targets
            .unwrap_or(defaults.require_all_targets),
    })
}

/// The name ends up in the dump filename and on the mysqldump command line.
fn validate_database_name(name: &str) -> Result<()> {
    let pattern = Regex::new(r"^[A-Za-z0-9_$-]+$").context("Invalid database name pattern")?;
    if !pattern.is_match(name) {
        anyhow::bail!("Invalid character in database name from config: {:?}", name);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_config() -> serde_json::Value {
        json!({
            "database": {
                "host": "db.internal",
                "port": 3307,
                "name": "shop",
                "user": "backup",
                "password": "db-secret",
                "options": ["--single-transaction"]
            },
            "staging_dir": "/var/backups/mysql",
            "targets": [
                {
                    "host": "ftp.example.com:2121",
                    "username": "uploader",
                    "password": "ftp-secret",
                    "remote_directory": "/nightly"
                },
                {
                    "host": "https://fra1.digitaloceanspaces.com",
                    "username": "AKIAEXAMPLE",
                    "password": "s3-secret",
                    "remote_directory": "backups/shop",
                    "protocol": "s3",
                    "region": "fra1"
                }
            ],
            "delivery": { "max_parallel_uploads": 2, "timeout_secs": 30 }
        })
    }

    #[test]
    fn test_parse_full_config() -> anyhow::Result<()> {
        let config = AppConfig::parse_json(&sample_config().to_string(), None)?;

        assert_eq!(config.database.port, 3307);
        assert_eq!(config.database.options, vec!["--single-transaction"]);
        assert_eq!(config.database.dump_dir, PathBuf::from("."));
        assert_eq!(config.staging_dir, PathBuf::from("/var/backups/mysql"));
        assert_eq!(config.targets.len(), 2);
        assert_eq!(config.targets[0].protocol, Protocol::Ftp);
        assert_eq!(config.targets[1].protocol, Protocol::S3);
        assert_eq!(config.targets[1].region.as_deref(), Some("fra1"));
        assert_eq!(config.delivery.max_parallel_uploads, 2);
        assert_eq!(config.delivery.timeout, Duration::from_secs(30));
        assert!(!config.delivery.require_all_targets);
        assert!(config.verify_archive);
        Ok(())
    }

    #[test]
    fn test_targets_keep_configuration_order() -> anyhow::Result<()> {
        let config = AppConfig::parse_json(&sample_config().to_string(), None)?;
        let labels: Vec<String> = config.targets.iter().map(UploadTarget::label).collect();
        assert_eq!(
            labels,
            vec![
                "ftp://ftp.example.com:2121/nightly",
                "s3://fra1.digitaloceanspaces.com/backups/shop"
            ]
        );
        Ok(())
    }

    #[test]
    fn test_password_override_wins() -> anyhow::Result<()> {
        let config =
            AppConfig::parse_json(&sample_config().to_string(), Some("from-env".to_string()))?;
        assert_eq!(config.database.password, "from-env");
        Ok(())
    }

    #[test]
    fn test_debug_output_never_contains_passwords() -> anyhow::Result<()> {
        let config = AppConfig::parse_json(&sample_config().to_string(), None)?;
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("db-secret"));
        assert!(!rendered.contains("ftp-secret"));
        assert!(!rendered.contains("s3-secret"));
        assert!(rendered.contains("uploader"));
        Ok(())
    }

    #[test]
    fn test_missing_targets_means_local_only() -> anyhow::Result<()> {
        let mut value = sample_config();
        if let Some(object) = value.as_object_mut() {
            object.remove("targets");
        }
        let config = AppConfig::parse_json(&value.to_string(), None)?;
        assert!(config.targets.is_empty());
        Ok(())
    }

    #[test]
    fn test_empty_staging_dir_is_rejected() {
        let mut value = sample_config();
        value["staging_dir"] = json!("  ");
        assert!(AppConfig::parse_json(&value.to_string(), None).is_err());
    }

    #[test]
    fn test_invalid_database_name_is_rejected() {
        let mut value = sample_config();
        value["database"]["name"] = json!("shop; rm -rf /");
        assert!(AppConfig::parse_json(&value.to_string(), None).is_err());
    }

    #[test]
    fn test_target_without_host_is_rejected() {
        let mut value = sample_config();
        value["targets"][0]["host"] = json!("");
        assert!(AppConfig::parse_json(&value.to_string(), None).is_err());
    }

    #[test]
    fn test_s3_target_requires_bucket() {
        let mut value = sample_config();
        value["targets"][1]["remote_directory"] = json!("/");
        assert!(AppConfig::parse_json(&value.to_string(), None).is_err());
    }

    #[test]
    fn test_zero_parallel_uploads_is_rejected() {
        let mut value = sample_config();
        value["delivery"]["max_parallel_uploads"] = json!(0);
        assert!(AppConfig::parse_json(&value.to_string(), None).is_err());
    }

    #[test]
    fn test_load_from_json_file() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("config.json");
        fs::write(&path, sample_config().to_string())?;

        let config = JsonFileConfigSource::new(&path).load_config()?;
        assert_eq!(config.database.name, "shop");
        Ok(())
    }
}
