// databasebackup/src/backup/db_dump.rs
use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::DatabaseConfig;
use crate::errors::{BackupError, Result};
use crate::utils::find_executable;
use crate::utils::redact::redact;

/// Produces the raw dump file that a backup run starts from.
///
/// An empty path means the dump step failed without saying why.
#[async_trait]
pub trait DumpProducer: Send + Sync {
    async fn produce(&self) -> Result<PathBuf>;
}

/// Dumps one MySQL database with the `mysqldump` client.
#[derive(Debug, Clone)]
pub struct MysqlDumpProducer {
    database: DatabaseConfig,
}

impl MysqlDumpProducer {
    pub fn new(database: DatabaseConfig) -> Self {
        Self { database }
    }

    /// `bu_<db>_<unix seconds>.sql` inside the dump directory. The timestamp keeps
    /// consecutive runs from overwriting each other.
    pub fn dump_path(&self, unix_seconds: i64) -> PathBuf {
        self.database
            .dump_dir
            .join(format!("bu_{}_{}.sql", self.database.name, unix_seconds))
    }

    /// Command-line arguments for mysqldump. The password is deliberately absent;
    /// it travels through `MYSQL_PWD`.
    pub fn dump_args(&self, dump_path: &Path) -> Vec<String> {
        let db = &self.database;
        let mut args = db.options.clone();
        args.push(format!("-h{}", db.host));
        args.push(format!("-P{}", db.port));
        args.push(format!("-u{}", db.user));
        args.push(db.name.clone());
        args.push(format!("-r{}", dump_path.display()));
        args
    }
}

#[async_trait]
impl DumpProducer for MysqlDumpProducer {
    async fn produce(&self) -> Result<PathBuf> {
        let mysqldump = find_executable("mysqldump", self.database.mysqldump_path.as_deref())
            .map_err(|e| BackupError::DumpUnavailable(format!("{:#}", e)))?;
        debug!("Found mysqldump executable at: {}", mysqldump.display());

        tokio::fs::create_dir_all(&self.database.dump_dir)
            .await
            .map_err(|e| {
                BackupError::DumpUnavailable(format!(
                    "Failed to create dump directory {}: {}",
                    self.database.dump_dir.display(),
                    e
                ))
            })?;

        let dump_path = self.dump_path(Utc::now().timestamp());
        info!(
            "Dumping database {} from {}:{} to {}",
            self.database.name,
            self.database.host,
            self.database.port,
            dump_path.display()
        );

        let mut command = Command::new(&mysqldump);
        command.args(self.dump_args(&dump_path));
        if !self.database.password.is_empty() {
            command.env("MYSQL_PWD", &self.database.password);
        }

        let output = command.output().await.map_err(|e| {
            BackupError::DumpUnavailable(format!(
                "Failed to execute {}: {}",
                mysqldump.display(),
                e
            ))
        })?;

        if !output.status.success() {
            let secrets = [self.database.password.as_str()];
            return Err(BackupError::Command {
                stdout: redact(&String::from_utf8_lossy(&output.stdout), &secrets),
                stderr: redact(&String::from_utf8_lossy(&output.stderr), &secrets),
            });
        }

        info!("✓ Database {} dumped successfully", self.database.name);
        Ok(dump_path)
    }
}
