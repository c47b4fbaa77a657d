// databasebackup/src/backup/logic.rs
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{Instrument, Span, debug, error, info, info_span, warn};
use uuid::Uuid;

use super::archive::{Archiver, verify_archive};
use super::db_dump::DumpProducer;
use super::transport::{Transport, transport_error};
use crate::config::{AppConfig, UploadTarget};
use crate::errors::{
    ArchiveError, ArchiveStage, BackupError, PipelineFailure, Stage, TransportError,
    TransportStage,
};

const ARCHIVE_EXTENSION: &str = "tar.gz";

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub staging_dir: PathBuf,
    pub verify_archive: bool,
    pub max_parallel_uploads: usize,
    pub upload_timeout: Duration,
}

impl PipelineSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            staging_dir: config.staging_dir.clone(),
            verify_archive: config.verify_archive,
            max_parallel_uploads: config.delivery.max_parallel_uploads.max(1),
            upload_timeout: config.delivery.timeout,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    Failed(TransportError),
}

/// Delivery result for one configured target, identified by its label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetOutcome {
    pub target: String,
    pub outcome: DeliveryOutcome,
}

impl TargetOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self.outcome, DeliveryOutcome::Delivered)
    }
}

/// Result of a run that got the archive staged. Outcomes follow configuration order.
#[derive(Debug)]
pub struct PipelineReport {
    pub run_id: Uuid,
    pub staged_path: PathBuf,
    pub cleanup_warning: Option<BackupError>,
    pub outcomes: Vec<TargetOutcome>,
}

impl PipelineReport {
    pub fn delivered_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_delivered()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.outcomes.len() - self.delivered_count()
    }

    pub fn all_delivered(&self) -> bool {
        self.failed_count() == 0
    }
}

/// One backup run: dump, archive, stage, drop the raw dump, fan out.
///
/// Dump, archive and staging failures end the run. A failed dump removal is
/// only a warning. Each target's delivery fails on its own without affecting
/// the others. Nothing is retried.
pub struct BackupPipeline {
    dump: Arc<dyn DumpProducer>,
    archiver: Arc<dyn Archiver>,
    transport: Arc<dyn Transport>,
    targets: Vec<UploadTarget>,
    settings: PipelineSettings,
}

impl BackupPipeline {
    pub fn new(
        dump: Arc<dyn DumpProducer>,
        archiver: Arc<dyn Archiver>,
        transport: Arc<dyn Transport>,
        targets: Vec<UploadTarget>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            dump,
            archiver,
            transport,
            targets,
            settings,
        }
    }

    pub async fn run(&self) -> Result<PipelineReport, PipelineFailure> {
        let run_id = Uuid::new_v4();
        let span = info_span!("backup_run", %run_id);
        self.run_stages(run_id).instrument(span).await
    }

    async fn run_stages(&self, run_id: Uuid) -> Result<PipelineReport, PipelineFailure> {
        info!("🚀 Starting database backup run");

        let dump_path = self
            .obtain_dump()
            .await
            .map_err(|e| fail(Stage::Dumped, e))?;
        info!(stage = %Stage::Dumped, "Dump available at {}", dump_path.display());

        let working_archive = self
            .archive_dump(&dump_path)
            .await
            .map_err(|e| fail(Stage::Archived, e))?;
        info!(stage = %Stage::Archived, "Archive written to {}", working_archive.display());

        let staged_path = stage_archive(&working_archive, &self.settings.staging_dir)
            .map_err(|e| fail(Stage::Staged, e))?;
        info!(stage = %Stage::Staged, "📂 Archive staged at {}", staged_path.display());

        let cleanup_warning = match fs::remove_file(&dump_path) {
            Ok(()) => {
                info!(stage = %Stage::DumpRemoved, "Removed raw dump {}", dump_path.display());
                None
            }
            Err(source) => {
                let warning = BackupError::DumpCleanup {
                    dump: dump_path.clone(),
                    source,
                };
                warn!(stage = %Stage::DumpRemoved, "⚠️ {}. Continuing with delivery.", warning);
                Some(warning)
            }
        };

        info!(stage = %Stage::Delivering, "Delivering to {} target(s)", self.targets.len());
        let outcomes = self.deliver_all(&staged_path).await;

        let report = PipelineReport {
            run_id,
            staged_path,
            cleanup_warning,
            outcomes,
        };
        info!(
            stage = %Stage::Done,
            "🎉 Backup run finished: {} delivered, {} failed",
            report.delivered_count(),
            report.failed_count()
        );
        Ok(report)
    }

    async fn obtain_dump(&self) -> Result<PathBuf, BackupError> {
        let dump_path = self.dump.produce().await?;
        if dump_path.as_os_str().is_empty() {
            return Err(BackupError::DumpUnavailable(
                "dump step returned an empty path".to_string(),
            ));
        }
        if !dump_path.is_file() {
            return Err(BackupError::DumpUnavailable(format!(
                "dump file {} does not exist",
                dump_path.display()
            )));
        }
        Ok(dump_path)
    }

    /// Archives the dump next to itself as `<dump>.tar.gz`.
    async fn archive_dump(&self, dump_path: &Path) -> Result<PathBuf, BackupError> {
        let working_archive = archive_name_for(dump_path);
        let member_name = dump_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let archiver = Arc::clone(&self.archiver);
        let verify = self.settings.verify_archive;
        let sources = vec![dump_path.to_path_buf()];
        let destination = working_archive.clone();

        tokio::task::spawn_blocking(move || -> Result<(), ArchiveError> {
            archiver.create_archive(&destination, &sources)?;
            if verify {
                verify_archive(&destination, &[member_name])?;
            }
            Ok(())
        })
        .await
        .map_err(|e| {
            ArchiveError::new(
                ArchiveStage::Finish,
                &working_archive,
                io::Error::other(format!("archive task aborted: {}", e)),
            )
        })??;

        Ok(working_archive)
    }

    async fn deliver_all(&self, staged_path: &Path) -> Vec<TargetOutcome> {
        if self.targets.is_empty() {
            info!("No upload targets configured; nothing to deliver.");
            return Vec::new();
        }

        if self.settings.max_parallel_uploads <= 1 {
            let mut outcomes = Vec::with_capacity(self.targets.len());
            for target in &self.targets {
                let outcome = deliver_one(
                    self.transport.as_ref(),
                    target,
                    staged_path,
                    self.settings.upload_timeout,
                )
                .await;
                outcomes.push(TargetOutcome {
                    target: target.label(),
                    outcome,
                });
            }
            return outcomes;
        }

        let semaphore = Arc::new(Semaphore::new(self.settings.max_parallel_uploads));
        let mut tasks = JoinSet::new();
        for (index, target) in self.targets.iter().enumerate() {
            // Every task owns its own copy of the target.
            let target = target.clone();
            let transport = Arc::clone(&self.transport);
            let semaphore = Arc::clone(&semaphore);
            let path = staged_path.to_path_buf();
            let timeout = self.settings.upload_timeout;
            tasks.spawn(
                async move {
                    let _permit = semaphore.acquire_owned().await.ok();
                    let outcome = deliver_one(transport.as_ref(), &target, &path, timeout).await;
                    (index, outcome)
                }
                .instrument(Span::current()),
            );
        }

        let mut slots: Vec<Option<DeliveryOutcome>> = vec![None; self.targets.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, outcome)) => slots[index] = Some(outcome),
                Err(e) => error!("Delivery task did not complete: {}", e),
            }
        }

        self.targets
            .iter()
            .zip(slots)
            .map(|(target, slot)| TargetOutcome {
                target: target.label(),
                outcome: slot.unwrap_or_else(|| {
                    DeliveryOutcome::Failed(transport_error(
                        target,
                        TransportStage::Store,
                        "delivery task did not complete",
                    ))
                }),
            })
            .collect()
    }
}

fn fail(stage: Stage, source: BackupError) -> PipelineFailure {
    error!(stage = %stage, "❌ {}", source);
    PipelineFailure::at(stage, source)
}

async fn deliver_one(
    transport: &dyn Transport,
    target: &UploadTarget,
    staged_path: &Path,
    timeout: Duration,
) -> DeliveryOutcome {
    let label = target.label();
    info!("📤 Uploading {} to {}", staged_path.display(), label);
    match tokio::time::timeout(timeout, transport.deliver(target, staged_path)).await {
        Ok(Ok(())) => {
            info!("✅ Delivered to {}", label);
            DeliveryOutcome::Delivered
        }
        Ok(Err(e)) => {
            warn!("❌ {}", e);
            DeliveryOutcome::Failed(e)
        }
        Err(_) => {
            let e = transport_error(
                target,
                TransportStage::Timeout,
                format!("no result within {} seconds", timeout.as_secs()),
            );
            warn!("❌ {}", e);
            DeliveryOutcome::Failed(e)
        }
    }
}

fn archive_name_for(dump_path: &Path) -> PathBuf {
    let mut name = dump_path.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(ARCHIVE_EXTENSION);
    dump_path.with_file_name(name)
}

/// Moves the working archive into `staging_dir`, creating the directory if needed.
///
/// An existing file with the same name is never replaced. When the archive was
/// written inside `staging_dir` already, it is staged where it is.
pub fn stage_archive(working_archive: &Path, staging_dir: &Path) -> Result<PathBuf, BackupError> {
    let staging_err = |source: io::Error| BackupError::Staging {
        archive: working_archive.to_path_buf(),
        staging_dir: staging_dir.to_path_buf(),
        source,
    };

    fs::create_dir_all(staging_dir).map_err(staging_err)?;
    let file_name = working_archive.file_name().ok_or_else(|| {
        staging_err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "archive path has no file name",
        ))
    })?;
    let staged_path = staging_dir.join(file_name);

    let working_canonical = working_archive.canonicalize().map_err(staging_err)?;
    let staging_canonical = staging_dir.canonicalize().map_err(staging_err)?;
    if working_canonical == staging_canonical.join(file_name) {
        debug!("Archive {} is already in the staging directory", working_archive.display());
        return Ok(staged_path);
    }

    // hard_link refuses an existing destination, unlike rename.
    match fs::hard_link(working_archive, &staged_path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            return Err(staging_err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} already exists", staged_path.display()),
            )));
        }
        Err(link_err) => {
            // Most likely a different filesystem; fall back to copying.
            info!(
                "Linking into {} failed ({}); copying instead",
                staging_dir.display(),
                link_err
            );
            copy_without_overwrite(working_archive, &staged_path).map_err(staging_err)?;
        }
    }

    if let Err(e) = fs::remove_file(working_archive) {
        warn!(
            "⚠️ Archive staged but working file {} could not be removed: {}",
            working_archive.display(),
            e
        );
    }
    Ok(staged_path)
}

/// Copies `from` to a destination that must not exist yet. A partial copy is removed.
fn copy_without_overwrite(from: &Path, to: &Path) -> io::Result<()> {
    let mut source = File::open(from)?;
    let mut destination = OpenOptions::new().write(true).create_new(true).open(to)?;
    let copied = io::copy(&mut source, &mut destination).and_then(|_| destination.sync_all());
    if let Err(e) = copied {
        let _ = fs::remove_file(to);
        return Err(e);
    }
    Ok(())
}
