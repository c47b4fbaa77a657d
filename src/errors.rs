use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Named stages of one backup run, in the order they are entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Dumped,
    Archived,
    Staged,
    DumpRemoved,
    Delivering,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Dumped => "dumped",
            Stage::Archived => "archived",
            Stage::Staged => "staged",
            Stage::DumpRemoved => "dump-removed",
            Stage::Delivering => "delivering",
            Stage::Done => "done",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveStage {
    NoSources,
    CreateDestination,
    OpenSource,
    ReadMetadata,
    WriteEntry,
    Finish,
    Verify,
}

impl fmt::Display for ArchiveStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ArchiveStage::NoSources => "collect sources",
            ArchiveStage::CreateDestination => "create destination",
            ArchiveStage::OpenSource => "open source",
            ArchiveStage::ReadMetadata => "read metadata",
            ArchiveStage::WriteEntry => "write entry",
            ArchiveStage::Finish => "finish archive",
            ArchiveStage::Verify => "verify archive",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
#[error("archive step '{stage}' failed for {}: {source}", .file.display())]
pub struct ArchiveError {
    pub stage: ArchiveStage,
    pub file: PathBuf,
    #[source]
    pub source: std::io::Error,
}

impl ArchiveError {
    pub fn new(stage: ArchiveStage, file: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self {
            stage,
            file: file.into(),
            source,
        }
    }
}

/// Where a delivery attempt broke. Operators use this to tell credential
/// problems apart from network problems.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportStage {
    Connect,
    Authenticate,
    ChangeDirectory,
    OpenLocal,
    Store,
    Timeout,
}

impl fmt::Display for TransportStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportStage::Connect => "connect",
            TransportStage::Authenticate => "authenticate",
            TransportStage::ChangeDirectory => "change directory",
            TransportStage::OpenLocal => "open local file",
            TransportStage::Store => "store",
            TransportStage::Timeout => "timeout",
        };
        f.write_str(name)
    }
}

/// Failed delivery to one target. `message` is already free of credentials.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("delivery to {target} failed at '{stage}': {message}")]
pub struct TransportError {
    pub target: String,
    pub stage: TransportStage,
    pub message: String,
}

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Dump unavailable: {0}")]
    DumpUnavailable(String),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error("Failed to stage archive {} into {}: {source}", .archive.display(), .staging_dir.display())]
    Staging {
        archive: PathBuf,
        staging_dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to remove dump file {}: {source}", .dump.display())]
    DumpCleanup {
        dump: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Command execution failed: {stderr}")]
    Command { stdout: String, stderr: String },
}

/// Terminal outcome of a run that never reached delivery.
#[derive(Error, Debug)]
#[error("backup failed at stage '{stage}': {source}")]
pub struct PipelineFailure {
    pub stage: Stage,
    #[source]
    pub source: BackupError,
}

impl PipelineFailure {
    pub fn at(stage: Stage, source: impl Into<BackupError>) -> Self {
        Self {
            stage,
            source: source.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;
