// databasebackup/src/backup/archive.rs
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tar::{Builder, Header};
use tracing::{debug, info};

use crate::errors::{ArchiveError, ArchiveStage};

/// Bundles one or more files into a single compressed archive.
pub trait Archiver: Send + Sync {
    fn create_archive(&self, destination: &Path, sources: &[PathBuf]) -> Result<(), ArchiveError>;
}

/// Gzip-compressed tar archives, one entry per source file.
#[derive(Debug, Clone, Copy)]
pub struct TarGzArchiver {
    pub level: Compression,
}

impl Default for TarGzArchiver {
    fn default() -> Self {
        Self {
            level: Compression::default(),
        }
    }
}

impl Archiver for TarGzArchiver {
    fn create_archive(&self, destination: &Path, sources: &[PathBuf]) -> Result<(), ArchiveError> {
        create_tar_gz_archive(destination, sources, self.level)
    }
}

/// Creates a GZipped TAR archive from a list of regular files.
///
/// Entries are named by each source's base filename and carry the source's
/// mode, mtime and size. The first failing file aborts the whole archive.
/// A partially written file may remain at `archive_dest_path` on error, so
/// only the returned result says whether the archive is usable.
///
/// # Arguments
/// * `archive_dest_path` - The full path where the `.tar.gz` archive will be created.
///   Its parent directory must already exist.
/// * `sources` - The files to archive, in entry order.
pub fn create_tar_gz_archive(
    archive_dest_path: &Path,
    sources: &[PathBuf],
    level: Compression,
) -> Result<(), ArchiveError> {
    if sources.is_empty() {
        return Err(ArchiveError::new(
            ArchiveStage::NoSources,
            archive_dest_path,
            io::Error::new(io::ErrorKind::InvalidInput, "no source files given"),
        ));
    }

    info!(
        "🗜 Creating tar.gz archive {} from {} file(s)",
        archive_dest_path.display(),
        sources.len()
    );

    let archive_file = File::create(archive_dest_path)
        .map_err(|e| ArchiveError::new(ArchiveStage::CreateDestination, archive_dest_path, e))?;
    let enc = GzEncoder::new(archive_file, level);
    let mut tar_builder = Builder::new(enc);

    for source in sources {
        append_source(&mut tar_builder, source)?;
    }

    let encoder = tar_builder
        .into_inner()
        .map_err(|e| ArchiveError::new(ArchiveStage::Finish, archive_dest_path, e))?;
    let archive_file = encoder
        .finish()
        .map_err(|e| ArchiveError::new(ArchiveStage::Finish, archive_dest_path, e))?;
    archive_file
        .sync_all()
        .map_err(|e| ArchiveError::new(ArchiveStage::Finish, archive_dest_path, e))?;

    info!(
        "✓ Tar.gz archive created successfully at {}",
        archive_dest_path.display()
    );
    Ok(())
}

fn append_source<W: io::Write>(
    tar_builder: &mut Builder<W>,
    source: &Path,
) -> Result<(), ArchiveError> {
    let mut file =
        File::open(source).map_err(|e| ArchiveError::new(ArchiveStage::OpenSource, source, e))?;
    let metadata = file
        .metadata()
        .map_err(|e| ArchiveError::new(ArchiveStage::ReadMetadata, source, e))?;
    if !metadata.is_file() {
        return Err(ArchiveError::new(
            ArchiveStage::ReadMetadata,
            source,
            io::Error::new(io::ErrorKind::InvalidInput, "not a regular file"),
        ));
    }
    let name = source.file_name().ok_or_else(|| {
        ArchiveError::new(
            ArchiveStage::ReadMetadata,
            source,
            io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"),
        )
    })?;

    let mut header = Header::new_gnu();
    header.set_metadata(&metadata);
    header.set_size(metadata.len());
    header.set_cksum();

    debug!("Appending {} ({} bytes)", source.display(), metadata.len());
    tar_builder
        .append_data(&mut header, name, &mut file)
        .map_err(|e| ArchiveError::new(ArchiveStage::WriteEntry, source, e))
}

/// One archive entry read back from disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveMember {
    pub name: String,
    pub contents: Vec<u8>,
}

/// Reads every entry of a `.tar.gz` archive, decompressing member contents.
pub fn list_archive_members(archive_path: &Path) -> Result<Vec<ArchiveMember>, ArchiveError> {
    let verify_err = |e: io::Error| ArchiveError::new(ArchiveStage::Verify, archive_path, e);

    let archive_file = File::open(archive_path).map_err(verify_err)?;
    let mut archive = tar::Archive::new(GzDecoder::new(archive_file));

    let mut members = Vec::new();
    for entry in archive.entries().map_err(verify_err)? {
        let mut entry = entry.map_err(verify_err)?;
        let name = entry
            .path()
            .map_err(verify_err)?
            .to_string_lossy()
            .into_owned();
        let mut contents = Vec::new();
        entry.read_to_end(&mut contents).map_err(verify_err)?;
        members.push(ArchiveMember { name, contents });
    }
    Ok(members)
}

/// Confirms an archive decompresses fully and holds exactly the expected entry names.
pub fn verify_archive(archive_path: &Path, expected_names: &[String]) -> Result<(), ArchiveError> {
    let members = list_archive_members(archive_path)?;
    let names: Vec<&str> = members.iter().map(|m| m.name.as_str()).collect();
    if names != expected_names {
        return Err(ArchiveError::new(
            ArchiveStage::Verify,
            archive_path,
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("expected entries {:?}, found {:?}", expected_names, names),
            ),
        ));
    }
    Ok(())
}
