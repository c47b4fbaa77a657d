// databasebackup/src/backup/transport.rs
use async_trait::async_trait;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use super::ftp_upload::FtpTransport;
use super::s3_upload::S3Transport;
use crate::config::{Protocol, UploadTarget};
use crate::errors::{TransportError, TransportStage};
use crate::utils::redact::redact;

/// Delivers one local file to one remote target.
///
/// Implementations release any session they opened before returning, on
/// success and on failure alike.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn deliver(&self, target: &UploadTarget, local_path: &Path)
    -> Result<(), TransportError>;
}

/// Builds a `TransportError` for `target`, scrubbing its password from the message.
pub fn transport_error(
    target: &UploadTarget,
    stage: TransportStage,
    message: impl fmt::Display,
) -> TransportError {
    TransportError {
        target: target.label(),
        stage,
        message: redact(&message.to_string(), &[target.password.as_str()]),
    }
}

/// Remote file name for an upload: the local base name.
pub fn remote_file_name(target: &UploadTarget, local_path: &Path) -> Result<String, TransportError> {
    local_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| {
            transport_error(
                target,
                TransportStage::OpenLocal,
                format!("{} has no file name", local_path.display()),
            )
        })
}

/// Routes each target to the client for its configured protocol.
#[derive(Debug, Clone, Default)]
pub struct ProtocolTransport {
    ftp: FtpTransport,
    s3: S3Transport,
}

impl ProtocolTransport {
    pub fn new(io_timeout: Duration) -> Self {
        Self {
            ftp: FtpTransport::new(io_timeout),
            s3: S3Transport,
        }
    }
}

#[async_trait]
impl Transport for ProtocolTransport {
    async fn deliver(
        &self,
        target: &UploadTarget,
        local_path: &Path,
    ) -> Result<(), TransportError> {
        match target.protocol {
            Protocol::Ftp => self.ftp.deliver(target, local_path).await,
            Protocol::S3 => self.s3.deliver(target, local_path).await,
        }
    }
}
