pub(crate) mod archive;
pub(crate) mod db_dump;
pub(crate) mod ftp_upload;
pub(crate) mod logic;
pub(crate) mod s3_upload;
pub(crate) mod transport;

use anyhow::Result;
use std::sync::Arc;

use crate::config::AppConfig;
use archive::TarGzArchiver;
use db_dump::MysqlDumpProducer;
use logic::{BackupPipeline, PipelineReport, PipelineSettings};
use transport::ProtocolTransport;

/// Public entry point for the backup process.
/// Wires mysqldump, the tar.gz archiver and the protocol transports into one pipeline run.
pub async fn run_backup_flow(app_config: &AppConfig) -> Result<PipelineReport> {
    let pipeline = BackupPipeline::new(
        Arc::new(MysqlDumpProducer::new(app_config.database.clone())),
        Arc::new(TarGzArchiver::default()),
        Arc::new(ProtocolTransport::new(app_config.delivery.timeout)),
        app_config.targets.clone(),
        PipelineSettings::from_config(app_config),
    );
    Ok(pipeline.run().await?)
}
