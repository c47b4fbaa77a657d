// databasebackup/src/backup/s3_upload.rs
use async_trait::async_trait;
use aws_sdk_s3 as s3;
use s3::config::Region;
use s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use s3::primitives::ByteStream;
use std::path::Path;
use tracing::info;

use super::transport::{Transport, remote_file_name, transport_error};
use crate::config::UploadTarget;
use crate::errors::{TransportError, TransportStage};

const DEFAULT_REGION: &str = "us-east-1";

/// Uploads to an S3-compatible object storage service (like DigitalOcean Spaces).
#[derive(Debug, Clone, Copy, Default)]
pub struct S3Transport;

/// Splits `bucket[/prefix]` into the bucket and an optional key prefix.
pub fn split_bucket_and_prefix(remote_directory: &str) -> (String, Option<String>) {
    let trimmed = remote_directory.trim_matches('/');
    match trimmed.split_once('/') {
        Some((bucket, prefix)) => {
            let prefix = prefix.trim_matches('/');
            (
                bucket.to_string(),
                (!prefix.is_empty()).then(|| prefix.to_string()),
            )
        }
        None => (trimmed.to_string(), None),
    }
}

fn endpoint_url(host: &str) -> String {
    if host.contains("://") {
        host.to_string()
    } else {
        format!("https://{}", host)
    }
}

fn classify_sdk_error<E, R>(err: &SdkError<E, R>) -> TransportStage
where
    E: ProvideErrorMetadata,
{
    match err {
        SdkError::DispatchFailure(_) | SdkError::TimeoutError(_) => TransportStage::Connect,
        _ => match err.as_service_error().and_then(|e| e.code()) {
            Some("AccessDenied" | "InvalidAccessKeyId" | "SignatureDoesNotMatch") => {
                TransportStage::Authenticate
            }
            _ => TransportStage::Store,
        },
    }
}

async fn build_client(target: &UploadTarget) -> s3::Client {
    let region = target
        .region
        .clone()
        .unwrap_or_else(|| DEFAULT_REGION.to_string());
    let sdk_config = aws_config::defaults(s3::config::BehaviorVersion::latest())
        .endpoint_url(endpoint_url(&target.host))
        .region(Region::new(region))
        .credentials_provider(s3::config::Credentials::new(
            &target.username,
            &target.password,
            None,     // session_token
            None,     // expiry
            "Static", // provider_name
        ))
        .load()
        .await;

    // Path-style addressing keeps MinIO and similar endpoints working.
    let s3_config = s3::config::Builder::from(&sdk_config)
        .force_path_style(true)
        .build();
    s3::Client::from_conf(s3_config)
}

#[async_trait]
impl Transport for S3Transport {
    async fn deliver(
        &self,
        target: &UploadTarget,
        local_path: &Path,
    ) -> Result<(), TransportError> {
        let (bucket, prefix) = split_bucket_and_prefix(&target.remote_directory);
        let file_name = remote_file_name(target, local_path)?;
        let s3_key = match prefix {
            Some(prefix) => format!("{}/{}", prefix, file_name),
            None => file_name,
        };

        let body = ByteStream::from_path(local_path).await.map_err(|e| {
            transport_error(
                target,
                TransportStage::OpenLocal,
                format!("{}: {}", local_path.display(), e),
            )
        })?;

        info!(
            "Uploading {} to bucket {} with key {} on {}",
            local_path.display(),
            bucket,
            s3_key,
            target.label()
        );

        let client = build_client(target).await;
        client
            .put_object()
            .bucket(&bucket)
            .key(&s3_key)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                transport_error(target, classify_sdk_error(&e), DisplayErrorContext(&e))
            })?;

        info!(
            "✅ Successfully uploaded {} to bucket {} with key {}",
            local_path.display(),
            bucket,
            s3_key
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_bucket_and_prefix() {
        assert_eq!(split_bucket_and_prefix("backups"), ("backups".to_string(), None));
        assert_eq!(
            split_bucket_and_prefix("/backups/shop/nightly/"),
            ("backups".to_string(), Some("shop/nightly".to_string()))
        );
        assert_eq!(split_bucket_and_prefix("backups/"), ("backups".to_string(), None));
    }

    #[test]
    fn test_endpoint_defaults_to_https() {
        assert_eq!(endpoint_url("fra1.digitaloceanspaces.com"), "https://fra1.digitaloceanspaces.com");
        assert_eq!(endpoint_url("http://127.0.0.1:9000"), "http://127.0.0.1:9000");
    }
}
