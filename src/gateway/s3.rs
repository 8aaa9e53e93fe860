//! AWS SDK backed gateway implementation

use super::{ObjectInfo, ObjectStream, ObjectStoreGateway, PartRecord};
use crate::error::{Error, GatewayError, Result};
use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use std::path::Path;
use tokio::io::{AsyncReadExt, AsyncSeekExt, SeekFrom};

/// Gateway over an S3-compatible store via the AWS SDK
///
/// Works against AWS S3, MinIO, and R2; the caller supplies a fully
/// configured [`Client`] (endpoint, credentials, region).
#[derive(Clone)]
pub struct S3Gateway {
    client: Client,
}

impl S3Gateway {
    /// Wrap a configured SDK client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

/// Map an SDK failure onto the gateway error taxonomy
///
/// Connection-level failures are transient; service errors are classified by
/// their error code so the retry policy never has to parse store responses.
fn classify<E>(context: &str, err: &SdkError<E>) -> GatewayError
where
    E: ProvideErrorMetadata + std::fmt::Debug,
{
    match err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            GatewayError::Transient(format!("{context}: {err:?}"))
        }
        SdkError::ServiceError(svc) => {
            let code = svc.err().code().unwrap_or("");
            let message = svc.err().message().unwrap_or("");
            match code {
                "NoSuchUpload" | "NoSuchKey" | "NoSuchBucket" => {
                    GatewayError::NotFound(format!("{context}: {code}: {message}"))
                }
                "AccessDenied" | "InvalidAccessKeyId" | "SignatureDoesNotMatch"
                | "ExpiredToken" | "TokenRefreshRequired" => {
                    GatewayError::Auth(format!("{context}: {code}: {message}"))
                }
                "InvalidPart" => {
                    GatewayError::IncompleteParts(format!("{context}: {code}: {message}"))
                }
                "InvalidPartOrder" => {
                    GatewayError::InvalidPartOrder(format!("{context}: {code}: {message}"))
                }
                "SlowDown" | "RequestTimeout" | "InternalError" | "ServiceUnavailable" => {
                    GatewayError::Transient(format!("{context}: {code}: {message}"))
                }
                _ => GatewayError::Other(format!("{context}: {code}: {message}")),
            }
        }
        other => GatewayError::Other(format!("{context}: {other:?}")),
    }
}

#[async_trait]
impl ObjectStoreGateway for S3Gateway {
    async fn start_or_resume_upload(
        &self,
        bucket: &str,
        key: &str,
        known_upload_id: Option<&str>,
    ) -> Result<String> {
        // A persisted session ID is reused only if the store still knows it
        if let Some(id) = known_upload_id {
            match self
                .client
                .list_parts()
                .bucket(bucket)
                .key(key)
                .upload_id(id)
                .max_parts(1)
                .send()
                .await
            {
                Ok(_) => {
                    tracing::debug!(bucket, key, upload_id = id, "Reusing persisted upload session");
                    return Ok(id.to_string());
                }
                Err(ref e) if matches!(classify("list_parts", e), GatewayError::NotFound(_)) => {
                    tracing::info!(
                        bucket,
                        key,
                        upload_id = id,
                        "Persisted upload session expired on store, starting fresh"
                    );
                }
                Err(e) => return Err(classify("list_parts", &e).into()),
            }
        } else {
            // No persisted ID; reattach to any open session the store holds
            // for this exact key
            let listing = self
                .client
                .list_multipart_uploads()
                .bucket(bucket)
                .prefix(key)
                .send()
                .await
                .map_err(|e| classify("list_multipart_uploads", &e))?;

            if let Some(id) = listing
                .uploads()
                .iter()
                .find(|u| u.key() == Some(key))
                .and_then(|u| u.upload_id())
            {
                tracing::debug!(bucket, key, upload_id = id, "Reattached to open upload session");
                return Ok(id.to_string());
            }
        }

        let created = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| classify("create_multipart_upload", &e))?;

        created
            .upload_id()
            .map(|id| id.to_string())
            .ok_or_else(|| {
                Error::Gateway(GatewayError::Protocol(
                    "store returned no upload ID for new multipart session".to_string(),
                ))
            })
    }

    async fn list_parts(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<Vec<PartRecord>> {
        let mut records = Vec::new();
        let mut marker: Option<i32> = None;

        // ListParts is paginated at 1000 parts per page
        loop {
            let resp = self
                .client
                .list_parts()
                .bucket(bucket)
                .key(key)
                .upload_id(upload_id)
                .set_part_number_marker(marker.map(|m| m.to_string()))
                .send()
                .await
                .map_err(|e| classify("list_parts", &e))?;

            for part in resp.parts() {
                let (Some(part_number), Some(etag)) = (part.part_number(), part.e_tag()) else {
                    continue;
                };
                records.push(PartRecord {
                    part_number,
                    etag: etag.to_string(),
                    size: part.size().unwrap_or(0).max(0) as u64,
                });
            }

            if resp.is_truncated().unwrap_or(false) {
                marker = resp
                    .next_part_number_marker()
                    .and_then(|m| m.parse::<i32>().ok());
                if marker.is_none() {
                    break;
                }
            } else {
                break;
            }
        }

        records.sort_by_key(|r| r.part_number);
        Ok(records)
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        source: &Path,
        offset: u64,
        len: u64,
    ) -> Result<PartRecord> {
        let mut file = tokio::fs::File::open(source).await?;
        file.seek(SeekFrom::Start(offset)).await?;

        let mut buffer = vec![0u8; len as usize];
        file.read_exact(&mut buffer).await?;

        let resp = self
            .client
            .upload_part()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(ByteStream::from(bytes::Bytes::from(buffer)))
            .send()
            .await
            .map_err(|e| classify("upload_part", &e))?;

        let etag = resp.e_tag().map(|t| t.to_string()).ok_or_else(|| {
            Error::Gateway(GatewayError::Protocol(format!(
                "store returned no etag for part {part_number}"
            )))
        })?;

        Ok(PartRecord {
            part_number,
            etag,
            size: len,
        })
    }

    async fn complete_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[PartRecord],
    ) -> Result<Option<String>> {
        let completed_parts: Vec<CompletedPart> = parts
            .iter()
            .map(|p| {
                CompletedPart::builder()
                    .part_number(p.part_number)
                    .e_tag(&p.etag)
                    .build()
            })
            .collect();

        let completed_upload = CompletedMultipartUpload::builder()
            .set_parts(Some(completed_parts))
            .build();

        let resp = self
            .client
            .complete_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed_upload)
            .send()
            .await
            .map_err(|e| classify("complete_multipart_upload", &e))?;

        Ok(resp.e_tag().map(|t| t.to_string()))
    }

    async fn abort_upload(&self, bucket: &str, key: &str, upload_id: &str) -> Result<()> {
        match self
            .client
            .abort_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
        {
            Ok(_) => Ok(()),
            // A session the store already dropped counts as aborted
            Err(ref e) if matches!(classify("abort_upload", e), GatewayError::NotFound(_)) => {
                tracing::debug!(bucket, key, upload_id, "Upload session already gone on abort");
                Ok(())
            }
            Err(e) => Err(classify("abort_upload", &e).into()),
        }
    }

    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectInfo> {
        let resp = self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| classify("head_object", &e))?;

        Ok(ObjectInfo {
            content_length: resp.content_length().unwrap_or(0).max(0) as u64,
            etag: resp.e_tag().map(|t| t.to_string()),
        })
    }

    async fn get_object_stream(
        &self,
        bucket: &str,
        key: &str,
        offset: u64,
    ) -> Result<ObjectStream> {
        let resp = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .set_range((offset > 0).then(|| format!("bytes={offset}-")))
            .send()
            .await
            .map_err(|e| classify("get_object", &e))?;

        // For a ranged read the content length covers only the remaining
        // bytes, so the total is offset plus what the store reports
        let total_size = resp
            .content_length()
            .map(|len| offset + len.max(0) as u64);

        Ok(ObjectStream {
            reader: Box::new(resp.body.into_async_read()),
            total_size,
        })
    }

    fn supports_range_resume(&self) -> bool {
        true
    }
}
