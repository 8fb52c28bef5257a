// Copyright (c) James Kassemi, SC, US. All rights reserved.
use async_trait::async_trait;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;
use core_types::config::StoreConfig;
use core_types::retry::RetryPolicy;
use std::io;

use crate::{Blob, BlobError, BlobStore, Generation, WriteCondition};

const STATUS_NOT_FOUND: u16 = 404;
const STATUS_CONFLICT: u16 = 409;
const STATUS_PRECONDITION_FAILED: u16 = 412;

#[derive(Debug, Clone)]
pub struct S3Settings {
    pub bucket: String,
    pub endpoint: Option<String>,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub force_path_style: bool,
}

impl From<&StoreConfig> for S3Settings {
    fn from(config: &StoreConfig) -> Self {
        Self {
            bucket: config.bucket.clone(),
            endpoint: config.endpoint.clone(),
            region: config.region.clone(),
            access_key_id: config.access_key_id.clone(),
            secret_access_key: config.secret_access_key.clone(),
            force_path_style: config.force_path_style,
        }
    }
}

/// S3-compatible store. The object ETag serves as the generation and writes
/// use `If-Match` / `If-None-Match: *`.
#[derive(Clone)]
pub struct S3BlobStore {
    client: Client,
    bucket: String,
    retry: RetryPolicy,
}

impl S3BlobStore {
    pub fn new(settings: &S3Settings) -> Self {
        let credentials = Credentials::new(
            settings.access_key_id.clone(),
            settings.secret_access_key.clone(),
            None,
            None,
            "processing-ledger",
        );
        let mut builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .force_path_style(settings.force_path_style)
            .region(Region::new(settings.region.clone()))
            .credentials_provider(credentials);
        if let Some(endpoint) = &settings.endpoint {
            builder = builder.endpoint_url(endpoint.clone());
        }
        Self::from_client(Client::from_conf(builder.build()), settings.bucket.clone())
    }

    pub fn from_client(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            retry: RetryPolicy::default_network(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn head_generation(&self, key: &str) -> Result<Generation, BlobError> {
        let output = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| classify(key, err))?;
        etag(key, output.e_tag())
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn exists(&self, key: &str) -> Result<bool, BlobError> {
        let result = self
            .retry
            .retry_async_if(|_| self.head_generation(key), BlobError::is_transient)
            .await;
        match result {
            Ok(_) => Ok(true),
            Err(BlobError::NotFound { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn get(&self, key: &str) -> Result<Blob, BlobError> {
        self.retry
            .retry_async_if(
                |attempt| async move {
                    if attempt > 0 {
                        log::debug!(
                            "retrying get of s3://{}/{} (attempt {})",
                            self.bucket,
                            key,
                            attempt + 1
                        );
                    }
                    let output = self
                        .client
                        .get_object()
                        .bucket(&self.bucket)
                        .key(key)
                        .send()
                        .await
                        .map_err(|err| {
                            let not_found = err
                                .as_service_error()
                                .map(|service| service.is_no_such_key())
                                .unwrap_or(false);
                            if not_found {
                                BlobError::NotFound {
                                    key: key.to_string(),
                                }
                            } else {
                                classify(key, err)
                            }
                        })?;
                    let generation = etag(key, output.e_tag())?;
                    let bytes = output
                        .body
                        .collect()
                        .await
                        .map_err(BlobError::unavailable)?
                        .into_bytes();
                    Ok::<_, BlobError>(Blob { bytes, generation })
                },
                BlobError::is_transient,
            )
            .await
    }

    async fn put(
        &self,
        key: &str,
        bytes: Bytes,
        condition: WriteCondition,
    ) -> Result<Generation, BlobError> {
        let output = self
            .retry
            .retry_async_if(
                |_| {
                    let mut request = self
                        .client
                        .put_object()
                        .bucket(&self.bucket)
                        .key(key)
                        .content_type("application/vnd.apache.parquet")
                        .body(ByteStream::from(bytes.clone()));
                    request = match &condition {
                        WriteCondition::DoesNotExist => request.if_none_match("*"),
                        WriteCondition::Matches(generation) => {
                            request.if_match(generation.as_str())
                        }
                    };
                    async move { request.send().await.map_err(|err| classify(key, err)) }
                },
                BlobError::is_transient,
            )
            .await?;
        match output.e_tag() {
            Some(tag) => Ok(Generation::new(tag)),
            // Some S3-compatible servers omit the ETag on PUT.
            None => self.head_generation(key).await,
        }
    }
}

fn etag(key: &str, tag: Option<&str>) -> Result<Generation, BlobError> {
    tag.map(Generation::new).ok_or_else(|| {
        BlobError::unavailable(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("object {key} has no etag"),
        ))
    })
}

fn classify<E>(key: &str, err: SdkError<E, aws_sdk_s3::config::http::HttpResponse>) -> BlobError
where
    E: std::error::Error + Send + Sync + 'static,
{
    let status = err.raw_response().map(|resp| resp.status().as_u16());
    status_error(key, status).unwrap_or_else(|| BlobError::unavailable(err))
}

/// Statuses with a meaning for the ledger; anything else is an outage.
fn status_error(key: &str, status: Option<u16>) -> Option<BlobError> {
    match status? {
        STATUS_PRECONDITION_FAILED | STATUS_CONFLICT => Some(BlobError::PreconditionFailed {
            key: key.to_string(),
        }),
        STATUS_NOT_FOUND => Some(BlobError::NotFound {
            key: key.to_string(),
        }),
        _ => None,
    }
}
