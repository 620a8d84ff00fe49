use super::{BlobStore, PutPolicy, UploadToken};
use crate::{Config, Result};
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use bytes::Bytes;
use snafu::prelude::*;
use std::sync::Arc;
use tracing::{debug, error, instrument, warn};

/// S3 rejects multipart parts smaller than this, except for the last one
const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// Implementation of [`BlobStore`] for S3 and S3-compatible APIs.
///
/// Tokens issued by this store carry the scope of their [`PutPolicy`].  A bucket-scoped token
/// writes with `If-None-Match: *`, so S3 itself rejects the write if the key already exists.  A
/// key-scoped token writes unconditionally, replacing any existing object.
#[derive(Clone)]
pub struct S3BlobStore {
    inner: Arc<S3Inner>,
}

struct S3Inner {
    client: aws_sdk_s3::Client,
}

impl S3BlobStore {
    pub async fn new(config: &Config) -> Self {
        Self::from_client(make_s3_client(config).await)
    }

    /// Use an already configured SDK client
    pub fn from_client(client: aws_sdk_s3::Client) -> Self {
        Self {
            inner: Arc::new(S3Inner { client }),
        }
    }

    pub(crate) fn client(&self) -> &aws_sdk_s3::Client {
        &self.inner.client
    }

    /// Recover the policy from a token, and make sure it permits writing `key`
    fn authorize(token: &UploadToken, key: &str) -> Result<PutPolicy> {
        let policy = PutPolicy::from_scope(token.as_str());
        policy.check_key(key)?;

        Ok(policy)
    }

    async fn upload_parts(
        &self,
        policy: &PutPolicy,
        key: &str,
        upload_id: &str,
        data: Bytes,
        chunk_size: usize,
    ) -> Result<String> {
        let bucket = policy.bucket();
        let mut completed_parts = Vec::new();

        // Parts are sent one at a time; concurrency is applied across files, not within one
        for (index, start) in (0..data.len()).step_by(chunk_size).enumerate() {
            let part_number = (index + 1) as i32;
            let end = (start + chunk_size).min(data.len());

            debug!(%key, part_number, start, end, "Uploading part");

            let response = self
                .inner
                .client
                .upload_part()
                .bucket(bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(data.slice(start..end)))
                .send()
                .await
                .with_context(|_| crate::error::UploadPartSnafu {
                    bucket,
                    key,
                    part_number,
                })?;

            completed_parts.push(
                CompletedPart::builder()
                    .set_e_tag(response.e_tag().map(|etag| etag.to_string()))
                    .part_number(part_number)
                    .build(),
            );
        }

        let mut request = self
            .inner
            .client
            .complete_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(completed_parts))
                    .build(),
            );
        if !policy.allows_overwrite() {
            request = request.if_none_match("*");
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) if is_precondition_failed(&e) => {
                return crate::error::ObjectExistsSnafu { bucket, key }.fail();
            }
            Err(e) => {
                return Err(e)
                    .with_context(|_| crate::error::CompleteMultipartUploadSnafu { bucket, key });
            }
        };

        etag_to_hash(key, response.e_tag())
    }
}

#[async_trait::async_trait]
impl BlobStore for S3BlobStore {
    fn name(&self) -> &str {
        "s3"
    }

    fn issue_token(&self, policy: &PutPolicy) -> UploadToken {
        // Requests are signed by the SDK client with the configured credentials, so the token
        // only needs to carry the scope
        UploadToken::new(policy.scope())
    }

    #[instrument(skip(self, token, data), fields(len = data.len()))]
    async fn put(&self, token: &UploadToken, key: &str, data: Bytes) -> Result<String> {
        let policy = Self::authorize(token, key)?;
        let bucket = policy.bucket();

        let mut request = self
            .inner
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_length(data.len() as i64)
            .body(ByteStream::from(data));
        if !policy.allows_overwrite() {
            request = request.if_none_match("*");
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) if is_precondition_failed(&e) => {
                return crate::error::ObjectExistsSnafu { bucket, key }.fail();
            }
            Err(e) => {
                return Err(e).with_context(|_| crate::error::PutObjectSnafu { bucket, key });
            }
        };

        etag_to_hash(key, response.e_tag())
    }

    #[instrument(skip(self, token, data))]
    async fn resumable_put(
        &self,
        token: &UploadToken,
        key: &str,
        data: Bytes,
        len: u64,
        chunk_size: usize,
    ) -> Result<String> {
        let policy = Self::authorize(token, key)?;
        let bucket = policy.bucket();

        debug_assert_eq!(len, data.len() as u64);

        let chunk_size = if chunk_size < MIN_PART_SIZE {
            debug!(
                chunk_size,
                MIN_PART_SIZE, "Requested chunk size is below the S3 minimum part size; using the minimum"
            );
            MIN_PART_SIZE
        } else {
            chunk_size
        };

        let response = self
            .inner
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .with_context(|_| crate::error::CreateMultipartUploadSnafu { bucket, key })?;
        let upload_id = response
            .upload_id()
            .with_context(|| crate::error::MissingUploadIdSnafu { key })?
            .to_string();

        let result = self
            .upload_parts(&policy, key, &upload_id, data, chunk_size)
            .await;

        if let Err(e) = &result {
            // Before reporting this error, clean up the remains of the multi-part upload
            error!(?e, %bucket, %key, %upload_id,
                "Multi-part upload failed; aborting multi-part upload on server side");

            if let Err(e) = self
                .inner
                .client
                .abort_multipart_upload()
                .bucket(bucket)
                .key(key)
                .upload_id(&upload_id)
                .send()
                .await
            {
                warn!(?e, %bucket, %key, %upload_id,
                    "Error aborting multi-part upload.  This will remain on the server forever unless there's a lifecycle policy configured");
            }
        }

        result
    }
}

impl std::fmt::Debug for S3BlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3BlobStore")
            .field("client", &"<...>")
            .finish()
    }
}

/// A conditional write with `If-None-Match: *` failed because the key already exists
fn is_precondition_failed<E>(err: &SdkError<E, HttpResponse>) -> bool {
    err.raw_response()
        .map(|response| response.status().as_u16() == 412)
        .unwrap_or(false)
}

/// S3 quotes its ETags; the hash reported for a file is the bare value
fn etag_to_hash(key: &str, etag: Option<&str>) -> Result<String> {
    let etag = etag.with_context(|| crate::error::MissingETagSnafu { key })?;

    Ok(etag.trim_matches('"').to_string())
}

/// Create a new AWS SDK S3 client from the config.
///
/// Explicit keys and region in the config take precedence; anything not set there is deduced
/// from the environment.
pub(crate) async fn make_s3_client(config: &Config) -> aws_sdk_s3::Client {
    let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());

    if let Some(region) = &config.region {
        loader = loader.region(aws_config::Region::new(region.clone()));
    }

    if let (Some(access_key), Some(secret_key)) = (&config.access_key, &config.secret_key) {
        loader = loader.credentials_provider(aws_credential_types::Credentials::from_keys(
            access_key.clone(),
            secret_key.clone(),
            None,
        ));
    }

    let aws_config = loader.load().await;

    let mut s3_config_builder = aws_sdk_s3::config::Builder::from(&aws_config);
    if let Some(s3_endpoint) = &config.s3_endpoint {
        // S3-compatible services generally don't support virtual-hosted bucket addressing
        s3_config_builder = s3_config_builder
            .endpoint_url(s3_endpoint.to_string())
            .force_path_style(true);
    }
    if aws_config.region().is_none() {
        s3_config_builder = s3_config_builder.region(aws_config::Region::new("us-east-1"));
    }

    aws_sdk_s3::Client::from_conf(s3_config_builder.build())
}
