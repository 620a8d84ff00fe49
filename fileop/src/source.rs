//! Retrieval of the source file named in an operation request.
use crate::Result;
use bytes::Bytes;
use snafu::prelude::*;
use std::path::PathBuf;
use tracing::{debug, instrument};
use url::Url;

/// Where the source file of a request is read from
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceArchive {
    /// Download with an HTTP(S) `GET`
    Http(Url),

    /// Read an object from S3, from a URL of the form `s3://bucket/key`
    ObjectStorage { bucket: String, key: String },

    /// Read a file from the local filesystem
    File(PathBuf),
}

impl SourceArchive {
    pub fn from_url(url: &str) -> Result<Self> {
        let parsed = Url::parse(url).with_context(|_| crate::error::InvalidSourceUrlSnafu { url })?;

        match parsed.scheme() {
            "http" | "https" => Ok(Self::Http(parsed)),
            "s3" => {
                let bucket = parsed.host_str().unwrap_or_default().to_string();
                let key = parsed.path().trim_start_matches('/').to_string();

                ensure!(
                    !bucket.is_empty() && !key.is_empty(),
                    crate::error::UnsupportedSourceUrlSnafu { url: parsed }
                );

                Ok(Self::ObjectStorage { bucket, key })
            }
            "file" => match parsed.to_file_path() {
                Ok(path) => Ok(Self::File(path)),
                Err(()) => crate::error::UnsupportedSourceUrlSnafu { url: parsed }.fail(),
            },
            _ => crate::error::UnsupportedSourceUrlSnafu { url: parsed }.fail(),
        }
    }
}

/// Reads [`SourceArchive`]s into memory.
///
/// Cheap to clone; both clients are reference counted internally.
#[derive(Clone, Debug)]
pub struct SourceFetcher {
    http: reqwest::Client,
    s3: Option<aws_sdk_s3::Client>,
}

impl SourceFetcher {
    /// `s3` is needed only to read `s3://` sources; without it those fail as unsupported
    pub fn new(s3: Option<aws_sdk_s3::Client>) -> Self {
        Self {
            http: reqwest::Client::new(),
            s3,
        }
    }

    #[instrument(skip(self))]
    pub async fn fetch(&self, source: &SourceArchive) -> Result<Bytes> {
        let data = match source {
            SourceArchive::Http(url) => {
                let response = self
                    .http
                    .get(url.clone())
                    .send()
                    .await
                    .with_context(|_| crate::error::FetchSourceSnafu { url: url.clone() })?;

                let status = response.status();
                ensure!(
                    status.is_success(),
                    crate::error::FetchSourceStatusSnafu {
                        url: url.clone(),
                        status
                    }
                );

                response
                    .bytes()
                    .await
                    .with_context(|_| crate::error::FetchSourceSnafu { url: url.clone() })?
            }
            SourceArchive::ObjectStorage { bucket, key } => {
                let client = match &self.s3 {
                    Some(client) => client,
                    None => {
                        let url = Url::parse(&format!("s3://{bucket}/{key}"))
                            .with_context(|_| crate::error::InvalidSourceUrlSnafu {
                                url: format!("s3://{bucket}/{key}"),
                            })?;

                        return crate::error::UnsupportedSourceUrlSnafu { url }.fail();
                    }
                };

                let response = client
                    .get_object()
                    .bucket(bucket)
                    .key(key)
                    .send()
                    .await
                    .with_context(|_| crate::error::GetSourceObjectSnafu { bucket, key })?;

                response
                    .body
                    .collect()
                    .await
                    .with_context(|_| crate::error::ReadSourceObjectSnafu { bucket, key })?
                    .into_bytes()
            }
            SourceArchive::File(path) => Bytes::from(
                tokio::fs::read(path)
                    .await
                    .with_context(|_| crate::error::ReadSourceFileSnafu { path })?,
            ),
        };

        debug!(len = data.len(), "Fetched source data");

        Ok(data)
    }
}
