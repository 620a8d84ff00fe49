use crate::Result;
use bytes::Bytes;
use dyn_clone::DynClone;

mod s3;

pub use s3::S3BlobStore;

/// Describes what an upload token is allowed to write.
///
/// A policy scoped to a whole bucket permits creating new objects anywhere in the bucket but
/// never replacing an existing one.  A policy scoped to a single key permits writing only that
/// key, and replacing it if it already exists.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PutPolicy {
    bucket: String,
    key: Option<String>,
}

impl PutPolicy {
    /// Permit creating new objects anywhere in `bucket`
    pub fn for_bucket(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: None,
        }
    }

    /// Permit writing, and overwriting, exactly `key` in `bucket`
    pub fn for_key(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: Some(key.into()),
        }
    }

    /// Parse a scope string of the form `bucket` or `bucket:key`
    pub fn from_scope(scope: &str) -> Self {
        match scope.split_once(':') {
            Some((bucket, key)) => Self::for_key(bucket, key),
            None => Self::for_bucket(scope),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    /// Whether an existing object at the target key may be replaced
    pub fn allows_overwrite(&self) -> bool {
        self.key.is_some()
    }

    /// The scope string, `bucket` or `bucket:key`
    pub fn scope(&self) -> String {
        match &self.key {
            Some(key) => format!("{}:{}", self.bucket, key),
            None => self.bucket.clone(),
        }
    }

    /// Fail unless this policy permits writing `key`
    pub fn check_key(&self, key: &str) -> Result<()> {
        match &self.key {
            Some(scoped_key) if scoped_key != key => crate::error::TokenScopeMismatchSnafu {
                scope: self.scope(),
                key,
            }
            .fail(),
            _ => Ok(()),
        }
    }
}

/// Authorization for one upload, issued by a [`BlobStore`] for a [`PutPolicy`].
///
/// The token is opaque to callers; only the store that issued it knows how to use it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadToken(String);

impl UploadToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A blob store to which extracted files are written.
///
/// The store offers two ways to write an object: a direct single-request put for payloads that
/// are reasonably small, and a resumable put that sends the payload in fixed-size chunks.  Which
/// one to use is the caller's decision.
///
/// Note that all implementations are trivially cloneable such that the cost of a clone is the cost
/// of increasing the ref count on an `Arc`
#[async_trait::async_trait]
pub trait BlobStore: DynClone + std::fmt::Debug + Sync + Send + 'static {
    /// Short name of the store technology, for logging
    fn name(&self) -> &str;

    /// Issue an upload token for `policy`
    fn issue_token(&self, policy: &PutPolicy) -> UploadToken;

    /// Write `data` to `key` in one request.
    ///
    /// Returns the content hash the store computed for the new object.
    async fn put(&self, token: &UploadToken, key: &str, data: Bytes) -> Result<String>;

    /// Write `data` to `key` in chunks of `chunk_size` bytes.
    ///
    /// `len` is the declared total length of the object and must equal `data.len()`.  Returns the
    /// content hash the store computed for the new object.
    async fn resumable_put(
        &self,
        token: &UploadToken,
        key: &str,
        data: Bytes,
        len: u64,
        chunk_size: usize,
    ) -> Result<String>;
}

dyn_clone::clone_trait_object!(BlobStore);
