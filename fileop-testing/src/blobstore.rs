//! An in-memory [`BlobStore`] that records every call, for testing the unzip pipeline without
//! object storage
use bytes::Bytes;
use fileop::{BlobStore, FileOpError, PutPolicy, UploadToken};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Which of the two put operations was called
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PutKind {
    Direct,
    Resumable { len: u64, chunk_size: usize },
}

/// One call to the store, successful or not
#[derive(Clone, Debug)]
pub struct RecordedPut {
    /// Scope of the token used for the call
    pub scope: String,
    pub key: String,
    pub data: Bytes,
    pub kind: PutKind,
    pub succeeded: bool,
}

/// Behaves like a real store with conditional writes: a bucket-scoped token can't replace an
/// existing object, and a key-scoped token can only write its own key.
///
/// Hashes are the hex SHA-256 of the object contents.
#[derive(Clone, Debug, Default)]
pub struct RecordingBlobStore {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    puts: Mutex<Vec<RecordedPut>>,
    objects: Mutex<HashMap<(String, String), Bytes>>,
    delay: Mutex<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl RecordingBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every put take at least this long, so concurrent puts overlap
    pub fn with_delay(self, delay: Duration) -> Self {
        *self.inner.delay.lock().unwrap() = delay;

        self
    }

    /// Put an object in the store without recording a call
    pub fn insert_object(&self, bucket: &str, key: &str, data: impl Into<Bytes>) {
        self.inner
            .objects
            .lock()
            .unwrap()
            .insert((bucket.to_string(), key.to_string()), data.into());
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<Bytes> {
        self.inner
            .objects
            .lock()
            .unwrap()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    /// Every call made so far, in the order they completed
    pub fn puts(&self) -> Vec<RecordedPut> {
        self.inner.puts.lock().unwrap().clone()
    }

    /// The call for `key`.  Panics unless there was exactly one.
    pub fn put_for(&self, key: &str) -> RecordedPut {
        let puts = self
            .puts()
            .into_iter()
            .filter(|put| put.key == key)
            .collect::<Vec<_>>();
        assert_eq!(1, puts.len(), "expected exactly one put of '{key}'");

        puts.into_iter().next().unwrap()
    }

    /// The largest number of puts that were in progress at the same time
    pub fn max_in_flight(&self) -> usize {
        self.inner.max_in_flight.load(Ordering::SeqCst)
    }

    /// The hash this store reports for `data`
    pub fn hash_of(data: &[u8]) -> String {
        format!("{:x}", Sha256::digest(data))
    }

    async fn store(
        &self,
        token: &UploadToken,
        key: &str,
        data: Bytes,
        kind: PutKind,
    ) -> fileop::Result<String> {
        let in_flight = self.inner.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner
            .max_in_flight
            .fetch_max(in_flight, Ordering::SeqCst);

        let delay = *self.inner.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let result = self.write(token, key, data.clone());

        self.inner.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.inner.puts.lock().unwrap().push(RecordedPut {
            scope: token.as_str().to_string(),
            key: key.to_string(),
            data,
            kind,
            succeeded: result.is_ok(),
        });

        result
    }

    fn write(&self, token: &UploadToken, key: &str, data: Bytes) -> fileop::Result<String> {
        let policy = PutPolicy::from_scope(token.as_str());
        policy.check_key(key)?;

        let mut objects = self.inner.objects.lock().unwrap();
        let object_key = (policy.bucket().to_string(), key.to_string());

        if !policy.allows_overwrite() && objects.contains_key(&object_key) {
            return Err(FileOpError::ObjectExists {
                bucket: policy.bucket().to_string(),
                key: key.to_string(),
            });
        }

        let hash = Self::hash_of(&data);
        objects.insert(object_key, data);

        Ok(hash)
    }
}

#[async_trait::async_trait]
impl BlobStore for RecordingBlobStore {
    fn name(&self) -> &str {
        "recording"
    }

    fn issue_token(&self, policy: &PutPolicy) -> UploadToken {
        UploadToken::new(policy.scope())
    }

    async fn put(&self, token: &UploadToken, key: &str, data: Bytes) -> fileop::Result<String> {
        self.store(token, key, data, PutKind::Direct).await
    }

    async fn resumable_put(
        &self,
        token: &UploadToken,
        key: &str,
        data: Bytes,
        len: u64,
        chunk_size: usize,
    ) -> fileop::Result<String> {
        assert_eq!(len, data.len() as u64, "declared length must match the data");

        self.store(token, key, data, PutKind::Resumable { len, chunk_size })
            .await
    }
}
