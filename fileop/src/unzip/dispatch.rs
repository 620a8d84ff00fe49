//! Concurrent upload of extracted entries to the blob store.
//!
//! The blocking archive reader produces one [`UploadTask`] per regular file.  The dispatcher here
//! receives them in archive order and launches each as its own tokio task, holding a semaphore
//! permit for as long as the upload runs.  Once the number of uploads in flight reaches the
//! configured bound, the next launch waits until any one of them finishes.
use super::outcome::{OutcomeSender, ResultAggregator, UnzipReport, UploadOutcome, UploadStatus};
use super::UnzipProgressCallback;
use crate::objstore::{BlobStore, PutPolicy};
use crate::Result;
use bytes::Bytes;
use futures::StreamExt;
use snafu::prelude::*;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, instrument, Instrument};

/// Files up to and including this size are written with a single direct put
pub const DIRECT_PUT_THRESHOLD: u64 = 100 * 1024 * 1024;

/// Chunk size used for resumable puts of files larger than [`DIRECT_PUT_THRESHOLD`]
pub const RESUMABLE_CHUNK_SIZE: usize = 4 * 1024 * 1024;

/// How a single extracted file is written to the blob store
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UploadStrategy {
    /// One request carrying the whole file
    Direct,

    /// The file is sent in chunks of `chunk_size` bytes
    Resumable { chunk_size: usize },
}

impl UploadStrategy {
    pub fn for_size(size: u64) -> Self {
        if size <= DIRECT_PUT_THRESHOLD {
            Self::Direct
        } else {
            Self::Resumable {
                chunk_size: RESUMABLE_CHUNK_SIZE,
            }
        }
    }
}

/// One fully extracted file, ready to be uploaded
#[derive(Clone, Debug)]
pub(crate) struct UploadTask {
    /// The object key, the job prefix followed by the decoded entry name
    pub key: String,

    pub data: Bytes,

    pub policy: PutPolicy,
}

impl UploadTask {
    pub fn new(bucket: &str, prefix: &str, name: &str, overwrite: bool, data: Bytes) -> Self {
        let key = format!("{prefix}{name}");
        let policy = if overwrite {
            PutPolicy::for_key(bucket, key.clone())
        } else {
            PutPolicy::for_bucket(bucket)
        };

        Self { key, data, policy }
    }

    pub fn strategy(&self) -> UploadStrategy {
        UploadStrategy::for_size(self.data.len() as u64)
    }
}

/// Receive upload tasks until the sender is dropped, running up to `max_concurrent_uploads` of
/// them at a time.
///
/// Returns only once every launched upload has settled.  Failures of individual uploads are
/// recorded in the report, so the only errors returned from here are tasks that panicked.
#[instrument(skip(store, progress, task_receiver), fields(store = store.name()))]
pub(crate) async fn dispatch_uploads(
    max_concurrent_uploads: usize,
    store: Box<dyn BlobStore>,
    progress: Arc<dyn UnzipProgressCallback>,
    task_receiver: mpsc::Receiver<UploadTask>,
) -> Result<UnzipReport> {
    let permits = Arc::new(Semaphore::new(max_concurrent_uploads.max(1)));
    let aggregator = ResultAggregator::new();
    let mut uploads = JoinSet::new();
    let started = Instant::now();

    let mut tasks = tokio_stream::wrappers::ReceiverStream::new(task_receiver);

    while let Some(task) = tasks.next().await {
        let permit = permits
            .clone()
            .acquire_owned()
            .await
            .expect("BUG: upload semaphore is never closed");

        let store = store.clone();
        let progress = progress.clone();
        let sender = aggregator.sender();
        let span = tracing::debug_span!("upload", key = %task.key);

        uploads.spawn(
            async move {
                upload_file(store, progress, task, sender).await;

                // Release the slot only once the outcome has been recorded
                drop(permit);
            }
            .instrument(span),
        );
    }

    debug!(
        launched = uploads.len(),
        "All upload tasks launched; waiting for them to finish"
    );

    // Wait for every upload even if one of them panicked, so nothing is left running when this
    // returns
    let mut join_error = None;
    while let Some(result) = uploads.join_next().await {
        if let Err(e) = result {
            error!(err = ?e, "Upload task panicked");
            join_error.get_or_insert(e);
        }
    }
    if let Some(e) = join_error {
        return Err(e).with_context(|_| crate::error::UploadTaskSnafu {});
    }

    let report = aggregator.finalize().await;

    progress.uploads_finished(
        report.succeeded().count(),
        report.failed().count(),
        started.elapsed(),
    );

    Ok(report)
}

/// Write one file to the store and record its outcome.  Never fails; a failed upload is an
/// outcome like any other.
async fn upload_file(
    store: Box<dyn BlobStore>,
    progress: Arc<dyn UnzipProgressCallback>,
    task: UploadTask,
    sender: OutcomeSender,
) {
    let UploadTask { key, data, policy } = task;
    let len = data.len() as u64;
    let strategy = UploadStrategy::for_size(len);

    debug!(%key, len, ?strategy, scope = %policy.scope(), "Uploading extracted file");
    progress.upload_starting(&key, len, strategy);

    let token = store.issue_token(&policy);
    let result = match strategy {
        UploadStrategy::Direct => store.put(&token, &key, data).await,
        UploadStrategy::Resumable { chunk_size } => {
            store
                .resumable_put(&token, &key, data, len, chunk_size)
                .await
        }
    };

    let status = match result {
        Ok(hash) => {
            debug!(%key, %hash, "Upload finished");
            progress.upload_finished(&key, len);

            UploadStatus::Hash(hash)
        }
        Err(e) => {
            error!(%key, err = ?e, "Upload failed");
            progress.upload_failed(&key, &e);

            UploadStatus::Error(format!(
                "save unzip file to bucket error, {}",
                e.to_chain_string()
            ))
        }
    };

    sender.append(UploadOutcome { key, status });
}
