//! Implementation of the unzip operation, which expands a zip archive and writes every file in it
//! to a bucket in the blob store.
//!
//! The caller builds an [`UnzipJob`] from the archive contents and the parsed
//! [`UnzipDescriptor`], then calls [`UnzipJob::run`].  Progress is reported through a
//! caller-provided implementation of [`UnzipProgressCallback`].  Within a task runner the
//! [`Unzipper`] operation does all of that from an [`OperationRequest`].
//!
//! The `zip` crate's API is blocking, so the archive is inspected and its entries are decompressed
//! in a blocking task.  Each fully extracted file is handed over a channel to an async dispatcher
//! which uploads it concurrently with the files before and after it.  Every check that can reject
//! the archive as a whole runs before the first file is handed over, so a rejected archive never
//! results in any uploads.
use crate::objstore::BlobStore;
use crate::operation::{FileOperation, OperationOutput, OperationRequest};
use crate::source::{SourceArchive, SourceFetcher};
use crate::{Config, FileOpError, Result};
use bytes::{BufMut, Bytes, BytesMut};
use snafu::prelude::*;
use std::io::{Cursor, Read};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, info_span, instrument, Instrument};

mod descriptor;
mod dispatch;
mod inspect;
mod names;
mod outcome;

pub use descriptor::UnzipDescriptor;
pub use dispatch::{UploadStrategy, DIRECT_PUT_THRESHOLD, RESUMABLE_CHUNK_SIZE};
pub use outcome::{UnzipReport, UploadOutcome, UploadStatus};

use dispatch::UploadTask;
use inspect::{ArchiveEntry, ArchiveLimits, InspectedArchive};

const OPERATION: &str = "unzip";

/// Upper bound on the buffer reserved for an entry before any of it has been read
const MAX_INITIAL_ENTRY_BUFFER: u64 = 8 * 1024 * 1024;

/// Mime types accepted as zip archives
const ZIP_MIME_TYPES: &[&str] = &["application/zip", "application/x-zip-compressed"];

/// A trait which callers can implement to get progress updates as an unzip job runs.
///
/// Entry events are reported from the blocking reader task in archive order.  Upload events are
/// reported from the upload tasks and can interleave arbitrarily.
#[allow(unused_variables)]
pub trait UnzipProgressCallback: Sync + Send {
    /// The archive passed all limit checks.  No files have been extracted yet.
    fn archive_inspected(&self, entries: usize, total_uncompressed_size: u64) {}

    /// A directory entry was skipped
    fn entry_skipped(&self, name: &str) {}

    /// An entry was fully decompressed into memory and is about to be handed to the uploader
    fn entry_extracted(&self, key: &str, size: u64) {}

    fn upload_starting(&self, key: &str, size: u64, strategy: UploadStrategy) {}

    fn upload_finished(&self, key: &str, size: u64) {}

    /// The upload failed.  The job continues, and the error will be in the report.
    fn upload_failed(&self, key: &str, error: &FileOpError) {}

    /// All uploads have settled
    fn uploads_finished(&self, succeeded: usize, failed: usize, duration: Duration) {}
}

/// An unzip of one archive, ready to run
pub struct UnzipJob {
    config: Config,
    descriptor: UnzipDescriptor,
    data: Bytes,
    store: Box<dyn BlobStore>,
}

impl std::fmt::Debug for UnzipJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnzipJob")
            .field("descriptor", &self.descriptor)
            .field("archive_size", &self.data.len())
            .field("store", &self.store.name())
            .finish()
    }
}

impl UnzipJob {
    pub fn new(
        config: Config,
        descriptor: UnzipDescriptor,
        data: Bytes,
        store: Box<dyn BlobStore>,
    ) -> Self {
        Self {
            config,
            descriptor,
            data,
            store,
        }
    }

    /// Alternative to [`Self::run`] for callers that do not care about progress information.
    pub async fn run_without_progress(self) -> Result<UnzipReport> {
        struct NoProgress {}
        impl UnzipProgressCallback for NoProgress {}

        self.run(NoProgress {}).await
    }

    /// Run the job, returning only when every launched upload has settled.
    ///
    /// An error means the archive as a whole was rejected or could not be read.  Uploads of
    /// files extracted before such an error are still waited on, but their outcomes are not
    /// reported.  Failures to upload individual files are not errors; they are reported in the
    /// returned [`UnzipReport`].
    pub async fn run<Progress>(self, progress: Progress) -> Result<UnzipReport>
    where
        Progress: UnzipProgressCallback + 'static,
    {
        let span = info_span!("unzip",
            bucket = %self.descriptor.bucket,
            prefix = %self.descriptor.prefix,
            overwrite = self.descriptor.overwrite);

        async move {
            info!(archive_size = self.data.len(), "Starting unzip job");

            let progress: Arc<dyn UnzipProgressCallback> = Arc::new(progress);
            let limits = ArchiveLimits::from(&self.config);

            // Entries are already fully in memory by the time they're sent, so don't let the
            // reader get far ahead of the uploads
            let (task_sender, task_receiver) = mpsc::channel(1);

            let reader_fut = {
                let progress = progress.clone();
                let descriptor = self.descriptor.clone();
                let reader_span = info_span!("read_zip_entries_blocking");

                tokio::task::spawn_blocking(move || {
                    let _guard = reader_span.enter();

                    debug!("Starting blocking zip read task");

                    match Self::read_zip_entries_blocking(
                        self.data,
                        limits,
                        descriptor,
                        progress,
                        task_sender,
                    ) {
                        Ok(()) => {
                            debug!("Blocking zip read task completed successfully");

                            Ok(())
                        }
                        Err(e) => {
                            error!(err = ?e, "Blocking zip read task failed");

                            Err(e)
                        }
                    }
                })
            };

            let dispatcher_fut = dispatch::dispatch_uploads(
                self.config.max_concurrent_uploads,
                self.store,
                progress,
                task_receiver,
            );

            // Wait for both to finish and only then look at results, so no upload is left
            // running when this returns
            let (reader_result, dispatcher_result) = futures::join!(reader_fut, dispatcher_fut);
            let reader_result =
                reader_result.with_context(|_| crate::error::SpawnBlockingSnafu {})?;

            // A reader error is the more meaningful one, unless it only failed because the
            // dispatcher went away
            let report = match reader_result {
                Ok(()) => dispatcher_result?,
                Err(FileOpError::UnzipAborted) => {
                    dispatcher_result?;

                    return crate::error::UnzipAbortedSnafu {}.fail();
                }
                Err(e) => {
                    return Err(e);
                }
            };

            info!(
                succeeded = report.succeeded().count(),
                failed = report.failed().count(),
                "Finished unzip job"
            );

            Ok(report)
        }
        .instrument(span)
        .await
    }

    /// Blocking worker that checks the archive, then decompresses every regular file and pushes
    /// it onto the channel for the dispatcher to upload.
    fn read_zip_entries_blocking(
        data: Bytes,
        limits: ArchiveLimits,
        descriptor: UnzipDescriptor,
        progress: Arc<dyn UnzipProgressCallback>,
        task_sender: mpsc::Sender<UploadTask>,
    ) -> Result<()> {
        let inspected = inspect::inspect_archive(data, limits)?;
        progress.archive_inspected(
            inspected.entries.len(),
            inspected.total_uncompressed_size(),
        );

        let InspectedArchive {
            mut archive,
            entries,
        } = inspected;

        for entry in entries {
            // Names are decoded before directories are filtered out, so an undecodable directory
            // name fails the job just like an undecodable file name
            let name = names::decode_entry_name(&entry.raw_name)?;

            if entry.is_directory {
                debug!(%name, "Skipping directory entry");
                progress.entry_skipped(&name);

                continue;
            }

            let data = Self::read_entry(&mut archive, &entry, &name, limits.max_entry_size)?;
            let task = UploadTask::new(
                &descriptor.bucket,
                &descriptor.prefix,
                &name,
                descriptor.overwrite,
                data,
            );

            debug!(%name, key = %task.key, len = task.data.len(), "Extracted zip entry");
            progress.entry_extracted(&task.key, task.data.len() as u64);

            if task_sender.blocking_send(task).is_err() {
                debug!("Upload dispatcher dropped the receiver; aborting blocking reader task");

                return crate::error::UnzipAbortedSnafu {}.fail();
            }
        }

        debug!("Completed reading all zip entries");

        Ok(())
    }

    /// Decompress one entry entirely into memory.
    ///
    /// The declared size was checked during inspection, but the header can lie, so the read is
    /// capped at the limit here too.
    fn read_entry(
        archive: &mut zip::ZipArchive<Cursor<Bytes>>,
        entry: &ArchiveEntry,
        name: &str,
        limit: u64,
    ) -> Result<Bytes> {
        let file = archive
            .by_index(entry.index)
            .with_context(|_| crate::error::OpenEntrySnafu { name })?;

        // The declared size is only a hint; the buffer grows past this if the entry is larger
        let capacity = entry
            .uncompressed_size
            .min(limit)
            .min(MAX_INITIAL_ENTRY_BUFFER);
        let mut data = BytesMut::with_capacity(capacity as usize).writer();
        std::io::copy(&mut file.take(limit.saturating_add(1)), &mut data)
            .with_context(|_| crate::error::ExtractEntrySnafu { name })?;
        let data = data.into_inner().freeze();

        let size = data.len() as u64;
        ensure!(
            size <= limit,
            crate::error::EntryTooLargeSnafu { name, size, limit }
        );

        Ok(data)
    }
}

/// The `unzip` file operation.
///
/// Fetches the zip archive named in the request, expands it, and writes every file in it to the
/// bucket named in the command.  The output is the JSON form of [`UnzipReport`].
#[derive(Clone, Debug)]
pub struct Unzipper {
    config: Config,
    store: Box<dyn BlobStore>,
    fetcher: SourceFetcher,
}

impl Unzipper {
    pub fn new(config: Config, store: Box<dyn BlobStore>, fetcher: SourceFetcher) -> Self {
        Self {
            config,
            store,
            fetcher,
        }
    }

    /// Validate the request, fetch the archive and run the job
    pub async fn unzip(&self, request: &OperationRequest) -> Result<UnzipReport> {
        let descriptor: UnzipDescriptor = request.cmd.parse()?;

        ensure!(
            ZIP_MIME_TYPES.contains(&request.src.mime_type.as_str()),
            crate::error::UnsupportedMimeTypeSnafu {
                operation: OPERATION,
                mime_type: &request.src.mime_type,
                expected: "application/zip or application/x-zip-compressed"
            }
        );

        let limit = self.config.unzip_max_zip_file_length;
        ensure!(
            request.src.size <= limit,
            crate::error::SourceTooLargeSnafu {
                operation: OPERATION,
                size: request.src.size,
                limit
            }
        );

        let source = SourceArchive::from_url(&request.src.url)?;
        let data = self.fetcher.fetch(&source).await?;

        UnzipJob::new(self.config.clone(), descriptor, data, self.store.clone())
            .run_without_progress()
            .await
    }
}

#[async_trait::async_trait]
impl FileOperation for Unzipper {
    fn name(&self) -> &'static str {
        OPERATION
    }

    #[instrument(skip(self, request), fields(req_id = %request.req_id))]
    async fn run(&self, request: &OperationRequest) -> Result<OperationOutput> {
        let report = self.unzip(request).await?;

        let json = serde_json::to_value(&report)
            .with_context(|_| crate::error::SerializeResultSnafu { operation: OPERATION })?;

        Ok(OperationOutput::Json(json))
    }
}
