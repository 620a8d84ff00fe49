//! Test helper that implements [`fileop::UnzipProgressCallback`] which keeps a record of every
//! progress update in order so we can write tests that verify behavior or progress reporting
//! functionality.
use crate::Result;
use bytes::Bytes;
use fileop::{Config, FileOpError, UnzipDescriptor, UnzipJob, UnzipProgressCallback, UploadStrategy};
use fileop_testing::archives::{make_zip, TestEntry};
use fileop_testing::blobstore::RecordingBlobStore;
use fileop_testing::logging::test_with_logging;
use more_asserts::*;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone, Debug, PartialEq)]
#[allow(dead_code)] // Not all of these are used in tests but we want to capture all fields for all events
pub(crate) enum UnzipProgressEvent {
    ArchiveInspected {
        entries: usize,
        total_uncompressed_size: u64,
    },

    EntrySkipped {
        name: String,
    },

    EntryExtracted {
        key: String,
        size: u64,
    },

    UploadStarting {
        key: String,
        size: u64,
        strategy: UploadStrategy,
    },

    UploadFinished {
        key: String,
        size: u64,
    },

    UploadFailed {
        key: String,
        error: String,
    },

    UploadsFinished {
        succeeded: usize,
        failed: usize,
        duration: Duration,
    },
}

#[derive(Clone)]
pub(crate) struct TestUnzipProgressCallback {
    events: Arc<Mutex<Vec<UnzipProgressEvent>>>,
}

impl TestUnzipProgressCallback {
    pub fn new() -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn events(&self) -> Vec<UnzipProgressEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Review all updates after a job has run to successful completion, validating that the
    /// updates are all sane and match expected invariants.
    ///
    /// If the unzip job didn't finish successfully then this check should not be applied.
    pub fn sanity_check_updates(&self) {
        let events = self.events();

        // Inspection always comes first, and the summary of all uploads always comes last
        assert_matches::assert_matches!(
            events.first(),
            Some(UnzipProgressEvent::ArchiveInspected { .. })
        );
        assert_matches::assert_matches!(
            events.last(),
            Some(UnzipProgressEvent::UploadsFinished { .. })
        );

        let entries = match &events[0] {
            UnzipProgressEvent::ArchiveInspected { entries, .. } => *entries,
            _ => unreachable!(),
        };

        // Every entry is either skipped or extracted
        assert_eq!(entries, self.skipped().len() + self.extracted().len());

        // Every extracted file has its upload started, and every started upload either finishes
        // or fails
        let mut extracted = self.extracted();
        let mut started = self.started();
        extracted.sort();
        started.sort();
        assert_eq!(extracted, started);

        let (succeeded, failed) = self.uploads_finished();
        assert_eq!(started.len(), succeeded + failed);
        assert_eq!(succeeded, self.finished().len());
        assert_eq!(failed, self.failed().len());

        // No upload can finish before it starts
        for (index, event) in events.iter().enumerate() {
            if let UnzipProgressEvent::UploadFinished { key, .. }
            | UnzipProgressEvent::UploadFailed { key, .. } = event
            {
                let started_at = events
                    .iter()
                    .position(|event| matches!(event, UnzipProgressEvent::UploadStarting { key: k, .. } if k == key))
                    .unwrap();
                assert_lt!(started_at, index);
            }
        }
    }

    /// Names of skipped directory entries, in archive order
    pub fn skipped(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                UnzipProgressEvent::EntrySkipped { name } => Some(name),
                _ => None,
            })
            .collect()
    }

    /// Keys and sizes of extracted files, in archive order
    pub fn extracted(&self) -> Vec<(String, u64)> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                UnzipProgressEvent::EntryExtracted { key, size } => Some((key, size)),
                _ => None,
            })
            .collect()
    }

    pub fn started(&self) -> Vec<(String, u64)> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                UnzipProgressEvent::UploadStarting { key, size, .. } => Some((key, size)),
                _ => None,
            })
            .collect()
    }

    pub fn finished(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                UnzipProgressEvent::UploadFinished { key, .. } => Some(key),
                _ => None,
            })
            .collect()
    }

    pub fn failed(&self) -> Vec<(String, String)> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                UnzipProgressEvent::UploadFailed { key, error } => Some((key, error)),
                _ => None,
            })
            .collect()
    }

    /// The succeeded and failed counts from the single uploads finished event
    pub fn uploads_finished(&self) -> (usize, usize) {
        let totals = self
            .events()
            .into_iter()
            .filter_map(|event| match event {
                UnzipProgressEvent::UploadsFinished {
                    succeeded, failed, ..
                } => Some((succeeded, failed)),
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(1, totals.len());

        totals[0]
    }

    fn report(&self, event: UnzipProgressEvent) {
        self.events.lock().unwrap().push(event)
    }
}

impl UnzipProgressCallback for TestUnzipProgressCallback {
    fn archive_inspected(&self, entries: usize, total_uncompressed_size: u64) {
        self.report(UnzipProgressEvent::ArchiveInspected {
            entries,
            total_uncompressed_size,
        })
    }

    fn entry_skipped(&self, name: &str) {
        self.report(UnzipProgressEvent::EntrySkipped {
            name: name.to_string(),
        })
    }

    fn entry_extracted(&self, key: &str, size: u64) {
        self.report(UnzipProgressEvent::EntryExtracted {
            key: key.to_string(),
            size,
        })
    }

    fn upload_starting(&self, key: &str, size: u64, strategy: UploadStrategy) {
        self.report(UnzipProgressEvent::UploadStarting {
            key: key.to_string(),
            size,
            strategy,
        })
    }

    fn upload_finished(&self, key: &str, size: u64) {
        self.report(UnzipProgressEvent::UploadFinished {
            key: key.to_string(),
            size,
        })
    }

    fn upload_failed(&self, key: &str, error: &FileOpError) {
        self.report(UnzipProgressEvent::UploadFailed {
            key: key.to_string(),
            error: error.to_string(),
        })
    }

    fn uploads_finished(&self, succeeded: usize, failed: usize, duration: Duration) {
        self.report(UnzipProgressEvent::UploadsFinished {
            succeeded,
            failed,
            duration,
        })
    }
}

fn descriptor() -> UnzipDescriptor {
    UnzipDescriptor {
        bucket: "progress".to_string(),
        prefix: "p/".to_string(),
        overwrite: false,
    }
}

async fn run_with_progress(
    data: Bytes,
    store: &RecordingBlobStore,
    progress: &TestUnzipProgressCallback,
) -> fileop::Result<fileop::UnzipReport> {
    UnzipJob::new(
        Config::default(),
        descriptor(),
        data,
        Box::new(store.clone()),
    )
    .run(progress.clone())
    .await
}

#[test]
fn progress_of_successful_unzip() -> Result<()> {
    test_with_logging(async move {
        let data = make_zip(&[
            TestEntry::dir("docs"),
            TestEntry::file("docs/a.bin", "10 KiB"),
            TestEntry::file("b.bin", "3 KiB"),
        ])?;
        let store = RecordingBlobStore::new();
        let progress = TestUnzipProgressCallback::new();

        run_with_progress(data, &store, &progress).await?;

        progress.sanity_check_updates();

        assert_eq!(
            UnzipProgressEvent::ArchiveInspected {
                entries: 3,
                total_uncompressed_size: 13 * 1024
            },
            progress.events()[0]
        );
        assert_eq!(vec!["docs/".to_string()], progress.skipped());
        assert_eq!(
            vec![
                ("p/docs/a.bin".to_string(), 10 * 1024),
                ("p/b.bin".to_string(), 3 * 1024)
            ],
            progress.extracted()
        );
        assert_eq!((2, 0), progress.uploads_finished());

        // Small files all go in one request
        assert!(progress.events().iter().all(|event| !matches!(
            event,
            UnzipProgressEvent::UploadStarting {
                strategy: UploadStrategy::Resumable { .. },
                ..
            }
        )));

        Ok(())
    })
}

#[test]
fn progress_reports_failed_uploads() -> Result<()> {
    test_with_logging(async move {
        let data = make_zip(&[
            TestEntry::file("a.bin", "1 KiB"),
            TestEntry::file("b.bin", "1 KiB"),
        ])?;
        let store = RecordingBlobStore::new();
        store.insert_object("progress", "p/b.bin", "already here");
        let progress = TestUnzipProgressCallback::new();

        let report = run_with_progress(data, &store, &progress).await?;

        progress.sanity_check_updates();

        assert_eq!(1, report.failed().count());
        assert_eq!((1, 1), progress.uploads_finished());
        assert_eq!(vec!["p/a.bin".to_string()], progress.finished());

        let failed = progress.failed();
        assert_eq!(1, failed.len());
        assert_eq!("p/b.bin", failed[0].0);
        assert!(failed[0].1.contains("already exists"));

        Ok(())
    })
}

/// A rejected archive is reported as an error with no progress beyond the inspection
#[test]
fn no_progress_for_rejected_archive() -> Result<()> {
    test_with_logging(async move {
        let entries = (0..11)
            .map(|i| TestEntry::file(format!("{i}.bin"), "10 B"))
            .collect::<Vec<_>>();
        let data = make_zip(&entries)?;
        let store = RecordingBlobStore::new();
        let progress = TestUnzipProgressCallback::new();

        let result = run_with_progress(data, &store, &progress).await;

        assert!(result.is_err());
        assert!(progress.extracted().is_empty());
        assert!(progress.started().is_empty());
        assert!(!progress
            .events()
            .iter()
            .any(|event| matches!(event, UnzipProgressEvent::ArchiveInspected { .. })));

        Ok(())
    })
}
