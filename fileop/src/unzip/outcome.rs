//! Per-file results of an unzip job and the sink that collects them.
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// The result of storing one extracted file.
///
/// Serializes as `{"key": ..., "hash": ...}` on success or `{"key": ..., "error": ...}` on
/// failure.  The type makes it impossible to have both or neither.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadOutcome {
    pub key: String,

    #[serde(flatten)]
    pub status: UploadStatus,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    /// The file was stored; this is the content hash reported by the blob store
    Hash(String),

    /// The file could not be stored
    Error(String),
}

impl UploadOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self.status, UploadStatus::Hash(_))
    }
}

/// The report of a completed unzip job.
///
/// `files` is in the order the uploads completed, not the order of the entries in the archive.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnzipReport {
    pub files: Vec<UploadOutcome>,
}

impl UnzipReport {
    pub fn succeeded(&self) -> impl Iterator<Item = &UploadOutcome> {
        self.files.iter().filter(|outcome| outcome.is_success())
    }

    pub fn failed(&self) -> impl Iterator<Item = &UploadOutcome> {
        self.files.iter().filter(|outcome| !outcome.is_success())
    }
}

/// Collects the outcome of every upload task into an [`UnzipReport`].
///
/// Each upload task gets its own [`OutcomeSender`] and appends exactly one outcome through it.
/// The aggregator owns the receiving end, so no locking is needed; [`Self::finalize`] completes
/// once every sender has been dropped, which means every task has settled.
#[derive(Debug)]
pub(crate) struct ResultAggregator {
    sender: OutcomeSender,
    receiver: mpsc::UnboundedReceiver<UploadOutcome>,
}

/// Handle through which one upload task appends its outcome
#[derive(Clone, Debug)]
pub(crate) struct OutcomeSender(mpsc::UnboundedSender<UploadOutcome>);

impl OutcomeSender {
    pub fn append(self, outcome: UploadOutcome) {
        // The receiver lives in the aggregator which is only dropped after all tasks are joined,
        // so this can't fail in practice
        let _ = self.0.send(outcome);
    }
}

impl ResultAggregator {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();

        Self {
            sender: OutcomeSender(sender),
            receiver,
        }
    }

    /// A new handle for one upload task to report through
    pub fn sender(&self) -> OutcomeSender {
        self.sender.clone()
    }

    /// Build the report from every appended outcome.
    ///
    /// Must only be awaited after all upload tasks have been joined, otherwise it waits for them.
    pub async fn finalize(self) -> UnzipReport {
        let Self {
            sender,
            mut receiver,
        } = self;
        drop(sender);

        let mut files = Vec::new();
        while let Some(outcome) = receiver.recv().await {
            files.push(outcome);
        }

        UnzipReport { files }
    }
}
