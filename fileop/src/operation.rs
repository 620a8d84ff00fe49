//! The boundary between the task runner and the individual file operations.
//!
//! The runner hands each request to an [`OperationRegistry`], which picks the operation by the
//! first segment of the request's command string.
use crate::objstore::S3BlobStore;
use crate::render::{Html2Image, Html2Pdf};
use crate::source::SourceFetcher;
use crate::unzip::Unzipper;
use crate::{Config, Result};
use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, instrument};

/// The source file an operation is applied to, as described by the runner
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    pub url: String,

    #[serde(rename = "mimetype", alias = "mime_type")]
    pub mime_type: String,

    /// Size in bytes as declared by the runner
    #[serde(rename = "fsize", alias = "size")]
    pub size: u64,
}

/// One request to run a file operation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationRequest {
    #[serde(rename = "reqid", alias = "req_id", default)]
    pub req_id: String,

    /// The command descriptor, starting with the operation name
    pub cmd: String,

    pub src: SourceFile,
}

/// What a successful operation produced
#[derive(Clone, Debug, PartialEq)]
pub enum OperationOutput {
    /// A JSON document to return to the caller
    Json(serde_json::Value),

    /// A file on local disk to return to the caller.  The caller owns the file and is
    /// responsible for deleting it.
    File { path: PathBuf, content_type: String },
}

/// A file operation that can be invoked through the [`OperationRegistry`]
#[async_trait::async_trait]
pub trait FileOperation: std::fmt::Debug + Sync + Send + 'static {
    /// The name that selects this operation, the first segment of the command
    fn name(&self) -> &'static str;

    async fn run(&self, request: &OperationRequest) -> Result<OperationOutput>;
}

/// Dispatches requests to the registered operations by name
#[derive(Clone, Debug, Default)]
pub struct OperationRegistry {
    operations: HashMap<&'static str, Arc<dyn FileOperation>>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register all built-in operations.
    ///
    /// `unzip` writes to S3 using the credentials and endpoint in `config`.
    pub async fn from_config(config: &Config) -> Self {
        let store = S3BlobStore::new(config).await;
        let fetcher = SourceFetcher::new(Some(store.client().clone()));

        let mut registry = Self::new();
        registry.register(Unzipper::new(config.clone(), Box::new(store), fetcher));
        registry.register(Html2Image::new(config));
        registry.register(Html2Pdf::new(config));

        registry
    }

    /// Register an operation, replacing any previously registered operation of the same name
    pub fn register(&mut self, operation: impl FileOperation) {
        self.operations.insert(operation.name(), Arc::new(operation));
    }

    pub fn get(&self, name: &str) -> Option<&dyn FileOperation> {
        self.operations.get(name).map(|operation| operation.as_ref())
    }

    /// Names of all registered operations, sorted
    pub fn names(&self) -> Vec<&'static str> {
        let mut names = self.operations.keys().copied().collect::<Vec<_>>();
        names.sort_unstable();

        names
    }

    #[instrument(skip(self, request), fields(req_id = %request.req_id))]
    pub async fn run(&self, request: &OperationRequest) -> Result<OperationOutput> {
        let name = request.cmd.split('/').next().unwrap_or_default();
        let operation = self
            .get(name)
            .with_context(|| crate::error::UnknownOperationSnafu { cmd: &request.cmd })?;

        debug!(operation = operation.name(), "Dispatching request");

        operation.run(request).await
    }
}
