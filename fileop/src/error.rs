use snafu::prelude::*;
use std::path::PathBuf;
use url::Url;

pub type Result<T, E = FileOpError> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum FileOpError {
    #[snafu(display("Error reading config file '{}'", path.display()))]
    ReadConfig {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Error parsing config JSON"))]
    ParseConfig { source: serde_json::Error },

    #[snafu(display("The command '{cmd}' doesn't name any registered file operation"))]
    UnknownOperation { cmd: String },

    #[snafu(display("Invalid {operation} command format: '{cmd}'"))]
    InvalidDescriptor { operation: &'static str, cmd: String },

    #[snafu(display("Invalid {operation} parameter '{name}'"))]
    InvalidParameter {
        operation: &'static str,
        name: &'static str,
    },

    #[snafu(display("Unsupported mime type '{mime_type}' for {operation}, expected {expected}"))]
    UnsupportedMimeType {
        operation: &'static str,
        mime_type: String,
        expected: &'static str,
    },

    #[snafu(display("Source file of {size} bytes exceeds the {operation} limit of {limit} bytes"))]
    SourceTooLarge {
        operation: &'static str,
        size: u64,
        limit: u64,
    },

    #[snafu(display("Requested {copies} copies, which exceeds the limit of {limit}"))]
    TooManyCopies { copies: u32, limit: u32 },

    #[snafu(display("The source URL '{url}' is not a valid URL"))]
    InvalidSourceUrl {
        url: String,
        source: url::ParseError,
    },

    #[snafu(display("The source URL '{url}' uses an unsupported scheme.  Supported schemes are: http, https, s3, file"))]
    UnsupportedSourceUrl { url: Url },

    #[snafu(display("Error fetching source data from '{url}'"))]
    FetchSource { url: Url, source: reqwest::Error },

    #[snafu(display("Fetching source data from '{url}' failed with HTTP status {status}"))]
    FetchSourceStatus {
        url: Url,
        status: reqwest::StatusCode,
    },

    #[snafu(display("Error reading source file '{}'", path.display()))]
    ReadSourceFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Error getting source object '{key}' from S3 bucket '{bucket}'"))]
    GetSourceObject {
        bucket: String,
        key: String,
        source: aws_sdk_s3::error::SdkError<aws_sdk_s3::operation::get_object::GetObjectError>,
    },

    #[snafu(display("Error reading body of source object '{key}' from S3 bucket '{bucket}'"))]
    ReadSourceObject {
        bucket: String,
        key: String,
        source: aws_sdk_s3::primitives::ByteStreamError,
    },

    #[snafu(display("Zip archive of {size} bytes exceeds the limit of {limit} bytes"))]
    OversizedArchive { size: u64, limit: u64 },

    #[snafu(display("Invalid zip archive"))]
    InvalidArchive { source: zip::result::ZipError },

    #[snafu(display("Zip archive has {count} entries, which exceeds the limit of {limit}"))]
    TooManyEntries { count: usize, limit: usize },

    #[snafu(display("Zip entry '{name}' is {size} bytes uncompressed, which exceeds the limit of {limit} bytes"))]
    EntryTooLarge { name: String, size: u64, limit: u64 },

    #[snafu(display("Zip entry name '{raw_name}' is neither valid UTF-8 nor valid GBK"))]
    NameDecoding { raw_name: String },

    #[snafu(display("Error opening the content of zip entry '{name}'"))]
    OpenEntry {
        name: String,
        source: zip::result::ZipError,
    },

    #[snafu(display("Error extracting the content of zip entry '{name}'"))]
    ExtractEntry {
        name: String,
        source: std::io::Error,
    },

    #[snafu(display("The upload dispatcher stopped before all entries were extracted"))]
    UnzipAborted,

    #[snafu(display("The blocking archive reader task panicked or was cancelled"))]
    SpawnBlocking { source: tokio::task::JoinError },

    #[snafu(display("An upload task panicked or was cancelled"))]
    UploadTask { source: tokio::task::JoinError },

    #[snafu(display("Upload token with scope '{scope}' does not permit writing key '{key}'"))]
    TokenScopeMismatch { scope: String, key: String },

    #[snafu(display("Object '{key}' already exists in bucket '{bucket}' and the upload token doesn't permit overwriting it"))]
    ObjectExists { bucket: String, key: String },

    #[snafu(display("Error uploading object '{key}' to S3 bucket '{bucket}'"))]
    PutObject {
        bucket: String,
        key: String,
        source: aws_sdk_s3::error::SdkError<aws_sdk_s3::operation::put_object::PutObjectError>,
    },

    #[snafu(display("Error starting multipart upload of object '{key}' to S3 bucket '{bucket}'"))]
    CreateMultipartUpload {
        bucket: String,
        key: String,
        source: aws_sdk_s3::error::SdkError<
            aws_sdk_s3::operation::create_multipart_upload::CreateMultipartUploadError,
        >,
    },

    #[snafu(display("Error uploading part {part_number} of object '{key}' to S3 bucket '{bucket}'"))]
    UploadPart {
        bucket: String,
        key: String,
        part_number: i32,
        source: aws_sdk_s3::error::SdkError<aws_sdk_s3::operation::upload_part::UploadPartError>,
    },

    #[snafu(display("Error completing multipart upload of object '{key}' to S3 bucket '{bucket}'"))]
    CompleteMultipartUpload {
        bucket: String,
        key: String,
        source: aws_sdk_s3::error::SdkError<
            aws_sdk_s3::operation::complete_multipart_upload::CompleteMultipartUploadError,
        >,
    },

    #[snafu(display("S3 did not return an upload ID for the multipart upload of object '{key}'"))]
    MissingUploadId { key: String },

    #[snafu(display("S3 did not return an ETag for object '{key}'"))]
    MissingETag { key: String },

    #[snafu(display("Error creating temp file for {operation} output"))]
    CreateTempFile {
        operation: &'static str,
        source: std::io::Error,
    },

    #[snafu(display("Error starting renderer '{program}'"))]
    RendererSpawn {
        program: String,
        source: std::io::Error,
    },

    #[snafu(display("Renderer '{program}' exited with {status}"))]
    RendererFailed {
        program: String,
        status: std::process::ExitStatus,
    },

    #[snafu(display("Renderer '{program}' produced no output"))]
    RendererNoOutput { program: String },

    #[snafu(display("Error serializing the {operation} result"))]
    SerializeResult {
        operation: &'static str,
        source: serde_json::Error,
    },
}

impl FileOpError {
    /// Render this error and every error in its source chain as a single line.
    ///
    /// Used where an error is reported as data (the per-file `error` field of an unzip report)
    /// rather than propagated.
    pub fn to_chain_string(&self) -> String {
        use snafu::ErrorCompat;

        self.iter_chain()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join(": ")
    }
}
