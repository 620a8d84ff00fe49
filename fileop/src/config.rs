use crate::Result;
use serde::Deserialize;
use snafu::prelude::*;
use std::path::Path;
use url::Url;

const DEFAULT_MAX_ZIP_FILE_LENGTH: u64 = 1024 * 1024 * 1024;
const DEFAULT_MAX_FILE_LENGTH: u64 = 100 * 1024 * 1024;
const DEFAULT_MAX_FILE_COUNT: usize = 10;
const DEFAULT_MAX_CONCURRENT_UPLOADS: usize = 100;
const DEFAULT_MAX_PAGE_SIZE: u64 = 10 * 1024 * 1024;
const DEFAULT_MAX_PDF_COPIES: u32 = 10;

/// The configuration settings shared by all file operations.
///
/// Usually loaded from the JSON job config file with [`Config::from_json_file`].  Any limit that
/// is missing or set to `0` falls back to its default.
#[derive(Clone, Debug, Hash, PartialEq, Eq, Deserialize)]
#[cfg_attr(feature = "clap", derive(clap::Parser))]
#[serde(default)]
pub struct Config {
    /// Access key used to authenticate with the blob store.
    ///
    /// If neither this nor `secret_key` are set, credentials are taken from the environment.
    #[cfg_attr(feature = "clap", clap(long, global = true))]
    pub access_key: Option<String>,

    /// Secret key matching `access_key`
    #[cfg_attr(feature = "clap", clap(long, global = true))]
    pub secret_key: Option<String>,

    /// Use a custom S3 endpoint instead of AWS.
    ///
    /// Use this to operate on a non-Amazon S3-compatible service.
    #[cfg_attr(feature = "clap", clap(long, global = true, value_name = "URL"))]
    pub s3_endpoint: Option<Url>,

    /// The region of the blob store.  If not set the region is taken from the environment.
    #[cfg_attr(feature = "clap", clap(long, global = true))]
    pub region: Option<String>,

    /// Maximum size in bytes of a zip archive that `unzip` will accept
    #[cfg_attr(feature = "clap", clap(long, default_value = "1073741824", global = true))]
    pub unzip_max_zip_file_length: u64,

    /// Maximum uncompressed size in bytes of any single entry in a zip archive
    #[cfg_attr(feature = "clap", clap(long, default_value = "104857600", global = true))]
    pub unzip_max_file_length: u64,

    /// Maximum number of entries (files and directories) in a zip archive
    #[cfg_attr(feature = "clap", clap(long, default_value = "10", global = true))]
    pub unzip_max_file_count: usize,

    /// The maximum number of uploads of extracted files that run at the same time.
    ///
    /// Every extracted file waiting for an upload slot is held in memory, so this also bounds
    /// the memory used by an unzip job.
    #[cfg_attr(feature = "clap", clap(long, default_value = "100", global = true))]
    pub max_concurrent_uploads: usize,

    /// Maximum size in bytes of a page that `html2image` will render
    #[cfg_attr(feature = "clap", clap(long, default_value = "10485760", global = true))]
    pub html2image_max_page_size: u64,

    /// Maximum size in bytes of a page that `html2pdf` will render
    #[cfg_attr(feature = "clap", clap(long, default_value = "10485760", global = true))]
    pub html2pdf_max_page_size: u64,

    /// Maximum number of copies `html2pdf` will put in one document
    #[cfg_attr(feature = "clap", clap(long, default_value = "10", global = true))]
    pub html2pdf_max_copies: u32,

    /// Path or name of the `wkhtmltoimage` binary
    #[cfg_attr(feature = "clap", clap(long, default_value = "wkhtmltoimage", global = true))]
    pub wkhtmltoimage_path: String,

    /// Path or name of the `wkhtmltopdf` binary
    #[cfg_attr(feature = "clap", clap(long, default_value = "wkhtmltopdf", global = true))]
    pub wkhtmltopdf_path: String,
}

impl Default for Config {
    fn default() -> Self {
        // XXX: This is duplicated here and in the `clap` attributes, there's no better way unless
        // the lib crate unconditionally takes a clap dependency
        Self {
            access_key: None,
            secret_key: None,
            s3_endpoint: None,
            region: None,
            unzip_max_zip_file_length: DEFAULT_MAX_ZIP_FILE_LENGTH,
            unzip_max_file_length: DEFAULT_MAX_FILE_LENGTH,
            unzip_max_file_count: DEFAULT_MAX_FILE_COUNT,
            max_concurrent_uploads: DEFAULT_MAX_CONCURRENT_UPLOADS,
            html2image_max_page_size: DEFAULT_MAX_PAGE_SIZE,
            html2pdf_max_page_size: DEFAULT_MAX_PAGE_SIZE,
            html2pdf_max_copies: DEFAULT_MAX_PDF_COPIES,
            wkhtmltoimage_path: "wkhtmltoimage".to_string(),
            wkhtmltopdf_path: "wkhtmltopdf".to_string(),
        }
    }
}

impl Config {
    /// Load the config from a JSON job config file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).with_context(|_| {
            crate::error::ReadConfigSnafu {
                path: path.to_path_buf(),
            }
        })?;

        Self::from_json_str(&json)
    }

    /// Parse the config from a JSON string
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).with_context(|_| crate::error::ParseConfigSnafu {})?;

        Ok(config.normalized())
    }

    /// Replace any zero limit with its default.
    ///
    /// Job config files traditionally use `0` to mean "not set".
    pub fn normalized(mut self) -> Self {
        let defaults = Self::default();

        if self.unzip_max_zip_file_length == 0 {
            self.unzip_max_zip_file_length = defaults.unzip_max_zip_file_length;
        }
        if self.unzip_max_file_length == 0 {
            self.unzip_max_file_length = defaults.unzip_max_file_length;
        }
        if self.unzip_max_file_count == 0 {
            self.unzip_max_file_count = defaults.unzip_max_file_count;
        }
        if self.max_concurrent_uploads == 0 {
            self.max_concurrent_uploads = defaults.max_concurrent_uploads;
        }
        if self.html2image_max_page_size == 0 {
            self.html2image_max_page_size = defaults.html2image_max_page_size;
        }
        if self.html2pdf_max_page_size == 0 {
            self.html2pdf_max_page_size = defaults.html2pdf_max_page_size;
        }
        if self.html2pdf_max_copies == 0 {
            self.html2pdf_max_copies = defaults.html2pdf_max_copies;
        }

        self
    }
}
