#![doc = include_str!("../README.md")]

mod config;
mod descriptor;
mod error;
mod objstore;
mod operation;
mod render;
mod source;
mod unzip;

pub use config::Config;
pub use descriptor::encode_token;
pub use error::{FileOpError, Result};
pub use objstore::{BlobStore, PutPolicy, S3BlobStore, UploadToken};
pub use operation::*;
pub use render::*;
pub use source::{SourceArchive, SourceFetcher};
pub use unzip::*;
