//! Testing helpers for use writing unit and integration tests of the `fileop` crate
//!
//! This is internal to `fileop` and is not intended for use by any other crates.  Breaking changes
//! can be made at any time.
//!
//! Note that this crate depends on `fileop`, so only `fileop`'s integration tests can use the
//! helpers that take or return `fileop` types.  Unit tests inside `fileop` see a different copy of
//! the crate.
pub mod archives;
pub mod blobstore;
pub mod logging;
pub mod minio;

/// Test code that reports errors can just cheat and use `eyre`
pub type Result<T> = color_eyre::Result<T>;
